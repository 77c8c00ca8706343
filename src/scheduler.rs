//! Recurring job scheduling
//!
//! Two background jobs: the full backup sweep on the operator-configured
//! cadence, and a lightweight fleet-delta check on a short fixed period.
//! Jobs are named handles in a small registry; re-arming the sweep under a
//! new trigger is remove-then-insert under the same id, guarded by the same
//! lock that holds the currently-applied [`ScheduleSpec`], so a concurrent
//! read of "current spec" never races a replacement.
//!
//! Cancellation is only observed between firings: a sweep that is executing
//! when its job is replaced (or the process shuts down) always finishes.

use crate::backup::BackupContext;
use crate::config::DEFAULT_INTERVAL_MINUTES;
use crate::schedule::{ScheduleSpec, ScheduleStore};
use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const SWEEP_JOB: &str = "backup_sweep";
pub const DELTA_CHECK_JOB: &str = "delta_check";

/// Fixed period of the fleet-delta check. Never replaced at runtime.
pub const DELTA_CHECK_PERIOD: Duration = Duration::from_secs(15);
/// How often the polling loop re-reads the schedule from the config store.
pub const SCHEDULE_POLL_PERIOD: Duration = Duration::from_secs(10);

/// When the sweep job should fire next.
pub enum SweepTrigger {
    Cron { schedule: Box<Schedule>, expr: String },
    Every(Duration),
}

impl SweepTrigger {
    /// Build the trigger for a spec. Priority: the spec's cron, its
    /// interval, then the static fallback (cron, then interval). An invalid
    /// cron expression is logged and skipped rather than wedging the
    /// scheduler; the chain always terminates in an interval, so there is
    /// never a state with zero scheduled sweeps.
    pub fn from_spec(spec: &ScheduleSpec, fallback: &ScheduleSpec) -> Self {
        if let Some(trigger) = spec.active_cron().and_then(Self::try_cron) {
            return trigger;
        }
        if let Some(minutes) = spec.interval_minutes.filter(|m| *m > 0) {
            return SweepTrigger::Every(Duration::from_secs(minutes * 60));
        }
        if let Some(trigger) = fallback.active_cron().and_then(Self::try_cron) {
            return trigger;
        }
        let minutes = fallback
            .interval_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);
        SweepTrigger::Every(Duration::from_secs(minutes * 60))
    }

    fn try_cron(expr: &str) -> Option<Self> {
        match Schedule::from_str(&normalize_crontab(expr)) {
            Ok(schedule) => Some(SweepTrigger::Cron {
                schedule: Box::new(schedule),
                expr: expr.to_string(),
            }),
            Err(e) => {
                warn!("ignoring invalid cron expression {:?}: {}", expr, e);
                None
            }
        }
    }

    /// Time until the next firing, computed fresh each loop turn.
    pub fn next_delay(&self) -> Duration {
        match self {
            SweepTrigger::Every(period) => *period,
            SweepTrigger::Cron { schedule, .. } => schedule
                .upcoming(Utc)
                .next()
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .unwrap_or(Duration::from_secs(60)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SweepTrigger::Cron { expr, .. } => format!("cron \"{}\"", expr),
            SweepTrigger::Every(period) => format!("every {}s", period.as_secs()),
        }
    }
}

/// Classic five-field crontab is what operators put in the KV store; the
/// parser wants a seconds column in front.
fn normalize_crontab(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

struct JobHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct SchedulerState {
    jobs: HashMap<&'static str, JobHandle>,
    applied: Option<ScheduleSpec>,
}

pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    fallback: ScheduleSpec,
    ctx: Arc<BackupContext>,
    rearms: AtomicU32,
}

pub type SharedScheduler = Arc<JobScheduler>;

impl JobScheduler {
    /// `fallback` is the static schedule from process configuration, used
    /// whenever the live spec has neither cron nor interval.
    pub fn new(ctx: Arc<BackupContext>, fallback: ScheduleSpec) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                jobs: HashMap::new(),
                applied: None,
            }),
            fallback,
            ctx,
            rearms: AtomicU32::new(0),
        }
    }

    /// Arm (or re-arm) the sweep job for `spec`.
    pub fn arm_sweep(&self, spec: ScheduleSpec) {
        let mut state = self.state.lock();
        self.arm_sweep_locked(&mut state, spec);
    }

    fn arm_sweep_locked(&self, state: &mut SchedulerState, spec: ScheduleSpec) {
        let trigger = SweepTrigger::from_spec(&spec, &self.fallback);
        info!("arming sweep job ({})", trigger.describe());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep_loop(trigger, cancel.clone(), Arc::clone(&self.ctx)));
        if let Some(old) = state.jobs.insert(SWEEP_JOB, JobHandle { cancel, task }) {
            // Only affects future firings; a sweep already executing runs to
            // completion before the old loop observes its token.
            old.cancel.cancel();
        }
        state.applied = Some(spec);
        self.rearms.fetch_add(1, Ordering::Relaxed);
    }

    /// Compare a freshly read spec against the applied one and re-arm the
    /// sweep when they differ by value. The delta-check job is untouched.
    /// Returns whether a re-arm happened.
    pub fn apply_if_changed(&self, fresh: ScheduleSpec) -> bool {
        let mut state = self.state.lock();
        if state.applied.as_ref() == Some(&fresh) {
            return false;
        }
        info!("schedule updated from config store: {:?}", fresh);
        self.arm_sweep_locked(&mut state, fresh);
        true
    }

    /// Start the fixed-period delta-check job. Idempotent; the job is never
    /// rescheduled or replaced.
    pub fn spawn_delta_check(&self) {
        let mut state = self.state.lock();
        if state.jobs.contains_key(DELTA_CHECK_JOB) {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(delta_loop(cancel.clone(), Arc::clone(&self.ctx)));
        state.jobs.insert(DELTA_CHECK_JOB, JobHandle { cancel, task });
    }

    pub fn has_job(&self, id: &str) -> bool {
        self.state.lock().jobs.contains_key(id)
    }

    /// Number of times the sweep job has been armed since startup.
    pub fn rearm_count(&self) -> u32 {
        self.rearms.load(Ordering::Relaxed)
    }

    /// Cancel every job and wait for in-flight work to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<JobHandle> = {
            let mut state = self.state.lock();
            state.jobs.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let _ = handle.task.await;
        }
    }
}

async fn sweep_loop(trigger: SweepTrigger, cancel: CancellationToken, ctx: Arc<BackupContext>) {
    loop {
        let delay = trigger.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                ctx.run_sweep().await;
            }
        }
    }
}

async fn delta_loop(cancel: CancellationToken, ctx: Arc<BackupContext>) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(DELTA_CHECK_PERIOD) => {
                ctx.run_delta_check().await;
            }
        }
    }
}

/// Cooperative polling loop: re-read the live schedule every
/// [`SCHEDULE_POLL_PERIOD`] and re-arm the sweep when it changed.
pub async fn run_schedule_watch(
    scheduler: SharedScheduler,
    store: ScheduleStore,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SCHEDULE_POLL_PERIOD) => {
                let fresh = store.read().await;
                scheduler.apply_if_changed(fresh);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupOrchestrator;
    use crate::fleet::FleetTracker;
    use crate::session::SshConnector;
    use crate::sources::SourceResolver;
    use std::path::PathBuf;

    fn cron_spec(expr: &str) -> ScheduleSpec {
        ScheduleSpec {
            cron: Some(expr.into()),
            interval_minutes: Some(30),
        }
    }

    fn empty_spec() -> ScheduleSpec {
        ScheduleSpec::default()
    }

    // Context whose jobs never actually fire within a test run: every tier
    // is empty and the shortest trigger used here is minutes away.
    fn test_ctx() -> Arc<BackupContext> {
        let fleet = Arc::new(FleetTracker::new());
        let resolver = SourceResolver::new(
            None,
            "routers/".into(),
            PathBuf::from("/nonexistent-secrets"),
            PathBuf::from("/nonexistent.xml"),
        );
        let orchestrator = BackupOrchestrator::new(
            std::env::temp_dir().join("routerback-test-unused"),
            Arc::new(SshConnector::new()),
            fleet.clone(),
        );
        Arc::new(BackupContext::new(resolver, orchestrator, fleet))
    }

    #[test]
    fn test_cron_takes_priority_over_interval() {
        let trigger = SweepTrigger::from_spec(&cron_spec("*/5 * * * *"), &empty_spec());
        assert!(matches!(trigger, SweepTrigger::Cron { .. }));
    }

    #[test]
    fn test_invalid_cron_falls_back_to_interval() {
        let trigger = SweepTrigger::from_spec(&cron_spec("not a cron"), &empty_spec());
        match trigger {
            SweepTrigger::Every(period) => assert_eq!(period, Duration::from_secs(30 * 60)),
            SweepTrigger::Cron { .. } => panic!("invalid cron must not arm"),
        }
    }

    #[test]
    fn test_everything_unset_uses_static_default() {
        let trigger = SweepTrigger::from_spec(&empty_spec(), &empty_spec());
        match trigger {
            SweepTrigger::Every(period) => {
                assert_eq!(period, Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60))
            }
            SweepTrigger::Cron { .. } => panic!("expected interval fallback"),
        }
    }

    #[test]
    fn test_zero_interval_counts_as_unset() {
        let spec = ScheduleSpec {
            cron: None,
            interval_minutes: Some(0),
        };
        let fallback = ScheduleSpec {
            cron: None,
            interval_minutes: Some(45),
        };
        match SweepTrigger::from_spec(&spec, &fallback) {
            SweepTrigger::Every(period) => assert_eq!(period, Duration::from_secs(45 * 60)),
            SweepTrigger::Cron { .. } => panic!("expected interval fallback"),
        }
    }

    #[test]
    fn test_five_field_crontab_is_accepted() {
        assert_eq!(normalize_crontab("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_crontab("0 */5 * * * *"), "0 */5 * * * *");
        let trigger = SweepTrigger::from_spec(&cron_spec("*/5 * * * *"), &empty_spec());
        // Next firing of */5 minutes is at most five minutes out.
        assert!(trigger.next_delay() <= Duration::from_secs(5 * 60));
    }

    #[tokio::test]
    async fn test_spec_change_rearms_sweep_exactly_once() {
        let scheduler = JobScheduler::new(test_ctx(), empty_spec());
        scheduler.arm_sweep(cron_spec("*/5 * * * *"));
        scheduler.spawn_delta_check();
        assert_eq!(scheduler.rearm_count(), 1);

        let fresh = ScheduleSpec {
            cron: None,
            interval_minutes: Some(30),
        };
        assert!(scheduler.apply_if_changed(fresh.clone()));
        assert!(!scheduler.apply_if_changed(fresh.clone()));
        assert!(!scheduler.apply_if_changed(fresh));
        assert_eq!(scheduler.rearm_count(), 2);

        // The delta-check job is never touched by a sweep re-arm.
        assert!(scheduler.has_job(DELTA_CHECK_JOB));
        assert!(scheduler.has_job(SWEEP_JOB));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_delta_check_spawn_is_idempotent() {
        let scheduler = JobScheduler::new(test_ctx(), empty_spec());
        scheduler.spawn_delta_check();
        scheduler.spawn_delta_check();
        assert!(scheduler.has_job(DELTA_CHECK_JOB));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_jobs() {
        let scheduler = JobScheduler::new(test_ctx(), empty_spec());
        scheduler.arm_sweep(empty_spec());
        scheduler.spawn_delta_check();
        scheduler.shutdown().await;
        assert!(!scheduler.has_job(SWEEP_JOB));
        assert!(!scheduler.has_job(DELTA_CHECK_JOB));
    }
}
