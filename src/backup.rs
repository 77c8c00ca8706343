//! Backup orchestration
//!
//! Runs the per-router connect → export → write pipeline, strictly
//! sequentially, and never lets a failure escape past its boundary: each
//! stage fails as one explicit [`BackupError`] kind, logged for the operator
//! and charged to that router only. On success the router's name is unioned
//! into fleet membership so the delta tick doesn't re-announce it.

use crate::fleet::SharedFleetTracker;
use crate::records::{DeviceRecord, ResolvedFleet};
use crate::session::DeviceConnector;
use crate::sources::SourceResolver;
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Per-stage failure while backing up a single router. All variants are
/// local-recoverable: the orchestrator logs and moves to the next router.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("can't connect: {0}")]
    Unreachable(String),
    #[error("export command failed: {0}")]
    ExportFailed(String),
    #[error("can't write backup artifact: {0}")]
    ArtifactWrite(#[from] std::io::Error),
}

/// Outcome of one router within a run, kept for summaries and tests.
#[derive(Debug)]
pub struct BackupOutcome {
    pub name: String,
    pub result: Result<PathBuf, BackupError>,
}

pub struct BackupOrchestrator {
    backup_root: PathBuf,
    connector: Arc<dyn DeviceConnector>,
    fleet: SharedFleetTracker,
}

impl BackupOrchestrator {
    pub fn new(
        backup_root: PathBuf,
        connector: Arc<dyn DeviceConnector>,
        fleet: SharedFleetTracker,
    ) -> Self {
        Self {
            backup_root,
            connector,
            fleet,
        }
    }

    /// Back up every record, one device session at a time. A slow or
    /// unreachable router costs only its own slot in the run.
    pub async fn run_for(&self, records: &[DeviceRecord]) -> Vec<BackupOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let result = self.backup_one(record).await;
            match &result {
                Ok(path) => {
                    info!("success! saved {} in {}", record.name, path.display());
                    self.fleet.observe(&record.name);
                }
                Err(e) => warn!("backup of {} failed: {}", record.name, e),
            }
            outcomes.push(BackupOutcome {
                name: record.name.clone(),
                result,
            });
        }
        outcomes
    }

    async fn backup_one(&self, record: &DeviceRecord) -> Result<PathBuf, BackupError> {
        info!(
            "connecting to {} ({}:{})...",
            record.name, record.host, record.port
        );
        let connector = Arc::clone(&self.connector);
        let target = record.clone();
        // The session transport is blocking; keep it off the runtime workers.
        let mut session =
            match tokio::task::spawn_blocking(move || connector.connect(&target)).await {
                Ok(connected) => connected?,
                Err(e) => {
                    return Err(BackupError::Unreachable(format!("session task aborted: {e}")))
                }
            };

        info!("start export backup...");
        let output = match tokio::task::spawn_blocking(move || session.export()).await {
            Ok(exported) => exported?,
            Err(e) => return Err(BackupError::ExportFailed(format!("export task aborted: {e}"))),
        };

        info!("saving backup to file...");
        let dir = self.backup_root.join(&record.name);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}{}.txt", record.name, timestamp()));
        fs::write(&path, output).await?;
        Ok(path)
    }
}

/// Glue shared by the scheduled jobs: one resolver, one orchestrator, one
/// membership tracker. The gate serialises sweeps so a firing that overlaps
/// a still-running sweep waits instead of doubling the work.
pub struct BackupContext {
    resolver: SourceResolver,
    orchestrator: BackupOrchestrator,
    fleet: SharedFleetTracker,
    sweep_gate: tokio::sync::Mutex<()>,
}

impl BackupContext {
    pub fn new(
        resolver: SourceResolver,
        orchestrator: BackupOrchestrator,
        fleet: SharedFleetTracker,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            fleet,
            sweep_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Full sweep: resolve the fleet and back up everything, membership
    /// regardless.
    pub async fn run_sweep(&self) -> Vec<BackupOutcome> {
        let _gate = self.sweep_gate.lock().await;
        let fleet = self.resolver.resolve().await;
        info!("sweep: backing up {} router(s)", fleet.len());
        let outcomes = self.orchestrator.run_for(&fleet).await;
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            warn!("sweep finished with {}/{} failures", failed, outcomes.len());
        }
        outcomes
    }

    /// Delta tick: back up only routers not seen before, then commit them so
    /// a failing newcomer is announced once, not every 15 seconds.
    pub async fn run_delta_check(&self) -> Vec<BackupOutcome> {
        let resolved = self.resolver.resolve().await;
        let fresh = self.fleet.diff(&resolved);
        if fresh.is_empty() {
            return Vec::new();
        }
        let mut names: Vec<&str> = fresh.iter().map(String::as_str).collect();
        names.sort_unstable();
        info!("new routers detected: {}", names.join(", "));

        let newcomers: ResolvedFleet = resolved
            .into_iter()
            .filter(|r| fresh.contains(&r.name))
            .collect();
        let outcomes = self.orchestrator.run_for(&newcomers).await;
        self.fleet.commit(fresh);
        outcomes
    }
}

/// Artifact timestamp, local time: `DDMMYYYY-HHMMSS`.
fn timestamp() -> String {
    Local::now().format("%d%m%Y-%H%M%S").to_string()
}
