//! routerback daemon entry point
//!
//! Bootstrap order matters: environment and logging first, then shared
//! state, then one synchronous sweep so the system has at least one backup
//! on record, and only then the recurring jobs and the schedule polling
//! loop. An operator interrupt stops the loop and lets in-flight jobs
//! finish.

use anyhow::{Context, Result};
use routerback::backup::{BackupContext, BackupOrchestrator};
use routerback::config::Config;
use routerback::fleet::FleetTracker;
use routerback::kv::KvClient;
use routerback::schedule::ScheduleStore;
use routerback::scheduler::{run_schedule_watch, JobScheduler};
use routerback::session::SshConnector;
use routerback::sources::SourceResolver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // ok if no .env
    tracing_subscriber::fmt().init();

    let config = Config::from_env();
    tokio::fs::create_dir_all(&config.backup_dir)
        .await
        .with_context(|| format!("failed to create backup dir {:?}", config.backup_dir))?;

    let kv = match &config.consul_addr {
        Some(addr) => {
            let client = KvClient::new(
                addr.clone(),
                config.consul_token.clone(),
                config.consul_basic_auth.clone(),
            )
            .context("failed to build KV client")?;
            Some(Arc::new(client))
        }
        None => None,
    };

    let fleet = Arc::new(FleetTracker::new());
    let resolver = SourceResolver::new(
        kv.clone(),
        config.consul_kv_prefix.clone(),
        config.secrets_dir.clone(),
        config.static_config_path.clone(),
    );
    let orchestrator = BackupOrchestrator::new(
        config.backup_dir.clone(),
        Arc::new(SshConnector::new()),
        Arc::clone(&fleet),
    );
    let ctx = Arc::new(BackupContext::new(resolver, orchestrator, fleet));
    let store = ScheduleStore::new(kv, config.consul_settings_prefix.clone());

    info!(
        "routerback starting (backup root: {})",
        config.backup_dir.display()
    );

    // One backup on record before any scheduling, even if setup is slow.
    let initial = store.read().await;
    ctx.run_sweep().await;

    let scheduler = Arc::new(JobScheduler::new(ctx, config.static_schedule()));
    scheduler.arm_sweep(initial);
    scheduler.spawn_delta_check();

    let watch_cancel = CancellationToken::new();
    let watch = tokio::spawn(run_schedule_watch(
        Arc::clone(&scheduler),
        store,
        watch_cancel.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for interrupt")?;
    info!("interrupt received, shutting down (in-flight backups finish)");
    watch_cancel.cancel();
    let _ = watch.await;
    scheduler.shutdown().await;
    Ok(())
}
