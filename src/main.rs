use anyhow::{Context, Result};
use backup_sidecar::api::{BackupSession, ObjectKey, RestoreSession};
use backup_sidecar::config::{self, expand_tilde, Config};
use backup_sidecar::managers::logging::{init_console_logging, init_logging, LoggingConfig};
use backup_sidecar::managers::{
    BackupSessionController, Controller, RestoreSessionController, SessionContext,
};
use backup_sidecar::store::Stores;
use backup_sidecar::utils::{RealExecutor, RealResticOps};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "backup-sidecar")]
#[command(about = "Runs restic backup and restore sessions for one workload", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/backup-sidecar/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SessionKind {
    Backup,
    Restore,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch backup and restore sessions until interrupted
    Run,

    /// Run one reconcile pass for a session
    Process {
        #[arg(long, value_enum)]
        kind: SessionKind,

        /// Session name, in the configured namespace
        #[arg(long)]
        session: String,
    },

    /// Apply an output.json written by an earlier run to its session
    UpdateStatus {
        #[arg(long, value_enum)]
        kind: SessionKind,

        #[arg(long)]
        session: String,

        #[arg(long)]
        output_file: PathBuf,
    },

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Validate = cli.command {
        init_console_logging();
        let config = config::load_config(&cli.config)?;
        println!("Configuration is valid!");
        println!("Target: {} {}", config.target.kind, config.target.name);
        println!("Namespace: {}", config.identity.namespace);
        println!("Hosts per session: {}", config.target.total_hosts());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&LoggingConfig::from_config(&config))?;

    let state_dir = expand_tilde(&config.store.state_dir);
    let stores = Stores::on_disk(&state_dir)
        .with_context(|| format!("Failed to open state directory {:?}", state_dir))?;
    let ctx = build_context(config, stores);
    let namespace = ctx.config.identity.namespace.clone();

    match cli.command {
        Commands::Run => run(ctx).await?,

        Commands::Process { kind, session } => {
            let key = ObjectKey::new(&namespace, &session);
            match kind {
                SessionKind::Backup => BackupSessionController::new(ctx).process(&key).await?,
                SessionKind::Restore => RestoreSessionController::new(ctx).process(&key).await?,
            }
        }

        Commands::UpdateStatus {
            kind,
            session,
            output_file,
        } => {
            let key = ObjectKey::new(&namespace, &session);
            let status = ctx.status.clone();
            // Pushgateway uses a blocking client
            let phase = tokio::task::spawn_blocking(move || match kind {
                SessionKind::Backup => status
                    .update_backup_status_from_file(&key, &output_file)
                    .map(|s| s.status.phase),
                SessionKind::Restore => status
                    .update_restore_status_from_file(&key, &output_file)
                    .map(|s| s.status.phase),
            })
            .await??;
            println!("Session {} is {:?}", session, phase);
        }

        Commands::Validate => {}
    }

    Ok(())
}

fn build_context(config: Config, stores: Stores) -> SessionContext {
    let identity = if config.identity.pod_name.is_empty() {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "backup-sidecar".to_string())
    } else {
        config.identity.pod_name.clone()
    };
    let executor = Arc::new(RealExecutor::new());
    let restic = Arc::new(RealResticOps::new(
        executor.clone(),
        config.restic.binary.clone(),
        config.restic.timeout(),
    ));
    SessionContext::new(config, stores, executor, restic, identity)
}

async fn run(ctx: SessionContext) -> Result<()> {
    let namespace = ctx.config.identity.namespace.clone();
    let queue = ctx.config.queue.clone();
    let (stop_tx, stop_rx) = watch::channel(false);

    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.changed().await;
    };

    let backups = Controller::<BackupSession>::new(ctx.stores.backup_sessions.clone(), &namespace, &queue)
        .run(Arc::new(BackupSessionController::new(ctx.clone())), stopped(stop_rx.clone()));
    let restores = Controller::<RestoreSession>::new(ctx.stores.restore_sessions.clone(), &namespace, &queue)
        .run(Arc::new(RestoreSessionController::new(ctx.clone())), stopped(stop_rx));

    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutting down");
        let _ = stop_tx.send(true);
    };

    tokio::join!(backups, restores, signal);
    Ok(())
}
