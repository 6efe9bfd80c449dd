//! VitalFlow worker binary.
//!
//! `vitalflow-worker run` consumes the spool directory until interrupted
//! (SIGINT/SIGTERM), or until the inbox drains with `--exit-when-empty`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vitalflow_logging::{init_logging, LogConfig};
use vitalflow_worker::{Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "vitalflow-worker", about = "VitalFlow sensor-data ingestion worker")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true, env = "VITALFLOW_VERBOSE")]
    verbose: bool,

    /// Emit stderr logs as JSON lines
    #[arg(long, global = true, env = "VITALFLOW_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume messages until interrupted
    Run {
        /// Config file (defaults to $VITALFLOW_HOME/config.toml)
        #[arg(short, long, env = "VITALFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Override worker.concurrency
        #[arg(long, env = "VITALFLOW_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Override source.spool_dir
        #[arg(long, env = "VITALFLOW_SPOOL_DIR")]
        spool_dir: Option<PathBuf>,

        /// Stop once the inbox is empty
        #[arg(long)]
        exit_when_empty: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new("vitalflow-worker");
    log_config.verbose = cli.verbose;
    log_config.json = cli.json;
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::from(1);
    }

    let result = match cli.command {
        Commands::Run {
            config,
            concurrency,
            spool_dir,
            exit_when_empty,
        } => run(config, concurrency, spool_dir, exit_when_empty),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(
    config_path: Option<PathBuf>,
    concurrency: Option<usize>,
    spool_dir: Option<PathBuf>,
    exit_when_empty: bool,
) -> Result<()> {
    let config_path = config_path.unwrap_or_else(vitalflow_protocol::paths::default_config_path);
    let mut config = WorkerConfig::load(&config_path)?;
    if let Some(concurrency) = concurrency {
        config.worker.concurrency = concurrency;
    }
    if let Some(spool_dir) = spool_dir {
        config.source.spool_dir = spool_dir;
    }
    if exit_when_empty {
        config.source.exit_when_empty = true;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("vitalflow-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let worker = Worker::from_config(&config).await?;
        let cancel = CancellationToken::new();
        spawn_signal_handlers(cancel.clone());

        let snapshot = worker.run(cancel).await?;
        info!(
            processed = snapshot.processed,
            settled = snapshot.settled(),
            "Worker exited"
        );
        Ok(())
    })
}

fn spawn_signal_handlers(cancel: CancellationToken) {
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => error!("Error setting up signal handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal");
                cancel.cancel();
            }
            Err(err) => error!("Error setting up SIGTERM handler: {}", err),
        }
    });
}
