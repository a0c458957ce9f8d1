//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::line_source;
use crate::adapters::sqlite_adapter::SqliteResultStore;
use crate::domain::config::{ServiceConfig, StoreBackend};
use crate::domain::dispatcher::Dispatcher;
use crate::domain::error::TradeWindowError;
use crate::domain::trade_index::TradeIndex;
use crate::ports::config_port::ConfigPort;
use crate::ports::result_sink::ResultSink;
use crate::service::{self, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "tradewindow", about = "Trade / market-window P&L reconciliation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume messages and store window results
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// `<topic>\t<json>` lines; stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Create the result schema
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print stored window results, newest first
    Pnls {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Run { config, input } => run_service(&config, input).map(|_| ()),
        Command::InitDb { config } => run_init_db(&config),
        Command::Pnls { config, limit } => run_pnls(&config, limit),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TradeWindowError> {
    FileConfigAdapter::from_file(path)
        .map(|adapter| adapter.with_env_overrides(std::env::vars()))
        .map_err(|e| TradeWindowError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Connect to the configured backend and make sure the schema exists.
pub fn open_store(
    config: &dyn ConfigPort,
    backend: StoreBackend,
) -> Result<Arc<dyn ResultSink + Send + Sync>, TradeWindowError> {
    match backend {
        StoreBackend::Sqlite => {
            let store = SqliteResultStore::from_config(config)?;
            store.initialize_schema()?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            use crate::adapters::postgres_adapter::PostgresResultStore;
            let store = PostgresResultStore::from_config(config)?;
            store.initialize_schema()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => Err(TradeWindowError::invalid_config(
            "store",
            "backend",
            "built without the postgres feature",
        )),
    }
}

pub fn run_service(
    config_path: &Path,
    input: Option<PathBuf>,
) -> Result<RunSummary, TradeWindowError> {
    info!(path = %config_path.display(), "loading config");
    let adapter = load_config(config_path)?;
    let config = ServiceConfig::from_config(&adapter)?;

    let store = open_store(&adapter, config.backend)?;
    info!(backend = %config.backend, "result store ready");

    let runtime = tokio::runtime::Runtime::new().map_err(|e| TradeWindowError::Startup {
        reason: format!("tokio runtime: {e}"),
    })?;

    let index = Arc::new(TradeIndex::new(config.granularity));
    let dispatcher = Arc::new(Dispatcher::new(index, store).with_retry(config.retry));

    let summary = runtime.block_on(run_pipeline(Arc::clone(&dispatcher), &config, input));

    // stdin reads may still sit on a blocking thread
    runtime.shutdown_timeout(Duration::from_secs(5));
    drop(dispatcher);
    info!("result store closed");

    Ok(summary)
}

async fn run_pipeline(
    dispatcher: Arc<Dispatcher>,
    config: &ServiceConfig,
    input: Option<PathBuf>,
) -> RunSummary {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let source_stop = stop_rx.clone();
    let source = tokio::spawn(async move {
        line_source::forward_from(input.as_deref(), tx, source_stop).await
    });
    let signal = tokio::spawn(async move {
        service::shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let summary = service::run(dispatcher, config, rx, stop_rx).await;

    signal.abort();
    match source.await {
        Ok(Ok(forwarded)) => info!(forwarded, "source closed"),
        Ok(Err(e)) => error!(error = %e, "message source failed"),
        Err(e) => error!(error = %e, "message source task failed"),
    }
    summary
}

fn run_init_db(config_path: &Path) -> Result<(), TradeWindowError> {
    let adapter = load_config(config_path)?;
    let config = ServiceConfig::from_config(&adapter)?;
    open_store(&adapter, config.backend)?;
    info!(backend = %config.backend, "schema ready");
    Ok(())
}

fn run_pnls(config_path: &Path, limit: usize) -> Result<(), TradeWindowError> {
    let adapter = load_config(config_path)?;
    let config = ServiceConfig::from_config(&adapter)?;
    let store = open_store(&adapter, config.backend)?;

    println!("start_time,end_time,profit_loss");
    for result in store.list_recent(limit)? {
        println!(
            "{},{},{}",
            result.start_time.to_rfc3339(),
            result.end_time.to_rfc3339(),
            result.profit_loss
        );
    }
    Ok(())
}
