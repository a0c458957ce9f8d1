use clap::Parser;
use tracing_subscriber::EnvFilter;
use tradewindow::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run(Cli::parse())
}
