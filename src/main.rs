use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "debugpy_mcp")]
#[command(about = "DAP bridge server for debugging Python under debugpy", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tool-call server listening on STDIO
    Serve {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Set log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { verbose, log_level } => {
            // Stdout carries the protocol; logs go to stderr.
            let level = if verbose { "debug" } else { &log_level };
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();

            if let Err(e) = debugpy_mcp::serve().await {
                tracing::error!("server failed to start: {}", e);
                std::process::exit(1);
            }
        }
    }
}
