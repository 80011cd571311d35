//! tandem CLI, the noun-verb surface over the platform core
//!
//! Exit codes: 0 success, 2 validation, 3 unresolved conflict, 4 circuit
//! open, 5 timeout, 1 anything else.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tandem_core::error::Classify;
use tandem_core::PlatformConfig;
use tandem_platform::Platform;

#[derive(Parser)]
#[command(name = "tandem", version, about = "Hybrid command platform")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "TANDEM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, env = "TANDEM_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// State synchronization operations
    Sync {
        #[command(subcommand)]
        command: commands::SyncCommand,
    },
    /// Route and execute a command through the platform
    Run {
        /// The command line to route, e.g. "/sc:analyze main.ts"
        line: Vec<String>,
        /// User tag for personalized routing
        #[arg(long)]
        user: Option<String>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tandem=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match PlatformConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.kind().exit_code());
        }
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let platform = match Platform::builder(config).build().await {
        Ok(platform) => platform,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let result = match cli.command {
        Commands::Sync { command } => commands::run_sync(&platform, command).await,
        Commands::Run { line, user } => commands::run_command(&platform, line, user).await,
    };

    match result {
        Ok(output) => {
            match serde_json::to_string_pretty(&output) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    platform.shutdown().await;
                    std::process::exit(1);
                }
            }
            platform.shutdown().await;
        }
        Err(e) => {
            eprintln!("error: {e}");
            let code = e.exit_code();
            platform.shutdown().await;
            std::process::exit(code);
        }
    }
}
