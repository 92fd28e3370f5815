//! proxyui - terminal client for the proxy control backend
//!
//! Usage:
//!   proxyui login <API_URL>     Save the backend address (and --secret)
//!   proxyui watch               Stream traffic, connections, logs and exchanges
//!   proxyui close-all           Close every active proxy connection
//!   proxyui config              Print the backend configuration
//!   proxyui download <KEY>      Resolve a stored exchange body

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use proxyui_cli::config::Config;
use proxyui_common::LogLevel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "proxyui")]
#[command(author = "proxyui Team")]
#[command(version)]
#[command(about = "Watch and control a proxy from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend address, overriding the saved configuration
    #[arg(long, global = true, env = "PROXYUI_API_URL")]
    api_url: Option<String>,

    /// Backend secret, overriding the saved configuration
    #[arg(long, global = true, env = "PROXYUI_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the backend address and secret
    Login {
        /// Backend base address, e.g. http://127.0.0.1:9090
        url: String,
    },

    #[command(flatten)]
    Backend(BackendCommand),
}

/// Commands that run against the saved configuration
#[derive(Subcommand)]
enum BackendCommand {
    /// Stream live events until Ctrl+C
    Watch {
        #[arg(long)]
        no_traffic: bool,

        #[arg(long)]
        no_connections: bool,

        #[arg(long)]
        no_logs: bool,

        #[arg(long)]
        no_mitm: bool,

        /// Minimum log level (DEBUG, INFO, WARN, ERROR)
        #[arg(long)]
        log_level: Option<LogLevel>,
    },

    /// Close every active proxy connection
    CloseAll,

    /// Print the backend configuration
    Config,

    /// Resolve a stored exchange body to a download link
    Download {
        /// Storage key of the body
        key: String,

        /// Open the link in the browser
        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "warn,proxyui_cli=debug,proxyui=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Login { url } => {
            commands::login::run(url, cli.secret).await?;
        }
        Commands::Backend(command) => {
            let config = Config::load()?.with_overrides(cli.api_url, cli.secret);
            run(command, &config).await?;
        }
    }

    Ok(())
}

async fn run(command: BackendCommand, config: &Config) -> Result<()> {
    match command {
        BackendCommand::Watch {
            no_traffic,
            no_connections,
            no_logs,
            no_mitm,
            log_level,
        } => {
            let opts = commands::watch::WatchOptions {
                traffic: !no_traffic,
                connections: !no_connections,
                logs: !no_logs,
                mitm: !no_mitm,
                log_level,
            };
            commands::watch::run(config, opts).await
        }

        BackendCommand::CloseAll => commands::control::close_all(config).await,

        BackendCommand::Config => commands::control::show_config(config).await,

        BackendCommand::Download { key, open } => commands::control::download(config, &key, open).await,
    }
}
