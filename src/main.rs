use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "funcbox")]
#[command(about = "Plugin-hosting HTTP function server", long_about = None)]
struct Cli {
    /// Config file (defaults to $FUNCBOX_CONFIG or ~/.funcbox/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Plugins root directory
        #[arg(long)]
        plugins_dir: Option<PathBuf>,
        /// Rescan interval such as 30s, 5m or 1h
        #[arg(long)]
        rescan: Option<String>,
    },
    /// Reconcile the route file with the plugins directory
    Refresh,
    /// List loaded functions and their parameters
    List,
    /// Call a function once, e.g. `funcbox call add a=2 b=3`
    Call {
        /// Function name
        name: String,
        /// Parameters as key=value
        params: Vec<String>,
    },
    /// Show invocation statistics
    Stats {
        /// Number of days in the daily report
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Show version information
    Version,
}

fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("funcbox=info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up FUNCBOX_* variables from .env before reading config
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = cli.config.as_deref();

    match cli.command {
        None => cli::serve::cmd_serve(config, cli::serve::ServeOverrides::default()).await?,
        Some(Commands::Serve {
            host,
            port,
            plugins_dir,
            rescan,
        }) => {
            let overrides = cli::serve::ServeOverrides {
                host,
                port,
                plugins_dir,
                rescan,
            };
            cli::serve::cmd_serve(config, overrides).await?;
        }
        Some(Commands::Refresh) => cli::functions::cmd_refresh(config).await?,
        Some(Commands::List) => cli::functions::cmd_list(config).await?,
        Some(Commands::Call { name, params }) => {
            cli::functions::cmd_call(config, &name, &params).await?
        }
        Some(Commands::Stats { days }) => cli::stats::cmd_stats(config, days).await?,
        Some(Commands::Version) => {
            println!("funcbox {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
