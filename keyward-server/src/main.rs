mod config;
mod load;
mod server;

use clap::{Parser, Subcommand};
use config::Config;
use load::{LoadOptions, run_load};
use server::run_server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Lock-guarded user records on a shared key-value store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Drive concurrent create requests against a running server
    Load {
        /// Base URL of the server
        #[arg(short, long, default_value = "http://127.0.0.1:3000")]
        target: String,

        #[arg(short, long, default_value_t = 1000)]
        requests: usize,

        #[arg(short, long, default_value_t = 16)]
        concurrency: usize,

        /// Use the same username for every request instead of random ones
        #[arg(short, long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "keyward=info,keyward_server=info,keyward_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Keyward server with config: {}", config);

            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            tracing::info!(
                "Bind: {}, Store: {}, Lock instances: {}",
                cfg.bind_addr,
                cfg.store.backend.as_str(),
                cfg.lock.instances.len().max(1)
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Load {
            target,
            requests,
            concurrency,
            username,
        } => {
            let options = LoadOptions {
                target,
                requests,
                concurrency,
                username,
            };

            match run_load(options).await {
                Ok(report) => {
                    tracing::info!(
                        "Load finished: {} requests, {} created, {} conflicts",
                        report.total(),
                        report.count(201),
                        report.count(409)
                    );
                }
                Err(e) => {
                    tracing::error!("Load failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
