use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, LoggingConfig, StoreBackend, StoreConfig, TollgateConfig};
use tollgate::ratelimit::{RateLimitRequest, RateLimiter};
use tollgate::store::{CounterStore, MemoryStore, RedisStore};

/// Fixed-window rate limit checks against a shared counter store.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run rate limit checks for one identity tuple
    Check {
        /// Calling client
        #[arg(long)]
        client_id: String,
        /// User on whose behalf the client calls
        #[arg(long)]
        user_id: String,
        /// Resource being accessed
        #[arg(long)]
        resource: String,
        /// Number of consecutive checks
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Print one JSON object per decision
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = TollgateConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tollgate");

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            client_id,
            user_id,
            resource,
            repeat,
            json,
        } => {
            let store = build_store(&config.store).await?;
            let limiter = RateLimiter::from_config(store, &config.limiter);
            info!(
                limit = limiter.limit(),
                window = ?limiter.window(),
                admission = ?limiter.admission(),
                "Rate limiter initialized"
            );

            let request = RateLimitRequest::new(resource, client_id, user_id);
            let mut admitted = false;

            for attempt in 1..=repeat.max(1) {
                let decision = limiter.evaluate(&request).await;
                admitted = decision.is_admitted(limiter.failure_policy());

                if json {
                    let line = serde_json::json!({
                        "attempt": attempt,
                        "key": request.key().as_str(),
                        "admitted": admitted,
                        "count": decision.count(),
                        "indeterminate": decision.is_indeterminate(),
                    });
                    println!("{}", line);
                } else {
                    println!(
                        "{} {} {}",
                        attempt,
                        if admitted { "ADMIT" } else { "DENY" },
                        decision
                    );
                }
            }

            Ok(if admitted {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Install the global tracing subscriber. Logs go to stderr.
fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory counter store; counters are not shared between instances");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            info!(url = %config.url, "Connecting to Redis counter store");
            let store = RedisStore::connect(&config.url, config.connect_timeout()).await?;
            Ok(Arc::new(store))
        }
    }
}
