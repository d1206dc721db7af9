use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reward_distribution::oracle::UnverifiedBalances;
use reward_distribution::repositories::postgres::{self, PostgresConfig};
use reward_distribution::{Config, EngineParts, RewardEngine};
use serde::Serialize;
use shared_models::{Address, CycleId};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Reward cycle engine for delegated node operators
#[derive(Parser)]
#[command(name = "reward-distribution", version, about = "Compute and claim daily operator rewards")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(long, global = true, env = "REWARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily scheduler until interrupted
    Serve,

    /// Run one cycle now
    RunCycle {
        /// Explicit cycle id for out-of-band runs
        #[arg(long)]
        cycle_id: Option<String>,
    },

    /// Claim a single reward
    Claim {
        #[arg(long)]
        reward_id: Uuid,
        #[arg(long)]
        address: Address,
    },

    /// Claim every unclaimed reward of an address
    ClaimAll {
        #[arg(long)]
        address: Address,
    },

    /// Show an operator's uptime
    Uptime {
        #[arg(long)]
        address: Address,
    },

    /// Show claimed points and reward history of an address
    Points {
        #[arg(long)]
        address: Address,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let pool = postgres::create_pool(&PostgresConfig {
        connection_string: config.database.url.clone(),
        max_connections: config.database.max_connections,
        acquire_timeout: std::time::Duration::from_secs(config.database.acquire_timeout_secs),
    })
    .await
    .context("connecting to database")?;
    postgres::migrate(&pool).await.context("applying migrations")?;

    let engine = RewardEngine::new(EngineParts::postgres(pool, Arc::new(UnverifiedBalances)), &config);

    match cli.command {
        Commands::Serve => serve(&engine, &config).await,
        Commands::RunCycle { cycle_id } => {
            let cycle_id = cycle_id.as_deref().map(CycleId::parse).transpose()?;
            let outcome = engine.run_cycle(cycle_id).await?;
            print_json(&outcome.summary)
        }
        Commands::Claim { reward_id, address } => print_json(&engine.claim_one(reward_id, &address).await?),
        Commands::ClaimAll { address } => print_json(&engine.claim_all(&address).await?),
        Commands::Uptime { address } => print_json(&engine.uptime_report(&address).await?),
        Commands::Points { address } => {
            #[derive(Serialize)]
            struct Points {
                total_claimed_points: i64,
                rewards: Vec<shared_models::RewardRecord>,
            }
            print_json(&Points {
                total_claimed_points: engine.user_claimed_points(&address).await?,
                rewards: engine.rewards_for(&address).await?,
            })
        }
    }
}

async fn serve(engine: &RewardEngine, config: &Config) -> Result<()> {
    info!("starting reward-distribution scheduler");
    let handle = engine.scheduler().spawn();

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested");

    let grace = config.schedule.shutdown_grace();
    if handle.shutdown(grace).await {
        info!("scheduler stopped gracefully");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
