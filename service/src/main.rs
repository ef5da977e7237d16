//! PayFlow Ledger Admin Binary
//!
//! Applies the ledger schema and audits wallet balances against history.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payflow_common::WalletId;
use payflow_ledger::{LedgerAuditor, PgLedgerStore};
use payflow_service::LedgerConfig;

/// PayFlow ledger administration
#[derive(Parser, Debug)]
#[command(name = "payflow-ledger")]
#[command(about = "PayFlow wallet ledger administration")]
struct Args {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Check wallet balances against completed transactions
    Audit {
        /// Audit a single wallet
        #[arg(long)]
        wallet: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LedgerConfig::from_env();
    if let Some(url) = args.database_url {
        config.store.database_url = url;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = PgLedgerStore::connect(&config.store.pg_options()).await?;

    match args.command {
        Command::Migrate => {
            store.migrate().await?;
            info!("Migrations applied");
        }
        Command::Audit { wallet } => {
            let auditor = LedgerAuditor::new(Arc::new(store));

            let clean = match wallet {
                Some(id) => {
                    let id = WalletId::parse(&id)
                        .map_err(|e| anyhow::anyhow!("Invalid wallet id {id}: {e}"))?;
                    let audit = auditor.verify_wallet(id).await?;
                    println!("{}", serde_json::to_string_pretty(&audit)?);
                    audit.is_balanced()
                }
                None => {
                    let report = auditor.verify_all().await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    report.is_clean()
                }
            };

            if !clean {
                error!("Ledger audit found imbalanced wallets");
                std::process::exit(1);
            }
            info!("Ledger audit clean");
        }
    }

    Ok(())
}
