use anyhow::{Context, Result};
use clap::Parser;
use leadmarket::api::AppState;
use leadmarket::cli::{self, Cli, Commands};
use leadmarket::identity::HmacIdentityProvider;
use std::sync::Arc;
use tracing::info;

mod main_runtime;

use main_runtime::{
    connect_postgres, init_logging, init_logging_simple, issue_token, load_config, run_server,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    match cli.command.unwrap_or(Commands::Serve { memory: false }) {
        Commands::Serve { memory } => {
            init_logging(&config.logging);
            run_server(config, memory).await.context("server failed")?;
        }
        Commands::Migrate => {
            init_logging(&config.logging);
            connect_postgres(&config)
                .await
                .context("failed to connect to postgres")?
                .migrate()
                .await
                .context("failed to run migrations")?;
        }
        Commands::Seed { count } => {
            init_logging(&config.logging);
            let ledger = connect_postgres(&config)
                .await
                .context("failed to connect to postgres")?;
            ledger.migrate().await.context("failed to run migrations")?;
            let report =
                cli::seed_demo_data(&ledger, &config.marketplace.guaranteed_rules(), count)
                    .await
                    .context("failed to seed demo data")?;
            println!(
                "Seeded {} officers and {} loans ({} guaranteed)",
                report.officers, report.loans, report.guaranteed
            );
        }
        Commands::Token { user_id, role } => {
            init_logging_simple();
            println!("{}", issue_token(&config, user_id, &role)?);
        }
        Commands::Rescore => {
            init_logging(&config.logging);
            let ledger = Arc::new(
                connect_postgres(&config)
                    .await
                    .context("failed to connect to postgres")?,
            );
            let identities = Arc::new(HmacIdentityProvider::new(&config.auth.token_secret));
            let state = AppState::new(ledger, identities, &config.marketplace);
            let count = state
                .allocation
                .rescore_open_loans()
                .await
                .context("failed to rescore open loans")?;
            info!(count, "rescore finished");
            println!("Rescored {count} open loans");
        }
    }

    Ok(())
}
