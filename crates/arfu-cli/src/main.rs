use anyhow::{Context, Result};
use arfu_core::Domain;
use arfu_recon::{export_filename, Reconciler};
use arfu_store::{PgStore, StoreConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arfu-cli")]
#[command(about = "Accounts receivable follow-up: reconcile extracts against the master store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API server.
    Serve,
    /// Apply pending database migrations.
    Migrate,
    /// Normalize a local extract, replace staging, and reconcile.
    Sync {
        #[arg(long)]
        domain: Domain,
        /// Path to the delimited-text extract.
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Write the domain's master export CSV to the current directory.
    Export {
        #[arg(long)]
        domain: Domain,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => arfu_web::serve_from_env().await?,
        Commands::Migrate => {
            let store = PgStore::connect(&StoreConfig::from_env())
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Sync { domain, file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let store = PgStore::connect(&StoreConfig::from_env())
                .await
                .context("connecting to database")?;
            let recon = Reconciler::new(store);
            let staged = recon.ingest_and_stage(domain, &bytes).await?;
            let summary = recon.sync(domain).await?;
            println!(
                "sync complete: run_id={} staged={} deleted={} inserted={}",
                summary.run_id,
                staged.len(),
                summary.deleted,
                summary.inserted
            );
        }
        Commands::Export { domain } => {
            let store = PgStore::connect(&StoreConfig::from_env())
                .await
                .context("connecting to database")?;
            let recon = Reconciler::new(store);
            let csv = recon.export_csv(domain).await?;
            let filename = export_filename(domain, chrono::Utc::now().date_naive());
            std::fs::write(&filename, csv).with_context(|| format!("writing {filename}"))?;
            println!("wrote {filename}");
        }
    }

    Ok(())
}
