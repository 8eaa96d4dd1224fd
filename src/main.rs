use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use entitlements::api::{self, retry_on_conflict, AppState};
use entitlements::config::Config;
use entitlements::db::{Database, FeatureCatalog};
use entitlements::models::{FeatureName, Subject};
use entitlements::service::{self, FeatureManagementService};

#[derive(Parser)]
#[command(name = "entl")]
#[command(about = "Per-user and per-workspace feature entitlements")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// JSON file with extra catalog entries to register on startup
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Register the built-in catalog (and optionally a seed file), then exit
    Seed {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Grant a feature to a subject (user:<id> or workspace:<id>)
    Grant {
        subject: String,
        feature: String,
        /// Exact version; defaults to the latest registered
        #[arg(long)]
        version: Option<u32>,
        #[arg(long, default_value = "granted via cli")]
        reason: String,
    },
    /// Deactivate a subject's feature, keeping its history
    Revoke { subject: String, feature: String },
    /// Check whether a subject currently holds a feature
    Check { subject: String, feature: String },
    /// Show every assignment a subject has had
    List { subject: String },
    /// Show the subjects currently holding a feature
    Subjects { feature: String },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "entitlements=debug,tower_http=debug".into()),
    );

    // Logs go to stderr so command output on stdout stays machine-readable
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Open and migrate the database, then run the catalog bootstrap.
fn bootstrap(config: &Config, catalog_override: Option<PathBuf>) -> anyhow::Result<Database> {
    let db = match &config.database_path {
        Some(path) => Database::open(path.clone())?,
        None => Database::open_default()?,
    };
    db.migrate()?;

    let catalog = FeatureCatalog::new(db.clone());
    catalog.seed_defaults()?;
    if let Some(path) = catalog_override.or_else(|| config.catalog_path.clone()) {
        let definitions = FeatureCatalog::load_definitions(&path)?;
        catalog.seed(&definitions)?;
        tracing::info!(
            "Seeded {} catalog entries from {}",
            definitions.len(),
            path.display()
        );
    }

    Ok(db)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(config: &Config, management: FeatureManagementService, port: u16) -> anyhow::Result<()> {
    let app = api::create_router(AppState::new(management, config.conflict_retries));

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Entitlements API listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env();
    let catalog_override = match &cli.command {
        Some(Commands::Serve { catalog, .. }) | Some(Commands::Seed { catalog }) => {
            catalog.clone()
        }
        _ => None,
    };
    let db = bootstrap(&config, catalog_override)?;
    let management = service::build(&db, config.management());

    match cli.command {
        Some(Commands::Serve { port, .. }) => serve(&config, management, port).await?,
        Some(Commands::Seed { .. }) => {
            let features = management.features().catalog().list()?;
            tracing::info!("Catalog ready with {} entries", features.len());
            print_json(&features)?;
        }
        Some(Commands::Grant {
            subject,
            feature,
            version,
            reason,
        }) => {
            let subject = Subject::parse(&subject)?;
            let name = FeatureName::parse(&feature)?;
            let activation = retry_on_conflict(config.conflict_retries, || {
                management.add_capability(&subject, name, version, &reason)
            })?;
            print_json(&activation)?;
        }
        Some(Commands::Revoke { subject, feature }) => {
            let subject = Subject::parse(&subject)?;
            let name = FeatureName::parse(&feature)?;
            let removed = retry_on_conflict(config.conflict_retries, || {
                management.remove_capability(&subject, name)
            })?;
            if removed {
                println!("Revoked {} from {}", name, subject);
            } else {
                println!("{} did not hold {}", subject, name);
            }
        }
        Some(Commands::Check { subject, feature }) => {
            let subject = Subject::parse(&subject)?;
            let name = FeatureName::parse(&feature)?;
            println!("{}", management.has_capability(&subject, name)?);
        }
        Some(Commands::List { subject }) => {
            let subject = Subject::parse(&subject)?;
            print_json(&management.features().get_features(&subject)?)?;
        }
        Some(Commands::Subjects { feature }) => {
            let name = FeatureName::parse(&feature)?;
            print_json(&management.list_capability_subjects(name)?)?;
        }
        None => serve(&config, management, 3000).await?,
    }

    Ok(())
}
