//! Operator CLI over a `SQLite`-backed pre-key store.
//!
//! ```bash
//! prekey-admin --db keys.db count 5f0c... --device 1
//! prekey-admin --db keys.db --config prekeys.json delete-account 5f0c...
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use prekey_kv::SqliteKeyValueStore;
use prekey_store::{DeviceId, DynamicMigrationPolicy, Identity, KeysManager, PreKeyStoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prekey-admin")]
#[command(about = "Inspect and clear pre-keys held in a SQLite store", long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(long)]
    db: PathBuf,

    /// JSON file with table names and migration policy
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count remaining one-time pre-keys for a device
    Count {
        identity: Identity,
        #[arg(short, long, default_value_t = DeviceId::PRIMARY.get())]
        device: u8,
    },

    /// List devices holding a PQ last-resort key
    PqDevices { identity: Identity },

    /// Delete one-time pre-keys, for one device or all of them
    DeletePools {
        identity: Identity,
        #[arg(short, long)]
        device: Option<u8>,
    },

    /// Delete every pre-key held under an identity
    DeleteAccount { identity: Identity },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PreKeyStoreConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PreKeyStoreConfig::default(),
    };

    if let Commands::ShowConfig = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = SqliteKeyValueStore::open(&cli.db)
        .with_context(|| format!("opening {}", cli.db.display()))?;
    let policy = Arc::new(DynamicMigrationPolicy::new(config.migration));
    let keys = KeysManager::new(Arc::new(store), &config.tables, policy)?;
    tracing::debug!(db = %cli.db.display(), "opened pre-key store");

    run(&keys, cli.command).await
}

async fn run(keys: &KeysManager, command: Commands) -> Result<()> {
    match command {
        Commands::Count { identity, device } => {
            let device = DeviceId::new(device);
            let ec = keys.get_ec_count(&identity, device).await?;
            let pq = keys.get_pq_count(&identity, device).await?;
            println!("ec: {ec}");
            println!("pq: {pq}");
        }
        Commands::PqDevices { identity } => {
            let mut devices = keys.pq_enabled_devices(&identity);
            while let Some(device) = devices.try_next().await? {
                println!("{device}");
            }
        }
        Commands::DeletePools { identity, device } => match device {
            Some(device) => {
                keys.delete_single_use_pre_keys_for_device(&identity, DeviceId::new(device))
                    .await?;
            }
            None => keys.delete_single_use_pre_keys(&identity).await?,
        },
        Commands::DeleteAccount { identity } => keys.delete_all_keys(&identity).await?,
        Commands::ShowConfig => {}
    }
    Ok(())
}
