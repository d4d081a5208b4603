use anyhow::{Context, Result};
use blob_copy::{
    BlobStorageProvider, CancellationToken, CopierLifetime, CopierRegistration, LocalBlobStore,
};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

mod config;

use config::Command;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + command ---
    let (cfg, command) = config::AppConfig::from_env_and_args()?;

    tracing::debug!("Starting blob-copy with config: {:?}", cfg);

    // Create the SQLite file's parent directory if needed
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // --- Open the local store (applies the schema) ---
    let store = LocalBlobStore::connect(&cfg.database_url, &cfg.storage_dir)
        .await
        .with_context(|| format!("opening local blob store at {}", cfg.database_url))?;

    match command {
        Command::Migrate => {
            tracing::info!("Database migration complete.");
        }
        Command::CreateAccount { name } => {
            let account = store.create_account(&name).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        Command::Put { file, blob } => {
            let blob = cfg.resolve_blob(&blob)?;
            store.create_account(blob.account()).await?;
            store.create_container_if_missing(blob.container()).await?;

            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let row = store
                .upload_blob_stream(&blob, ReaderStream::new(reader))
                .await?;
            tracing::info!("Uploaded {} ({} bytes)", blob, row.content_length);
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        Command::Copy { source, target } => {
            let source = cfg.resolve_blob(&source)?;
            let target = cfg.resolve_blob(&target)?;

            let registration = CopierRegistration::for_provider(
                CopierLifetime::Singleton,
                store.clone(),
                cfg.copy,
            );
            let copier = registration.resolve();

            // Ctrl-C cancels the copy wait
            let cancel = CancellationToken::new();
            let interrupt = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupted, cancelling copy");
                        cancel.cancel();
                    }
                })
            };

            let outcome = copier.server_side_copy(&source, &target, &cancel).await;
            interrupt.abort();

            match outcome? {
                Some(operation) => println!(
                    "copied {} to {} (copy id {}, status {})",
                    operation.source, operation.target, operation.copy_id, operation.status
                ),
                None => println!("nothing copied from {} to {}", source, target),
            }
        }
        Command::Show { blob } => {
            let blob = cfg.resolve_blob(&blob)?;
            let properties = store.get_properties(&blob).await?;
            println!("{}", serde_json::to_string_pretty(&properties)?);
        }
    }

    Ok(())
}
