use anyhow::{Context, Result};
use blob_copy::{BlobRef, CopySettings};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, time::Duration};
use url::Url;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL that relative blob paths (`account/container/blob`) resolve against.
    pub endpoint: Url,
    pub copy: CopySettings,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Server-side blob copy against a local blob store")]
pub struct Args {
    /// Directory where blob payloads are stored (overrides BLOB_COPY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BLOB_COPY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Endpoint for relative blob paths (overrides BLOB_COPY_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Delay between copy status polls (overrides BLOB_COPY_POLL_INTERVAL_MS)
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Give up waiting on a pending copy after this long (overrides BLOB_COPY_TIMEOUT_SECS)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply the metadata schema and exit
    Migrate,
    /// Create a storage account
    CreateAccount { name: String },
    /// Upload a local file as a blob, creating its account and container if needed
    Put { file: PathBuf, blob: String },
    /// Server-side copy of one blob into another
    Copy { source: String, target: String },
    /// Print the properties of a blob as JSON
    Show { blob: String },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_storage =
            env::var("BLOB_COPY_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("BLOB_COPY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/blob_copy.db".into());
        let env_endpoint =
            env::var("BLOB_COPY_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:10000/".into());
        let env_poll_ms = env_u64("BLOB_COPY_POLL_INTERVAL_MS")?;
        let env_timeout_secs = env_u64("BLOB_COPY_TIMEOUT_SECS")?;

        // --- Merge ---
        let defaults = CopySettings::default();
        let copy = CopySettings {
            poll_interval: args
                .poll_interval_ms
                .or(env_poll_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            copy_timeout: args
                .timeout_secs
                .or(env_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.copy_timeout),
            ..defaults
        };

        let endpoint = args.endpoint.unwrap_or(env_endpoint);
        let cfg = Self {
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            endpoint: parse_endpoint(&endpoint)?,
            copy,
        };

        Ok((cfg, args.command))
    }

    /// Accept either an absolute blob URL or a path relative to the endpoint.
    pub fn resolve_blob(&self, input: &str) -> Result<BlobRef> {
        let url = match Url::parse(input) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .endpoint
                .join(input.trim_start_matches('/'))
                .with_context(|| format!("resolving `{}` against {}", input, self.endpoint))?,
            Err(err) => return Err(err).with_context(|| format!("parsing blob url `{}`", input)),
        };

        Ok(BlobRef::from_url(&url)?)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn parse_endpoint(value: &str) -> Result<Url> {
    let mut endpoint =
        Url::parse(value).with_context(|| format!("parsing endpoint `{}`", value))?;
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> AppConfig {
        AppConfig {
            storage_dir: "./data/blobs".into(),
            database_url: "sqlite::memory:".into(),
            endpoint: parse_endpoint(endpoint).unwrap(),
            copy: CopySettings::default(),
        }
    }

    #[test]
    fn relative_paths_resolve_against_endpoint() {
        let cfg = config("http://127.0.0.1:10000");

        let blob = cfg.resolve_blob("devacct/media/a.txt").unwrap();
        assert_eq!(blob.url().as_str(), "http://127.0.0.1:10000/devacct/media/a.txt");
        assert_eq!(blob.account(), "devacct");

        let blob = cfg.resolve_blob("/devacct/media/a.txt").unwrap();
        assert_eq!(blob.container_name(), "media");
    }

    #[test]
    fn absolute_urls_are_used_as_is() {
        let cfg = config("http://127.0.0.1:10000/");

        let blob = cfg
            .resolve_blob("https://prodacct.blob.example.net/media/a.txt")
            .unwrap();
        assert_eq!(blob.account(), "prodacct");
    }

    #[test]
    fn command_line_parses() {
        let args = Args::try_parse_from([
            "blob-copy",
            "--poll-interval-ms",
            "250",
            "copy",
            "devacct/media/a.txt",
            "backupacct/media/a.txt",
        ])
        .unwrap();

        assert_eq!(args.poll_interval_ms, Some(250));
        assert!(matches!(args.command, Command::Copy { .. }));
    }
}
