//! src/services/local_store.rs
//!
//! LocalBlobStore — a blob storage provider backed by SQLite for metadata and local
//! disk for payloads, sharded beneath
//! `base_path/{account}/{container}/{shard}/{shard}/{blob}`.
//!
//! Several accounts live in one store, each with its own signing key, so copies
//! across accounts can be exercised without a remote service. Server-side copies run
//! on a background task owned by the store; callers only see the copy status change
//! on the target blob.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        account::Account,
        blob::Blob,
        blob_ref::{BlobRef, ContainerRef},
        container::Container,
        copy::{BlobProperties, CopyOperation, CopyStatus, SasPermissions},
    },
    services::{provider::BlobStorageProvider, sas},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const MAX_BLOB_NAME_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;
const ACCOUNT_NAME_MIN_LEN: usize = 3;
const ACCOUNT_NAME_MAX_LEN: usize = 24;

const BLOB_COLUMNS: &str = "id, container_id, name, content_length, content_md5, last_modified, \
                            copy_id, copy_status, copy_source, copy_status_description";

#[derive(Clone)]
pub struct LocalBlobStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where blob payloads are stored.
    pub base_path: PathBuf,
}

/// A payload written to a temporary file next to its final location.
struct StagedPayload {
    tmp_path: PathBuf,
    content_length: i64,
    content_md5: String,
}

impl LocalBlobStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open the database at `database_url` (creating the file if needed), make sure
    /// the payload directory exists and apply the schema.
    pub async fn connect(database_url: &str, base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(Arc::new(db), base_path);
        fs::create_dir_all(&store.base_path).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("applying {} schema statements", statements.len());

        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(())
    }

    /// Create an account with a fresh signing key. Creating an existing account
    /// returns it unchanged.
    pub async fn create_account(&self, name: &str) -> StorageResult<Account> {
        ensure_account_name_safe(name)?;

        let result = sqlx::query(
            "INSERT INTO accounts (name, signing_key, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(sas::generate_key())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() > 0 {
            debug!("created account {}", name);
        }

        self.fetch_account(name).await
    }

    /// Upload a blob from a byte stream.
    ///
    /// - Streams into a temporary file while computing MD5 and size.
    /// - Renames into the final location once fsynced.
    /// - Upserts metadata (overwrite semantics) and clears any copy state.
    ///
    /// The target container must already exist.
    pub async fn upload_blob_stream<S>(&self, blob: &BlobRef, stream: S) -> StorageResult<Blob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        ensure_blob_name_safe(blob.name())?;
        let container = self.require_container(blob.container()).await?;

        let file_path = self.blob_path(blob);
        let staged = stage_payload(&file_path, stream).await?;

        // The upsert takes the database write lock, so no copy commit or delete can
        // land between the metadata change and the rename.
        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let upsert = sqlx::query_as::<_, Blob>(&format!(
            r#"
            INSERT INTO blobs (
                id, container_id, name, content_length, content_md5, last_modified,
                copy_id, copy_status, copy_source, copy_status_description
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL)
            ON CONFLICT(container_id, name) DO UPDATE SET
                content_length = excluded.content_length,
                content_md5 = excluded.content_md5,
                last_modified = excluded.last_modified,
                copy_id = NULL,
                copy_status = NULL,
                copy_source = NULL,
                copy_status_description = NULL
            RETURNING {}
            "#,
            BLOB_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(container.id)
        .bind(blob.name())
        .bind(staged.content_length)
        .bind(&staged.content_md5)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let row = match upsert {
            Ok(row) => row,
            Err(err) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        if let Err(err) = commit_payload(&staged, &file_path).await {
            tx.rollback().await?;
            return Err(StorageError::Io(err));
        }
        tx.commit().await?;

        Ok(row)
    }

    pub async fn upload_blob(&self, blob: &BlobRef, data: Bytes) -> StorageResult<Blob> {
        self.upload_blob_stream(blob, stream::once(async move { Ok::<_, io::Error>(data) }))
            .await
    }

    /// Metadata and an open handle on the payload.
    pub async fn open_blob(&self, blob: &BlobRef) -> StorageResult<(Blob, File)> {
        ensure_blob_name_safe(blob.name())?;
        let row = self
            .find_blob(blob)
            .await?
            .ok_or_else(|| StorageError::BlobNotFound(blob.to_string()))?;

        let file = File::open(self.blob_path(blob)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::BlobNotFound(blob.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((row, file))
    }

    async fn fetch_account(&self, name: &str) -> StorageResult<Account> {
        sqlx::query_as::<_, Account>(
            "SELECT name, signing_key, created_at FROM accounts WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::AccountNotFound(name.to_string()))
    }

    async fn find_container(&self, container: &ContainerRef) -> StorageResult<Option<Container>> {
        ensure_container_name_safe(container.name())?;
        let row = sqlx::query_as::<_, Container>(
            "SELECT id, account, name, created_at FROM containers WHERE account = ? AND name = ?",
        )
        .bind(container.account())
        .bind(container.name())
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn require_container(&self, container: &ContainerRef) -> StorageResult<Container> {
        self.find_container(container)
            .await?
            .ok_or_else(|| StorageError::ContainerNotFound {
                account: container.account().to_string(),
                container: container.name().to_string(),
            })
    }

    async fn find_blob(&self, blob: &BlobRef) -> StorageResult<Option<Blob>> {
        let Some(container) = self.find_container(blob.container()).await? else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, Blob>(&format!(
            "SELECT {} FROM blobs WHERE container_id = ? AND name = ?",
            BLOB_COLUMNS
        ))
        .bind(container.id)
        .bind(blob.name())
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    fn container_root(&self, account: &str, container: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(account);
        path.push(container);
        path
    }

    /// Two-level shard names: the first two bytes of MD5(account/container/blob) in hex.
    fn blob_shards(blob: &BlobRef) -> (String, String) {
        let digest = md5::compute(format!(
            "{}/{}/{}",
            blob.account(),
            blob.container_name(),
            blob.name()
        ));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, blob: &BlobRef) -> PathBuf {
        let (shard_a, shard_b) = Self::blob_shards(blob);
        let mut path = self.container_root(blob.account(), blob.container_name());
        path.push(shard_a);
        path.push(shard_b);
        path.push(blob.name());
        path
    }

    /// Body of the background copy task. The target row is only touched while it
    /// still belongs to `copy_id`; a newer upload or copy wins.
    async fn run_copy(&self, copy_id: Uuid, source: BlobRef, target: BlobRef) {
        let outcome = self.copy_payload(copy_id, &source, &target).await;

        let err = match outcome {
            Ok(true) => {
                debug!("copy {} into {} finished", copy_id, target);
                return;
            }
            Ok(false) => {
                debug!("copy {} into {} was superseded", copy_id, target);
                return;
            }
            Err(err) => err,
        };

        warn!("copy {} from {} to {} failed: {}", copy_id, source, target, err);
        let update = sqlx::query(
            "UPDATE blobs SET copy_status = ?, copy_status_description = ?
             WHERE copy_id = ?",
        )
        .bind(CopyStatus::Failed)
        .bind(err.to_string())
        .bind(copy_id)
        .execute(&*self.db)
        .await;

        if let Err(err) = update {
            warn!("could not record outcome of copy {}: {}", copy_id, err);
        }
    }

    /// Copy the payload bytes. Returns `false` when the copy was superseded before the
    /// payload could be committed.
    async fn copy_payload(
        &self,
        copy_id: Uuid,
        source: &BlobRef,
        target: &BlobRef,
    ) -> StorageResult<bool> {
        let (_, file) = self.open_blob(source).await?;
        let target_path = self.blob_path(target);
        let staged = stage_payload(&target_path, ReaderStream::new(file)).await?;
        self.commit_copy(copy_id, &staged, &target_path).await
    }

    /// Mark the copy successful and move its payload into place in one transaction.
    ///
    /// The guarded update takes the database write lock before the rename, so an
    /// upload or delete of the target either lands before it (the copy is dropped)
    /// or waits for the commit.
    async fn commit_copy(
        &self,
        copy_id: Uuid,
        staged: &StagedPayload,
        target_path: &Path,
    ) -> StorageResult<bool> {
        let discard = || fs::remove_file(&staged.tmp_path);

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = discard().await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let claimed = sqlx::query(
            "UPDATE blobs SET copy_status = ?, content_md5 = ?, content_length = ?,
                    last_modified = ?
             WHERE copy_id = ?",
        )
        .bind(CopyStatus::Success)
        .bind(&staged.content_md5)
        .bind(staged.content_length)
        .bind(Utc::now())
        .bind(copy_id)
        .execute(&mut *tx)
        .await;

        match claimed {
            Ok(result) if result.rows_affected() > 0 => {}
            Ok(_) => {
                tx.rollback().await?;
                let _ = discard().await;
                return Ok(false);
            }
            Err(err) => {
                let _ = discard().await;
                return Err(StorageError::Sqlx(err));
            }
        }

        if let Err(err) = commit_payload(staged, target_path).await {
            tx.rollback().await?;
            return Err(StorageError::Io(err));
        }
        tx.commit().await?;

        Ok(true)
    }

    /// Remove empty directories from `start` up to, but excluding, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStorageProvider for LocalBlobStore {
    async fn exists(&self, blob: &BlobRef) -> StorageResult<bool> {
        ensure_blob_name_safe(blob.name())?;
        Ok(self.find_blob(blob).await?.is_some())
    }

    async fn create_container_if_missing(&self, container: &ContainerRef) -> StorageResult<bool> {
        ensure_container_name_safe(container.name())?;
        self.fetch_account(container.account()).await?;

        let result = sqlx::query(
            "INSERT INTO containers (id, account, name, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(account, name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(container.account())
        .bind(container.name())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        fs::create_dir_all(self.container_root(container.account(), container.name())).await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, blob: &BlobRef) -> StorageResult<()> {
        ensure_blob_name_safe(blob.name())?;
        let row = self
            .find_blob(blob)
            .await?
            .ok_or_else(|| StorageError::BlobNotFound(blob.to_string()))?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM blobs WHERE id = ?")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        let file_path = self.blob_path(blob);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => {
                tx.rollback().await?;
                return Err(StorageError::Io(err));
            }
        }
        tx.commit().await?;

        if let Some(parent) = file_path.parent() {
            let root = self.container_root(blob.account(), blob.container_name());
            self.prune_empty_dirs(parent, &root).await;
        }

        Ok(())
    }

    async fn get_properties(&self, blob: &BlobRef) -> StorageResult<BlobProperties> {
        ensure_blob_name_safe(blob.name())?;
        self.find_blob(blob)
            .await?
            .map(BlobProperties::from)
            .ok_or_else(|| StorageError::BlobNotFound(blob.to_string()))
    }

    async fn mint_read_capability(
        &self,
        blob: &BlobRef,
        permissions: SasPermissions,
        expires_on: DateTime<Utc>,
    ) -> StorageResult<Url> {
        let account = self.fetch_account(blob.account()).await?;
        sas::sign(&account.signing_key, blob, permissions, expires_on)
    }

    async fn start_copy_from_uri(
        &self,
        source: &Url,
        target: &BlobRef,
    ) -> StorageResult<CopyOperation> {
        let account = self
            .fetch_account(BlobRef::from_url(source)?.account())
            .await?;
        let (source, permissions) = sas::verify(&account.signing_key, source, Utc::now())?;
        if !permissions.read {
            return Err(StorageError::AuthorizationFailed(
                "capability does not grant read access".into(),
            ));
        }

        ensure_blob_name_safe(target.name())?;
        let source_row = self
            .find_blob(&source)
            .await?
            .ok_or_else(|| StorageError::BlobNotFound(source.to_string()))?;
        let target_container = self.require_container(target.container()).await?;

        let copy_id = Uuid::new_v4();
        let started_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO blobs (
                id, container_id, name, content_length, content_md5, last_modified,
                copy_id, copy_status, copy_source, copy_status_description
            ) VALUES (?, ?, ?, ?, NULL, ?, ?, ?, ?, NULL)
            ON CONFLICT(container_id, name) DO UPDATE SET
                content_length = excluded.content_length,
                content_md5 = NULL,
                last_modified = excluded.last_modified,
                copy_id = excluded.copy_id,
                copy_status = excluded.copy_status,
                copy_source = excluded.copy_source,
                copy_status_description = NULL
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(target_container.id)
        .bind(target.name())
        .bind(source_row.content_length)
        .bind(started_at)
        .bind(copy_id)
        .bind(CopyStatus::Pending)
        .bind(source.url().as_str())
        .execute(&*self.db)
        .await?;

        debug!("copy {} from {} to {} accepted", copy_id, source, target);

        let store = self.clone();
        let task_source = source.clone();
        let task_target = target.clone();
        tokio::spawn(async move {
            store.run_copy(copy_id, task_source, task_target).await;
        });

        Ok(CopyOperation {
            copy_id,
            source: source.url().clone(),
            target: target.url().clone(),
            status: CopyStatus::Pending,
            started_at,
        })
    }
}

/// Stream `stream` into a temporary file in the directory of `file_path`.
///
/// Computes size and MD5 on the way and fsyncs before returning. The temporary file
/// is removed on any error.
async fn stage_payload<S>(file_path: &Path, stream: S) -> io::Result<StagedPayload>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let parent = file_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::new(ErrorKind::Other, "blob path missing parent directory"))?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let mut content_length: i64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        content_length += chunk.len() as i64;
        digest.consume(&chunk);
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    Ok(StagedPayload {
        tmp_path,
        content_length,
        content_md5: general_purpose::STANDARD.encode(digest.compute().0),
    })
}

async fn commit_payload(staged: &StagedPayload, file_path: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(&staged.tmp_path, file_path).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(file_path).await?;
            fs::rename(&staged.tmp_path, file_path).await?;
        } else {
            let _ = fs::remove_file(&staged.tmp_path).await;
            return Err(err);
        }
    }
    Ok(())
}

/// Blob names: 1-1024 bytes, no leading `/`, no `.` or `..` segments, no control
/// characters or backslashes.
fn ensure_blob_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidName {
        kind: "blob",
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() || name.len() > MAX_BLOB_NAME_LEN {
        return Err(invalid("must be between 1 and 1024 bytes"));
    }
    if name.starts_with('/') {
        return Err(invalid("must not start with `/`"));
    }
    if name.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(invalid("must not contain `.` or `..` path segments"));
    }
    if name
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid("must not contain control characters or backslashes"));
    }
    Ok(())
}

/// Container names: 3-63 lowercase letters, digits and hyphens, starting and ending
/// with a letter or digit, without consecutive hyphens.
fn ensure_container_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidName {
        kind: "container",
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if len < CONTAINER_NAME_MIN_LEN || len > CONTAINER_NAME_MAX_LEN {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("--") {
        return Err(invalid("cannot contain consecutive hyphens"));
    }
    Ok(())
}

fn ensure_account_name_safe(name: &str) -> StorageResult<()> {
    let len = name.len();
    if len < ACCOUNT_NAME_MIN_LEN
        || len > ACCOUNT_NAME_MAX_LEN
        || !name.chars().all(|c| matches!(c, 'a'..='z' | '0'..='9'))
    {
        return Err(StorageError::InvalidName {
            kind: "account",
            name: name.to_string(),
            reason: "must be 3 to 24 lowercase letters or digits".into(),
        });
    }
    Ok(())
}
