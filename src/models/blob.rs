//! Represents a blob stored in a container.

use crate::models::copy::{BlobProperties, CopyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row of a single blob. The payload lives on disk, not in this struct.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Blob {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent container.
    pub container_id: Uuid,

    /// Blob name (path-like identifier within the container).
    pub name: String,

    /// Size in bytes.
    pub content_length: i64,

    /// Base64 MD5 of the payload. Unset while a copy into this blob is pending.
    pub content_md5: Option<String>,

    /// Timestamp when the blob was last modified.
    pub last_modified: DateTime<Utc>,

    /// Identifier of the last server-side copy into this blob.
    pub copy_id: Option<Uuid>,

    pub copy_status: Option<CopyStatus>,

    /// Source of the last copy, without its signature.
    pub copy_source: Option<String>,

    pub copy_status_description: Option<String>,
}

impl From<Blob> for BlobProperties {
    fn from(blob: Blob) -> Self {
        Self {
            content_length: blob.content_length,
            content_md5: blob.content_md5,
            last_modified: blob.last_modified,
            copy_id: blob.copy_id,
            copy_status: blob.copy_status,
            copy_source: blob.copy_source,
            copy_status_description: blob.copy_status_description,
        }
    }
}
