use crate::models::copy::{CopyStatus, status_label};
use std::{io, time::Duration};
use thiserror::Error;

/// Failures reported by a storage provider.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("account `{0}` not found")]
    AccountNotFound(String),
    #[error("container `{container}` not found in account `{account}`")]
    ContainerNotFound { account: String, container: String },
    #[error("blob `{0}` not found")]
    BlobNotFound(String),
    #[error("invalid blob url `{url}`: {reason}")]
    InvalidBlobUrl { url: String, reason: String },
    #[error("{kind} name `{name}` invalid: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),
    #[error("storage provider unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Hard failures of a server-side copy.
///
/// Skips (missing source, equivalent target, copy onto itself) are not errors;
/// they come back as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("copy to {target} timed out after {waited:?}, aborting wait")]
    Timeout { target: String, waited: Duration },
    #[error("copy to {target} did not succeed, copy status: {}", status_label(.status))]
    Failed {
        target: String,
        status: Option<CopyStatus>,
    },
    #[error("copy cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CopyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type CopyResult<T> = Result<T, CopyError>;
