//! Server-side blob copy: skip when the target already holds the same content,
//! otherwise let the storage provider copy the blob and wait, bounded, for it to
//! finish.
//!
//! The orchestrator ([`BlobCopyService`]) only depends on the
//! [`BlobStorageProvider`] trait. [`LocalBlobStore`] implements that trait on top of
//! SQLite and the local filesystem.

pub mod errors;
pub mod models;
pub mod services;
pub mod settings;

pub use errors::{CopyError, CopyResult, StorageError, StorageResult};
pub use models::{
    blob_ref::{BlobRef, ContainerRef},
    copy::{BlobProperties, CopyOperation, CopyStatus, SasPermissions},
};
pub use services::{
    copy_service::{BlobCopier, BlobCopyService},
    local_store::LocalBlobStore,
    provider::BlobStorageProvider,
    registrar::{CopierLifetime, CopierRegistration},
    timer::{Timer, TokioTimer},
};
pub use settings::CopySettings;
pub use tokio_util::sync::CancellationToken;
