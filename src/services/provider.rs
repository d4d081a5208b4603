//! The storage capabilities a server-side copy depends on.

use crate::{
    errors::StorageResult,
    models::{
        blob_ref::{BlobRef, ContainerRef},
        copy::{BlobProperties, CopyOperation, SasPermissions},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

/// Object-storage backend as seen by the copy orchestrator.
///
/// Implementations talk to whatever service actually stores the bytes. Every call is a
/// suspension point and may be dropped mid-flight when the caller cancels.
#[async_trait]
pub trait BlobStorageProvider: Send + Sync {
    async fn exists(&self, blob: &BlobRef) -> StorageResult<bool>;

    /// Returns `true` when the container had to be created.
    async fn create_container_if_missing(&self, container: &ContainerRef) -> StorageResult<bool>;

    async fn delete(&self, blob: &BlobRef) -> StorageResult<()>;

    async fn get_properties(&self, blob: &BlobRef) -> StorageResult<BlobProperties>;

    /// Signed URL granting `permissions` on `blob` until `expires_on`.
    async fn mint_read_capability(
        &self,
        blob: &BlobRef,
        permissions: SasPermissions,
        expires_on: DateTime<Utc>,
    ) -> StorageResult<Url>;

    /// Ask the provider to copy `source` into `target` on its side. Returns as soon as
    /// the copy is accepted; completion is observed through `get_properties`.
    async fn start_copy_from_uri(
        &self,
        source: &Url,
        target: &BlobRef,
    ) -> StorageResult<CopyOperation>;
}

#[async_trait]
impl<P: BlobStorageProvider + ?Sized> BlobStorageProvider for Arc<P> {
    async fn exists(&self, blob: &BlobRef) -> StorageResult<bool> {
        (**self).exists(blob).await
    }

    async fn create_container_if_missing(&self, container: &ContainerRef) -> StorageResult<bool> {
        (**self).create_container_if_missing(container).await
    }

    async fn delete(&self, blob: &BlobRef) -> StorageResult<()> {
        (**self).delete(blob).await
    }

    async fn get_properties(&self, blob: &BlobRef) -> StorageResult<BlobProperties> {
        (**self).get_properties(blob).await
    }

    async fn mint_read_capability(
        &self,
        blob: &BlobRef,
        permissions: SasPermissions,
        expires_on: DateTime<Utc>,
    ) -> StorageResult<Url> {
        (**self)
            .mint_read_capability(blob, permissions, expires_on)
            .await
    }

    async fn start_copy_from_uri(
        &self,
        source: &Url,
        target: &BlobRef,
    ) -> StorageResult<CopyOperation> {
        (**self).start_copy_from_uri(source, target).await
    }
}
