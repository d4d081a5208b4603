//! BlobCopyService — server-side copy of one blob into another.
//!
//! The service never touches blob content. It checks that the source exists, makes
//! sure the target container is there, skips or clears an existing target, hands the
//! provider a short-lived read capability for the source and then polls the target
//! until the provider reports a terminal copy status.

use crate::{
    errors::{CopyError, CopyResult, StorageError},
    models::{
        blob_ref::BlobRef,
        copy::{CopyOperation, CopyStatus, SasPermissions},
    },
    services::{
        provider::BlobStorageProvider,
        timer::{Timer, TokioTimer},
    },
    settings::CopySettings,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Object-safe entry point, used where the concrete provider type should not leak.
#[async_trait]
pub trait BlobCopier: Send + Sync {
    /// Copy `source` into `target` on the provider side.
    ///
    /// Returns `Ok(None)` when no copy was needed (missing source, target already
    /// holds the same content, or source and target are the same blob) and the
    /// completed copy handle otherwise.
    async fn server_side_copy(
        &self,
        source: &BlobRef,
        target: &BlobRef,
        cancel: &CancellationToken,
    ) -> CopyResult<Option<CopyOperation>>;
}

pub struct BlobCopyService<P, T = TokioTimer> {
    provider: P,
    timer: T,
    settings: CopySettings,
}

impl<P: BlobStorageProvider> BlobCopyService<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            timer: TokioTimer,
            settings: CopySettings::default(),
        }
    }
}

impl<P, T> BlobCopyService<P, T>
where
    P: BlobStorageProvider,
    T: Timer,
{
    pub fn with_timer<U: Timer>(self, timer: U) -> BlobCopyService<P, U> {
        BlobCopyService {
            provider: self.provider,
            timer,
            settings: self.settings,
        }
    }

    pub fn with_settings(mut self, settings: CopySettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn server_side_copy(
        &self,
        source: &BlobRef,
        target: &BlobRef,
        cancel: &CancellationToken,
    ) -> CopyResult<Option<CopyOperation>> {
        if !cancellable(cancel, self.provider.exists(source)).await? {
            error!("attempted to copy a blob that doesn't exist: {}", source);
            return Ok(None);
        }

        info!("blob transfer started: {} to {}", source, target);

        let container = target.container();
        if cancellable(cancel, self.provider.create_container_if_missing(container)).await? {
            info!("created container {} because it didn't exist", container);
        }

        if cancellable(cancel, self.provider.exists(target)).await? {
            if !self.should_copy(source, target, cancel).await? {
                info!(
                    "skipping copy from {} to {}",
                    source.relative_path(),
                    target.relative_path()
                );
                return Ok(None);
            }

            // Starting a copy onto an existing blob is not safe on every provider
            // version, so the target is cleared first. Nothing guards the gap between
            // this delete and the copy-start below.
            info!("deleting non-identical existing blob at target: {}", target);
            cancellable(cancel, self.provider.delete(target)).await?;
        }

        let capability = cancellable(
            cancel,
            self.provider.mint_read_capability(
                source,
                SasPermissions::read_only(),
                self.capability_expiry(),
            ),
        )
        .await?;

        let mut operation = cancellable(
            cancel,
            self.provider.start_copy_from_uri(&capability, target),
        )
        .await?;
        debug!("copy {} accepted for {}", operation.copy_id, target);

        self.await_copy_completion(target, cancel).await?;
        operation.status = CopyStatus::Success;

        info!(
            "success: blob transfer from {} to {} completed",
            source, target
        );

        Ok(Some(operation))
    }

    /// Decide whether copying `a` onto the existing blob `b` is worth doing.
    ///
    /// - identical absolute addresses: never copy;
    /// - same container and blob name in another account: copy unless the provider
    ///   reports the same content MD5 for both;
    /// - anything else: copy.
    ///
    /// Failing to read properties does not block the copy.
    pub async fn should_copy(
        &self,
        a: &BlobRef,
        b: &BlobRef,
        cancel: &CancellationToken,
    ) -> CopyResult<bool> {
        if a.is_same_address(b) {
            warn!("attempted to copy blob to the exact same destination: {}", a);
            return Ok(false);
        }

        if a.relative_path() != b.relative_path() {
            return Ok(true);
        }

        let properties = async {
            let a_properties = self.provider.get_properties(a).await?;
            let b_properties = self.provider.get_properties(b).await?;
            Ok::<_, StorageError>((a_properties, b_properties))
        };

        match cancellable(cancel, properties).await {
            Ok((a_properties, b_properties)) => {
                match (a_properties.content_md5, b_properties.content_md5) {
                    (Some(a_md5), Some(b_md5)) if a_md5 == b_md5 => {
                        debug!("{} and {} hold identical content", a, b);
                        Ok(false)
                    }
                    _ => Ok(true),
                }
            }
            Err(CopyError::Cancelled) => Err(CopyError::Cancelled),
            Err(err) => {
                error!("error getting properties of {} and {}: {}", a, b, err);
                Ok(true)
            }
        }
    }

    /// Poll the copy status of `target` until it leaves `pending`.
    ///
    /// Succeeds only on `success`. Staying pending longer than the configured timeout
    /// yields [`CopyError::Timeout`]; any other status yields [`CopyError::Failed`].
    pub async fn await_copy_completion(
        &self,
        target: &BlobRef,
        cancel: &CancellationToken,
    ) -> CopyResult<()> {
        let mut status = self.copy_status(target, cancel).await?;

        if status == Some(CopyStatus::Pending) {
            let started = self.timer.now();

            while status == Some(CopyStatus::Pending) {
                let waited = self.timer.now().saturating_duration_since(started);
                if waited > self.settings.copy_timeout {
                    return Err(CopyError::Timeout {
                        target: target.to_string(),
                        waited,
                    });
                }

                self.pause(cancel).await?;
                status = self.copy_status(target, cancel).await?;

                debug!("waiting on copy {} to finish...", target);
            }
        }

        if status != Some(CopyStatus::Success) {
            return Err(CopyError::Failed {
                target: target.to_string(),
                status,
            });
        }

        Ok(())
    }

    async fn copy_status(
        &self,
        target: &BlobRef,
        cancel: &CancellationToken,
    ) -> CopyResult<Option<CopyStatus>> {
        let properties = cancellable(cancel, self.provider.get_properties(target)).await?;
        Ok(properties.copy_status)
    }

    async fn pause(&self, cancel: &CancellationToken) -> CopyResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CopyError::Cancelled),
            _ = self.timer.sleep(self.settings.poll_interval) => Ok(()),
        }
    }

    fn capability_expiry(&self) -> DateTime<Utc> {
        let validity = TimeDelta::from_std(self.settings.read_capability_validity)
            .unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_add_signed(validity)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl<P, T> BlobCopier for BlobCopyService<P, T>
where
    P: BlobStorageProvider,
    T: Timer,
{
    async fn server_side_copy(
        &self,
        source: &BlobRef,
        target: &BlobRef,
        cancel: &CancellationToken,
    ) -> CopyResult<Option<CopyOperation>> {
        BlobCopyService::server_side_copy(self, source, target, cancel).await
    }
}

/// Race `fut` against cancellation. A token that is already cancelled wins before
/// `fut` is polled at all.
async fn cancellable<F, V, E>(cancel: &CancellationToken, fut: F) -> CopyResult<V>
where
    F: Future<Output = Result<V, E>>,
    CopyError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CopyError::Cancelled),
        result = fut => Ok(result?),
    }
}
