//! Registration of a copier for the composition root of an application.
//!
//! A registration either hands out one shared instance (singleton) or builds a fresh
//! one on every resolve (scoped).

use crate::{
    services::{
        copy_service::{BlobCopier, BlobCopyService},
        provider::BlobStorageProvider,
    },
    settings::CopySettings,
};
use std::sync::{Arc, OnceLock};

pub type CopierFactory = Arc<dyn Fn() -> Arc<dyn BlobCopier> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopierLifetime {
    Singleton,
    Scoped,
}

pub struct CopierRegistration {
    lifetime: CopierLifetime,
    factory: CopierFactory,
    shared: OnceLock<Arc<dyn BlobCopier>>,
}

impl CopierRegistration {
    pub fn new<F>(lifetime: CopierLifetime, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn BlobCopier> + Send + Sync + 'static,
    {
        Self {
            lifetime,
            factory: Arc::new(factory),
            shared: OnceLock::new(),
        }
    }

    /// The instance is built lazily on the first resolve and reused afterwards.
    pub fn singleton<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn BlobCopier> + Send + Sync + 'static,
    {
        Self::new(CopierLifetime::Singleton, factory)
    }

    pub fn scoped<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn BlobCopier> + Send + Sync + 'static,
    {
        Self::new(CopierLifetime::Scoped, factory)
    }

    /// Register a [`BlobCopyService`] over `provider`.
    pub fn for_provider<P>(lifetime: CopierLifetime, provider: P, settings: CopySettings) -> Self
    where
        P: BlobStorageProvider + Clone + 'static,
    {
        Self::new(lifetime, move || {
            Arc::new(BlobCopyService::new(provider.clone()).with_settings(settings))
                as Arc<dyn BlobCopier>
        })
    }

    pub fn lifetime(&self) -> CopierLifetime {
        self.lifetime
    }

    pub fn resolve(&self) -> Arc<dyn BlobCopier> {
        match self.lifetime {
            CopierLifetime::Singleton => self.shared.get_or_init(|| (self.factory)()).clone(),
            CopierLifetime::Scoped => (self.factory)(),
        }
    }
}
