//! Copy orchestration, the provider seam it depends on, and the local provider.

pub mod copy_service;
pub mod local_store;
pub mod provider;
pub mod registrar;
pub mod sas;
pub mod timer;
