//! Data models for blob addresses, copy handles and the local store.
//!
//! `blob_ref` and `copy` are what the copy orchestrator works with. `account`,
//! `container` and `blob` map to tables of the local store via `sqlx::FromRow` and
//! serialize as JSON via `serde`.

pub mod account;
pub mod blob;
pub mod blob_ref;
pub mod container;
pub mod copy;
