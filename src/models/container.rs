//! Represents a container — a namespace for blobs inside an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A container row in the local store.
///
/// Containers belong to exactly one account and are unique by `(account, name)`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Container {
    /// Unique identifier for this container (UUID for internal DB use).
    pub id: Uuid,

    /// Name of the owning account.
    pub account: String,

    /// Container name (3-63 lowercase letters, digits and hyphens).
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}
