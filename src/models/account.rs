//! Storage accounts known to the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An account and the key its read capabilities are signed with.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Account {
    /// Account name (3-24 lowercase letters and digits).
    pub name: String,

    /// Base64 signing key. Never logged.
    #[serde(skip_serializing)]
    pub signing_key: String,

    pub created_at: DateTime<Utc>,
}
