//! Copy status, copy handles and the blob properties a provider reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Status of a server-side copy as reported by the storage provider.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
    Aborted,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label used in diagnostics for an optional status.
pub fn status_label(status: &Option<CopyStatus>) -> &'static str {
    status.as_ref().map(CopyStatus::as_str).unwrap_or("none")
}

/// Handle to a server-side copy issued by the provider's copy-start call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyOperation {
    /// Provider-assigned copy identifier.
    pub copy_id: Uuid,

    /// Source address, stripped of any signature.
    pub source: Url,

    /// Target blob address.
    pub target: Url,

    /// Last observed status.
    pub status: CopyStatus,

    /// When the provider accepted the copy.
    pub started_at: DateTime<Utc>,
}

/// Properties of a blob as reported by the provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlobProperties {
    /// Size in bytes.
    pub content_length: i64,

    /// Base64 MD5 of the content, computed by the provider.
    pub content_md5: Option<String>,

    pub last_modified: DateTime<Utc>,

    /// Identifier of the last copy that targeted this blob, if any.
    pub copy_id: Option<Uuid>,

    /// `None` when the blob was never the target of a copy.
    pub copy_status: Option<CopyStatus>,

    pub copy_source: Option<String>,

    pub copy_status_description: Option<String>,
}

/// Permissions granted by a signed capability URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl SasPermissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    /// Compact `sp` form, e.g. `"rw"`.
    pub fn to_sp(&self) -> String {
        let mut sp = String::new();
        if self.read {
            sp.push('r');
        }
        if self.write {
            sp.push('w');
        }
        if self.delete {
            sp.push('d');
        }
        sp
    }

    pub fn from_sp(sp: &str) -> Option<Self> {
        let mut permissions = Self::default();
        for c in sp.chars() {
            match c {
                'r' => permissions.read = true,
                'w' => permissions.write = true,
                'd' => permissions.delete = true,
                _ => return None,
            }
        }
        Some(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CopyStatus::Aborted).unwrap(),
            "\"aborted\""
        );
        assert_eq!(CopyStatus::Pending.to_string(), "pending");
    }

    #[test]
    fn permissions_round_trip_through_sp() {
        let read = SasPermissions::read_only();
        assert_eq!(read.to_sp(), "r");
        assert_eq!(SasPermissions::from_sp("rd").map(|p| p.to_sp()), Some("rd".into()));
        assert_eq!(SasPermissions::from_sp("rx"), None);
        assert_eq!(status_label(&None), "none");
        assert_eq!(status_label(&Some(CopyStatus::Failed)), "failed");
    }
}
