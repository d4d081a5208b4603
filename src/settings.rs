use std::time::Duration;

/// Timing knobs of a server-side copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopySettings {
    /// Delay between two status polls while a copy is pending.
    pub poll_interval: Duration,
    /// How long a copy may stay pending before the wait is abandoned.
    pub copy_timeout: Duration,
    /// Lifetime of the signed read capability handed to the provider. It only has
    /// to outlive the copy-start call, not the copy.
    pub read_capability_validity: Duration,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            copy_timeout: Duration::from_secs(5 * 60),
            read_capability_validity: Duration::from_secs(5 * 60),
        }
    }
}
