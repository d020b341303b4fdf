//! Free-space sufficiency checks.

use tracing::debug;

use crate::providers::{CapacityQueryError, RemoteFile, StorageSession};

/// Reserve kept free on every account to absorb provider accounting lag.
pub const SAFETY_MARGIN: u64 = 10 * 1024 * 1024;

/// `free > size + margin`. Equal is not enough.
pub fn is_sufficient(free_bytes: u64, size_bytes: u64, margin: u64) -> bool {
    free_bytes > size_bytes.saturating_add(margin)
}

/// Decides whether an account can take a file. Queries fresh every call.
#[derive(Debug, Clone, Copy)]
pub struct CapacityGuard {
    margin: u64,
}

impl Default for CapacityGuard {
    fn default() -> Self {
        Self::new(SAFETY_MARGIN)
    }
}

impl CapacityGuard {
    pub fn new(margin: u64) -> Self {
        Self { margin }
    }

    pub fn margin(&self) -> u64 {
        self.margin
    }

    /// A failed query is returned as an error, never as `false`.
    pub async fn has_capacity(
        &self,
        session: &dyn StorageSession,
        file: &RemoteFile,
    ) -> Result<bool, CapacityQueryError> {
        let snapshot = session.capacity().await?;
        let sufficient = is_sufficient(snapshot.free_bytes, file.size, self.margin);
        debug!(
            "Capacity check: free={} need={}+{} -> {}",
            snapshot.free_bytes, file.size, self.margin, sufficient
        );
        Ok(sufficient)
    }
}
