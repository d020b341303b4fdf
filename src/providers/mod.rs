//! Storage Providers Module
//!
//! This module provides the abstraction layer between the transfer engine and
//! a concrete share-link storage service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  StorageProvider (connector)                │
//! │  authenticate(credentials) ──┐              │
//! └──────────────────────────────┼──────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────┐
//! │  StorageSession (one logged-in account)     │
//! │  capacity, share_info, list_share_dir,      │
//! │  save_share_file, create/list/rename        │
//! └─────────────────────────────────────────────┘
//!                                │
//!                          ┌─────┴─────┐
//!                          │ Cloud189  │
//!                          └───────────┘
//! ```

pub mod types;
pub mod http_retry;
pub mod share_link;
pub mod cloud189;
pub mod cloud189_auth;

pub use types::*;
pub use share_link::ShareDescriptor;
pub use cloud189::{Cloud189Provider, Cloud189Session};

use async_trait::async_trait;

/// Connector that turns credentials into an authenticated session.
///
/// New providers implement this plus [`StorageSession`]; the engine never
/// needs to know which one it is talking to.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider type identifier
    fn provider_type(&self) -> ProviderType;

    /// Run the full login handshake for one account.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn StorageSession>, AuthError>;
}

/// One authenticated account on a storage provider.
#[async_trait]
pub trait StorageSession: Send + Sync {
    /// Fresh free-space snapshot. Implementations must not cache it.
    async fn capacity(&self) -> Result<CapacitySnapshot, CapacityQueryError>;

    /// Fetch share metadata for a share code.
    async fn share_info(&self, share: &ShareDescriptor) -> Result<ShareInfo, ShareLinkError>;

    /// List one level of a shared folder (all pages).
    async fn list_share_dir(
        &self,
        folder_id: &str,
        share: &ShareInfo,
    ) -> Result<ShareDirListing, ShareLinkError>;

    /// Create a folder under `parent_id`, returning the new folder id.
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, FileOperationError>;

    /// Enqueue an asynchronous copy of a shared file into `target_folder_id`
    /// under `file_name`. Returns as soon as the provider accepted the job.
    async fn save_share_file(
        &self,
        file: &RemoteFile,
        share: &ShareInfo,
        file_name: &str,
        target_folder_id: &str,
    ) -> Result<(), FileOperationError>;

    /// Id of the subfolder `name` directly under `parent_id`, if there is one.
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, FileOperationError>;

    /// List the files directly inside one of the account's folders.
    async fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>, FileOperationError>;

    /// Rename a file or folder.
    async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<(), FileOperationError>;
}

/// Id of the provider-side storage root, under which account root folders live.
pub fn storage_root_id(provider: ProviderType) -> &'static str {
    match provider {
        ProviderType::Cloud189 => "-11",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_root_id() {
        assert_eq!(storage_root_id(ProviderType::Cloud189), "-11");
    }
}
