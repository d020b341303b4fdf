//! Shared types for storage providers
//!
//! This module contains the data model shared by the provider sessions and the
//! transfer engine: credentials, remote file entries, share descriptors,
//! capacity snapshots and the error taxonomy.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Supported storage provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// China Telecom Cloud189 (天翼云盘)
    Cloud189,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Cloud189 => write!(f, "Cloud189"),
        }
    }
}

/// Login credentials for one storage account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Remote file or folder entry, as read from the provider at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Provider file id
    pub file_id: String,
    /// Whether this is a folder
    pub is_folder: bool,
    /// File size in bytes (0 for folders)
    pub size: u64,
    /// File or folder name
    pub name: String,
}

impl RemoteFile {
    pub fn file(file_id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            file_id: file_id.into(),
            is_folder: false,
            size,
            name: name.into(),
        }
    }

    pub fn folder(file_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            is_folder: true,
            size: 0,
            name: name.into(),
        }
    }

    /// Substring after the last `.` of the name, empty when there is none.
    pub fn extension(&self) -> &str {
        self.name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
    }
}

/// Metadata returned for a share code: the shared entry plus the values
/// every follow-up call on that share must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    /// The shared file or folder itself
    pub entry: RemoteFile,
    /// Provider share id (needed to list and save)
    pub share_id: String,
    /// Provider share mode
    pub share_mode: String,
    /// Access code confirmed by the provider, if the share is gated
    pub access_code: Option<String>,
}

/// One level of a shared folder: its files and the ids of its subfolders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareDirListing {
    pub files: Vec<RemoteFile>,
    pub folders: Vec<String>,
}

/// Free space reported by the provider for one account.
/// Never cached; each sufficiency decision fetches a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub free_bytes: u64,
}

// ============ Error Types ============

/// Login handshake failure. The account is unusable for now.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login step '{step}' returned HTTP {status}")]
    Http { step: &'static str, status: u16 },

    #[error("Login step '{step}' response is missing '{field}'")]
    MissingField { step: &'static str, field: &'static str },

    #[error("Login step '{step}' failed: {message}")]
    Network { step: &'static str, message: String },

    #[error("Credential encryption failed: {0}")]
    Crypto(String),
}

/// Malformed, expired or unreachable share
#[derive(Error, Debug)]
pub enum ShareLinkError {
    #[error("Malformed link: {0}")]
    Malformed(String),

    #[error("Share not found/expired: {0}")]
    NotFound(String),

    #[error("Shared folder contains no files: {0}")]
    Empty(String),

    #[error("Shared folder nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("Shared folder exceeds {limit} entries")]
    TooManyEntries { limit: usize },

    #[error("Share request failed: {0}")]
    Network(String),
}

/// Quota introspection failure. Never interpreted as "insufficient".
#[derive(Error, Debug)]
pub enum CapacityQueryError {
    #[error("Capacity query returned HTTP {0}")]
    Http(u16),

    #[error("Capacity response is missing '{0}'")]
    MissingField(&'static str),

    #[error("Capacity query failed: {0}")]
    Network(String),
}

/// Quota exhausted across the whole pool
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No account has sufficient capacity ({attempts} checks)")]
    NoCapacity { attempts: usize },

    #[error("Account pool is empty")]
    EmptyPool,
}

/// Create, rename, list or submit failure
#[derive(Error, Debug)]
pub enum FileOperationError {
    #[error("Create folder '{name}' failed: {message}")]
    CreateFolder { name: String, message: String },

    #[error("Submit failed: {0}")]
    SubmitFailed(String),

    #[error("Nothing to rename in folder {0}")]
    NothingToRename(String),

    #[error("Rename failed: {0}")]
    RenameFailed(String),

    #[error("List folder {folder_id} failed: {message}")]
    ListFailed { folder_id: String, message: String },

    #[error("Copy did not complete in time: '{name}' not present after {waited_secs}s")]
    CopyTimeout { name: String, waited_secs: u64 },
}

/// Any failure of one "adopt a share link" job
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    ShareLink(#[from] ShareLinkError),

    #[error(transparent)]
    Capacity(#[from] CapacityQueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    FileOperation(#[from] FileOperationError),
}
