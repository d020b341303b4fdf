//! In-memory storage provider for engine tests.
//!
//! One `FakeCloud` holds the state of every fake account; providers and
//! sessions handed out by it share that state, so a test can script free
//! space, failures and share trees up front and inspect call logs after.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::providers::{
    AuthError, CapacityQueryError, CapacitySnapshot, Credentials, FileOperationError,
    ProviderType, RemoteFile, ShareDescriptor, ShareDirListing, ShareInfo, ShareLinkError,
    StorageProvider, StorageSession,
};

#[derive(Default)]
pub struct FakeState {
    pub free: HashMap<String, u64>,
    pub auth_failures: HashSet<String>,
    pub capacity_failures: HashSet<String>,
    pub shares: HashMap<String, ShareInfo>,
    pub share_dirs: HashMap<String, ShareDirListing>,
    /// Files per account folder id
    pub folders: HashMap<String, Vec<RemoteFile>>,
    /// `(name, id)` of created folders per parent id
    pub subfolders: HashMap<String, Vec<(String, String)>>,
    /// When false, accepted copies never show up in the target folder
    pub deliver_copies: bool,
    pub submit_fails: bool,
    pub authentications: Vec<String>,
    pub capacity_checks: Vec<String>,
    pub created_folders: Vec<(String, String, String)>,
    pub submissions: Vec<(String, String, String, String)>,
    pub renames: Vec<(String, String)>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("id-{}", self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        let cloud = Self::default();
        cloud.state().deliver_copies = true;
        cloud
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Register an account with the given free space.
    pub fn with_account(self, username: &str, free_bytes: u64) -> Self {
        self.state().free.insert(username.to_string(), free_bytes);
        self
    }

    /// Register a share whose entry is a single file.
    pub fn with_file_share(self, code: &str, name: &str, size: u64) -> Self {
        let info = ShareInfo {
            entry: RemoteFile::file(format!("{code}-file"), name, size),
            share_id: format!("{code}-share"),
            share_mode: "1".into(),
            access_code: None,
        };
        self.state().shares.insert(code.to_string(), info);
        self
    }

    /// Register a share whose entry is the folder `root_id`.
    pub fn with_folder_share(self, code: &str, root_id: &str) -> Self {
        let info = ShareInfo {
            entry: RemoteFile::folder(root_id, "shared"),
            share_id: format!("{code}-share"),
            share_mode: "1".into(),
            access_code: None,
        };
        self.state().shares.insert(code.to_string(), info);
        self
    }

    pub fn with_share_dir(self, folder_id: &str, files: Vec<RemoteFile>, folders: &[&str]) -> Self {
        let listing = ShareDirListing {
            files,
            folders: folders.iter().map(|f| f.to_string()).collect(),
        };
        self.state().share_dirs.insert(folder_id.to_string(), listing);
        self
    }

    pub fn provider(&self) -> Arc<dyn StorageProvider> {
        Arc::new(FakeProvider { cloud: self.clone() })
    }

    /// A session for `username` without going through `authenticate`.
    pub fn session(&self, username: &str) -> FakeSession {
        FakeSession { cloud: self.clone(), username: username.to_string() }
    }

    pub fn capacity_checks(&self) -> Vec<String> {
        self.state().capacity_checks.clone()
    }

    pub fn authentications(&self) -> Vec<String> {
        self.state().authentications.clone()
    }
}

pub struct FakeProvider {
    cloud: FakeCloud,
}

#[async_trait]
impl StorageProvider for FakeProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Cloud189
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Box<dyn StorageSession>, AuthError> {
        let mut state = self.cloud.state();
        state.authentications.push(credentials.username.clone());
        if state.auth_failures.contains(&credentials.username) {
            return Err(AuthError::Http { step: "login-submit", status: 403 });
        }
        drop(state);
        Ok(Box::new(self.cloud.session(&credentials.username)))
    }
}

pub struct FakeSession {
    cloud: FakeCloud,
    username: String,
}

#[async_trait]
impl StorageSession for FakeSession {
    async fn capacity(&self) -> Result<CapacitySnapshot, CapacityQueryError> {
        let mut state = self.cloud.state();
        state.capacity_checks.push(self.username.clone());
        if state.capacity_failures.contains(&self.username) {
            return Err(CapacityQueryError::MissingField("freeSize"));
        }
        let free_bytes = state.free.get(&self.username).copied().unwrap_or(0);
        Ok(CapacitySnapshot { free_bytes })
    }

    async fn share_info(&self, share: &ShareDescriptor) -> Result<ShareInfo, ShareLinkError> {
        self.cloud
            .state()
            .shares
            .get(share.share_code())
            .cloned()
            .ok_or_else(|| ShareLinkError::NotFound(share.to_string()))
    }

    async fn list_share_dir(&self, folder_id: &str, _share: &ShareInfo) -> Result<ShareDirListing, ShareLinkError> {
        Ok(self.cloud.state().share_dirs.get(folder_id).cloned().unwrap_or_default())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, FileOperationError> {
        let mut state = self.cloud.state();
        let id = state.next_id();
        state
            .created_folders
            .push((self.username.clone(), name.to_string(), parent_id.to_string()));
        state.folders.insert(id.clone(), Vec::new());
        state
            .subfolders
            .entry(parent_id.to_string())
            .or_default()
            .push((name.to_string(), id.clone()));
        Ok(id)
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, FileOperationError> {
        let state = self.cloud.state();
        Ok(state
            .subfolders
            .get(parent_id)
            .and_then(|dirs| dirs.iter().find(|(n, _)| n == name))
            .map(|(_, id)| id.clone()))
    }

    async fn save_share_file(
        &self,
        file: &RemoteFile,
        _share: &ShareInfo,
        file_name: &str,
        target_folder_id: &str,
    ) -> Result<(), FileOperationError> {
        let mut state = self.cloud.state();
        if state.submit_fails {
            return Err(FileOperationError::SubmitFailed("HTTP 500".into()));
        }
        state.submissions.push((
            self.username.clone(),
            file.file_id.clone(),
            file_name.to_string(),
            target_folder_id.to_string(),
        ));
        // SHARE_SAVE keeps the shared file's own name
        if state.deliver_copies {
            let id = state.next_id();
            let copy = RemoteFile::file(id, file.name.clone(), file.size);
            state.folders.entry(target_folder_id.to_string()).or_default().push(copy);
        }
        Ok(())
    }

    async fn list_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>, FileOperationError> {
        self.cloud
            .state()
            .folders
            .get(folder_id)
            .cloned()
            .ok_or_else(|| FileOperationError::ListFailed {
                folder_id: folder_id.to_string(),
                message: "no such folder".into(),
            })
    }

    async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<(), FileOperationError> {
        let mut state = self.cloud.state();
        state.renames.push((file_id.to_string(), new_name.to_string()));
        for files in state.folders.values_mut() {
            if let Some(file) = files.iter_mut().find(|f| f.file_id == file_id) {
                file.name = new_name.to_string();
                return Ok(());
            }
        }
        Err(FileOperationError::RenameFailed(format!("no such file {file_id}")))
    }
}
