//! Account pool
//!
//! Ordered set of credentialed accounts with a current-account cursor.
//! Sessions are created lazily and dropped on rotation; the per-account root
//! folder is created on first use and kept on the account so it can be
//! written back to the configuration.

use std::sync::Arc;
use tracing::{info, warn};

use crate::providers::{
    storage_root_id, AuthError, Credentials, ProviderType, StorageError, StorageProvider,
    StorageSession, TransferError,
};

/// Default name of the per-account top-level folder
pub const DEFAULT_ROOT_FOLDER: &str = "电影";

/// One configured account. The session is exclusively owned here.
pub struct Account {
    credentials: Credentials,
    root_folder_id: Option<String>,
    session: Option<Box<dyn StorageSession>>,
}

impl Account {
    pub fn new(credentials: Credentials, root_folder_id: Option<String>) -> Self {
        Self {
            credentials,
            root_folder_id: root_folder_id.filter(|id| !id.is_empty()),
            session: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub fn root_folder_id(&self) -> Option<&str> {
        self.root_folder_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.credentials.username)
            .field("root_folder_id", &self.root_folder_id)
            .field("authenticated", &self.session.is_some())
            .finish()
    }
}

pub struct AccountPool {
    provider: Arc<dyn StorageProvider>,
    accounts: Vec<Account>,
    current: usize,
    root_folder_name: String,
}

impl AccountPool {
    pub fn new(provider: Arc<dyn StorageProvider>, accounts: Vec<Account>) -> Result<Self, StorageError> {
        if accounts.is_empty() {
            return Err(StorageError::EmptyPool);
        }
        Ok(Self {
            provider,
            accounts,
            current: 0,
            root_folder_name: DEFAULT_ROOT_FOLDER.to_string(),
        })
    }

    pub fn with_root_folder_name(mut self, name: impl Into<String>) -> Self {
        self.root_folder_name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Account {
        &self.accounts[self.current]
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Session of the current account, logging in if there is none yet.
    pub async fn session(&mut self) -> Result<&dyn StorageSession, AuthError> {
        let account = &mut self.accounts[self.current];
        let session = match account.session.take() {
            Some(session) => session,
            None => {
                info!("Logging in account {}", account.credentials.username);
                self.provider.authenticate(&account.credentials).await?
            }
        };
        Ok(&**account.session.insert(session))
    }

    /// Advance the cursor (wrapping) and log the new current account in again.
    /// A single-account pool re-authenticates the same account.
    pub async fn rotate(&mut self) -> Result<(), AuthError> {
        let from = self.current;
        self.current = (self.current + 1) % self.accounts.len();
        let account = &mut self.accounts[self.current];
        account.session = None;
        info!(
            "Rotating account {} -> {} ({})",
            from, self.current, account.credentials.username
        );
        match self.provider.authenticate(&account.credentials).await {
            Ok(session) => {
                account.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("Login failed for {}: {}", account.credentials.username, e);
                Err(e)
            }
        }
    }

    /// Root folder id of the current account, created under the provider's
    /// storage root on first use.
    pub async fn root_folder(&mut self) -> Result<String, TransferError> {
        if let Some(id) = self.current().root_folder_id() {
            return Ok(id.to_string());
        }
        let parent = storage_root_id(self.provider.provider_type());
        let name = self.root_folder_name.clone();
        let id = self.session().await?.create_folder(&name, parent).await?;
        info!("Created root folder '{}' ({}) for {}", name, id, self.current().username());
        self.accounts[self.current].root_folder_id = Some(id.clone());
        Ok(id)
    }

    /// `(username, root folder id)` per account, for writing back to config.
    pub fn root_folder_ids(&self) -> Vec<(String, Option<String>)> {
        self.accounts
            .iter()
            .map(|a| (a.username().to_string(), a.root_folder_id.clone()))
            .collect()
    }
}
