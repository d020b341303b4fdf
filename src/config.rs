//! Collector configuration
//!
//! One JSON document, by default at `<config_dir>/cloudshare-collector/config.json`.
//! Root folder ids created during a run are written back so the next run
//! reuses them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::account_pool::DEFAULT_ROOT_FOLDER;
use crate::crawler::CrawlerSettings;
use crate::parser::LlmSettings;
use crate::providers::cloud189::Cloud189Config;
use crate::providers::Credentials;
use crate::scheduler::Schedule;
use crate::transfer::TransferSettings;

const APP_DIR: &str = "cloudshare-collector";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("Cannot write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    /// Filled in after the first run on this account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<String>,
}

impl AccountConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("root_folder", &self.root_folder)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub accounts: Vec<AccountConfig>,
    #[serde(default = "default_pattern")]
    pub folder_rename_pattern: String,
    #[serde(default = "default_pattern")]
    pub file_rename_pattern: String,
    #[serde(default = "default_root_folder_name")]
    pub root_folder_name: String,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub crawler: CrawlerSettings,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub cloud189: Cloud189Config,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

fn default_pattern() -> String {
    "{title} ({year})".to_string()
}

fn default_root_folder_name() -> String {
    DEFAULT_ROOT_FOLDER.to_string()
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("movies.db")
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::Invalid("at least one account is required".into()));
        }
        if let Some(account) = self.accounts.iter().find(|a| a.username.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("account with empty username: {:?}", account)));
        }
        if self.folder_rename_pattern.trim().is_empty() || self.file_rename_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid("rename patterns must not be empty".into()));
        }
        let pages = self.crawler.pages;
        if pages.start == 0 || pages.start > pages.end {
            return Err(ConfigError::Invalid(format!("invalid page range {}", pages)));
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// Copy root folder ids from a finished run back into the account list.
    /// Returns whether anything changed.
    pub fn apply_root_folders(&mut self, ids: &[(String, Option<String>)]) -> bool {
        let mut changed = false;
        for (username, id) in ids {
            let Some(id) = id else { continue };
            if let Some(account) = self.accounts.iter_mut().find(|a| &a.username == username) {
                if account.root_folder.as_ref() != Some(id) {
                    account.root_folder = Some(id.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(APP_DIR).join("config.json"))
}

/// Load and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<CollectorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: CollectorConfig = serde_json::from_str(&content)?;
    config.validate()?;
    info!("Config loaded from {} ({} accounts)", path.display(), config.accounts.len());
    Ok(config)
}

/// Write the configuration atomically (temp file, then rename). The file holds
/// passwords, so it is created owner-only on unix.
pub fn save_config(path: &Path, config: &CollectorConfig) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(write_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }
    fs::rename(&tmp_path, path).map_err(write_err)?;
    info!("Config saved to {}", path.display());
    Ok(())
}
