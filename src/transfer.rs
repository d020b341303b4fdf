//! Transfer orchestration
//!
//! Adopts one share link into the account pool's storage:
//!
//! ```text
//! Resolving ─▶ CapacityChecking ─▶ Submitting ─▶ Submitted
//!                 ▲       │
//!                 │       ▼ insufficient / query or login failure
//!                 └── Rotating ──▶ Failed (more than pool-size attempts)
//! ```
//!
//! Rotation is bounded: at most `pool.len() + 1` capacity checks per job.
//! The copy is only enqueued here; [`TransferOrchestrator::finalize`] waits
//! for it to land and assigns the final name.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::account_pool::AccountPool;
use crate::capacity::{CapacityGuard, SAFETY_MARGIN};
use crate::folder_ops::{CompletionPolicy, ExpectedCopy, FolderOps};
use crate::providers::{FileOperationError, StorageError, TransferError};
use crate::share_resolver::{ResolvedShare, ShareResolver, DEFAULT_MAX_DEPTH, DEFAULT_MAX_ENTRIES};

/// Transfer tuning, as stored in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub safety_margin_bytes: u64,
    pub max_share_depth: usize,
    pub max_share_entries: usize,
    pub completion: CompletionPolicy,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            safety_margin_bytes: SAFETY_MARGIN,
            max_share_depth: DEFAULT_MAX_DEPTH,
            max_share_entries: DEFAULT_MAX_ENTRIES,
            completion: CompletionPolicy::default(),
        }
    }
}

/// Where the copy should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFolder {
    /// An existing folder on the account that will be selected
    Id(String),
    /// Create this folder under the selected account's root
    Named(String),
}

/// A copy the provider has accepted but not necessarily finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransfer {
    /// Extension of the selected source file, empty when it has none
    pub extension: String,
    /// `<base>.<ext>` the copy was submitted under
    pub file_name: String,
    /// Name of the shared file that was copied
    pub source_name: String,
    /// Whether `folder_id` was made for this title alone
    pub dedicated_folder: bool,
    pub folder_id: String,
    /// Username of the account the copy was submitted on
    pub account: String,
    /// Not known at submission time
    pub file_id: Option<String>,
    pub size: u64,
}

#[derive(Debug)]
enum TransferState {
    Resolving,
    CapacityChecking,
    Rotating,
    Submitting,
    Submitted(SubmittedTransfer),
    Failed(TransferError),
}

impl SubmittedTransfer {
    pub fn expected_copy(&self) -> ExpectedCopy {
        ExpectedCopy {
            target_name: self.file_name.clone(),
            source_name: self.source_name.clone(),
            dedicated_folder: self.dedicated_folder,
        }
    }
}

/// `<base>.<ext>`, or just `<base>` when the source has no extension.
pub fn target_file_name(base_name: &str, extension: &str) -> String {
    if extension.is_empty() {
        base_name.to_string()
    } else {
        format!("{}.{}", base_name, extension)
    }
}

pub struct TransferOrchestrator {
    pool: AccountPool,
    resolver: ShareResolver,
    guard: CapacityGuard,
    folders: FolderOps,
}

impl TransferOrchestrator {
    pub fn new(pool: AccountPool, settings: &TransferSettings) -> Self {
        Self {
            pool,
            resolver: ShareResolver::new(settings.max_share_depth, settings.max_share_entries),
            guard: CapacityGuard::new(settings.safety_margin_bytes),
            folders: FolderOps::new(settings.completion),
        }
    }

    pub fn pool(&self) -> &AccountPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut AccountPool {
        &mut self.pool
    }

    pub fn resolver(&self) -> &ShareResolver {
        &self.resolver
    }

    /// Resolve `link_text`, pick an account with room and enqueue the copy
    /// as `<base_name>.<ext>` in `target`.
    pub async fn transfer(
        &mut self,
        target: TargetFolder,
        base_name: &str,
        link_text: &str,
    ) -> Result<SubmittedTransfer, TransferError> {
        let mut state = TransferState::Resolving;
        let mut resolved: Option<ResolvedShare> = None;
        let mut last_error: Option<TransferError> = None;
        let mut attempts = 0usize;

        loop {
            debug!("Transfer state: {:?}", state);
            state = match state {
                TransferState::Resolving => match self.pool.session().await {
                    Ok(session) => match self.resolver.resolve(session, link_text).await {
                        Ok(share) => {
                            resolved = Some(share);
                            TransferState::CapacityChecking
                        }
                        Err(e) => TransferState::Failed(e.into()),
                    },
                    Err(e) => {
                        warn!("Account {} unusable: {}", self.pool.current().username(), e);
                        attempts += 1;
                        last_error = Some(e.into());
                        TransferState::Rotating
                    }
                },

                TransferState::CapacityChecking => {
                    let Some(share) = resolved.as_ref() else {
                        return Err(StorageError::NoCapacity { attempts }.into());
                    };
                    attempts += 1;
                    match self.check_current(share).await {
                        Ok(true) => TransferState::Submitting,
                        Ok(false) => {
                            warn!(
                                "Account {} lacks space for '{}' ({} bytes)",
                                self.pool.current().username(),
                                share.file.name,
                                share.file.size
                            );
                            TransferState::Rotating
                        }
                        Err(e) => {
                            warn!("Capacity check on {} failed: {}", self.pool.current().username(), e);
                            last_error = Some(e);
                            TransferState::Rotating
                        }
                    }
                }

                TransferState::Rotating => {
                    if attempts > self.pool.len() {
                        TransferState::Failed(match (&resolved, last_error.take()) {
                            (None, Some(e)) => e,
                            _ => StorageError::NoCapacity { attempts }.into(),
                        })
                    } else {
                        match self.pool.rotate().await {
                            Ok(()) if resolved.is_some() => TransferState::CapacityChecking,
                            Ok(()) => TransferState::Resolving,
                            Err(e) => {
                                attempts += 1;
                                last_error = Some(e.into());
                                TransferState::Rotating
                            }
                        }
                    }
                }

                TransferState::Submitting => match resolved.as_ref() {
                    Some(share) => match self.submit(share, &target, base_name).await {
                        Ok(submitted) => TransferState::Submitted(submitted),
                        Err(e) => TransferState::Failed(e),
                    },
                    None => TransferState::Failed(StorageError::NoCapacity { attempts }.into()),
                },

                TransferState::Submitted(submitted) => {
                    info!(
                        "Submitted '{}' to folder {} on {}",
                        submitted.file_name, submitted.folder_id, submitted.account
                    );
                    return Ok(submitted);
                }

                TransferState::Failed(e) => return Err(e),
            };
        }
    }

    /// Wait for a submitted copy to appear, then give it its final name.
    /// Returns the id of the renamed file.
    pub async fn finalize(&mut self, submitted: &SubmittedTransfer) -> Result<String, TransferError> {
        let landed = self
            .folders
            .wait_for_copy(&mut self.pool, &submitted.folder_id, &submitted.expected_copy())
            .await?;
        if landed.name == submitted.file_name {
            return Ok(landed.file_id);
        }
        let file_id = submitted.file_id.as_deref().unwrap_or(&landed.file_id);
        self.folders
            .rename(&mut self.pool, &submitted.file_name, &submitted.folder_id, Some(file_id))
            .await
    }

    async fn check_current(&mut self, share: &ResolvedShare) -> Result<bool, TransferError> {
        let session = self.pool.session().await?;
        Ok(self.guard.has_capacity(session, &share.file).await?)
    }

    async fn submit(
        &mut self,
        share: &ResolvedShare,
        target: &TargetFolder,
        base_name: &str,
    ) -> Result<SubmittedTransfer, TransferError> {
        let (folder_id, dedicated_folder) = match target {
            TargetFolder::Id(id) => (id.clone(), false),
            TargetFolder::Named(name) => (self.folders.ensure_folder(&mut self.pool, name).await?, true),
        };
        let extension = share.file.extension().to_string();
        let file_name = target_file_name(base_name, &extension);

        self.pool
            .session()
            .await?
            .save_share_file(&share.file, &share.share, &file_name, &folder_id)
            .await
            .map_err(|e| match e {
                FileOperationError::SubmitFailed(_) => e,
                other => FileOperationError::SubmitFailed(other.to_string()),
            })?;

        Ok(SubmittedTransfer {
            extension,
            file_name,
            source_name: share.file.name.clone(),
            dedicated_folder,
            folder_id,
            account: self.pool.current().username().to_string(),
            file_id: None,
            size: share.file.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_pool::Account;
    use crate::providers::{Credentials, RemoteFile, ShareLinkError};
    use crate::test_support::FakeCloud;

    const LINK: &str = "https://cloud.189.cn/t/movie（访问码：ab12）";
    const SIZE: u64 = 1_000_000_000;

    fn orchestrator(cloud: &FakeCloud, users: &[&str]) -> TransferOrchestrator {
        let accounts = users
            .iter()
            .map(|u| Account::new(Credentials::new(*u, "pw"), None))
            .collect();
        let pool = AccountPool::new(cloud.provider(), accounts).unwrap();
        let settings = TransferSettings {
            completion: CompletionPolicy { timeout_secs: 0, poll_interval_ms: 1 },
            ..TransferSettings::default()
        };
        TransferOrchestrator::new(pool, &settings)
    }

    fn roomy() -> u64 {
        SIZE + SAFETY_MARGIN + 1
    }

    #[test]
    fn test_target_file_name() {
        assert_eq!(target_file_name("Dune (2021)", "mkv"), "Dune (2021).mkv");
        assert_eq!(target_file_name("Dune (2021)", ""), "Dune (2021)");
    }

    #[tokio::test]
    async fn test_submits_on_first_account_with_room() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune.2021.2160p.mkv", SIZE);
        let mut orch = orchestrator(&cloud, &["a"]);

        let submitted = orch
            .transfer(TargetFolder::Id("dir".into()), "Dune (2021)", LINK)
            .await
            .unwrap();
        assert_eq!(submitted.extension, "mkv");
        assert_eq!(submitted.file_name, "Dune (2021).mkv");
        assert_eq!(submitted.account, "a");
        assert_eq!(submitted.file_id, None);
        assert_eq!(cloud.capacity_checks(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_rotates_twice_to_third_account() {
        let cloud = FakeCloud::new()
            .with_account("a", SIZE)
            .with_account("b", SIZE + SAFETY_MARGIN)
            .with_account("c", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        let mut orch = orchestrator(&cloud, &["a", "b", "c"]);

        let submitted = orch
            .transfer(TargetFolder::Named("Dune (2021)".into()), "Dune (2021)", LINK)
            .await
            .unwrap();
        assert_eq!(submitted.account, "c");
        assert_eq!(cloud.capacity_checks(), vec!["a", "b", "c"]);
        // initial login plus exactly two rotations
        assert_eq!(cloud.authentications(), vec!["a", "b", "c"]);

        let state = cloud.state();
        assert_eq!(state.submissions.len(), 1);
        assert_eq!(state.submissions[0].0, "c");
        // the target folder and the root folder live on the account that took the copy
        assert!(state.created_folders.iter().all(|(user, _, _)| user == "c"));
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_bounded() {
        for n in 1..=4usize {
            let users: Vec<String> = (0..n).map(|i| format!("u{i}")).collect();
            let mut cloud = FakeCloud::new().with_file_share("movie", "Dune.mkv", SIZE);
            for user in &users {
                cloud = cloud.with_account(user, 1);
            }
            let names: Vec<&str> = users.iter().map(String::as_str).collect();
            let mut orch = orchestrator(&cloud, &names);

            let result = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await;
            assert!(matches!(
                result,
                Err(TransferError::Storage(StorageError::NoCapacity { .. }))
            ));
            assert_eq!(cloud.capacity_checks().len(), n + 1);
            assert!(cloud.state().submissions.is_empty());
        }
    }

    #[tokio::test]
    async fn test_auth_failure_during_rotation_keeps_rotating() {
        let cloud = FakeCloud::new()
            .with_account("a", 1)
            .with_account("c", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().auth_failures.insert("b".into());
        let mut orch = orchestrator(&cloud, &["a", "b", "c"]);

        let submitted = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await.unwrap();
        assert_eq!(submitted.account, "c");
        assert_eq!(cloud.capacity_checks(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_capacity_query_error_triggers_rotation() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_account("b", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().capacity_failures.insert("a".into());
        let mut orch = orchestrator(&cloud, &["a", "b"]);

        let submitted = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await.unwrap();
        assert_eq!(submitted.account, "b");
    }

    #[tokio::test]
    async fn test_first_account_login_failure_rotates_before_resolving() {
        let cloud = FakeCloud::new()
            .with_account("b", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().auth_failures.insert("a".into());
        let mut orch = orchestrator(&cloud, &["a", "b"]);

        let submitted = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await.unwrap();
        assert_eq!(submitted.account, "b");
    }

    #[tokio::test]
    async fn test_every_login_failing_reports_auth_error() {
        let cloud = FakeCloud::new().with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().auth_failures.extend(["a".to_string(), "b".to_string()]);
        let mut orch = orchestrator(&cloud, &["a", "b"]);

        let result = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await;
        assert!(matches!(result, Err(TransferError::Auth(_))));
        assert!(cloud.authentications().len() <= 3);
    }

    #[tokio::test]
    async fn test_share_errors_do_not_rotate() {
        let cloud = FakeCloud::new().with_account("a", roomy()).with_account("b", roomy());
        let mut orch = orchestrator(&cloud, &["a", "b"]);

        let result = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await;
        assert!(matches!(result, Err(TransferError::ShareLink(ShareLinkError::NotFound(_)))));
        assert_eq!(cloud.authentications(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().submit_fails = true;
        let mut orch = orchestrator(&cloud, &["a"]);

        let result = orch.transfer(TargetFolder::Id("dir".into()), "Dune", LINK).await;
        assert!(matches!(
            result,
            Err(TransferError::FileOperation(FileOperationError::SubmitFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_finalize_renames_landed_copy() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        let mut orch = orchestrator(&cloud, &["a"]);

        let submitted = orch
            .transfer(TargetFolder::Named("Dune (2021)".into()), "Dune (2021)", LINK)
            .await
            .unwrap();
        let file_id = orch.finalize(&submitted).await.unwrap();

        let state = cloud.state();
        assert_eq!(state.renames, vec![(file_id, "Dune (2021).mkv".to_string())]);
    }

    #[tokio::test]
    async fn test_finalize_renames_copy_kept_under_source_name() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune.2021.2160p.mkv", SIZE);
        cloud.state().deliver_copies = false;
        let mut orch = orchestrator(&cloud, &["a"]);

        let submitted = orch
            .transfer(TargetFolder::Named("Dune (2021)".into()), "Dune (2021)", LINK)
            .await
            .unwrap();
        assert_eq!(submitted.source_name, "Dune.2021.2160p.mkv");
        assert!(submitted.dedicated_folder);
        cloud
            .state()
            .folders
            .get_mut(&submitted.folder_id)
            .unwrap()
            .push(RemoteFile::file("landed", "Dune.2021.2160p.mkv", SIZE));

        let file_id = orch.finalize(&submitted).await.unwrap();
        assert_eq!(file_id, "landed");
        let state = cloud.state();
        assert_eq!(state.renames, vec![("landed".to_string(), "Dune (2021).mkv".to_string())]);
        assert_eq!(state.folders[&submitted.folder_id][0].name, "Dune (2021).mkv");
    }

    #[tokio::test]
    async fn test_finalize_skips_rename_when_already_named() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune (2021).mkv", SIZE);
        let mut orch = orchestrator(&cloud, &["a"]);

        let submitted = orch
            .transfer(TargetFolder::Named("Dune (2021)".into()), "Dune (2021)", LINK)
            .await
            .unwrap();
        orch.finalize(&submitted).await.unwrap();
        assert!(cloud.state().renames.is_empty());
    }

    #[tokio::test]
    async fn test_retry_reuses_folder_left_by_failed_attempt() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().deliver_copies = false;
        let mut orch = orchestrator(&cloud, &["a"]);
        let target = || TargetFolder::Named("Dune (2021)".into());

        let first = orch.transfer(target(), "Dune (2021)", LINK).await.unwrap();
        assert!(orch.finalize(&first).await.is_err());

        cloud.state().deliver_copies = true;
        let second = orch.transfer(target(), "Dune (2021)", LINK).await.unwrap();
        assert_eq!(second.folder_id, first.folder_id);
        orch.finalize(&second).await.unwrap();

        let state = cloud.state();
        let named: Vec<_> = state.created_folders.iter().filter(|(_, n, _)| n == "Dune (2021)").collect();
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_times_out_when_copy_never_lands() {
        let cloud = FakeCloud::new()
            .with_account("a", roomy())
            .with_file_share("movie", "Dune.mkv", SIZE);
        cloud.state().deliver_copies = false;
        let mut orch = orchestrator(&cloud, &["a"]);

        let submitted = orch
            .transfer(TargetFolder::Named("Dune (2021)".into()), "Dune (2021)", LINK)
            .await
            .unwrap();
        let result = orch.finalize(&submitted).await;
        assert!(matches!(
            result,
            Err(TransferError::FileOperation(FileOperationError::CopyTimeout { .. }))
        ));
        assert!(cloud.state().renames.is_empty());
    }
}
