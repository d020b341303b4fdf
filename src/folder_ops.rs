//! Folder operations on the current account: create, wait for an
//! asynchronous copy to land, rename.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::account_pool::AccountPool;
use crate::providers::{FileOperationError, RemoteFile, TransferError};

/// How long to poll a target folder for a submitted copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionPolicy {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 2000,
        }
    }
}

/// What a submitted copy may look like once it has landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedCopy {
    /// Name the copy was submitted under
    pub target_name: String,
    /// Name of the shared file, which the provider may keep
    pub source_name: String,
    /// The folder holds nothing but this title, so any file in it counts
    pub dedicated_folder: bool,
}

impl ExpectedCopy {
    /// Pick the landed copy: target name first, then source name, then (in a
    /// dedicated folder) the first file listed.
    pub fn pick(&self, files: Vec<RemoteFile>) -> Option<RemoteFile> {
        let named = |name: &str| files.iter().position(|f| !f.is_folder && f.name == name);
        let index = named(&self.target_name)
            .or_else(|| named(&self.source_name))
            .or_else(|| {
                self.dedicated_folder
                    .then(|| files.iter().position(|f| !f.is_folder))
                    .flatten()
            })?;
        files.into_iter().nth(index)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FolderOps {
    completion: CompletionPolicy,
}

impl FolderOps {
    pub fn new(completion: CompletionPolicy) -> Self {
        Self { completion }
    }

    /// Create `name` under the current account's root folder.
    pub async fn create_folder(&self, pool: &mut AccountPool, name: &str) -> Result<String, TransferError> {
        let root = pool.root_folder().await?;
        let id = pool.session().await?.create_folder(name, &root).await?;
        debug!("Created folder '{}' ({}) under {}", name, id, root);
        Ok(id)
    }

    /// Reuse the folder `name` under the current account's root when an
    /// earlier attempt left it behind, otherwise create it.
    pub async fn ensure_folder(&self, pool: &mut AccountPool, name: &str) -> Result<String, TransferError> {
        let root = pool.root_folder().await?;
        if let Some(id) = pool.session().await?.find_folder(&root, name).await? {
            info!("Reusing folder '{}' ({})", name, id);
            return Ok(id);
        }
        self.create_folder(pool, name).await
    }

    /// Rename `file_id`, or the first entry of `folder_id` when no id is known.
    /// Returns the id of the renamed entry.
    pub async fn rename(
        &self,
        pool: &mut AccountPool,
        new_name: &str,
        folder_id: &str,
        file_id: Option<&str>,
    ) -> Result<String, TransferError> {
        let session = pool.session().await?;
        let target = match file_id {
            Some(id) => id.to_string(),
            None => session
                .list_files(folder_id)
                .await?
                .into_iter()
                .next()
                .map(|f| f.file_id)
                .ok_or_else(|| FileOperationError::NothingToRename(folder_id.to_string()))?,
        };
        session.rename_file(&target, new_name).await?;
        info!("Renamed {} to '{}'", target, new_name);
        Ok(target)
    }

    /// Poll `folder_id` until the copy described by `expected` shows up.
    pub async fn wait_for_copy(
        &self,
        pool: &mut AccountPool,
        folder_id: &str,
        expected: &ExpectedCopy,
    ) -> Result<RemoteFile, TransferError> {
        let timeout = Duration::from_secs(self.completion.timeout_secs);
        let interval = Duration::from_millis(self.completion.poll_interval_ms.max(1));
        let started = Instant::now();
        let session = pool.session().await?;

        loop {
            let files = session.list_files(folder_id).await?;
            if let Some(file) = expected.pick(files) {
                debug!(
                    "Copy of '{}' landed as '{}' after {:?}",
                    expected.source_name,
                    file.name,
                    started.elapsed()
                );
                return Ok(file);
            }
            if started.elapsed() >= timeout {
                return Err(FileOperationError::CopyTimeout {
                    name: expected.target_name.clone(),
                    waited_secs: started.elapsed().as_secs(),
                }
                .into());
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_pool::Account;
    use crate::providers::Credentials;
    use crate::test_support::FakeCloud;

    fn pool(cloud: &FakeCloud) -> AccountPool {
        let accounts = vec![Account::new(Credentials::new("a", "pw"), Some("root".into()))];
        AccountPool::new(cloud.provider(), accounts).unwrap()
    }

    fn quick() -> FolderOps {
        FolderOps::new(CompletionPolicy { timeout_secs: 0, poll_interval_ms: 1 })
    }

    #[tokio::test]
    async fn test_create_folder_under_root() {
        let cloud = FakeCloud::new();
        let mut pool = pool(&cloud);
        let id = quick().create_folder(&mut pool, "Dune (2021)").await.unwrap();
        assert!(cloud.state().folders.contains_key(&id));
        assert_eq!(cloud.state().created_folders[0].2, "root");
    }

    #[tokio::test]
    async fn test_rename_first_entry_without_id() {
        let cloud = FakeCloud::new();
        cloud.state().folders.insert("dir".into(), vec![RemoteFile::file("only", "x.mkv", 1)]);
        let mut pool = pool(&cloud);
        let renamed = quick().rename(&mut pool, "Dune.mkv", "dir", None).await.unwrap();
        assert_eq!(renamed, "only");
        assert_eq!(cloud.state().folders["dir"][0].name, "Dune.mkv");
    }

    #[tokio::test]
    async fn test_rename_empty_folder_fails() {
        let cloud = FakeCloud::new();
        cloud.state().folders.insert("dir".into(), Vec::new());
        let mut pool = pool(&cloud);
        let result = quick().rename(&mut pool, "Dune.mkv", "dir", None).await;
        assert!(matches!(
            result,
            Err(TransferError::FileOperation(FileOperationError::NothingToRename(_)))
        ));
        assert!(cloud.state().renames.is_empty());
    }

    #[tokio::test]
    async fn test_rename_with_explicit_id_skips_listing() {
        let cloud = FakeCloud::new();
        cloud.state().folders.insert(
            "dir".into(),
            vec![RemoteFile::file("first", "a.mkv", 1), RemoteFile::file("second", "b.mkv", 1)],
        );
        let mut pool = pool(&cloud);
        quick().rename(&mut pool, "B.mkv", "dir", Some("second")).await.unwrap();
        assert_eq!(cloud.state().renames, vec![("second".to_string(), "B.mkv".to_string())]);
    }

    fn expected(dedicated_folder: bool) -> ExpectedCopy {
        ExpectedCopy {
            target_name: "Dune (2021).mkv".into(),
            source_name: "Dune.2021.2160p.mkv".into(),
            dedicated_folder,
        }
    }

    #[test]
    fn test_pick_prefers_target_then_source_name() {
        let files = vec![
            RemoteFile::file("src", "Dune.2021.2160p.mkv", 1),
            RemoteFile::file("dst", "Dune (2021).mkv", 1),
        ];
        assert_eq!(expected(false).pick(files.clone()).unwrap().file_id, "dst");
        assert_eq!(expected(false).pick(files[..1].to_vec()).unwrap().file_id, "src");
        assert!(expected(false).pick(Vec::new()).is_none());
    }

    #[test]
    fn test_pick_any_file_only_in_dedicated_folder() {
        let files = vec![
            RemoteFile::folder("sub", "extras"),
            RemoteFile::file("renamed", "dune-web.mkv", 1),
        ];
        assert!(expected(false).pick(files.clone()).is_none());
        assert_eq!(expected(true).pick(files).unwrap().file_id, "renamed");
    }

    #[tokio::test]
    async fn test_wait_finds_copy_under_source_name() {
        let cloud = FakeCloud::new();
        cloud.state().folders.insert(
            "dir".into(),
            vec![RemoteFile::file("other", "stale.mkv", 1), RemoteFile::file("new", "Dune.2021.2160p.mkv", 2)],
        );
        let mut pool = pool(&cloud);
        let file = quick().wait_for_copy(&mut pool, "dir", &expected(false)).await.unwrap();
        assert_eq!(file.file_id, "new");
    }

    #[tokio::test]
    async fn test_wait_times_out_instead_of_taking_other_file() {
        let cloud = FakeCloud::new();
        cloud.state().folders.insert("dir".into(), vec![RemoteFile::file("other", "stale.mkv", 1)]);
        let mut pool = pool(&cloud);
        let result = quick().wait_for_copy(&mut pool, "dir", &expected(false)).await;
        assert!(matches!(
            result,
            Err(TransferError::FileOperation(FileOperationError::CopyTimeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_ensure_folder_reuses_leftover() {
        let cloud = FakeCloud::new();
        let mut pool = pool(&cloud);
        let first = quick().ensure_folder(&mut pool, "Dune (2021)").await.unwrap();
        let again = quick().ensure_folder(&mut pool, "Dune (2021)").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(cloud.state().created_folders.len(), 1);

        let other = quick().ensure_folder(&mut pool, "Arrival (2016)").await.unwrap();
        assert_ne!(other, first);
    }
}
