//! Share link resolution
//!
//! Turns share-link text into the single file to copy: decode the link,
//! fetch the share metadata, and when the share is a folder walk its tree
//! and pick the largest file. The walk is bounded by depth and by total
//! entries seen, and never revisits a folder id.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::providers::{RemoteFile, ShareDescriptor, ShareInfo, ShareLinkError, StorageSession};

pub const DEFAULT_MAX_DEPTH: usize = 16;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// A share link resolved down to the file that will be copied.
#[derive(Debug, Clone)]
pub struct ResolvedShare {
    pub descriptor: ShareDescriptor,
    pub share: ShareInfo,
    pub file: RemoteFile,
}

#[derive(Debug, Clone, Copy)]
pub struct ShareResolver {
    max_depth: usize,
    max_entries: usize,
}

impl Default for ShareResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_ENTRIES)
    }
}

impl ShareResolver {
    pub fn new(max_depth: usize, max_entries: usize) -> Self {
        Self { max_depth, max_entries }
    }

    pub async fn resolve(
        &self,
        session: &dyn StorageSession,
        link_text: &str,
    ) -> Result<ResolvedShare, ShareLinkError> {
        let descriptor = ShareDescriptor::parse(link_text)?;
        let share = session.share_info(&descriptor).await?;
        debug!("Share {} -> entry {:?}", descriptor, share.entry);

        let file = if share.entry.is_folder {
            let files = self.walk(session, &share).await?;
            largest(files).ok_or_else(|| ShareLinkError::Empty(descriptor.to_string()))?
        } else {
            share.entry.clone()
        };

        info!("Resolved share {} to '{}' ({} bytes)", descriptor, file.name, file.size);
        Ok(ResolvedShare { descriptor, share, file })
    }

    /// Flatten every file under the share's root folder, in listing order
    /// (files of a folder first, then each subfolder in turn).
    async fn walk(
        &self,
        session: &dyn StorageSession,
        share: &ShareInfo,
    ) -> Result<Vec<RemoteFile>, ShareLinkError> {
        let mut files = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(share.entry.file_id.clone(), 0usize)];
        let mut entries = 0usize;

        while let Some((folder_id, depth)) = stack.pop() {
            if depth > self.max_depth {
                return Err(ShareLinkError::TooDeep { limit: self.max_depth });
            }
            if !visited.insert(folder_id.clone()) {
                debug!("Skipping already visited share folder {}", folder_id);
                continue;
            }

            let listing = session.list_share_dir(&folder_id, share).await?;
            entries += listing.files.len() + listing.folders.len();
            if entries > self.max_entries {
                return Err(ShareLinkError::TooManyEntries { limit: self.max_entries });
            }

            files.extend(listing.files.into_iter().filter(|f| !f.is_folder));
            // Reversed so the first subfolder is walked first
            stack.extend(listing.folders.into_iter().rev().map(|id| (id, depth + 1)));
        }

        Ok(files)
    }
}

/// Largest file by size; the first one wins a tie.
fn largest(files: Vec<RemoteFile>) -> Option<RemoteFile> {
    files.into_iter().fold(None, |best, file| match best {
        Some(b) if b.size >= file.size => Some(b),
        _ => Some(file),
    })
}
