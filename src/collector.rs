//! Batch collector
//!
//! Drives one run: crawl candidates, skip titles already captured, adopt the
//! share into storage, wait, rename, record. Every per-item failure is logged
//! and the batch moves on.

use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::crawler::{Crawler, PageRange};
use crate::dedup_filter::{FilterError, TitleFilter};
use crate::movie::MovieInfo;
use crate::parser::ParsedListing;
use crate::providers::TransferError;
use crate::transfer::{TargetFolder, TransferOrchestrator};

/// Outcome counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub seen: usize,
    pub skipped: usize,
    pub captured: usize,
    pub failed: usize,
}

/// Why one item was not captured.
#[derive(Debug, thiserror::Error)]
enum ItemError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Filter(#[from] FilterError),
}

pub struct Collector {
    orchestrator: TransferOrchestrator,
    crawler: Box<dyn Crawler>,
    filter: Box<dyn TitleFilter>,
    folder_pattern: String,
    file_pattern: String,
}

impl Collector {
    pub fn new(
        orchestrator: TransferOrchestrator,
        crawler: Box<dyn Crawler>,
        filter: Box<dyn TitleFilter>,
        folder_pattern: impl Into<String>,
        file_pattern: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            crawler,
            filter,
            folder_pattern: folder_pattern.into(),
            file_pattern: file_pattern.into(),
        }
    }

    pub fn orchestrator(&self) -> &TransferOrchestrator {
        &self.orchestrator
    }

    /// Run over `pages`, then close the filter.
    pub async fn collect(&mut self, pages: PageRange) -> CollectStats {
        let mut stats = CollectStats::default();
        info!("Collecting pages {}", pages);

        let mut candidates = self.crawler.crawl(pages);
        while let Some(listing) = candidates.next().await {
            stats.seen += 1;
            match self.filter.exists(&listing.movie.title, listing.movie.year) {
                Ok(true) => {
                    info!("Skipping {}: already captured", listing.movie);
                    stats.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!("Filter lookup for {} failed, trying anyway: {}", listing.movie, e),
            }

            let outcome = capture(
                &mut self.orchestrator,
                self.filter.as_mut(),
                &listing,
                &self.folder_pattern,
                &self.file_pattern,
            )
            .await;
            match outcome {
                Ok(()) => {
                    info!("Captured {}", listing.movie);
                    stats.captured += 1;
                }
                Err(e) => {
                    error!("Failed to capture {}: {}", listing.movie, e);
                    stats.failed += 1;
                }
            }
        }
        drop(candidates);

        if let Err(e) = self.filter.close() {
            error!("Closing title filter failed: {}", e);
        }
        info!(
            "Run finished: {} seen, {} skipped, {} captured, {} failed",
            stats.seen, stats.skipped, stats.captured, stats.failed
        );
        stats
    }
}

async fn capture(
    orchestrator: &mut TransferOrchestrator,
    filter: &mut dyn TitleFilter,
    listing: &ParsedListing,
    folder_pattern: &str,
    file_pattern: &str,
) -> Result<(), ItemError> {
    let movie: &MovieInfo = &listing.movie;
    let folder_name = movie.render(folder_pattern);
    let file_name = movie.render(file_pattern);

    let submitted = orchestrator
        .transfer(TargetFolder::Named(folder_name), &file_name, &listing.share_link)
        .await?;
    orchestrator.finalize(&submitted).await?;

    let label = orchestrator.pool().provider_type().to_string();
    filter.record(&movie.title, movie.year, &label, &submitted.account)?;
    Ok(())
}
