//! Movie share collector
//!
//! Crawls a listing site for movie share links, resolves each link on a
//! share-based cloud drive and copies the largest shared file into one of a
//! pool of accounts, rotating to the next account when one runs out of space.

pub mod providers;

pub mod account_pool;
pub mod capacity;
pub mod collector;
pub mod config;
pub mod crawler;
pub mod dedup_filter;
pub mod folder_ops;
pub mod logging;
pub mod movie;
pub mod parser;
pub mod scheduler;
pub mod share_resolver;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use account_pool::{Account, AccountPool};
pub use capacity::{CapacityGuard, SAFETY_MARGIN};
pub use collector::{CollectStats, Collector};
pub use config::{load_config, save_config, CollectorConfig, ConfigError};
pub use share_resolver::{ResolvedShare, ShareResolver};
pub use transfer::{SubmittedTransfer, TargetFolder, TransferOrchestrator, TransferSettings};
