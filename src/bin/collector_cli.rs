//! Collector CLI
//!
//! Usage:
//!   collector-cli run [--pages A-B]        Crawl and capture (repeats if a schedule is set)
//!   collector-cli check-share <link>       Resolve a share link with the first account
//!   collector-cli capacity                 Show free space of every account
//!
//! Global options: --config PATH, --log-level LEVEL

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use cloudshare_collector::capacity::is_sufficient;
use cloudshare_collector::config::default_config_path;
use cloudshare_collector::crawler::{ListingCrawler, PageRange};
use cloudshare_collector::dedup_filter::SqliteTitleFilter;
use cloudshare_collector::parser::ChatCompletionParser;
use cloudshare_collector::providers::{Cloud189Provider, StorageProvider};
use cloudshare_collector::scheduler::wait_until;
use cloudshare_collector::{
    load_config, logging, save_config, Account, AccountPool, Collector, CollectorConfig,
    TransferOrchestrator,
};

#[derive(Parser)]
#[command(
    name = "collector-cli",
    about = "Collect shared movie files into a pool of cloud drive accounts",
    version
)]
struct Cli {
    /// Config file (default: <config dir>/cloudshare-collector/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "cloudshare_collector=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl listing pages and capture new titles
    Run {
        /// Listing page range, e.g. 1-10 (default: from config)
        #[arg(long)]
        pages: Option<PageRange>,
        /// Run once even if a schedule is configured
        #[arg(long)]
        once: bool,
    },
    /// Resolve a share link and print the file that would be copied
    CheckShare {
        /// Share link text, e.g. "https://cloud.189.cn/t/abc（访问码：1234）"
        link: String,
    },
    /// Print free space of every configured account
    Capacity,
}

fn provider(config: &CollectorConfig) -> Arc<dyn StorageProvider> {
    Arc::new(Cloud189Provider::new(config.cloud189.clone()))
}

fn account_pool(config: &CollectorConfig) -> Result<AccountPool> {
    let accounts = config
        .accounts
        .iter()
        .map(|a| Account::new(a.credentials(), a.root_folder.clone()))
        .collect();
    Ok(AccountPool::new(provider(config), accounts)?.with_root_folder_name(config.root_folder_name.clone()))
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// One full collection run; root folder ids are saved afterwards.
async fn run_once(config_path: &Path, pages: PageRange) -> Result<()> {
    let mut config = load_config(config_path)?;

    let parser = Arc::new(ChatCompletionParser::new(&config.llm)?);
    let crawler = ListingCrawler::new(&config.crawler, parser, config.llm.prompt())?;
    let filter = SqliteTitleFilter::open(&config.db_path)?;
    let orchestrator = TransferOrchestrator::new(account_pool(&config)?, &config.transfer);

    let mut collector = Collector::new(
        orchestrator,
        Box::new(crawler),
        Box::new(filter),
        config.folder_rename_pattern.clone(),
        config.file_rename_pattern.clone(),
    );
    let stats = collector.collect(pages).await;
    println!(
        "seen {}  skipped {}  captured {}  failed {}",
        stats.seen, stats.skipped, stats.captured, stats.failed
    );

    let ids = collector.orchestrator().pool().root_folder_ids();
    if config.apply_root_folders(&ids) {
        save_config(config_path, &config)?;
    }
    Ok(())
}

async fn run(config_path: &Path, pages: Option<PageRange>, once: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let pages = pages.unwrap_or(config.crawler.pages);

    let schedule = match config.schedule {
        Some(schedule) if !once => schedule,
        _ => return run_once(config_path, pages).await,
    };

    let mut next = schedule.first_run(Local::now().naive_local());
    loop {
        info!("Next run at {}", next.format("%Y-%m-%d %H:%M"));
        tokio::time::sleep(wait_until(next)).await;
        let started = Local::now().naive_local();
        if let Err(e) = run_once(config_path, pages).await {
            error!("Run failed: {:#}", e);
        }
        next = schedule.next_run(started);
    }
}

async fn check_share(config: &CollectorConfig, link: &str) -> Result<()> {
    let mut pool = account_pool(config)?;
    let session = pool.session().await?;
    let resolver = cloudshare_collector::ShareResolver::new(
        config.transfer.max_share_depth,
        config.transfer.max_share_entries,
    );
    let resolved = resolver.resolve(session, link).await?;

    println!("Share:     {}", resolved.descriptor);
    println!("Share id:  {}", resolved.share.share_id);
    println!("File:      {}", resolved.file.name);
    println!("File id:   {}", resolved.file.file_id);
    println!("Size:      {} ({} bytes)", format_size(resolved.file.size), resolved.file.size);
    println!("Extension: {}", resolved.file.extension());
    Ok(())
}

async fn capacity(config: &CollectorConfig) -> Result<()> {
    let mut pool = account_pool(config)?;
    let mut failures = 0;
    for index in 0..pool.len() {
        if index > 0 {
            if let Err(e) = pool.rotate().await {
                println!("{:<24} login failed: {}", pool.current().username(), e);
                failures += 1;
                continue;
            }
        }
        let username = pool.current().username().to_string();
        let snapshot = match pool.session().await {
            Ok(session) => session.capacity().await.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e)),
        };
        match snapshot {
            Ok(s) => {
                let usable = is_sufficient(s.free_bytes, 0, config.transfer.safety_margin_bytes);
                println!(
                    "{:<24} {:>12} free{}",
                    username,
                    format_size(s.free_bytes),
                    if usable { "" } else { "  (below safety margin)" }
                );
            }
            Err(e) => {
                println!("{:<24} error: {}", username, e);
                failures += 1;
            }
        }
    }
    if failures == pool.len() {
        bail!("no account could be queried");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Run { pages, once } => run(&config_path, pages, once).await,
        Commands::CheckShare { link } => {
            let config = load_config(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            check_share(&config, &link).await
        }
        Commands::Capacity => {
            let config = load_config(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            capacity(&config).await
        }
    }
}
