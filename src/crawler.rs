//! Listing-site crawler
//!
//! Walks listing pages, follows each detail link and asks the parser for a
//! title/year/share-link triple. The result is a lazy stream: a listing page
//! is only fetched once every detail link from the previous one has been
//! consumed. Pages the parser cannot use are skipped.

use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::parser::{ParsedListing, Parser};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36 Edg/134.0.0.0";

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Invalid selector '{0}'")]
    Selector(String),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("GET {url} returned HTTP {status}")]
    Http { url: String, status: u16 },
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid page range '{0}', expected START-END")]
    PageRange(String),
}

/// Inclusive range of listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl Default for PageRange {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PageRange {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CrawlError::PageRange(s.to_string());
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (a.trim().parse().map_err(|_| invalid())?, b.trim().parse().map_err(|_| invalid())?),
            None => {
                let page = s.trim().parse().map_err(|_| invalid())?;
                (page, page)
            }
        };
        if start == 0 || start > end {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

/// Produces parsed candidates for a page range.
pub trait Crawler: Send + Sync {
    fn crawl(&self, pages: PageRange) -> BoxStream<'_, ParsedListing>;
}

/// Crawler settings, as stored in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub base_url: String,
    pub tag_id: String,
    pub pages: PageRange,
    /// Anchors on a listing page that lead to detail pages
    pub list_selector: String,
    /// Block of a detail page whose text is handed to the parser
    pub detail_selector: String,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.leijing.xyz".to_string(),
            tag_id: "42204681950354".to_string(),
            pages: PageRange::default(),
            list_selector: "body > div:nth-of-type(2) > div > div:nth-of-type(2) > div > div > div \
                > div:nth-of-type(2) > h2 > a"
                .to_string(),
            detail_selector: "body > div:nth-of-type(2) > div > div > div:nth-of-type(1) \
                > div:nth-of-type(1) > div:nth-of-type(3)"
                .to_string(),
            request_delay_ms: 2000,
            timeout_secs: 10,
        }
    }
}

fn selector(source: &str) -> Result<Selector, CrawlError> {
    Selector::parse(source).map_err(|_| CrawlError::Selector(source.to_string()))
}

/// `href` targets of every element matching `selector`, resolved against `base`.
fn extract_links(html: &str, selector: &Selector, base: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .map(String::from)
        .collect()
}

/// Trimmed, non-empty text nodes of every match, one per line.
fn extract_text(html: &str, selector: &Selector) -> String {
    let doc = Html::parse_document(html);
    doc.select(selector)
        .flat_map(|el| el.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ListingCrawler {
    client: Client,
    parser: Arc<dyn Parser>,
    prompt: String,
    base: Url,
    tag_id: String,
    list_selector: Selector,
    detail_selector: Selector,
    delay: Duration,
}

impl ListingCrawler {
    pub fn new(
        settings: &CrawlerSettings,
        parser: Arc<dyn Parser>,
        prompt: impl Into<String>,
    ) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            parser,
            prompt: prompt.into(),
            base: Url::parse(&settings.base_url)?,
            tag_id: settings.tag_id.clone(),
            list_selector: selector(&settings.list_selector)?,
            detail_selector: selector(&settings.detail_selector)?,
            delay: Duration::from_millis(settings.request_delay_ms),
        })
    }

    fn listing_url(&self, page: u32) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("tagId", &self.tag_id)
            .append_pair("page", &page.to_string());
        url
    }

    async fn fetch(&self, url: &str) -> Result<String, CrawlError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(CrawlError::Http { url: url.to_string(), status });
        }
        Ok(response.text().await?)
    }

    async fn detail_links(&self, page: u32) -> Result<Vec<String>, CrawlError> {
        let url = self.listing_url(page);
        let body = self.fetch(url.as_str()).await?;
        let links = extract_links(&body, &self.list_selector, &self.base);
        info!("Listing page {}: {} detail links", page, links.len());
        Ok(links)
    }

    /// Fetch and parse one detail page; `None` skips it.
    async fn candidate(&self, url: &str) -> Option<ParsedListing> {
        let body = match self.fetch(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Skipping {}: {}", url, e);
                return None;
            }
        };
        let text = extract_text(&body, &self.detail_selector);
        if text.is_empty() {
            debug!("No content block on {}", url);
            return None;
        }
        let parsed = self.parser.parse(&text, &self.prompt).await;
        tokio::time::sleep(self.delay).await;
        match parsed {
            Ok(Some(listing)) => Some(listing),
            Ok(None) => {
                debug!("Parser found nothing on {}", url);
                None
            }
            Err(e) => {
                warn!("Parser failed on {}: {}", url, e);
                None
            }
        }
    }
}

struct Cursor {
    next_page: u32,
    last_page: u32,
    pending: VecDeque<String>,
}

impl Crawler for ListingCrawler {
    fn crawl(&self, pages: PageRange) -> BoxStream<'_, ParsedListing> {
        let cursor = Cursor {
            next_page: pages.start,
            last_page: pages.end,
            pending: VecDeque::new(),
        };
        stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(url) = cursor.pending.pop_front() {
                    match self.candidate(&url).await {
                        Some(listing) => return Some((listing, cursor)),
                        None => continue,
                    }
                }
                if cursor.next_page > cursor.last_page {
                    return None;
                }
                let page = cursor.next_page;
                cursor.next_page += 1;
                match self.detail_links(page).await {
                    Ok(links) => cursor.pending.extend(links),
                    Err(e) => warn!("Listing page {} failed: {}", page, e),
                }
                tokio::time::sleep(self.delay).await;
            }
        })
        .boxed()
    }
}
