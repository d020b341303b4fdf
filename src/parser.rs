//! Detail-page parser backed by an OpenAI-compatible chat completion API.
//!
//! One request per page: the prompt plus the page text go out, a
//! `title, year, link` line (or a failure marker) comes back.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::movie::MovieInfo;

/// Default extraction prompt. Two example answers show the expected shape,
/// including the access-code form of a share link.
pub const DEFAULT_PROMPT: &str = "你是一个从网页内容中提取指定信息的工具, 下面每次对话, 我将给你一段网页信息, \
请你提取出三个信息并返回给我: 电影名, 上映年份, 以 https://cloud.189.cn 开头的天翼云盘分享链接. \
三个信息请都使用文本格式给出, 用逗号隔开. 如果提取失败, 直接返回\"失败\", 不需要返回电影名与年份. \
有时分享链接会带有访问码, 如果遇到这种情况, 请按照下面的例子将访问码与分享链接一并带上. 以下是两个正确回应的例子: \n\
鬼滴语2, 2024, https://cloud.189.cn/t/2uiM7zb6nuyi（访问码：kp0m）\n\
You Only Live Once, 2025, http://cloud.189.cn/t/MRnMfemUvQ3u";

const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Chat API rejected the token (HTTP {0})")]
    Auth(u16),
    #[error("Chat API rate limit hit")]
    RateLimited,
    #[error("Chat API server error (HTTP {0})")]
    Server(u16),
    #[error("Malformed chat API response: {0}")]
    MalformedResponse(String),
    #[error("Chat API request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// One candidate extracted from a detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedListing {
    pub movie: MovieInfo,
    pub share_link: String,
}

#[async_trait]
pub trait Parser: Send + Sync {
    /// `Ok(None)` when the page holds no usable title/year/link triple.
    async fn parse(&self, page_text: &str, prompt: &str) -> Result<Option<ParsedListing>, ParserError>;
}

/// LLM endpoint settings, as stored in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Base URL; `/chat/completions` is appended
    pub api_url: String,
    pub model: String,
    pub token: String,
    /// Replaces [`DEFAULT_PROMPT`] when set
    pub prompt: Option<String>,
}

impl LlmSettings {
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty()).unwrap_or(DEFAULT_PROMPT)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct ChatCompletionParser {
    client: Client,
    endpoint: String,
    model: String,
    token: SecretString,
}

impl ChatCompletionParser {
    pub fn new(settings: &LlmSettings) -> Result<Self, ParserError> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.api_url.trim_end_matches('/')),
            model: settings.model.clone(),
            token: SecretString::from(settings.token.clone()),
        })
    }

    fn headers(&self) -> Result<HeaderMap, ParserError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|e| ParserError::MalformedResponse(format!("Invalid token for header: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

#[async_trait]
impl Parser for ChatCompletionParser {
    async fn parse(&self, page_text: &str, prompt: &str) -> Result<Option<ParsedListing>, ParserError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "user", content: prompt },
                ChatMessage { role: "user", content: page_text },
            ],
            stream: false,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(classify_status(status));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ParserError::MalformedResponse(e.to_string()))?;
        let answer = body
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| ParserError::MalformedResponse("no choices in response".into()))?;

        debug!("Parser answer: {}", answer.trim());
        Ok(parse_answer(&answer))
    }
}

fn classify_status(status: u16) -> ParserError {
    match status {
        401 | 403 => ParserError::Auth(status),
        429 => ParserError::RateLimited,
        500..=599 => ParserError::Server(status),
        other => ParserError::MalformedResponse(format!("unexpected HTTP {}", other)),
    }
}

/// Split `title, year, link`. The title may contain commas, so split from the
/// right. Anything else, including the failure marker, yields `None`.
pub fn parse_answer(answer: &str) -> Option<ParsedListing> {
    let normalized = answer.trim().replace('，', ",");
    let mut parts = normalized.rsplitn(3, ',');
    let link = parts.next()?.trim();
    let year = parts.next()?.trim().parse::<u32>().ok()?;
    let title = parts.next()?.trim();
    if title.is_empty() || link.is_empty() {
        return None;
    }
    Some(ParsedListing {
        movie: MovieInfo::new(title, year),
        share_link: link.to_string(),
    })
}
