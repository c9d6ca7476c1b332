//! HTTP Price Source
//!
//! Polls a quote endpoint per symbol. The URL comes from a template where
//! `{symbol}` is replaced by the normalized symbol, e.g.
//! `https://quotes.example.com/v1/ticker/{symbol}`.
//!
//! JSON bodies are probed with JSON pointers (`/data/price`); any other body
//! is only reachable through the fallback text scan.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use ticker_core::Symbol;
use ticker_ports::{PriceSource, SourceContext, SourceError, SourceResult, SourceSession};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    pub url_template: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_user_agent() -> String {
    concat!("ticker-streaming/", env!("CARGO_PKG_VERSION")).to_string()
}

impl HttpSourceConfig {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }

    pub fn url_for(&self, symbol: &Symbol) -> String {
        self.url_template.replace("{symbol}", symbol.as_str())
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("No quote at this address (HTTP {0})")]
    NotFound(StatusCode),
    #[error("Upstream returned HTTP {0}")]
    Status(StatusCode),
}

impl FetchError {
    /// Classification while opening: a missing quote means the symbol is unknown
    fn on_open(self) -> SourceError {
        match self {
            FetchError::NotFound(_) => SourceError::InvalidSymbol(self.to_string()),
            FetchError::Http(_) | FetchError::Status(_) => {
                SourceError::Acquisition(self.to_string())
            }
        }
    }

    /// Classification while polling: a missing quote means the listing went away
    fn on_refresh(self) -> SourceError {
        match self {
            FetchError::NotFound(_) => SourceError::Unavailable(self.to_string()),
            FetchError::Http(_) | FetchError::Status(_) => SourceError::Transient(self.to_string()),
        }
    }
}

pub struct HttpPriceSource {
    config: HttpSourceConfig,
}

impl HttpPriceSource {
    pub fn new(config: HttpSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn provision(&self, symbol: &Symbol) -> SourceResult<Arc<dyn SourceContext>> {
        let client = Client::builder()
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .user_agent(self.config.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Acquisition(e.to_string()))?;
        debug!(%symbol, "Provisioned HTTP client");

        Ok(Arc::new(HttpContext {
            client,
            closed: AtomicBool::new(false),
        }))
    }

    async fn open(
        &self,
        symbol: &Symbol,
        context: Arc<dyn SourceContext>,
    ) -> SourceResult<Box<dyn SourceSession>> {
        let client = context
            .as_any()
            .downcast_ref::<HttpContext>()
            .filter(|ctx| ctx.is_usable())
            .map(|ctx| ctx.client.clone())
            .ok_or_else(|| SourceError::Acquisition("context is not a live HTTP context".into()))?;

        let url = self.config.url_for(symbol);
        let document = fetch(&client, &url).await.map_err(FetchError::on_open)?;

        Ok(Box::new(HttpSession {
            client,
            url,
            document: RwLock::new(document),
            closed: AtomicBool::new(false),
            context,
        }))
    }

    fn name(&self) -> &str {
        "HttpPriceSource"
    }
}

struct HttpContext {
    client: Client,
    closed: AtomicBool,
}

#[async_trait]
impl SourceContext for HttpContext {
    fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Last fetched body
#[derive(Debug, Default)]
struct Document {
    json: Option<Value>,
    text: String,
}

impl Document {
    fn parse(text: String) -> Self {
        let json = serde_json::from_str(&text).ok();
        Self { json, text }
    }

    fn probe(&self, locator: &str) -> Option<String> {
        let json = self.json.as_ref()?;
        let value = if locator.starts_with('/') {
            json.pointer(locator)
        } else {
            json.get(locator)
        }?;
        scalar_text(value)
    }

    fn fragments(&self) -> Vec<String> {
        match &self.json {
            Some(json) => {
                let mut out = Vec::new();
                collect_leaves(json, &mut out);
                out
            }
            None => self
                .text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn collect_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, out)),
        other => out.extend(scalar_text(other)),
    }
}

async fn fetch(client: &Client, url: &str) -> Result<Document, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::BAD_REQUEST => {
            return Err(FetchError::NotFound(status));
        }
        s if !s.is_success() => return Err(FetchError::Status(status)),
        _ => {}
    }
    let text = response.text().await?;
    Ok(Document::parse(text))
}

struct HttpSession {
    client: Client,
    url: String,
    document: RwLock<Document>,
    closed: AtomicBool,
    context: Arc<dyn SourceContext>,
}

impl HttpSession {
    fn ensure_open(&self) -> SourceResult<()> {
        if self.is_closed() {
            return Err(SourceError::Unavailable("session closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceSession for HttpSession {
    async fn refresh(&self) -> SourceResult<()> {
        self.ensure_open()?;
        let document = fetch(&self.client, &self.url)
            .await
            .map_err(FetchError::on_refresh)?;
        *self.document.write() = document;
        Ok(())
    }

    async fn probe(&self, locator: &str) -> SourceResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.document.read().probe(locator))
    }

    async fn text_fragments(&self) -> SourceResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.document.read().fragments())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.context.is_usable()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
