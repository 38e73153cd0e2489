//! Page fetching and visible-text extraction.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, Response};
use scraper::{Html, Node};
use tracing::debug;
use url::Url;

use table_enrich_shared::{EnrichError, Result};

/// Browser-like User-Agent; many company sites reject obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Default timeout in seconds for a single page request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// Elements whose text never renders on the page.
const HIDDEN_ELEMENTS: &[&str] = &["style", "script", "head", "title", "meta", "noscript"];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Allow loopback/private hosts (local mock servers, intranet sites).
    pub allow_private_hosts: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            allow_private_hosts: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Shared HTTP client for all scraping steps. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Fetcher {
    pub(crate) client: Client,
    allow_private_hosts: bool,
}

impl Fetcher {
    /// Build a fetcher with the given options.
    pub fn new(opts: &ScrapeOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| EnrichError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: opts.allow_private_hosts,
        })
    }

    /// Parse and vet a URL before any request is made.
    pub(crate) fn check_url(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim())
            .map_err(|e| EnrichError::validation(format!("invalid URL `{raw}`: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(EnrichError::validation(format!(
                    "unsupported URL scheme `{other}` in {url}"
                )));
            }
        }

        if !self.allow_private_hosts && is_private_target(&url) {
            return Err(EnrichError::validation(format!(
                "refusing to fetch private or local address {url}"
            )));
        }

        Ok(url)
    }

    /// Fetch a URL and return the body as text.
    pub async fn fetch_text(&self, raw_url: &str) -> Result<String> {
        let url = self.check_url(raw_url)?;
        debug!(%url, "fetching");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| EnrichError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Network(format!("{url}: HTTP {status}")));
        }

        read_capped(response, &url, MAX_RESPONSE_SIZE).await
    }

    /// Fetch a web page and return its visible text.
    pub async fn text_content(&self, url: &str) -> Result<String> {
        let html = self.fetch_text(url).await?;
        Ok(text_from_html(&html))
    }
}

/// Read a response body, giving up once it grows past `limit` bytes.
///
/// `Content-Length` is checked first, but chunked or lying servers are only
/// caught by counting what actually arrives.
pub(crate) async fn read_capped(mut response: Response, url: &Url, limit: u64) -> Result<String> {
    let too_large = |len: u64| {
        EnrichError::validation(format!(
            "{url}: response too large ({len} bytes, max {limit})"
        ))
    };

    if let Some(len) = response.content_length() {
        if len > limit {
            return Err(too_large(len));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| EnrichError::Network(format!("{url}: body read failed: {e}")))?
    {
        body.extend_from_slice(&chunk);
        if body.len() as u64 > limit {
            return Err(too_large(body.len() as u64));
        }
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Extract the text a reader would see from an HTML document.
///
/// Text under hidden elements is skipped, comments are ignored, and the
/// remaining fragments are trimmed and joined with single spaces.
pub fn text_from_html(body: &str) -> String {
    let doc = Html::parse_document(body);

    doc.tree
        .nodes()
        .filter_map(|node| match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
                });
                (!hidden).then(|| text.trim())
            }
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Private address protection
// ---------------------------------------------------------------------------

/// Check if a URL points at a loopback, private or local-only host.
fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
