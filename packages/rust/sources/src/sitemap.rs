//! Sub-page discovery through robots.txt and XML sitemaps.
//!
//! Sitemap locations are taken from `Sitemap:` directives in `robots.txt`,
//! falling back to the conventional `/sitemap.xml` and `/sitemap_index.xml`.
//! Sitemap indexes are followed up to [`MAX_SITEMAP_DEPTH`] levels.

use std::collections::{HashSet, VecDeque};

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::{debug, info, instrument};
use url::Url;

use table_enrich_shared::{EnrichError, Result};

use crate::fetch::Fetcher;

/// How many sitemap-index levels are followed below the root sitemaps.
const MAX_SITEMAP_DEPTH: u32 = 3;

/// Upper bound on sitemap documents fetched for one site.
const MAX_SITEMAPS: usize = 50;

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDoc {
    /// `<urlset>`: page locations.
    UrlSet(Vec<String>),
    /// `<sitemapindex>`: locations of further sitemaps.
    Index(Vec<String>),
}

impl Fetcher {
    /// List every page URL published in the site's sitemaps.
    ///
    /// Pages are de-duplicated, keeping first-seen order. Individual broken
    /// sitemaps are skipped; an error is returned only when none could be read.
    #[instrument(skip(self))]
    pub async fn sub_pages(&self, base_url: &str) -> Result<Vec<String>> {
        let base = self.check_url(base_url)?;
        let origin = origin_url(&base)?;

        let mut roots = self.robots_sitemaps(&origin).await;
        if roots.is_empty() {
            roots = vec![
                format!("{origin}/sitemap.xml"),
                format!("{origin}/sitemap_index.xml"),
            ];
        }

        let mut queue: VecDeque<(String, u32)> = roots.into_iter().map(|u| (u, 0)).collect();
        let mut visited = HashSet::new();
        let mut seen_pages = HashSet::new();
        let mut pages = Vec::new();
        let mut readable = 0usize;

        while let Some((sitemap_url, depth)) = queue.pop_front() {
            if visited.len() >= MAX_SITEMAPS {
                debug!("sitemap limit reached");
                break;
            }
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }

            let doc = match self.fetch_text(&sitemap_url).await {
                Ok(body) => parse_sitemap(&body),
                Err(e) => Err(e),
            };

            match doc {
                Ok(SitemapDoc::UrlSet(locs)) => {
                    readable += 1;
                    for loc in locs {
                        if seen_pages.insert(loc.clone()) {
                            pages.push(loc);
                        }
                    }
                }
                Ok(SitemapDoc::Index(children)) => {
                    readable += 1;
                    if depth < MAX_SITEMAP_DEPTH {
                        queue.extend(children.into_iter().map(|c| (c, depth + 1)));
                    }
                }
                Err(e) => debug!(url = %sitemap_url, error = %e, "sitemap unavailable"),
            }
        }

        if readable == 0 {
            return Err(EnrichError::Network(format!(
                "no readable sitemap found for {origin}"
            )));
        }

        info!(pages = pages.len(), sitemaps = readable, "sub-pages discovered");
        Ok(pages)
    }

    /// `Sitemap:` directives from robots.txt, or nothing if it is unavailable.
    async fn robots_sitemaps(&self, origin: &str) -> Vec<String> {
        match self.fetch_text(&format!("{origin}/robots.txt")).await {
            Ok(body) => body
                .lines()
                .filter_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.trim()
                        .eq_ignore_ascii_case("sitemap")
                        .then(|| value.trim().to_string())
                })
                .filter(|v| !v.is_empty())
                .collect(),
            Err(e) => {
                debug!(error = %e, "robots.txt unavailable");
                Vec::new()
            }
        }
    }
}

/// Parse a sitemap XML document.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDoc> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut is_index: Option<bool> = None;
    let mut in_loc = false;
    let mut locs = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"urlset" => {
                    is_index.get_or_insert(false);
                }
                b"sitemapindex" => {
                    is_index.get_or_insert(true);
                }
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                let loc = t
                    .unescape()
                    .map_err(|e| EnrichError::parse(format!("sitemap <loc>: {e}")))?;
                push_loc(&mut locs, &loc);
            }
            Ok(Event::CData(t)) if in_loc => {
                push_loc(&mut locs, &String::from_utf8_lossy(&t.into_inner()));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EnrichError::parse(format!(
                    "invalid sitemap XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    match is_index {
        Some(true) => Ok(SitemapDoc::Index(locs)),
        Some(false) => Ok(SitemapDoc::UrlSet(locs)),
        None => Err(EnrichError::parse(
            "document is neither <urlset> nor <sitemapindex>",
        )),
    }
}

fn push_loc(locs: &mut Vec<String>, raw: &str) {
    let loc = raw.trim();
    if !loc.is_empty() {
        locs.push(loc.to_string());
    }
}

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| EnrichError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}
