use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::document::{DocumentMetadata, SourceType};

/// Elements holding a page's primary content, in order of preference
const CONTENT_SELECTORS: [&str; 3] = ["main", "article", "div.content"];

/// Configuration for the web crawler
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlerConfig {
    /// User agent string to use for requests
    pub user_agent: String,
    /// Timeout for HTTP requests in seconds
    pub timeout_seconds: u64,
    /// Stop after fetching this many pages
    pub max_pages: Option<usize>,
    /// Do not follow links further than this many hops from the base URL
    pub max_depth: Option<usize>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("support-rag/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 30,
            max_pages: None,
            max_depth: None,
        }
    }
}

/// Main text and outgoing links of a fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub text: String,
    pub links: Vec<Url>,
}

pub struct WebCrawler {
    client: reqwest::Client,
    config: CrawlerConfig,
}

impl WebCrawler {
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(WebCrawler { client, config })
    }

    /// Crawl every page under `base_url`, writing each page's main text to
    /// `output_dir/NNNN.txt`.
    ///
    /// Pages are visited depth-first, each normalized URL at most once, and only
    /// when the URL starts with the base URL. Pages without a content region
    /// are skipped and their links are not followed; a page whose region is
    /// empty is not saved but its links are. Fetch errors are logged and do not
    /// stop the crawl.
    pub async fn crawl<P: AsRef<Path>>(
        &self,
        base_url: &str,
        output_dir: P,
    ) -> Result<Vec<DocumentMetadata>> {
        let output_dir = output_dir.as_ref();
        let base = Url::parse(base_url).with_context(|| format!("Invalid base URL: {}", base_url))?;
        let prefix = normalize_url(&base);

        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

        let mut metadata_list = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<(Url, usize)> = vec![(base, 0)];
        let mut fetched = 0;

        while let Some((url, depth)) = stack.pop() {
            let key = normalize_url(&url);
            if !key.starts_with(&prefix) || visited.contains(&key) {
                continue;
            }
            if self.config.max_pages.is_some_and(|max| fetched >= max) {
                info!("Reached page limit of {}, stopping crawl", fetched);
                break;
            }
            visited.insert(key.clone());
            fetched += 1;

            let html = match self.fetch(&url).await {
                Ok(html) => html,
                Err(e) => {
                    error!("Error scraping {}: {:#}", key, e);
                    continue;
                }
            };

            let page = match extract_page(&html, &url) {
                Ok(Some(page)) => page,
                Ok(None) => {
                    debug!("No main content found on {}, skipping", key);
                    continue;
                }
                Err(e) => {
                    error!("Error scraping {}: {:#}", key, e);
                    continue;
                }
            };

            if page.text.is_empty() {
                debug!("Empty main content on {}, following links only", key);
            } else {
                let output_path = output_dir.join(format!("{:04}.txt", metadata_list.len()));
                match tokio::fs::write(&output_path, &page.text).await {
                    Ok(()) => {
                        metadata_list.push(DocumentMetadata {
                            source: key.clone(),
                            source_type: SourceType::Webpage,
                            path: output_path,
                        });
                        info!("Scraped {}", key);
                    }
                    Err(e) => error!(
                        "Error scraping {}: failed to write {}: {}",
                        key,
                        output_path.display(),
                        e
                    ),
                }
            }

            if self.config.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            // Reversed so the first link on the page is visited first
            for link in page.links.into_iter().rev() {
                stack.push((link, depth + 1));
            }
        }

        info!(
            "Crawl of {} finished: {} pages fetched, {} saved",
            prefix,
            fetched,
            metadata_list.len()
        );
        Ok(metadata_list)
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}

/// Pull the main content text and all links out of an HTML page.
/// `None` when the page has no recognizable content region; a region holding
/// only whitespace yields empty text.
pub fn extract_page(html: &str, page_url: &Url) -> Result<Option<ExtractedPage>> {
    let document = Html::parse_document(html);

    let selectors = CONTENT_SELECTORS
        .iter()
        .map(|s| parse_selector(s))
        .collect::<Result<Vec<_>>>()?;
    let Some(content) = selectors
        .iter()
        .find_map(|selector| document.select(selector).next())
    else {
        return Ok(None);
    };

    let text = content
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let link_selector = parse_selector("a[href]")?;
    let links = document
        .select(&link_selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| match page_url.join(href) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("Failed to resolve link '{}' on {}: {}", href, page_url, e);
                None
            }
        })
        .collect();

    Ok(Some(ExtractedPage { text, links }))
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Invalid CSS selector '{}': {:?}", selector, e))
}

/// Visited-set key for a URL: the absolute URL without its fragment
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}
