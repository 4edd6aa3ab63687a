//! Paginated catalog ingestion
//!
//! Drives the remote catalog page by page and feeds the catalog store. The
//! remote API is behind the [`CatalogSource`] capability trait so the fetch
//! loop can be exercised against a fake source in tests.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::models::{CatalogPage, RawCatalogEntry};
use crate::store::CatalogStore;

const USER_AGENT: &str = concat!("plugin-harvest/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Paginated read-only view of the remote catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page. Non-success HTTP status is a typed error, not a panic.
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage>;
}

/// Live catalog source speaking the registry's query API.
pub struct HttpCatalogSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage> {
        let url = format!(
            "{}?action=query_plugins&request[page]={}&request[per_page]={}",
            self.base_url, page, per_page
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::CatalogRequest {
                page,
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body: serde_json::Value = response.json().await?;

        let total_pages = body
            .get("info")
            .and_then(|i| i.get("pages"))
            .and_then(|p| p.as_u64())
            .ok_or_else(|| HarvestError::MalformedPage {
                page,
                reason: "missing info.pages".to_string(),
            })? as u32;

        let entries: Vec<RawCatalogEntry> = body
            .get("plugins")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| HarvestError::MalformedPage {
                page,
                reason: "missing plugins list".to_string(),
            })?;

        Ok(CatalogPage {
            total_pages,
            entries,
        })
    }
}

/// Outcome of one catalog refresh.
#[derive(Debug, Default, Clone)]
pub struct CatalogSummary {
    pub total_pages: u32,
    pub pages_ingested: u32,
    pub plugins_ingested: usize,
}

/// Sequential pagination over a [`CatalogSource`], upserting every parsed
/// entry into the catalog store with a commit per page.
pub struct CatalogFetcher<S> {
    source: S,
    per_page: u32,
}

impl<S: CatalogSource> CatalogFetcher<S> {
    pub fn new(source: S, per_page: u32) -> Self {
        Self { source, per_page }
    }

    /// Fetch page 1 to learn the total page count, then pages 2..=N in
    /// increasing order. A failed, malformed, or empty page ends pagination
    /// early without error; the partial catalog is accepted. Only store
    /// failures propagate.
    ///
    /// `progress` is called with (pages done, total pages) after each page.
    pub async fn fetch_all(
        &self,
        store: &CatalogStore,
        mut progress: impl FnMut(u32, u32),
    ) -> Result<CatalogSummary> {
        let first = match self.source.fetch_page(1, self.per_page).await {
            Ok(page) => page,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(%err, "failed to retrieve catalog information");
                return Ok(CatalogSummary::default());
            }
        };

        let total_pages = first.total_pages;
        info!(total_pages, "starting catalog refresh");

        let mut summary = CatalogSummary {
            total_pages,
            ..CatalogSummary::default()
        };

        let mut page = first;
        let mut page_number = 1;
        loop {
            if page.entries.is_empty() {
                warn!(page_number, "empty catalog page, stopping pagination");
                break;
            }

            summary.plugins_ingested += self.ingest_page(store, page_number, page)?;
            summary.pages_ingested += 1;
            progress(summary.pages_ingested, total_pages);

            if page_number >= total_pages {
                break;
            }
            page_number += 1;

            page = match self.source.fetch_page(page_number, self.per_page).await {
                Ok(page) => page,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    // Partial catalogs are accepted; re-running resumes safely
                    // because the upsert is idempotent.
                    warn!(page_number, %err, "catalog page failed, stopping pagination");
                    break;
                }
            };
        }

        info!(
            pages = summary.pages_ingested,
            plugins = summary.plugins_ingested,
            "catalog refresh finished"
        );
        Ok(summary)
    }

    fn ingest_page(
        &self,
        store: &CatalogStore,
        page_number: u32,
        page: CatalogPage,
    ) -> Result<usize> {
        let records: Vec<_> = page
            .entries
            .into_iter()
            .filter_map(|entry| match entry.normalize() {
                Some(record) => Some(record),
                None => {
                    debug!(page_number, "skipping catalog entry without slug");
                    None
                }
            })
            .collect();

        store.upsert_page(&records)?;
        debug!(page_number, records = records.len(), "ingested catalog page");
        Ok(records.len())
    }
}
