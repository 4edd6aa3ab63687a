//! Bounded-concurrency archive retrieval and extraction
//!
//! Downloads plugin archives and unpacks them into the local workspace,
//! one directory per slug under `<workspace>/plugins/`. Extraction is
//! all-or-nothing: archives are unpacked into a staging directory and
//! renamed into place, so an interrupted run never leaves a directory that
//! looks complete. Admission is capped by a semaphore; per-slug failures
//! never abort sibling operations.

use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::models::{PluginRecord, ABSENT};

const USER_AGENT: &str = concat!("plugin-harvest/", env!("CARGO_PKG_VERSION"));
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Retrieval of one archive by URI.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn fetch(&self, slug: &str, uri: &str) -> Result<Vec<u8>>;
}

/// Live archive source over HTTP.
pub struct HttpArchiveSource {
    client: reqwest::Client,
}

impl HttpArchiveSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch(&self, slug: &str, uri: &str) -> Result<Vec<u8>> {
        debug!(slug, uri, "downloading archive");
        let response = self.client.get(uri).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// What to do when a plugin's workspace directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Leave the existing directory untouched; no network I/O.
    Skip,
    /// Delete the existing directory and extract fresh.
    Replace,
}

/// Outcome of one fetch-and-extract operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched,
    Skipped,
}

/// One per-slug failure, with enough context to retry manually.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub slug: String,
    pub reason: String,
}

/// Batch result of [`ArchiveFetcher::fetch_all_selected`].
#[derive(Debug, Default)]
pub struct FetchReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failures: Vec<FetchFailure>,
}

/// Fetches archives through an [`ArchiveSource`] and extracts them into the
/// workspace root.
pub struct ArchiveFetcher<S> {
    source: Arc<S>,
    workspace_root: PathBuf,
}

impl<S: ArchiveSource + 'static> ArchiveFetcher<S> {
    pub fn new(source: S, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            source: Arc::new(source),
            workspace_root: workspace_root.into(),
        }
    }

    /// Directory holding one extracted tree per slug.
    pub fn plugins_dir(&self) -> PathBuf {
        self.workspace_root.join("plugins")
    }

    /// Download, validate, and extract one plugin archive.
    pub async fn fetch_and_extract(
        &self,
        slug: &str,
        uri: &str,
        policy: ReplacePolicy,
    ) -> Result<FetchOutcome> {
        fetch_one(
            Arc::clone(&self.source),
            self.workspace_root.clone(),
            slug.to_string(),
            uri.to_string(),
            policy,
        )
        .await
    }

    /// Process the selected records with at most `concurrency_limit`
    /// fetch-and-extract operations in flight. All admitted work is drained
    /// before this returns; no unbounded fan-out regardless of input size.
    ///
    /// `progress` is called with (completed, total) as operations resolve.
    pub async fn fetch_all_selected(
        &self,
        records: &[PluginRecord],
        concurrency_limit: usize,
        policy: ReplacePolicy,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<FetchReport> {
        let total = records.len();
        info!(total, concurrency_limit, "starting archive fetch");

        std::fs::create_dir_all(self.plugins_dir())?;

        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        let mut handles = Vec::with_capacity(total);
        let mut report = FetchReport::default();

        for record in records {
            if record.download_link == ABSENT || record.download_link.is_empty() {
                report.failures.push(FetchFailure {
                    slug: record.slug.clone(),
                    reason: "no download link in catalog".to_string(),
                });
                continue;
            }

            // Admission cap: this blocks until a permit frees up, so at most
            // `concurrency_limit` operations are ever unresolved at once.
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| HarvestError::Download {
                    slug: record.slug.clone(),
                    reason: "admission semaphore closed".to_string(),
                })?;

            let source = Arc::clone(&self.source);
            let root = self.workspace_root.clone();
            let slug = record.slug.clone();
            let uri = record.download_link.clone();

            handles.push(tokio::spawn(async move {
                let result = fetch_one(source, root, slug.clone(), uri, policy).await;
                drop(permit);
                (slug, result)
            }));
        }

        let mut completed = report.failures.len();
        progress(completed, total);

        for handle in handles {
            let (slug, result) = match handle.await {
                Ok(item) => item,
                Err(err) => {
                    warn!(%err, "fetch task panicked");
                    continue;
                }
            };

            match result {
                Ok(FetchOutcome::Fetched) => report.fetched += 1,
                Ok(FetchOutcome::Skipped) => {
                    debug!(slug, "plugin directory already exists, skipping");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(slug, %err, "fetch-and-extract failed");
                    report.failures.push(FetchFailure {
                        slug,
                        reason: err.to_string(),
                    });
                }
            }
            completed += 1;
            progress(completed, total);
        }

        info!(
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failures.len(),
            "archive fetch finished"
        );
        Ok(report)
    }
}

async fn fetch_one<S: ArchiveSource>(
    source: Arc<S>,
    workspace_root: PathBuf,
    slug: String,
    uri: String,
    policy: ReplacePolicy,
) -> Result<FetchOutcome> {
    let target = workspace_root.join("plugins").join(&slug);

    if target.exists() {
        match policy {
            ReplacePolicy::Skip => return Ok(FetchOutcome::Skipped),
            ReplacePolicy::Replace => {
                debug!(slug, "replacing existing plugin directory");
                std::fs::remove_dir_all(&target)?;
            }
        }
    }

    let bytes = source.fetch(&slug, &uri).await?;

    // Archive decode and filesystem writes are blocking work.
    let task_slug = slug.clone();
    tokio::task::spawn_blocking(move || {
        extract_archive(&workspace_root, &task_slug, &bytes, &target)
    })
    .await
    .map_err(|err| HarvestError::Download {
        slug,
        reason: format!("extraction task failed: {err}"),
    })??;

    Ok(FetchOutcome::Fetched)
}

/// Unpack `bytes` as a zip archive into `target`, staging first so readers
/// only ever observe a fully extracted directory.
fn extract_archive(workspace_root: &Path, slug: &str, bytes: &[u8], target: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|err| HarvestError::CorruptArchive {
            slug: slug.to_string(),
            reason: err.to_string(),
        })?;

    std::fs::create_dir_all(workspace_root)?;
    let staging = tempfile::tempdir_in(workspace_root)?;

    if let Err(err) = archive.extract(staging.path()) {
        // TempDir cleanup removes the partial tree on drop.
        return Err(HarvestError::CorruptArchive {
            slug: slug.to_string(),
            reason: err.to_string(),
        });
    }

    // Archives conventionally carry a single top-level directory named after
    // the slug; fall back to the staging root when they do not.
    let staging_path = staging.into_path();
    let inner = staging_path.join(slug);
    let renames_inner = inner.is_dir();
    let extracted_root = if renames_inner {
        inner
    } else {
        staging_path.clone()
    };

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let renamed = std::fs::rename(&extracted_root, target);
    if renames_inner || renamed.is_err() {
        // Best-effort: the staging root still exists only in these cases.
        let _ = std::fs::remove_dir_all(&staging_path);
    }
    renamed?;

    Ok(())
}
