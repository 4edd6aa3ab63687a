//! Run orchestration
//!
//! Thin sequencing layer: schema creation, findings-clear, catalog refresh,
//! archive fetch, audit pass. Every stage is optional and independently
//! idempotent; any subset is a supported run (an audit-only run against a
//! previously populated workspace is meaningful). All handoff between stages
//! goes through the store or the filesystem, so each stage is independently
//! restartable.

use std::path::PathBuf;
use tracing::info;

use crate::audit::{Analyzer, AuditReport, AuditRunner, SemgrepAnalyzer};
use crate::catalog::{CatalogFetcher, CatalogSource, CatalogSummary, HttpCatalogSource};
use crate::error::Result;
use crate::fetch::{ArchiveFetcher, ArchiveSource, FetchReport, HttpArchiveSource, ReplacePolicy};
use crate::store::Database;

/// Default remote catalog endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://api.wordpress.org/plugins/info/1.2/";

/// Catalog entries requested per page.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Pipeline stage, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Catalog,
    Fetch,
    Audit,
}

/// Which stages run, and with what parameters.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub database_path: PathBuf,
    pub create_schema: bool,
    pub clear_results: bool,
    pub refresh_catalog: bool,
    pub fetch_archives: bool,
    pub audit: bool,
    pub min_active_installs: i64,
    pub replace_downloads: bool,
    pub workspace_dir: PathBuf,
    pub analyzer_config: String,
    pub concurrency: usize,
    pub catalog_url: String,
    pub per_page: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("plugins.db"),
            create_schema: false,
            clear_results: false,
            refresh_catalog: false,
            fetch_archives: false,
            audit: false,
            min_active_installs: 0,
            replace_downloads: false,
            workspace_dir: PathBuf::from("."),
            analyzer_config: "p/php".to_string(),
            concurrency: 10,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Per-stage results of one run; `None` for stages that did not run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub catalog: Option<CatalogSummary>,
    pub fetch: Option<FetchReport>,
    pub audit: Option<AuditReport>,
}

/// Execute the configured stages against the live catalog, the live archive
/// source, and the external analyzer.
pub async fn run(
    config: RunConfig,
    progress: impl FnMut(Stage, u64, u64),
) -> Result<RunSummary> {
    let catalog_source = HttpCatalogSource::new(&config.catalog_url)?;
    let archive_source = HttpArchiveSource::new()?;
    run_with(config, catalog_source, archive_source, SemgrepAnalyzer, progress).await
}

/// Stage sequencing over explicit collaborators. Tests substitute fakes for
/// the catalog source, the archive source, and the analyzer.
pub async fn run_with<C, S, A>(
    config: RunConfig,
    catalog_source: C,
    archive_source: S,
    analyzer: A,
    mut progress: impl FnMut(Stage, u64, u64),
) -> Result<RunSummary>
where
    C: CatalogSource,
    S: ArchiveSource + 'static,
    A: Analyzer,
{
    let db = Database::open(&config.database_path)?;

    if config.create_schema {
        db.ensure_schema()?;
    }
    if config.clear_results {
        db.results().clear()?;
    }

    let mut summary = RunSummary::default();

    if config.refresh_catalog {
        let fetcher = CatalogFetcher::new(catalog_source, config.per_page);
        let catalog = fetcher
            .fetch_all(&db.catalog(), |done, total| {
                progress(Stage::Catalog, done as u64, total as u64)
            })
            .await?;
        summary.catalog = Some(catalog);
    }

    if config.fetch_archives {
        let selected = db.catalog().select_for_download(config.min_active_installs)?;
        info!(selected = selected.len(), "plugins eligible for download");

        let policy = if config.replace_downloads {
            ReplacePolicy::Replace
        } else {
            ReplacePolicy::Skip
        };

        let fetcher = ArchiveFetcher::new(archive_source, config.workspace_dir.clone());
        let report = fetcher
            .fetch_all_selected(&selected, config.concurrency, policy, |done, total| {
                progress(Stage::Fetch, done as u64, total as u64)
            })
            .await?;
        summary.fetch = Some(report);
    }

    if config.audit {
        let runner = AuditRunner::new(analyzer, config.analyzer_config.clone());
        let report = runner.audit_all(&db.results(), &config.workspace_dir, |done, total| {
            progress(Stage::Audit, done as u64, total as u64)
        })?;
        summary.audit = Some(report);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use crate::models::{CatalogPage, FindingsDocument, RawCatalogEntry};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::path::Path;
    use tempfile::TempDir;

    struct OnePageCatalog {
        entries: Vec<RawCatalogEntry>,
    }

    #[async_trait]
    impl CatalogSource for OnePageCatalog {
        async fn fetch_page(&self, _page: u32, _per_page: u32) -> Result<CatalogPage> {
            Ok(CatalogPage {
                total_pages: 1,
                entries: self.entries.clone(),
            })
        }
    }

    struct ZipShelf {
        archives: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ArchiveSource for ZipShelf {
        async fn fetch(&self, slug: &str, _uri: &str) -> Result<Vec<u8>> {
            self.archives
                .get(slug)
                .cloned()
                .ok_or_else(|| HarvestError::Download {
                    slug: slug.to_string(),
                    reason: "404 Not Found".to_string(),
                })
        }
    }

    struct CannedAnalyzer {
        document: &'static str,
    }

    impl Analyzer for CannedAnalyzer {
        fn run_analysis(&self, _dir: &Path, _config: &str) -> Result<FindingsDocument> {
            Ok(serde_json::from_str(self.document)?)
        }
    }

    fn entry(slug: &str, installs: i64, updated_days_ago: i64) -> RawCatalogEntry {
        let updated = (chrono::Utc::now() - chrono::Duration::days(updated_days_ago))
            .format("%Y-%m-%d %I:%M%p GMT")
            .to_string();
        RawCatalogEntry {
            slug: Some(slug.to_string()),
            version: Some("3.2.1".to_string()),
            active_installs: Some(installs),
            downloaded: Some(installs * 4),
            last_updated: Some(updated),
            added: Some("2017-09-30".to_string()),
            download_link: Some(format!("https://dl.example.org/{slug}.zip")),
        }
    }

    fn test_zip(slug: &str) -> Vec<u8> {
        let options = zip::write::SimpleFileOptions::default();
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(format!("{slug}/{slug}.php"), options).unwrap();
        writer.write_all(b"<?php\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn full_run_flows_catalog_to_findings() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            database_path: dir.path().join("run.db"),
            create_schema: true,
            refresh_catalog: true,
            fetch_archives: true,
            audit: true,
            min_active_installs: 100,
            workspace_dir: dir.path().to_path_buf(),
            concurrency: 4,
            ..RunConfig::default()
        };

        let catalog = OnePageCatalog {
            entries: vec![
                entry("popular-plugin", 5000, 30),
                entry("tiny-plugin", 3, 30),      // below the install threshold
                entry("abandoned-plugin", 9000, 1200), // too stale
            ],
        };
        let archives = ZipShelf {
            archives: HashMap::from([("popular-plugin".to_string(), test_zip("popular-plugin"))]),
        };
        let analyzer = CannedAnalyzer {
            document: r#"{"results": [{
                "path": "popular-plugin.php",
                "check_id": "php.lang.security.eval-use",
                "start": {"line": 5},
                "end": {"line": 5},
                "extra": {"lines": "eval($x);"}
            }]}"#,
        };

        let summary = run_with(config, catalog, archives, analyzer, |_, _, _| {})
            .await
            .unwrap();

        assert_eq!(summary.catalog.unwrap().plugins_ingested, 3);
        let fetch = summary.fetch.unwrap();
        assert_eq!(fetch.fetched, 1);
        assert!(fetch.failures.is_empty());
        let audit = summary.audit.unwrap();
        assert_eq!(audit.findings_recorded, 1);

        // handoff is durable: a fresh handle sees the same state
        let db = Database::open(dir.path().join("run.db")).unwrap();
        assert_eq!(db.catalog().count().unwrap(), 3);
        assert_eq!(db.results().count().unwrap(), 1);
        assert!(dir.path().join("plugins/popular-plugin").is_dir());
    }

    #[tokio::test]
    async fn audit_only_run_uses_existing_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins/left-behind")).unwrap();

        let config = RunConfig {
            database_path: dir.path().join("run.db"),
            create_schema: true,
            audit: true,
            workspace_dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        };

        let analyzer = CannedAnalyzer {
            document: r#"{"results": []}"#,
        };
        let summary = run_with(
            config,
            OnePageCatalog { entries: vec![] },
            ZipShelf {
                archives: HashMap::new(),
            },
            analyzer,
            |_, _, _| {},
        )
        .await
        .unwrap();

        assert!(summary.catalog.is_none());
        assert!(summary.fetch.is_none());
        assert_eq!(summary.audit.unwrap().plugins_audited, 1);
    }

    #[tokio::test]
    async fn missing_schema_terminates_the_run() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            database_path: dir.path().join("bare.db"),
            fetch_archives: true,
            workspace_dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        };

        let err = run_with(
            config,
            OnePageCatalog { entries: vec![] },
            ZipShelf {
                archives: HashMap::new(),
            },
            CannedAnalyzer {
                document: r#"{"results": []}"#,
            },
            |_, _, _| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarvestError::SchemaMissing));
    }
}
