//! Audit pass over the local plugin workspace
//!
//! Invokes an external analyzer per plugin directory and records its findings
//! in the result store. The analyzer is behind the [`Analyzer`] capability
//! trait so the runner can be exercised with fixed documents in tests,
//! independent of process spawning.
//!
//! Auditing is sequential by design: the analyzer process is the resource
//! bottleneck, not this runner.

use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{HarvestError, Result};
use crate::models::FindingsDocument;
use crate::store::ResultStore;

/// Synchronous analysis capability: consume a directory, produce a findings
/// document.
pub trait Analyzer {
    fn run_analysis(&self, dir: &Path, config: &str) -> Result<FindingsDocument>;
}

/// Analyzer implementation that shells out to semgrep and reads back its
/// JSON output document.
pub struct SemgrepAnalyzer;

/// Name of the findings document the analyzer writes inside each plugin
/// directory.
pub const ANALYZER_OUTPUT_FILE: &str = "semgrep_output.json";

impl Analyzer for SemgrepAnalyzer {
    fn run_analysis(&self, dir: &Path, config: &str) -> Result<FindingsDocument> {
        let output_file = dir.join(ANALYZER_OUTPUT_FILE);
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        debug!(dir = %dir.display(), config, "running analyzer");

        let status = Command::new("semgrep")
            .arg("--config")
            .arg(config)
            .arg("--json")
            .arg("--no-git-ignore")
            .arg("--output")
            .arg(&output_file)
            .arg("--quiet")
            .arg(dir)
            .status()?;

        if !status.success() {
            return Err(HarvestError::Analyzer {
                slug: dir_name,
                reason: format!("analyzer exited with {status}"),
            });
        }

        if !output_file.is_file() {
            return Err(HarvestError::OutputMissing(output_file));
        }

        let raw = std::fs::read_to_string(&output_file)?;
        let document: FindingsDocument = serde_json::from_str(&raw)?;
        Ok(document)
    }
}

/// One per-plugin audit failure.
#[derive(Debug, Clone)]
pub struct AuditFailure {
    pub slug: String,
    pub reason: String,
}

/// Batch result of [`AuditRunner::audit_all`].
#[derive(Debug, Default)]
pub struct AuditReport {
    pub plugins_audited: usize,
    pub findings_recorded: usize,
    pub failures: Vec<AuditFailure>,
}

/// Runs the analyzer over plugin directories and feeds the result store.
pub struct AuditRunner<A> {
    analyzer: A,
    config: String,
}

impl<A: Analyzer> AuditRunner<A> {
    pub fn new(analyzer: A, config: impl Into<String>) -> Self {
        Self {
            analyzer,
            config: config.into(),
        }
    }

    /// Audit a single plugin directory, appending each parsed finding to the
    /// result store. Every append is durable before the next plugin runs.
    pub fn audit_directory(&self, store: &ResultStore, slug: &str, dir: &Path) -> Result<usize> {
        let document = self.analyzer.run_analysis(dir, &self.config)?;

        let mut appended = 0;
        for raw in document.results {
            store.append(&raw.into_record(slug))?;
            appended += 1;
        }

        debug!(slug, findings = appended, "audited plugin");
        Ok(appended)
    }

    /// Audit every plugin directory present under the workspace root,
    /// sequentially. Analyzer failures, missing output, and unparseable
    /// output are isolated per plugin; only a fatal store error aborts.
    ///
    /// `progress` is called with (completed, total) after each directory.
    pub fn audit_all(
        &self,
        store: &ResultStore,
        workspace_root: &Path,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<AuditReport> {
        let plugins_dir = workspace_root.join("plugins");
        if !plugins_dir.is_dir() {
            warn!(dir = %plugins_dir.display(), "no plugin workspace to audit");
            return Ok(AuditReport::default());
        }

        let mut directories = Vec::new();
        for entry in WalkDir::new(&plugins_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                directories.push(entry.into_path());
            }
        }
        directories.sort();

        let total = directories.len();
        info!(total, "starting audit pass");

        let mut report = AuditReport::default();
        for (index, dir) in directories.iter().enumerate() {
            let slug = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string());

            match self.audit_directory(store, &slug, dir) {
                Ok(findings) => {
                    report.plugins_audited += 1;
                    report.findings_recorded += findings;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(slug, %err, "audit failed for plugin");
                    report.failures.push(AuditFailure {
                        slug,
                        reason: err.to_string(),
                    });
                }
            }
            progress(index + 1, total);
        }

        info!(
            audited = report.plugins_audited,
            findings = report.findings_recorded,
            failed = report.failures.len(),
            "audit pass finished"
        );
        Ok(report)
    }
}
