//! # plugin-harvest core
//!
//! Engine for cataloging a remote plugin registry, fetching and unpacking
//! plugin archives under a concurrency cap, and recording static-analysis
//! findings against each plugin in a relational store.
//!
//! The pipeline has three stages, each independently restartable:
//!
//! 1. **Catalog refresh**: paginated ingestion into the catalog store with
//!    idempotent upserts ([`catalog`]).
//! 2. **Archive fetch**: bounded-concurrency download and all-or-nothing
//!    extraction into the local workspace ([`fetch`]).
//! 3. **Audit**: sequential analyzer runs per plugin directory, findings
//!    appended to the result store ([`audit`]).
//!
//! External collaborators sit behind capability traits ([`catalog::CatalogSource`],
//! [`fetch::ArchiveSource`], [`audit::Analyzer`]) so every stage can be
//! exercised against test doubles.

pub mod audit;
pub mod catalog;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod store;

pub use audit::{Analyzer, AuditReport, AuditRunner, SemgrepAnalyzer};
pub use catalog::{CatalogFetcher, CatalogSource, CatalogSummary, HttpCatalogSource};
pub use error::{HarvestError, Result};
pub use fetch::{ArchiveFetcher, ArchiveSource, FetchReport, HttpArchiveSource, ReplacePolicy};
pub use models::{FindingRecord, PluginRecord};
pub use pipeline::{run, RunConfig, RunSummary, Stage};
pub use store::{CatalogStore, Database, ResultStore};
