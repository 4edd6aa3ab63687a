//! Relational store for catalog records and audit findings
//!
//! SQLite-backed. A single `Database` handle is opened at orchestration start
//! and passed explicitly to every component; `CatalogStore` and `ResultStore`
//! are thin views over it. Operations against an uninitialized schema map to
//! [`HarvestError::SchemaMissing`], which callers must treat as fatal.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{HarvestError, Result};
use crate::models::{FindingRecord, PluginRecord};

/// Download-eligibility staleness cutoff: records whose `last_updated` is
/// older than this many days are never selected.
pub const MAX_AGE_DAYS: i64 = 2 * 365;

const CREATE_PLUGIN_DATA: &str = r#"
CREATE TABLE IF NOT EXISTS PluginData (
    slug TEXT PRIMARY KEY,
    version TEXT,
    active_installs INTEGER,
    downloaded INTEGER,
    last_updated TEXT,
    added_date TEXT,
    download_link TEXT
)
"#;

const CREATE_PLUGIN_RESULTS: &str = r#"
CREATE TABLE IF NOT EXISTS PluginResults (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT,
    file_path TEXT,
    check_id TEXT,
    start_line INTEGER,
    end_line INTEGER,
    vuln_lines TEXT,
    FOREIGN KEY (slug) REFERENCES PluginData(slug)
)
"#;

/// Shared connection handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the store file. Does not create the schema; see
    /// [`Database::ensure_schema`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL keeps readers usable while a stage is writing.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create both tables if absent. Idempotent; the only administrative
    /// operation that may run against an empty store file.
    pub fn ensure_schema(&self) -> Result<()> {
        info!("ensuring store schema");
        self.with_connection(|conn| {
            conn.execute(CREATE_PLUGIN_DATA, [])?;
            conn.execute(CREATE_PLUGIN_RESULTS, [])?;
            Ok(())
        })
    }

    pub fn catalog(&self) -> CatalogStore {
        CatalogStore { db: self.clone() }
    }

    pub fn results(&self) -> ResultStore {
        ResultStore { db: self.clone() }
    }

    fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut conn).map_err(classify)
    }
}

/// Distinguish a missing schema from other store failures so callers can
/// surface an actionable message instead of retrying.
fn classify(err: HarvestError) -> HarvestError {
    if let HarvestError::Database(rusqlite::Error::SqliteFailure(_, Some(ref msg))) = err {
        if msg.contains("no such table") {
            return HarvestError::SchemaMissing;
        }
    }
    err
}

/// Durable mapping from plugin slug to its latest known metadata.
#[derive(Clone)]
pub struct CatalogStore {
    db: Database,
}

impl CatalogStore {
    /// Write a record; an existing row for the slug has every non-key field
    /// replaced wholesale. No field-level merge.
    pub fn upsert(&self, record: &PluginRecord) -> Result<()> {
        self.db.with_connection(|conn| {
            upsert_in(conn, record)?;
            Ok(())
        })
    }

    /// Upsert a whole catalog page inside one transaction. This is the
    /// durability checkpoint at the page boundary, which bounds write
    /// amplification against page-count pagination.
    pub fn upsert_page(&self, records: &[PluginRecord]) -> Result<()> {
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            for record in records {
                upsert_in(&tx, record)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Read back a record by slug.
    pub fn get(&self, slug: &str) -> Result<Option<PluginRecord>> {
        self.db.with_connection(|conn| {
            let record = conn
                .query_row(
                    "SELECT slug, version, active_installs, downloaded,
                            last_updated, added_date, download_link
                     FROM PluginData WHERE slug = ?1",
                    [slug],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Records eligible for download: active installs above the threshold
    /// and a known `last_updated` within [`MAX_AGE_DAYS`] of now. Records
    /// with no `last_updated` are excluded.
    pub fn select_for_download(&self, min_active_installs: i64) -> Result<Vec<PluginRecord>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(MAX_AGE_DAYS))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        debug!(min_active_installs, %cutoff, "selecting plugins for download");

        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT slug, version, active_installs, downloaded,
                        last_updated, added_date, download_link
                 FROM PluginData
                 WHERE active_installs > ?1
                   AND last_updated IS NOT NULL
                   AND last_updated >= ?2
                 ORDER BY slug",
            )?;

            let records = stmt
                .query_map(params![min_active_installs, cutoff], row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(records)
        })
    }

    pub fn count(&self) -> Result<i64> {
        self.db.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM PluginData", [], |row| row.get(0))?)
        })
    }
}

fn upsert_in(conn: &Connection, record: &PluginRecord) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO PluginData (slug, version, active_installs, downloaded,
                                last_updated, added_date, download_link)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(slug) DO UPDATE SET
            version = excluded.version,
            active_installs = excluded.active_installs,
            downloaded = excluded.downloaded,
            last_updated = excluded.last_updated,
            added_date = excluded.added_date,
            download_link = excluded.download_link
        "#,
        params![
            record.slug,
            record.version,
            record.active_installs,
            record.downloaded,
            record.last_updated,
            record.added_date,
            record.download_link,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &Row) -> rusqlite::Result<PluginRecord> {
    Ok(PluginRecord {
        slug: row.get(0)?,
        version: row.get(1)?,
        active_installs: row.get(2)?,
        downloaded: row.get(3)?,
        last_updated: row.get(4)?,
        added_date: row.get(5)?,
        download_link: row.get(6)?,
    })
}

/// Append-only log of analyzer findings, linked to the catalog by slug
/// reference. The referenced plugin row may not exist; the store does not
/// enforce the reference so a workspace can be audited without ever having
/// been cataloged.
#[derive(Clone)]
pub struct ResultStore {
    db: Database,
}

impl ResultStore {
    /// Append one finding. Durable on return (autocommit), so committed
    /// findings survive a later crash mid-batch.
    pub fn append(&self, finding: &FindingRecord) -> Result<()> {
        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO PluginResults (slug, file_path, check_id,
                                            start_line, end_line, vuln_lines)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    finding.slug,
                    finding.file_path,
                    finding.check_id,
                    finding.start_line,
                    finding.end_line,
                    finding.vuln_lines,
                ],
            )?;
            Ok(())
        })
    }

    /// Truncate and recreate the findings table. The schema remains usable
    /// for subsequent appends.
    pub fn clear(&self) -> Result<()> {
        info!("clearing findings table");
        self.db.with_connection(|conn| {
            conn.execute("DROP TABLE IF EXISTS PluginResults", [])?;
            conn.execute(CREATE_PLUGIN_RESULTS, [])?;
            Ok(())
        })
    }

    pub fn findings_for(&self, slug: &str) -> Result<Vec<FindingRecord>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT slug, file_path, check_id, start_line, end_line, vuln_lines
                 FROM PluginResults WHERE slug = ?1 ORDER BY id",
            )?;
            let findings = stmt
                .query_map([slug], row_to_finding)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(findings)
        })
    }

    pub fn count(&self) -> Result<i64> {
        self.db.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM PluginResults", [], |row| row.get(0))?)
        })
    }
}

fn row_to_finding(row: &Row) -> rusqlite::Result<FindingRecord> {
    Ok(FindingRecord {
        slug: row.get(0)?,
        file_path: row.get(1)?,
        check_id: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        vuln_lines: row.get(5)?,
    })
}
