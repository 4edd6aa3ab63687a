//! Data models for the harvest pipeline
//!
//! Catalog entries arrive as loosely-shaped JSON with optional fields; they
//! are validated and defaulted here, at the ingestion boundary, so everything
//! downstream works with fixed-shape records.

use serde::Deserialize;

/// Sentinel stored for absent string fields, matching the store schema.
pub const ABSENT: &str = "N/A";

/// A plugin as known to the catalog store.
///
/// `slug` is the only stable join key; every other field is replaced
/// wholesale on each catalog refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRecord {
    /// Stable external identifier, primary key
    pub slug: String,

    /// Latest reported version
    pub version: String,

    /// Active install count, non-negative
    pub active_installs: i64,

    /// Cumulative download count, non-negative
    pub downloaded: i64,

    /// Canonical `YYYY-MM-DD HH:MM:SS`, absent if the source omitted it
    pub last_updated: Option<String>,

    /// Calendar date `YYYY-MM-DD`, absent if the source omitted it
    pub added_date: Option<String>,

    /// Archive URI; may be absent or stale
    pub download_link: String,
}

/// One static-analysis finding tied to a plugin by slug reference.
///
/// The referenced plugin may not exist in the catalog store if a workspace
/// directory was audited without ever being cataloged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingRecord {
    pub slug: String,
    pub file_path: String,
    pub check_id: String,
    pub start_line: i64,
    pub end_line: i64,
    pub vuln_lines: String,
}

/// One page of the remote catalog.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub total_pages: u32,
    pub entries: Vec<RawCatalogEntry>,
}

/// A catalog entry as the source reports it: every field optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogEntry {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub active_installs: Option<i64>,
    #[serde(default)]
    pub downloaded: Option<i64>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub download_link: Option<String>,
}

impl RawCatalogEntry {
    /// Validate and default into a fixed-shape record.
    ///
    /// Returns `None` when the entry has no slug; such entries cannot be
    /// keyed and are skipped by the fetcher.
    pub fn normalize(self) -> Option<PluginRecord> {
        let slug = self.slug.filter(|s| !s.is_empty())?;

        Some(PluginRecord {
            slug,
            version: self.version.unwrap_or_else(|| ABSENT.to_string()),
            active_installs: self.active_installs.unwrap_or(0).max(0),
            downloaded: self.downloaded.unwrap_or(0).max(0),
            last_updated: self.last_updated.as_deref().and_then(normalize_last_updated),
            added_date: self.added.as_deref().and_then(normalize_added_date),
            download_link: self.download_link.unwrap_or_else(|| ABSENT.to_string()),
        })
    }
}

/// Normalize a source timestamp of the form `YYYY-MM-DD h:MMam/pm ZONE`
/// into the canonical `YYYY-MM-DD HH:MM:SS` representation.
///
/// The trailing zone token is dropped, matching how the source reports
/// everything in one zone. Unparseable values are treated as absent.
pub fn normalize_last_updated(raw: &str) -> Option<String> {
    // "2024-05-12 6:30pm GMT" -> "2024-05-12 6:30pm"
    let trimmed = raw.trim();
    let without_zone = match trimmed.rsplit_once(' ') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => trimmed,
    };

    chrono::NaiveDateTime::parse_from_str(without_zone, "%Y-%m-%d %I:%M%p")
        .ok()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Normalize a source calendar date, dropping anything unparseable.
pub fn normalize_added_date(raw: &str) -> Option<String> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Structured output document produced by the analyzer process.
#[derive(Debug, Clone, Deserialize)]
pub struct FindingsDocument {
    #[serde(default)]
    pub results: Vec<RawFinding>,
}

/// One result object inside the analyzer output document.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFinding {
    pub path: String,
    pub check_id: String,
    pub start: LineRef,
    pub end: LineRef,
    #[serde(default)]
    pub extra: FindingExtra,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineRef {
    pub line: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindingExtra {
    #[serde(default)]
    pub lines: String,
}

impl RawFinding {
    /// Tie a raw analyzer result to the plugin it was produced for.
    pub fn into_record(self, slug: &str) -> FindingRecord {
        FindingRecord {
            slug: slug.to_string(),
            file_path: self.path,
            check_id: self.check_id,
            start_line: self.start.line,
            end_line: self.end.line,
            vuln_lines: self.extra.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_source_timestamp() {
        assert_eq!(
            normalize_last_updated("2023-11-02 10:30pm GMT").as_deref(),
            Some("2023-11-02 22:30:00")
        );
        assert_eq!(
            normalize_last_updated("2024-01-05 6:05am GMT").as_deref(),
            Some("2024-01-05 06:05:00")
        );
    }

    #[test]
    fn unparseable_timestamp_is_absent() {
        assert_eq!(normalize_last_updated("last week"), None);
        assert_eq!(normalize_last_updated(""), None);
        assert_eq!(normalize_added_date("not-a-date"), None);
    }

    #[test]
    fn normalize_defaults_absent_fields() {
        let entry = RawCatalogEntry {
            slug: Some("hello-dolly".to_string()),
            version: None,
            active_installs: None,
            downloaded: None,
            last_updated: None,
            added: Some("2020-03-01".to_string()),
            download_link: None,
        };

        let record = entry.normalize().unwrap();
        assert_eq!(record.version, ABSENT);
        assert_eq!(record.active_installs, 0);
        assert_eq!(record.downloaded, 0);
        assert_eq!(record.last_updated, None);
        assert_eq!(record.added_date.as_deref(), Some("2020-03-01"));
        assert_eq!(record.download_link, ABSENT);
    }

    #[test]
    fn entry_without_slug_is_rejected() {
        let entry = RawCatalogEntry {
            slug: None,
            version: Some("1.0".to_string()),
            active_installs: Some(10),
            downloaded: None,
            last_updated: None,
            added: None,
            download_link: None,
        };
        assert!(entry.normalize().is_none());

        let entry: RawCatalogEntry = serde_json::from_str(r#"{"slug": ""}"#).unwrap();
        assert!(entry.normalize().is_none());
    }

    #[test]
    fn raw_finding_parses_analyzer_shape() {
        let doc: FindingsDocument = serde_json::from_str(
            r#"{
                "results": [{
                    "path": "inc/admin.php",
                    "check_id": "php.lang.security.eval-use",
                    "start": {"line": 12},
                    "end": {"line": 14},
                    "extra": {"lines": "eval($_GET['x']);"}
                }]
            }"#,
        )
        .unwrap();

        let record = doc.results.into_iter().next().unwrap().into_record("bad-plugin");
        assert_eq!(record.slug, "bad-plugin");
        assert_eq!(record.file_path, "inc/admin.php");
        assert_eq!(record.start_line, 12);
        assert_eq!(record.end_line, 14);
        assert_eq!(record.vuln_lines, "eval($_GET['x']);");
    }
}
