use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;

use harvest_core::pipeline::{self, RunConfig};

mod ui;

use ui::{error, info, success, warning, StageProgress};

/// plugin-harvest CLI - catalog, download, and audit registry plugins
#[derive(Parser)]
#[command(
    name = "harvest",
    version = env!("CARGO_PKG_VERSION"),
    about = "Catalogs a remote plugin registry, downloads plugin archives, and records static-analysis findings",
    long_about = None
)]
struct Cli {
    /// Fetch all plugin metadata and store it in the database
    #[arg(long)]
    store_plugins: bool,

    /// Download and extract eligible plugins into the workspace
    #[arg(long)]
    download: bool,

    /// Audit downloaded plugins sequentially
    #[arg(long)]
    audit: bool,

    /// Minimum active installs a plugin needs to be downloaded
    #[arg(long, default_value_t = 0)]
    active_installs: i64,

    /// Replace already downloaded plugins instead of skipping them
    #[arg(long)]
    replace_downloads: bool,

    /// Directory holding the download workspace
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,

    /// Analyzer rule configuration to run
    #[arg(long, default_value = "p/php")]
    config: String,

    /// Create the database schema if it does not exist
    #[arg(long)]
    create_schema: bool,

    /// Clear the findings table before running
    #[arg(long)]
    clear_results: bool,

    /// Path to the plugin database
    #[arg(long, default_value = "plugins.db")]
    database: PathBuf,

    /// Maximum concurrent downloads
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Print detailed messages
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    // No stage selected is not an error; show what the tool can do and stop.
    if !cli.store_plugins && !cli.download && !cli.audit {
        println!("Please set at least one of --store-plugins, --download or --audit.\n");
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let config = RunConfig {
        database_path: cli.database.clone(),
        create_schema: cli.create_schema,
        clear_results: cli.clear_results,
        refresh_catalog: cli.store_plugins,
        fetch_archives: cli.download,
        audit: cli.audit,
        min_active_installs: cli.active_installs,
        replace_downloads: cli.replace_downloads,
        workspace_dir: cli.download_dir.clone(),
        analyzer_config: cli.config.clone(),
        concurrency: cli.concurrency,
        ..RunConfig::default()
    };

    let mut bars = StageProgress::new();
    let result = pipeline::run(config, |stage, done, total| bars.update(stage, done, total)).await;
    bars.finish();

    let summary = match result {
        Ok(summary) => summary,
        Err(err) if err.is_fatal() => {
            error(&err.to_string());
            std::process::exit(1);
        }
        Err(err) => return Err(err).context("harvest run failed"),
    };

    if let Some(catalog) = &summary.catalog {
        success(&format!(
            "catalog: {} plugins across {} of {} pages",
            catalog.plugins_ingested, catalog.pages_ingested, catalog.total_pages
        ));
        if catalog.pages_ingested < catalog.total_pages {
            warning("catalog refresh stopped early; re-run to resume");
        }
    }

    if let Some(fetch) = &summary.fetch {
        success(&format!(
            "download: {} fetched, {} skipped, {} failed",
            fetch.fetched,
            fetch.skipped,
            fetch.failures.len()
        ));
        for failure in &fetch.failures {
            warning(&format!("{}: {}", failure.slug, failure.reason));
        }
    }

    if let Some(audit) = &summary.audit {
        success(&format!(
            "audit: {} findings across {} plugins, {} failed",
            audit.findings_recorded,
            audit.plugins_audited,
            audit.failures.len()
        ));
        for failure in &audit.failures {
            warning(&format!("{}: {}", failure.slug, failure.reason));
        }
        if audit.plugins_audited == 0 && audit.failures.is_empty() {
            info("no plugin directories present in the workspace");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "warn" };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new(format!("harvest_core={level},harvest_cli={level}")),
        ))
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stage_flags_parse() {
        let cli = Cli::parse_from([
            "harvest",
            "--store-plugins",
            "--download",
            "--active-installs",
            "500",
            "--download-dir",
            "/tmp/ws",
            "--concurrency",
            "4",
        ]);
        assert!(cli.store_plugins);
        assert!(cli.download);
        assert!(!cli.audit);
        assert_eq!(cli.active_installs, 500);
        assert_eq!(cli.download_dir, PathBuf::from("/tmp/ws"));
        assert_eq!(cli.concurrency, 4);
    }
}
