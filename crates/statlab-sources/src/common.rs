use statlab_core::{CatalogAccess, Error, Result, RunSettings};
use tracing::{debug, info};

/// Shared pre-apply pass: discard session caches, pin memory settings for
/// the session, and reset the statistics counters. `DISCARD ALL` and the
/// counter resets are best-effort mirrors of what a fresh connection
/// would see; `pg_stat_statements` may be absent and is non-fatal.
pub(crate) fn prepare_session(db: &mut dyn CatalogAccess, settings: &RunSettings) -> Result<()> {
    if !settings.clear_caches {
        info!(target: "stats_source", "cache clearing disabled by configuration");
        return Ok(());
    }
    info!(target: "stats_source", "clearing caches and buffers");
    db.execute("DISCARD ALL").map_err(stats_err)?;
    db.execute(&format!(
        "SET LOCAL statement_timeout = {}",
        settings.analyze_timeout_seconds * 1000
    ))
    .map_err(stats_err)?;
    db.execute(&format!("SET LOCAL work_mem = '{}'", settings.work_mem))
        .map_err(stats_err)?;
    db.execute(&format!(
        "SET LOCAL maintenance_work_mem = '{}'",
        settings.maintenance_work_mem
    ))
    .map_err(stats_err)?;

    if settings.reset_counters {
        db.execute("SELECT pg_stat_reset()").map_err(stats_err)?;
        if db.execute("SELECT pg_stat_statements_reset()").is_err() {
            debug!(target: "stats_source", "pg_stat_statements not available, skipping reset");
        }
    }
    Ok(())
}

pub(crate) fn run_analyze(db: &mut dyn CatalogAccess, settings: &RunSettings) -> Result<()> {
    let stmt = if settings.analyze_verbose {
        "ANALYZE VERBOSE"
    } else {
        "ANALYZE"
    };
    info!(target: "stats_source", statement = stmt, "running ANALYZE");
    db.execute(stmt).map_err(stats_err)
}

/// Strategy failures are uniformly `StatsApplication` to the caller, no
/// matter which layer produced them.
pub(crate) fn stats_err(err: Error) -> Error {
    match err {
        Error::StatsApplication(_) => err,
        other => Error::StatsApplication(other.to_string()),
    }
}
