//! Structured capture of statistics-catalog state and query plans.
//!
//! Snapshots normalize column ordering so two captures of the same
//! logical catalog state compare equal regardless of row-fetch order.
//! Plan capture wraps a statement in `EXPLAIN (ANALYZE, BUFFERS, FORMAT
//! JSON)`, measures wall-clock duration around the call, and records a
//! failure marker instead of propagating per-query errors.

use serde_json::Value;
use statlab_core::{
    CatalogAccess, Error, PlanMetrics, QueryResult, Result, Snapshot, SnapshotPhase, SnapshotScope,
};
use std::time::Instant;
use tracing::{debug, warn};

/// Reads the catalog rows in scope and returns them as a normalized,
/// immutable snapshot for one trial phase.
pub fn capture_catalog_snapshot(
    db: &mut dyn CatalogAccess,
    scope: &SnapshotScope,
    phase: SnapshotPhase,
) -> Result<Snapshot> {
    let columns = db.read_column_stats(scope)?;
    debug!(target: "stats", ?phase, columns = columns.len(), "captured catalog snapshot");
    Ok(Snapshot::new(phase, columns))
}

/// Executes one workload query under plan instrumentation. Query-level
/// failures are data, not errors: the returned result carries the failure
/// marker and the caller moves on to the next query.
pub fn capture_plan(
    db: &mut dyn CatalogAccess,
    group: &str,
    query_id: &str,
    sql: &str,
) -> QueryResult {
    debug!(target: "query", group, query_id, "executing query under EXPLAIN ANALYZE");
    let start = Instant::now();
    let outcome = db.explain_analyze(sql);
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    match outcome.and_then(|document| parse_plan(&document)) {
        Ok(plan) => QueryResult {
            group: group.to_string(),
            query_id: query_id.to_string(),
            duration_ms,
            plan: Some(plan),
            error: None,
        },
        Err(e) => {
            warn!(target: "query", group, query_id, "query failed: {e}");
            QueryResult {
                group: group.to_string(),
                query_id: query_id.to_string(),
                duration_ms,
                plan: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Parses the top-level plan document produced by
/// `EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON)`. `Total Cost` is the one
/// field the comparison cannot do without; everything else is optional.
pub fn parse_plan(document: &Value) -> Result<PlanMetrics> {
    let entry = document
        .get(0)
        .or(Some(document))
        .filter(|v| v.get("Plan").is_some())
        .ok_or_else(|| Error::QueryExecution("plan document missing Plan node".to_string()))?;
    let plan = &entry["Plan"];
    let total_cost = plan
        .get("Total Cost")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| Error::QueryExecution("plan missing Total Cost".to_string()))?;
    Ok(PlanMetrics {
        total_cost,
        startup_cost: plan.get("Startup Cost").and_then(|v| v.as_f64()),
        estimated_rows: plan.get("Plan Rows").and_then(|v| v.as_f64()),
        actual_rows: plan.get("Actual Rows").and_then(|v| v.as_f64()),
        planning_time_ms: entry.get("Planning Time").and_then(|v| v.as_f64()),
        execution_time_ms: entry.get("Execution Time").and_then(|v| v.as_f64()),
        shared_hit_blocks: plan.get("Shared Hit Blocks").and_then(|v| v.as_u64()),
        shared_read_blocks: plan.get("Shared Read Blocks").and_then(|v| v.as_u64()),
    })
}
