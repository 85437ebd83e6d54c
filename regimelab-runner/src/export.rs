//! Artifact export: JSON manifest plus CSV tables.
//!
//! - **JSON**: the full `ResearchResult` with schema versioning
//! - **CSV**: one history row per period, and the weights book in long format
//!
//! Persisted manifests carry `schema_version`. Unknown versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regimelab_core::engine::{PeriodRecord, PeriodStatus};

use crate::runner::{ResearchResult, SCHEMA_VERSION};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const HISTORY_FILE: &str = "history.csv";
pub const WEIGHTS_FILE: &str = "weights.csv";

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &ResearchResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize ResearchResult to JSON")
}

/// Deserialize a `ResearchResult`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<ResearchResult> {
    let result: ResearchResult =
        serde_json::from_str(json).context("failed to deserialize ResearchResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// One row per period.
///
/// Columns: period, date, nav_start, nav, gross_return, net_return, cost,
/// turnover, gross_exposure, net_exposure, regime, regime_degraded, status,
/// held_reason, excluded
pub fn export_history_csv(history: &[PeriodRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "period",
        "date",
        "nav_start",
        "nav",
        "gross_return",
        "net_return",
        "cost",
        "turnover",
        "gross_exposure",
        "net_exposure",
        "regime",
        "regime_degraded",
        "status",
        "held_reason",
        "excluded",
    ])?;

    for r in history {
        let reason = match &r.status {
            PeriodStatus::Held { reason } => reason.as_str(),
            _ => "",
        };
        wtr.write_record(&[
            r.period.to_string(),
            r.date.to_string(),
            format!("{:.6}", r.nav_start),
            format!("{:.6}", r.nav),
            format!("{:.10}", r.gross_return),
            format!("{:.10}", r.net_return),
            format!("{:.6}", r.cost),
            format!("{:.8}", r.turnover),
            format!("{:.8}", r.gross_exposure),
            format!("{:.8}", r.net_exposure),
            r.regime.map(|l| l.as_str().to_string()).unwrap_or_default(),
            r.regime_degraded.to_string(),
            r.status.label().to_string(),
            reason.to_string(),
            r.excluded_instruments.join(";"),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Post-rebalance weights in long format: date, symbol, weight. Periods with
/// an empty book produce no rows.
pub fn export_weights_csv(history: &[PeriodRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "symbol", "weight"])?;
    for r in history {
        let date = r.date.to_string();
        for (symbol, w) in &r.weights {
            wtr.write_record(&[date.clone(), symbol.clone(), format!("{w:.10}")])?;
        }
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the artifact set for one run under `output_dir/{run_id prefix}/`:
/// - `manifest.json`: the full `ResearchResult`
/// - `history.csv`: per-period history
/// - `weights.csv`: weights book
///
/// The directory name depends only on the run id, so re-running an identical
/// configuration overwrites the same bundle.
pub fn save_artifacts(result: &ResearchResult, output_dir: &Path) -> Result<PathBuf> {
    let short = &result.run_id[..result.run_id.len().min(12)];
    let run_dir = output_dir.join(format!("run_{short}"));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join(MANIFEST_FILE), export_json(result)?)?;
    std::fs::write(run_dir.join(HISTORY_FILE), export_history_csv(&result.history)?)?;
    std::fs::write(run_dir.join(WEIGHTS_FILE), export_weights_csv(&result.history)?)?;

    Ok(run_dir)
}

/// Load a `ResearchResult` from an artifact directory's manifest.
pub fn load_artifacts(dir: &Path) -> Result<ResearchResult> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}
