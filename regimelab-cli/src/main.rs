//! RegimeLab CLI: research runs, sweeps, regime inspection and synthetic data.
//!
//! Commands:
//! - `run`: execute a research backtest from a TOML config (or the built-in demo)
//! - `sweep`: run a parameter grid in parallel and rank the results
//! - `regimes`: fit the regime detector and print the point-in-time state path
//! - `synth`: write a seeded synthetic panel as CSV or Parquet

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::Level;

use regimelab_core::data::{write_panel_csv, write_panel_parquet, SyntheticConfig, SyntheticPanel};
use regimelab_runner::{
    detect_regimes, load_panel, run_research, run_sweep, save_artifacts, RegimeReport,
    ResearchConfig, ResearchResult, SweepConfig, SweepResults,
};

#[derive(Parser)]
#[command(
    name = "regimelab",
    about = "RegimeLab CLI: regime-aware factor research and backtesting"
)]
struct Cli {
    /// Debug-level logging.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a research backtest from a TOML config file.
    Run {
        /// Path to a TOML research config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the built-in synthetic demo configuration.
        #[arg(long, default_value_t = false)]
        demo: bool,

        /// Override the backtest start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Override the backtest end date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<String>,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Run a parameter sweep from a TOML sweep document.
    Sweep {
        /// Path to a TOML sweep config (`base` config plus `axes`).
        #[arg(long)]
        config: PathBuf,

        /// Write the ranked results as JSON to this file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of top results to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Fit the regime detector and print the state path.
    Regimes {
        /// Path to a TOML research config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the built-in synthetic demo configuration.
        #[arg(long, default_value_t = false)]
        demo: bool,

        /// Print one line per period instead of the summary.
        #[arg(long, default_value_t = false)]
        periods: bool,

        /// Write the full regime report as JSON to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a seeded synthetic panel.
    Synth {
        /// Output file; `.parquet` writes Parquet, anything else CSV.
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = 20)]
        instruments: usize,

        #[arg(long, default_value_t = 504)]
        periods: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Also write the demo research config pointing at the panel.
        #[arg(long)]
        config_out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            demo,
            start,
            end,
            output_dir,
        } => run_cmd(config, demo, start, end, &output_dir),
        Commands::Sweep {
            config,
            output,
            top,
        } => sweep_cmd(&config, output.as_deref(), top),
        Commands::Regimes {
            config,
            demo,
            periods,
            output,
        } => regimes_cmd(config, demo, periods, output.as_deref()),
        Commands::Synth {
            out,
            instruments,
            periods,
            seed,
            config_out,
        } => synth_cmd(&out, instruments, periods, seed, config_out.as_deref()),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn resolve_config(path: Option<PathBuf>, demo: bool) -> Result<ResearchConfig> {
    match (path, demo) {
        (Some(_), true) => bail!("--config and --demo are mutually exclusive"),
        (None, false) => bail!("one of --config or --demo is required"),
        (Some(path), false) => ResearchConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display())),
        (None, true) => Ok(ResearchConfig::synthetic_demo()),
    }
}

// ─── run ────────────────────────────────────────────────────────────

fn run_cmd(
    config_path: Option<PathBuf>,
    demo: bool,
    start: Option<String>,
    end: Option<String>,
    output_dir: &Path,
) -> Result<()> {
    let mut config = resolve_config(config_path, demo)?;
    if let Some(s) = start.as_deref() {
        config.backtest.start = parse_date(s)?;
    }
    if let Some(e) = end.as_deref() {
        config.backtest.end = parse_date(e)?;
    }
    config.validate()?;

    let result = run_research(&config)?;
    print_summary(&result);

    let run_dir = save_artifacts(&result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn print_summary(result: &ResearchResult) {
    let r = &result.report;
    println!();
    println!("=== Research Result ===");
    println!("Run:            {}", &result.run_id[..result.run_id.len().min(12)]);
    println!("Period:         {} to {}", result.start_date, result.end_date);
    println!(
        "Periods:        {} ({} rebalanced, {} held)",
        r.periods, r.rebalanced_periods, r.held_periods
    );
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", r.total_return * 100.0);
    println!("Ann. Return:    {:.2}%", r.annualized_return * 100.0);
    println!("Ann. Vol:       {:.2}%", r.annualized_volatility * 100.0);
    println!("Sharpe:         {:.3}", r.sharpe);
    println!("Sortino:        {:.3}", r.sortino);
    println!("Calmar:         {:.3}", r.calmar);
    println!("Max Drawdown:   {:.2}%", r.max_drawdown * 100.0);
    println!("Hit Rate:       {:.1}%", r.hit_rate * 100.0);
    println!("Avg Turnover:   {:.4}", r.average_turnover);
    println!("Cost Drag:      {:.2}% / yr", r.cost_drag * 100.0);
    if !r.by_regime.is_empty() {
        println!();
        println!("--- By Regime ---");
        for (label, s) in &r.by_regime {
            println!(
                "{label:<16} {:>5} periods  mean {:>8.4}%  ann. vol {:>6.2}%",
                s.periods,
                s.mean_return * 100.0,
                s.volatility * 100.0
            );
        }
    }
    if r.degraded_regime_periods > 0 {
        println!();
        println!(
            "WARNING: {} period(s) used a degraded regime estimate",
            r.degraded_regime_periods
        );
    }
    if result.has_synthetic {
        println!();
        println!("WARNING: Results based on SYNTHETIC data");
    }
    println!();
}

// ─── sweep ──────────────────────────────────────────────────────────

fn sweep_cmd(path: &Path, output: Option<&Path>, top: usize) -> Result<()> {
    let sweep = SweepConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    let loaded = load_panel(&sweep.base.data, sweep.base.backtest.end)?;
    let results = run_sweep(&sweep, &loaded)?;
    print_sweep(&results, top);

    if let Some(out) = output {
        std::fs::write(out, serde_json::to_string_pretty(&results)?)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("Sweep results saved to: {}", out.display());
    }
    Ok(())
}

fn print_sweep(results: &SweepResults, top: usize) {
    println!();
    println!(
        "=== Sweep: {} points, ranked by {:?} ===",
        results.outcomes.len(),
        results.rank_by
    );
    for (i, o) in results.outcomes.iter().take(top).enumerate() {
        match (&o.report, &o.error) {
            (Some(r), _) => println!(
                "{:>3}. {:<40} sharpe {:>7.3}  ann {:>7.2}%  mdd {:>7.2}%",
                i + 1,
                o.label,
                r.sharpe,
                r.annualized_return * 100.0,
                r.max_drawdown * 100.0
            ),
            (None, Some(e)) => println!("{:>3}. {:<40} FAILED: {e}", i + 1, o.label),
            (None, None) => {}
        }
    }
    if results.failures() > 0 {
        println!("{} point(s) failed", results.failures());
    }
    println!();
}

// ─── regimes ────────────────────────────────────────────────────────

fn regimes_cmd(
    config_path: Option<PathBuf>,
    demo: bool,
    per_period: bool,
    output: Option<&Path>,
) -> Result<()> {
    let config = resolve_config(config_path, demo)?;
    let loaded = load_panel(&config.data, config.backtest.end)?;
    let report = detect_regimes(&config, &loaded)?;

    if per_period {
        for (date, state) in report.dates.iter().zip(&report.states) {
            let flag = if state.is_degraded() { " (degraded)" } else { "" };
            println!("{date}  {:<16}{flag}", state.label.as_str());
        }
    } else {
        print_regimes(&report);
    }

    if let Some(out) = output {
        std::fs::write(out, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("Regime report saved to: {}", out.display());
    }
    Ok(())
}

fn print_regimes(report: &RegimeReport) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for state in &report.states {
        *counts.entry(state.label.as_str()).or_default() += 1;
    }
    println!();
    println!("=== Regimes over {} periods ===", report.states.len());
    for (label, n) in &counts {
        println!("{label:<16} {n:>6}");
    }
    println!(
        "Snapshots: {}  Failed estimations: {}",
        report.summary.snapshots.len(),
        report.summary.failures.len()
    );
    if let Some(last) = report.summary.snapshots.last() {
        println!();
        println!("Latest transition matrix ({}):", last.estimation_date);
        for (label, row) in last.labels.iter().zip(&last.transition) {
            let cells: Vec<String> = row.iter().map(|p| format!("{p:.3}")).collect();
            println!("{:<16} {}", label.as_str(), cells.join("  "));
        }
    }
    println!();
}

// ─── synth ──────────────────────────────────────────────────────────

fn synth_cmd(
    out: &Path,
    instruments: usize,
    periods: usize,
    seed: u64,
    config_out: Option<&Path>,
) -> Result<()> {
    let config = SyntheticConfig {
        instruments,
        periods,
        seed,
        ..Default::default()
    };
    let synth = SyntheticPanel::generate(&config)?;
    let is_parquet = out.extension().is_some_and(|e| e == "parquet");
    if is_parquet {
        write_panel_parquet(&synth.panel, out)?;
    } else {
        std::fs::write(out, write_panel_csv(&synth.panel)?)
            .with_context(|| format!("failed to write {}", out.display()))?;
    }
    println!(
        "Wrote {} instruments x {} periods to {}",
        instruments,
        periods,
        out.display()
    );

    if let Some(config_path) = config_out {
        let mut research = ResearchConfig::synthetic_demo();
        research.data.source = if is_parquet {
            regimelab_runner::DataSpec::Parquet {
                path: out.to_path_buf(),
            }
        } else {
            regimelab_runner::DataSpec::Csv {
                path: out.to_path_buf(),
            }
        };
        std::fs::write(config_path, research.to_toml_string()?)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("Wrote research config to {}", config_path.display());
    }
    Ok(())
}
