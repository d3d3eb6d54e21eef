//! Performance harness for the rollup engine.
//!
//! Generates a synthetic forest, filters it with a random result set and
//! times each stage. Run in release mode for meaningful results:
//!
//! ```bash
//! cargo run -p rollup-cli --release -- perf --items 1000000 --fanout 6
//! ```

use anyhow::{anyhow, Result};
use clap::Args;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rollup_core::{plan, sums_by_group, Column, HierarchyIndex, ResultSet};

use crate::synthetic_forest::{build_synthetic_forest, XorShift64};

#[derive(Args, Debug)]
pub struct PerfArgs {
    /// Number of items to generate.
    #[arg(long, default_value_t = 100_000)]
    items: usize,

    /// Maximum children per item.
    #[arg(long, default_value_t = 4)]
    fanout: usize,

    /// Fraction of items kept in the result set.
    #[arg(long, default_value_t = 0.8)]
    keep_ratio: f64,

    /// Number of value columns.
    #[arg(long, default_value_t = 3)]
    columns: usize,

    /// Number of timed rollups per stage.
    #[arg(long, default_value_t = 10)]
    repeat: usize,

    /// RNG seed (deterministic).
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Write the report as JSON.
    #[arg(long)]
    out_json: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct PerfReportV1 {
    items: usize,
    members: usize,
    columns: usize,
    frontier: usize,
    descended: usize,
    build_ms: f64,
    plan_ms: f64,
    sum_columns_ms: f64,
    group_sums_ms: f64,
    snapshot_bytes: usize,
    snapshot_encode_ms: f64,
    snapshot_decode_ms: f64,
    totals: Vec<f64>,
}

pub fn cmd_perf(args: PerfArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.keep_ratio) {
        return Err(anyhow!("--keep-ratio must be within [0, 1]"));
    }
    let repeat = args.repeat.max(1);

    println!("perf/rollup");
    println!(
        "  items={} fanout={} keep_ratio={} columns={} repeat={} seed={}",
        args.items, args.fanout, args.keep_ratio, args.columns, repeat, args.seed
    );

    let forest = build_synthetic_forest(args.items, args.fanout, args.columns, args.seed)?;
    let index = &forest.index;
    let columns: Vec<Column> = forest.columns.iter().map(Column::new).collect();

    let mut rng = XorShift64::new(args.seed.wrapping_add(1));
    let members = ResultSet::from_predicate(index, |_| rng.gen_f64() < args.keep_ratio);

    // ---------------------------------------------------------------------
    // Plan (column independent).
    // ---------------------------------------------------------------------
    let (plan_time, rollup_plan) = time_repeated(repeat, || plan(&members, index))?;

    // ---------------------------------------------------------------------
    // Column sums over the shared plan.
    // ---------------------------------------------------------------------
    let (sum_time, sums) = time_repeated(repeat, || {
        rollup_core::sum_columns(&members, index, &columns)
    })?;

    // ---------------------------------------------------------------------
    // Group sums by subject prefix (visible vs hidden).
    // ---------------------------------------------------------------------
    let group_column = columns
        .first()
        .cloned()
        .unwrap_or_else(|| Column::new("col_0"));
    let (group_time, _groups) = time_repeated(repeat, || {
        sums_by_group(&members, index, &group_column, |item| {
            index
                .property_of(item, "subject")
                .ok()
                .flatten()
                .is_some_and(|s| s.starts_with("Hidden"))
        })
    })?;

    // ---------------------------------------------------------------------
    // Snapshot round trip.
    // ---------------------------------------------------------------------
    let start = Instant::now();
    let bytes = index.to_bytes()?;
    let encode_time = start.elapsed();
    let start = Instant::now();
    let restored = HierarchyIndex::from_bytes(&bytes)?;
    let decode_time = start.elapsed();
    if restored.len() != index.len() {
        return Err(anyhow!("snapshot round trip lost items"));
    }

    // ---------------------------------------------------------------------
    // Report.
    // ---------------------------------------------------------------------
    let report = PerfReportV1 {
        items: index.len(),
        members: members.len(),
        columns: columns.len(),
        frontier: rollup_plan.frontier().len(),
        descended: rollup_plan.descended().len(),
        build_ms: ms(forest.build_time),
        plan_ms: ms(plan_time),
        sum_columns_ms: ms(sum_time),
        group_sums_ms: ms(group_time),
        snapshot_bytes: bytes.len(),
        snapshot_encode_ms: ms(encode_time),
        snapshot_decode_ms: ms(decode_time),
        totals: sums.iter().map(|s| s.total).collect(),
    };

    println!(
        "  build={:?} ({:.1} items/sec)",
        forest.build_time,
        rate(report.items, forest.build_time)
    );
    println!(
        "  members={} roots={} frontier={} descended={}",
        report.members,
        rollup_plan.roots().len(),
        report.frontier,
        report.descended
    );
    println!(
        "  plan={:?} ({:.1} members/sec)",
        plan_time,
        rate(report.members, plan_time)
    );
    println!("  sum_columns={:?}", sum_time);
    println!("  group_sums={:?}", group_time);
    println!(
        "  snapshot={} bytes encode={:?} decode={:?}",
        report.snapshot_bytes, encode_time, decode_time
    );
    println!("  totals={:?}", report.totals);

    if let Some(out) = args.out_json {
        fs::write(&out, serde_json::to_string_pretty(&report)?)?;
        println!("  wrote_json={}", out.display());
    }

    Ok(())
}

/// Run `f` `repeat` times; returns the mean duration and the last result.
fn time_repeated<T>(
    repeat: usize,
    mut f: impl FnMut() -> rollup_core::Result<T>,
) -> Result<(Duration, T)> {
    let start = Instant::now();
    let mut last = f()?;
    for _ in 1..repeat {
        last = f()?;
    }
    Ok((start.elapsed() / repeat as u32, last))
}

fn rate(items: usize, dt: Duration) -> f64 {
    let secs = dt.as_secs_f64();
    if secs <= 0.0 {
        return f64::INFINITY;
    }
    (items as f64) / secs
}

fn ms(dt: Duration) -> f64 {
    dt.as_secs_f64() * 1_000.0
}
