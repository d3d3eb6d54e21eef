//! Rollup CLI
//!
//! Command-line front end for filter-aware hierarchical column sums:
//! - Summing columns over a filtered forest (`sum`), with per-group rows and
//!   contribution traces
//! - Validating forest documents (`check`)
//! - Converting forest documents to `.rlup` snapshots (`snapshot`)
//! - Timing the engine on synthetic forests (`perf`)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use rollup_core::{ForestSpec, Hierarchy, HierarchyIndex};

mod perf;
mod sum;
mod synthetic_forest;

#[derive(Parser)]
#[command(name = "rollup")]
#[command(
    author,
    version,
    about = "Rollup: column sums over filtered work-item hierarchies"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). Overrides RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sum columns over the items that pass a filter.
    ///
    /// Parents whose children are all visible contribute their own value;
    /// parents with a hidden child are replaced by their visible children.
    Sum(sum::SumArgs),

    /// Validate a forest document (or `.rlup` snapshot) and print stats.
    Check {
        /// Forest JSON or `.rlup` snapshot
        input: PathBuf,
    },

    /// Convert a forest document into a binary `.rlup` snapshot.
    Snapshot {
        /// Forest JSON
        input: PathBuf,
        /// Output snapshot
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Synthetic forest + random result set timing harness.
    Perf(perf::PerfArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Sum(args) => sum::cmd_sum(args),
        Commands::Check { input } => cmd_check(&input),
        Commands::Snapshot { input, out } => cmd_snapshot(&input, &out),
        Commands::Perf(args) => perf::cmd_perf(args),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load a forest document, or a `.rlup` snapshot when the extension says so.
pub(crate) fn load_index(path: &Path) -> Result<HierarchyIndex> {
    let is_snapshot = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("rlup"));

    let index = if is_snapshot {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        HierarchyIndex::from_bytes(&bytes)
            .with_context(|| format!("failed to load snapshot {}", path.display()))?
    } else {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        ForestSpec::from_json(&text)
            .and_then(|spec| spec.build())
            .with_context(|| format!("invalid forest document {}", path.display()))?
    };

    tracing::info!(path = %path.display(), items = index.len(), roots = index.roots().len(), "loaded hierarchy");
    Ok(index)
}

fn cmd_check(input: &Path) -> Result<()> {
    let index = load_index(input)?;

    let mut max_depth = 0;
    let mut leaves = 0;
    for item in index.items() {
        max_depth = max_depth.max(index.depth_of(item)?);
        if index.children_of(item)?.is_empty() {
            leaves += 1;
        }
    }

    println!(
        "{} {} ({} items, {} roots, {} leaves, max depth {})",
        "ok".green().bold(),
        input.display(),
        index.len(),
        index.roots().len(),
        leaves,
        max_depth
    );
    let attributes = index.attributes();
    if !attributes.is_empty() {
        println!("  columns: {}", attributes.join(", "));
    }
    let properties = index.property_names();
    if !properties.is_empty() {
        println!("  properties: {}", properties.join(", "));
    }
    Ok(())
}

fn cmd_snapshot(input: &Path, out: &Path) -> Result<()> {
    let index = load_index(input)?;
    let bytes = index.to_bytes()?;
    fs::write(out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
    eprintln!(
        "{} {} ({} items, {} bytes)",
        "wrote".green().bold(),
        out.display().to_string().bold(),
        index.len(),
        bytes.len()
    );
    Ok(())
}
