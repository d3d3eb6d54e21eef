//! `rollup sum`: the grid's sums row, group rows and contribution traces.

use anyhow::{anyhow, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use rollup_core::{
    explain, sum_columns, sums_by_group, Basis, Column, ColumnSum, HierarchyIndex, ResultSet,
    Rollup,
};

#[derive(Args, Debug)]
pub struct SumArgs {
    /// Forest JSON or `.rlup` snapshot
    input: PathBuf,

    /// Attribute to sum (repeatable)
    #[arg(short, long = "column", default_values_t = vec!["estimated_hours".to_string()])]
    columns: Vec<String>,

    /// Mark a summed attribute as highlightable in the output (repeatable)
    #[arg(long)]
    highlight: Vec<String>,

    /// Property the prefix filters test
    #[arg(long, default_value = "subject")]
    property: String,

    /// Drop items whose property starts with this prefix (repeatable)
    #[arg(long)]
    exclude_prefix: Vec<String>,

    /// Keep only items whose property starts with this prefix (repeatable)
    #[arg(long)]
    include_prefix: Vec<String>,

    /// Use exactly these item keys as the result set (overrides prefix filters)
    #[arg(long, num_args = 1..)]
    only: Vec<String>,

    /// Also print one row per distinct value of this property
    #[arg(long)]
    group_by: Option<String>,

    /// Print which items contributed to each total
    #[arg(long)]
    explain: bool,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Item-level filter assembled from the command line.
#[derive(Debug, Default)]
struct Filter<'a> {
    property: &'a str,
    exclude_prefix: &'a [String],
    include_prefix: &'a [String],
    only: &'a [String],
}

impl Filter<'_> {
    fn result_set(&self, index: &HierarchyIndex) -> Result<ResultSet> {
        if !self.only.is_empty() {
            let mut members = ResultSet::for_index(index);
            for key in self.only {
                members.insert(index.require_key(key)?);
            }
            return Ok(members);
        }

        let mut failure = None;
        let members = ResultSet::from_predicate(index, |item| {
            match index.property_of(item, self.property) {
                Ok(value) => self.keeps(value.as_deref()),
                Err(err) => {
                    failure.get_or_insert(err);
                    false
                }
            }
        });
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(members),
        }
    }

    /// Items without the property pass exclusions but fail inclusions.
    fn keeps(&self, value: Option<&str>) -> bool {
        let starts = |prefixes: &[String]| {
            value.is_some_and(|v| prefixes.iter().any(|p| v.starts_with(p.as_str())))
        };
        if starts(self.exclude_prefix) {
            return false;
        }
        self.include_prefix.is_empty() || starts(self.include_prefix)
    }
}

#[derive(Debug, Serialize)]
struct GroupRow {
    group: Option<String>,
    sums: Vec<ColumnSum>,
}

#[derive(Debug, Serialize)]
struct SumReport {
    items: usize,
    members: usize,
    sums: Vec<ColumnSum>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    groups: Vec<GroupRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    explanations: Vec<Rollup>,
}

pub fn cmd_sum(args: SumArgs) -> Result<()> {
    if args.columns.is_empty() {
        return Err(anyhow!("at least one --column is required"));
    }
    for attr in &args.highlight {
        if !args.columns.contains(attr) {
            return Err(anyhow!("--highlight {attr} is not one of the summed columns"));
        }
    }

    let index = crate::load_index(&args.input)?;
    let filter = Filter {
        property: &args.property,
        exclude_prefix: &args.exclude_prefix,
        include_prefix: &args.include_prefix,
        only: &args.only,
    };
    let members = filter.result_set(&index)?;
    tracing::info!(items = index.len(), members = members.len(), "filtered result set");

    let columns: Vec<Column> = args
        .columns
        .iter()
        .map(|attr| Column::new(attr.as_str()).with_highlightable(args.highlight.contains(attr)))
        .collect();

    let report = SumReport {
        items: index.len(),
        members: members.len(),
        sums: sum_columns(&members, &index, &columns)?,
        groups: match &args.group_by {
            Some(property) => group_rows(&index, &members, &columns, property)?,
            None => Vec::new(),
        },
        explanations: if args.explain {
            columns
                .iter()
                .map(|column| explain(&members, &index, column))
                .collect::<rollup_core::Result<_>>()?
        } else {
            Vec::new()
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&index, &report, args.group_by.as_deref())?;
    }
    Ok(())
}

/// One row per distinct property value, each summed within its group.
fn group_rows(
    index: &HierarchyIndex,
    members: &ResultSet,
    columns: &[Column],
    property: &str,
) -> Result<Vec<GroupRow>> {
    let group_of = |item| index.property_of(item, property).ok().flatten();

    let mut rows: Vec<GroupRow> = Vec::new();
    for column in columns {
        let totals = sums_by_group(members, index, column, group_of)?;
        if rows.is_empty() {
            rows = totals
                .keys()
                .map(|group| GroupRow {
                    group: group.clone(),
                    sums: Vec::with_capacity(columns.len()),
                })
                .collect();
        }
        // BTreeMap iteration is sorted, so rows line up across columns.
        for (row, total) in rows.iter_mut().zip(totals.into_values()) {
            row.sums.push(ColumnSum {
                column: column.clone(),
                total,
            });
        }
    }
    Ok(rows)
}

fn print_report(index: &HierarchyIndex, report: &SumReport, group_by: Option<&str>) -> Result<()> {
    println!(
        "{} of {} items in result set",
        report.members.to_string().bold(),
        report.items
    );
    for sum in &report.sums {
        println!("  {}", format_sum(sum));
    }

    if let Some(property) = group_by {
        println!("{} {}", "by".dimmed(), property.bold());
        for row in &report.groups {
            let label = row.group.as_deref().unwrap_or("(none)");
            let cells: Vec<String> = row.sums.iter().map(format_sum).collect();
            println!("  {}: {}", label.cyan(), cells.join("  "));
        }
    }

    for rollup in &report.explanations {
        println!("{} {}", "explain".yellow().bold(), rollup.column);
        let roots = rollup
            .roots
            .iter()
            .map(|&item| index.key_of(item))
            .collect::<rollup_core::Result<Vec<_>>>()?;
        println!("  roots: {}", roots.join(", "));
        for contribution in &rollup.contributions {
            let basis = match contribution.basis {
                Basis::Leaf => "leaf",
                Basis::FullyVisible => "children visible",
            };
            let value = contribution
                .value
                .map_or_else(|| "-".to_string(), |v| v.to_string());
            println!(
                "  + {} {} ({})",
                value,
                index.key_of(contribution.item)?,
                basis.dimmed()
            );
        }
        for &item in &rollup.descended {
            println!("  {} {} (hidden child)", "~".red(), index.key_of(item)?);
        }
    }
    Ok(())
}

fn format_sum(sum: &ColumnSum) -> String {
    let name = if sum.column.highlightable() {
        sum.column.attribute().yellow().bold()
    } else {
        sum.column.attribute().bold()
    };
    format!("{name} = {}", sum.total)
}
