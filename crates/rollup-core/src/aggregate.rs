//! The aggregation engine.
//!
//! ```text
//!   R = result set, H = unfiltered hierarchy
//!
//!   filtered roots   = { w ∈ R | parent(w) = ⊥ or parent(w) ∉ R }
//!   node_value(w)    = own(w)                      if children(w) ⊆ R   (trust rule)
//!                    = Σ node_value(c), c ∈ children(w) ∩ R   otherwise
//!   total            = Σ node_value(w) over filtered roots
//! ```
//!
//! Whether an item is trusted or descended into depends only on `R` and `H`,
//! never on the column. [`plan`] therefore computes the *frontier* of trusted
//! items once, and [`SumPlan::sum`] reads one column over it. [`sum`] is the
//! two steps back to back.
//!
//! The walk uses an explicit stack (deep hierarchies cannot overflow the call
//! stack) and a visited bitmap: in a forest every item is reached at most
//! once, so a second visit means the hierarchy is not a forest.

use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::branding::{check_same_snapshot, SnapshotToken};
use crate::column::Column;
use crate::error::{Result, RollupError};
use crate::hierarchy::Hierarchy;
use crate::result_set::{Membership, ResultSet};
use crate::ItemId;

/// Why an item's own value was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    /// The item has no children at all.
    Leaf,
    /// Every direct child is in the result set.
    FullyVisible,
}

/// One trusted item and the value it added to a total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub item: ItemId,
    /// Stored value; `None` (no value recorded) counts as 0.
    pub value: Option<f64>,
    pub basis: Basis,
}

/// A column total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSum {
    pub column: Column,
    pub total: f64,
}

/// A column total together with how it was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub column: Column,
    pub total: f64,
    /// Filtered roots, ascending.
    pub roots: Vec<ItemId>,
    /// Trusted items in summation order.
    pub contributions: Vec<Contribution>,
    /// Items whose own value was distrusted because a child is hidden.
    pub descended: Vec<ItemId>,
}

/// The column-independent part of a rollup: which items are trusted.
#[derive(Debug, Clone)]
pub struct SumPlan {
    token: Option<SnapshotToken>,
    roots: Vec<ItemId>,
    frontier: Vec<(ItemId, Basis)>,
    descended: Vec<ItemId>,
}

impl SumPlan {
    /// Filtered roots, ascending.
    pub fn roots(&self) -> &[ItemId] {
        &self.roots
    }

    /// Trusted items and why, in summation order.
    pub fn frontier(&self) -> &[(ItemId, Basis)] {
        &self.frontier
    }

    pub fn descended(&self) -> &[ItemId] {
        &self.descended
    }

    /// True when the plan was made for an empty result set.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Sum `column` over the frontier. Absent values count as 0.
    pub fn sum<H>(&self, hierarchy: &H, column: &Column) -> Result<f64>
    where
        H: Hierarchy + ?Sized,
    {
        check_same_snapshot(self.token, hierarchy.snapshot_token())?;
        let mut total = 0.0;
        for &(item, _) in &self.frontier {
            total += hierarchy
                .value_of(item, column.attribute())?
                .unwrap_or(0.0);
        }
        Ok(total)
    }

    /// Like [`SumPlan::sum`], keeping every contribution.
    pub fn explain<H>(&self, hierarchy: &H, column: &Column) -> Result<Rollup>
    where
        H: Hierarchy + ?Sized,
    {
        check_same_snapshot(self.token, hierarchy.snapshot_token())?;
        let mut total = 0.0;
        let mut contributions = Vec::with_capacity(self.frontier.len());
        for &(item, basis) in &self.frontier {
            let value = hierarchy.value_of(item, column.attribute())?;
            total += value.unwrap_or(0.0);
            contributions.push(Contribution { item, value, basis });
        }
        Ok(Rollup {
            column: column.clone(),
            total,
            roots: self.roots.clone(),
            contributions,
            descended: self.descended.clone(),
        })
    }
}

/// Decide, for every reachable item, whether its own value is trusted.
pub fn plan<R, H>(result_set: &R, hierarchy: &H) -> Result<SumPlan>
where
    R: Membership + ?Sized,
    H: Hierarchy + ?Sized,
{
    let token = hierarchy.snapshot_token();
    check_same_snapshot(result_set.snapshot_token(), token)?;

    let roots = filtered_roots(result_set, hierarchy)?;
    check_member_chains(result_set, hierarchy)?;

    let mut visited = RoaringBitmap::new();
    let mut frontier = Vec::new();
    let mut descended = Vec::new();
    let mut stack: Vec<ItemId> = Vec::new();

    for &root in &roots {
        stack.push(root);
        while let Some(item) = stack.pop() {
            if !visited.insert(item.raw()) {
                return Err(RollupError::CorruptHierarchy {
                    item,
                    reason: "item reached twice while descending".to_string(),
                });
            }

            let children = hierarchy.children_of(item)?;
            if children.is_empty() {
                tracing::trace!(%item, "leaf, trusted");
                frontier.push((item, Basis::Leaf));
                continue;
            }
            if children.iter().all(|&child| result_set.contains(child)) {
                tracing::trace!(%item, children = children.len(), "fully visible, trusted");
                frontier.push((item, Basis::FullyVisible));
                continue;
            }

            tracing::trace!(%item, "hidden child, descending");
            descended.push(item);
            // Reverse push so visible children are valued in index order.
            for &child in children.iter().rev() {
                if !result_set.contains(child) {
                    continue;
                }
                let parent = hierarchy.parent_of(child)?;
                if parent != Some(item) {
                    return Err(RollupError::CorruptHierarchy {
                        item: child,
                        reason: format!(
                            "listed as a child of {item} but its parent is {}",
                            parent.map_or_else(|| "none".to_string(), |p| p.to_string())
                        ),
                    });
                }
                stack.push(child);
            }
        }
    }

    tracing::debug!(
        roots = roots.len(),
        frontier = frontier.len(),
        descended = descended.len(),
        "planned rollup"
    );

    Ok(SumPlan {
        token,
        roots,
        frontier,
        descended,
    })
}

/// Sum `column` over `result_set` without double counting rolled-up values.
pub fn sum<R, H>(result_set: &R, hierarchy: &H, column: &Column) -> Result<f64>
where
    R: Membership + ?Sized,
    H: Hierarchy + ?Sized,
{
    plan(result_set, hierarchy)?.sum(hierarchy, column)
}

/// [`sum`] plus the trace of which items contributed.
pub fn explain<R, H>(result_set: &R, hierarchy: &H, column: &Column) -> Result<Rollup>
where
    R: Membership + ?Sized,
    H: Hierarchy + ?Sized,
{
    plan(result_set, hierarchy)?.explain(hierarchy, column)
}

/// Totals for several columns over one result set (the grid's sums row).
///
/// The plan is shared; columns are summed in parallel and returned in the
/// order given.
pub fn sum_columns<R, H>(result_set: &R, hierarchy: &H, columns: &[Column]) -> Result<Vec<ColumnSum>>
where
    R: Membership + ?Sized,
    H: Hierarchy + Sync + ?Sized,
{
    let plan = plan(result_set, hierarchy)?;
    columns
        .par_iter()
        .map(|column| {
            Ok(ColumnSum {
                column: column.clone(),
                total: plan.sum(hierarchy, column)?,
            })
        })
        .collect()
}

/// Per-group totals (the grid's group rows).
///
/// Each group's total is `sum(R ∩ group)`: hiding the rest of the result set
/// can make a parent's own value untrustworthy within a group even when it
/// is trusted for the whole set. Groups are evaluated in parallel.
pub fn sums_by_group<R, H, K, F>(
    result_set: &R,
    hierarchy: &H,
    column: &Column,
    group_of: F,
) -> Result<BTreeMap<K, f64>>
where
    R: Membership + ?Sized,
    H: Hierarchy + Sync + ?Sized,
    K: Ord + Hash + Clone + Send,
    F: Fn(ItemId) -> K,
{
    let token = result_set.snapshot_token();
    let mut groups: HashMap<K, ResultSet> = HashMap::new();
    for item in result_set.members() {
        groups
            .entry(group_of(item))
            .or_insert_with(|| ResultSet::new().with_token(token))
            .insert(item);
    }
    let groups: Vec<(K, ResultSet)> = groups.into_iter().collect();

    tracing::debug!(groups = groups.len(), column = %column, "summing groups");

    groups
        .into_par_iter()
        .map(|(key, members)| Ok((key, sum(&members, hierarchy, column)?)))
        .collect()
}

/// Every member's parent chain must leave the result set (or end at a
/// top-level item). A chain that loops back on itself is a cycle lying
/// wholly inside the result set, which no filtered root would reach.
///
/// Three-colour walk: `on_path` holds the chain being followed, `done` the
/// members already known to terminate. Each member is pushed once, so the
/// pass is O(|R|).
fn check_member_chains<R, H>(result_set: &R, hierarchy: &H) -> Result<()>
where
    R: Membership + ?Sized,
    H: Hierarchy + ?Sized,
{
    let mut done = RoaringBitmap::new();
    let mut on_path = RoaringBitmap::new();
    let mut chain: Vec<ItemId> = Vec::new();

    for start in result_set.members() {
        let mut item = start;
        loop {
            if done.contains(item.raw()) {
                break;
            }
            if !on_path.insert(item.raw()) {
                return Err(RollupError::CycleDetected { item });
            }
            chain.push(item);
            match hierarchy.parent_of(item)? {
                Some(parent) if result_set.contains(parent) => item = parent,
                _ => break,
            }
        }
        for item in chain.drain(..) {
            on_path.remove(item.raw());
            done.insert(item.raw());
        }
    }
    Ok(())
}

/// Members whose parent is absent or not itself a member, ascending.
fn filtered_roots<R, H>(result_set: &R, hierarchy: &H) -> Result<Vec<ItemId>>
where
    R: Membership + ?Sized,
    H: Hierarchy + ?Sized,
{
    let mut roots = Vec::new();
    for item in result_set.members() {
        match hierarchy.parent_of(item)? {
            Some(parent) if result_set.contains(parent) => {}
            _ => roots.push(item),
        }
    }
    roots.sort_unstable();
    Ok(roots)
}
