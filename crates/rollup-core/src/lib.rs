//! Rollup: filter-aware hierarchical column sums
//!
//! A work-item grid shows a "sums" row under an arbitrary filter. Items form a
//! forest and a parent's stored value (e.g. `estimated_hours`) already rolls up
//! its children, so a flat sum over the visible rows double counts. This crate
//! computes the total the way the grid needs it:
//!
//! 1. **Filtered roots**: visible items whose parent is hidden (or absent).
//! 2. **Trust rule**: an item whose direct children are all visible contributes
//!    its own stored value and is not descended into.
//! 3. **Partial visibility**: an item with at least one hidden child is
//!    distrusted; its visible children are valued instead.
//!
//! ## Module Organization
//!
//! - `hierarchy`: arena-backed [`HierarchyIndex`] + [`HierarchyBuilder`]
//! - `result_set`: Roaring-bitmap [`ResultSet`] and the [`Membership`] seam
//! - `column`: the [`Column`] value type
//! - `aggregate`: the engine ([`sum`], [`plan`], [`explain`], [`sum_columns`], [`sums_by_group`])
//! - `fixture`: JSON forest documents ([`ForestSpec`])
//! - `snapshot`: binary `.rlup` snapshots of an index

pub mod aggregate;
pub mod branding;
pub mod column;
pub mod error;
pub mod fixture;
pub mod hierarchy;
pub mod result_set;
mod snapshot;

use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

pub use aggregate::{
    explain, plan, sum, sum_columns, sums_by_group, Basis, ColumnSum, Contribution, Rollup,
    SumPlan,
};
pub use branding::SnapshotToken;
pub use column::Column;
pub use error::{Result, RollupError};
pub use fixture::{ForestSpec, ItemSpec};
pub use hierarchy::{Hierarchy, HierarchyBuilder, HierarchyIndex};
pub use result_set::{Membership, ResultSet};
pub use snapshot::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

// ============================================================================
// Item Handles
// ============================================================================

/// Arena handle for an item in a [`HierarchyIndex`].
///
/// Handles are dense (`0..len`) and only meaningful for the index that
/// allocated them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct ItemId(u32);

impl ItemId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for ItemId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

// ============================================================================
// String Interning
// ============================================================================

/// Interned string ID (attribute names, property values, item keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StrId(u32);

impl StrId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// String interner: maps strings to compact IDs.
///
/// Interning takes `&self`, so an index under construction can be shared
/// with worker threads without a lock.
pub struct StringInterner {
    str_to_id: DashMap<String, StrId, RandomState>,
    id_to_str: DashMap<StrId, String, RandomState>,
    next_id: AtomicU32,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            str_to_id: DashMap::with_hasher(RandomState::new()),
            id_to_str: DashMap::with_hasher(RandomState::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a string, returning its ID
    pub fn intern(&self, s: &str) -> StrId {
        if let Some(id) = self.str_to_id.get(s) {
            return *id;
        }

        // `entry` keeps two racing writers from allocating different ids.
        *self.str_to_id.entry(s.to_string()).or_insert_with(|| {
            let id = StrId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.id_to_str.insert(id, s.to_string());
            id
        })
    }

    /// Look up an existing ID for a string without inserting.
    pub fn id_of(&self, s: &str) -> Option<StrId> {
        self.str_to_id.get(s).map(|id| *id)
    }

    /// Look up string by ID
    pub fn lookup(&self, id: StrId) -> Option<String> {
        self.id_to_str.get(&id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringInterner")
            .field("len", &self.len())
            .finish()
    }
}
