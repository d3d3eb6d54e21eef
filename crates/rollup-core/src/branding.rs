//! Process-local snapshot tokens.
//!
//! Item handles are plain `u32`s, so nothing in the type system stops a
//! caller from asking index A about a result set that was filtered against
//! index B. Every [`HierarchyIndex`](crate::HierarchyIndex) gets a fresh
//! [`SnapshotToken`]; result sets built from an index carry it, and the
//! engine refuses to combine the two when the tokens disagree.
//!
//! Tokens are **not** serialized. A snapshot loaded from bytes is a new
//! index with a new token.

use crate::error::{Result, RollupError};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of indexes built so far in this process.
static INDEXES_BUILT: AtomicU64 = AtomicU64::new(0);

/// Identifies one built `HierarchyIndex`. Only `HierarchyBuilder::build`
/// mints tokens, so every token in circulation names a real index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotToken(NonZeroU64);

impl SnapshotToken {
    pub(crate) fn issue() -> Self {
        let built = INDEXES_BUILT.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::MIN.saturating_add(built))
    }

    /// 1 for the first index built in this process, 2 for the next, ...
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Fails when both sides are branded and the brands differ.
///
/// An unbranded side (a caller-provided `HashSet`, a custom `Hierarchy`)
/// is accepted as-is.
pub(crate) fn check_same_snapshot(
    result_set: Option<SnapshotToken>,
    hierarchy: Option<SnapshotToken>,
) -> Result<()> {
    match (result_set, hierarchy) {
        (Some(r), Some(h)) if r != h => Err(RollupError::SnapshotMismatch {
            result_set: r,
            hierarchy: h,
        }),
        _ => Ok(()),
    }
}
