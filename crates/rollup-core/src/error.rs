//! Error types for index construction, snapshots and aggregation.

use crate::branding::SnapshotToken;
use crate::ItemId;
use thiserror::Error;

/// Everything that can make a rollup call fail.
///
/// Absent attribute values and empty result sets are not errors; they sum
/// to zero.
#[derive(Debug, Error)]
pub enum RollupError {
    #[error("item {item} is not known to the hierarchy index")]
    UnknownItem { item: ItemId },

    #[error("no item with key `{key}`")]
    UnknownKey { key: String },

    #[error("duplicate item key `{key}`")]
    DuplicateKey { key: String },

    #[error("item {child} already has parent {existing}; cannot attach it to {requested}")]
    MultipleParents {
        child: ItemId,
        existing: ItemId,
        requested: ItemId,
    },

    #[error("cycle detected: item {item} is not reachable from any root")]
    CycleDetected { item: ItemId },

    #[error("corrupt hierarchy at item {item}: {reason}")]
    CorruptHierarchy { item: ItemId, reason: String },

    #[error("value for `{attribute}` on item {item} is not a finite number")]
    NonFiniteValue { item: ItemId, attribute: String },

    #[error(
        "snapshot mismatch: result set belongs to index#{}, hierarchy is index#{}",
        .result_set.raw(),
        .hierarchy.raw()
    )]
    SnapshotMismatch {
        result_set: SnapshotToken,
        hierarchy: SnapshotToken,
    },

    #[error("invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("invalid forest document: {0}")]
    Json(#[from] serde_json::Error),
}

impl RollupError {
    /// The item a precondition violation is about, if any.
    pub fn item(&self) -> Option<ItemId> {
        match self {
            RollupError::UnknownItem { item }
            | RollupError::CycleDetected { item }
            | RollupError::CorruptHierarchy { item, .. }
            | RollupError::NonFiniteValue { item, .. } => Some(*item),
            RollupError::MultipleParents { child, .. } => Some(*child),
            _ => None,
        }
    }
}

/// Result alias for rollup operations.
pub type Result<T> = std::result::Result<T, RollupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_item_names_the_item() {
        let err = RollupError::UnknownItem {
            item: ItemId::new(42),
        };
        assert_eq!(err.to_string(), "item #42 is not known to the hierarchy index");
        assert_eq!(err.item(), Some(ItemId::new(42)));
    }

    #[test]
    fn multiple_parents_reports_child() {
        let err = RollupError::MultipleParents {
            child: ItemId::new(3),
            existing: ItemId::new(1),
            requested: ItemId::new(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains("#1"));
        assert!(msg.contains("#2"));
        assert_eq!(err.item(), Some(ItemId::new(3)));
    }

    #[test]
    fn key_errors_carry_no_item() {
        let err = RollupError::DuplicateKey {
            key: "Parent".to_string(),
        };
        assert_eq!(err.item(), None);
        assert!(err.to_string().contains("`Parent`"));
    }
}
