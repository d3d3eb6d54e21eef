//! Summable grid columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A column of the work-item grid: which numeric attribute is summed.
///
/// `highlightable` is display metadata for the grid and is never read by the
/// aggregation engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Column {
    attribute: String,
    #[serde(default)]
    highlightable: bool,
}

impl Column {
    /// A non-highlightable column over `attribute`.
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            highlightable: false,
        }
    }

    /// A highlightable column over `attribute`.
    pub fn new_highlightable(attribute: impl Into<String>) -> Self {
        Self::new(attribute).with_highlightable(true)
    }

    pub fn with_highlightable(mut self, highlightable: bool) -> Self {
        self.highlightable = highlightable;
        self
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn highlightable(&self) -> bool {
        self.highlightable
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructed_with_highlightable() {
        assert!(Column::new_highlightable("foo").highlightable());
        assert!(Column::new("foo").with_highlightable(true).highlightable());
    }

    #[test]
    fn constructed_without_highlightable() {
        let column = Column::new("foo");
        assert!(!column.highlightable());
        assert_eq!(column.attribute(), "foo");
    }

    #[test]
    fn equality_follows_constructor_arguments() {
        assert_eq!(Column::new("estimated_hours"), Column::new("estimated_hours"));
        assert_ne!(
            Column::new("estimated_hours"),
            Column::new_highlightable("estimated_hours")
        );
        assert_ne!(Column::new("estimated_hours"), Column::new("story_points"));
    }

    #[test]
    fn highlightable_defaults_to_false_when_deserialized() {
        let column: Column = serde_json::from_str(r#"{"attribute":"estimated_hours"}"#).unwrap();
        assert_eq!(column, Column::new("estimated_hours"));
    }
}
