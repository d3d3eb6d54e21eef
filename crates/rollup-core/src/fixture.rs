//! Forest documents: a serde-friendly description of a work-item forest.
//!
//! Items may be nested (`children`) or refer to a parent by key (`parent`);
//! both styles can be mixed in one document. Parent references are resolved
//! after every item has been declared, so order does not matter.
//!
//! ```json
//! { "items": [
//!     { "key": "Parent", "values": { "estimated_hours": 3 },
//!       "children": [ { "key": "Child", "values": { "estimated_hours": 1 } } ] },
//!     { "key": "Late child", "parent": "Parent" }
//! ] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, RollupError};
use crate::hierarchy::{Hierarchy, HierarchyBuilder, HierarchyIndex};
use crate::ItemId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForestSpec {
    #[serde(default)]
    pub items: Vec<ItemSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub key: String,
    /// Parent key, for flat documents. Ignored for the nested form's implicit parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ItemSpec>,
}

impl ItemSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn value(mut self, attribute: impl Into<String>, value: f64) -> Self {
        self.values.insert(attribute.into(), value);
        self
    }

    pub fn property(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn child(mut self, child: ItemSpec) -> Self {
        self.children.push(child);
        self
    }
}

impl ForestSpec {
    pub fn new(items: Vec<ItemSpec>) -> Self {
        Self { items }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of items, counting nested children.
    pub fn item_count(&self) -> usize {
        fn count(items: &[ItemSpec]) -> usize {
            items.iter().map(|i| 1 + count(&i.children)).sum()
        }
        count(&self.items)
    }

    /// Build and validate the index. Items get ids in document (pre-)order.
    pub fn build(&self) -> Result<HierarchyIndex> {
        let mut builder = HierarchyBuilder::new();
        let mut pending: Vec<(ItemId, &str)> = Vec::new();

        // Explicit stack of (spec, nested parent).
        let mut stack: Vec<(&ItemSpec, Option<ItemId>)> =
            self.items.iter().rev().map(|spec| (spec, None)).collect();
        while let Some((spec, nested_parent)) = stack.pop() {
            let id = builder.add_item(&spec.key)?;
            if let Some(parent) = nested_parent {
                builder.set_parent(id, parent)?;
            }
            if let Some(parent_key) = spec.parent.as_deref() {
                pending.push((id, parent_key));
            }
            for (attribute, value) in &spec.values {
                builder.set_value(id, attribute, *value)?;
            }
            for (property, value) in &spec.properties {
                builder.set_property(id, property, value)?;
            }
            stack.extend(spec.children.iter().rev().map(|child| (child, Some(id))));
        }

        for (child, parent_key) in pending {
            let parent = builder
                .item_by_key(parent_key)
                .ok_or_else(|| RollupError::UnknownKey {
                    key: parent_key.to_string(),
                })?;
            builder.set_parent(child, parent)?;
        }

        builder.build()
    }

    /// Export an index as a nested document (inverse of [`ForestSpec::build`]).
    pub fn from_index(index: &HierarchyIndex) -> Result<Self> {
        let mut values: BTreeMap<ItemId, BTreeMap<String, f64>> = BTreeMap::new();
        for attribute in index.attributes() {
            for (item, value) in index.value_column(&attribute) {
                values.entry(item).or_default().insert(attribute.clone(), value);
            }
        }
        let mut properties: BTreeMap<ItemId, BTreeMap<String, String>> = BTreeMap::new();
        for property in index.property_names() {
            for (item, value) in index.property_column(&property) {
                properties
                    .entry(item)
                    .or_default()
                    .insert(property.clone(), value);
            }
        }

        let mut specs: Vec<Option<ItemSpec>> = Vec::with_capacity(index.len());
        for item in index.items() {
            specs.push(Some(ItemSpec {
                key: index.key_of(item)?,
                parent: None,
                values: values.remove(&item).unwrap_or_default(),
                properties: properties.remove(&item).unwrap_or_default(),
                children: Vec::new(),
            }));
        }

        // Fold children into parents bottom-up: a child always has a larger
        // depth than its parent, so deepest-first is safe.
        let mut order: Vec<(usize, ItemId)> = index
            .items()
            .map(|item| Ok((index.depth_of(item)?, item)))
            .collect::<Result<_>>()?;
        order.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        for (_, item) in order {
            let Some(parent) = index.parent_of(item)? else {
                continue;
            };
            if let Some(spec) = specs[item.index()].take() {
                if let Some(parent_spec) = specs[parent.index()].as_mut() {
                    parent_spec.children.insert(0, spec);
                }
            }
        }

        Ok(Self {
            items: specs.into_iter().flatten().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_flat_forms_mix() {
        let json = r#"{
            "items": [
                { "key": "Late", "parent": "Parent", "values": { "estimated_hours": 2 } },
                { "key": "Parent", "values": { "estimated_hours": 3 },
                  "children": [ { "key": "Child", "values": { "estimated_hours": 1 } } ] }
            ]
        }"#;
        let index = ForestSpec::from_json(json).unwrap().build().unwrap();

        let parent = index.require_key("Parent").unwrap();
        let late = index.require_key("Late").unwrap();
        let child = index.require_key("Child").unwrap();
        assert_eq!(index.roots(), &[parent]);
        assert_eq!(index.children_of(parent).unwrap(), &[late, child]);
    }

    #[test]
    fn unknown_parent_key_is_rejected() {
        let spec = ForestSpec::new(vec![ItemSpec::new("Orphan").parent("Nobody")]);
        assert!(matches!(
            spec.build(),
            Err(RollupError::UnknownKey { key }) if key == "Nobody"
        ));
    }

    #[test]
    fn flat_parent_on_nested_child_is_a_second_parent() {
        let spec = ForestSpec::new(vec![
            ItemSpec::new("A"),
            ItemSpec::new("B").child(ItemSpec::new("C").parent("A")),
        ]);
        assert!(matches!(
            spec.build(),
            Err(RollupError::MultipleParents { .. })
        ));
    }

    #[test]
    fn ids_follow_document_preorder() {
        let spec = ForestSpec::new(vec![
            ItemSpec::new("P").child(ItemSpec::new("C1").child(ItemSpec::new("G"))),
            ItemSpec::new("Q"),
        ]);
        let index = spec.build().unwrap();
        let keys: Vec<String> = index.items().map(|i| index.key_of(i).unwrap()).collect();
        assert_eq!(keys, vec!["P", "C1", "G", "Q"]);
        assert_eq!(spec.item_count(), 4);
    }

    #[test]
    fn export_rebuilds_the_same_forest() {
        let spec = ForestSpec::new(vec![
            ItemSpec::new("P")
                .value("estimated_hours", 3.0)
                .property("subject", "Parent")
                .child(ItemSpec::new("C1").value("estimated_hours", 1.0))
                .child(ItemSpec::new("C2")),
            ItemSpec::new("Q").value("story_points", 8.0),
        ]);
        let index = spec.build().unwrap();
        assert_eq!(ForestSpec::from_index(&index).unwrap(), spec);
    }
}
