//! Hierarchy index: the complete, unfiltered parent/child structure.
//!
//! Items live in an arena addressed by [`ItemId`]. Each item carries:
//! - a unique external key (e.g. a work-package subject or id string),
//! - at most one parent,
//! - numeric attribute columns (`attribute -> item -> f64`; absent ≠ 0),
//! - text property columns (`property -> item -> value`), which the engine
//!   never reads but callers use to build result sets and group keys.
//!
//! The forest invariant (at most one parent, no cycles) is enforced by
//! [`HierarchyBuilder::build`]; a built [`HierarchyIndex`] is immutable.

use ahash::AHashMap;
use std::collections::VecDeque;

use crate::branding::SnapshotToken;
use crate::error::{Result, RollupError};
use crate::{ItemId, StrId, StringInterner};

/// Structural and value lookups the aggregation engine needs.
///
/// Implementors must describe a forest: every item has at most one parent,
/// and `children_of(p)` lists exactly the items whose parent is `p`.
/// [`HierarchyIndex`] checks this at construction; other implementations are
/// trusted, although the engine still rejects items reached twice, a child
/// whose parent disagrees with the item that lists it, and parent chains
/// that loop inside the result set.
pub trait Hierarchy {
    /// Brand shared with result sets built from this hierarchy.
    fn snapshot_token(&self) -> Option<SnapshotToken> {
        None
    }

    /// Parent of `item`, `None` for a top-level item.
    fn parent_of(&self, item: ItemId) -> Result<Option<ItemId>>;

    /// Complete set of direct children, regardless of any filter.
    fn children_of(&self, item: ItemId) -> Result<&[ItemId]>;

    /// Stored value of `attribute` on `item`; `None` means no value recorded.
    fn value_of(&self, item: ItemId, attribute: &str) -> Result<Option<f64>>;
}

// ============================================================================
// Builder
// ============================================================================

/// Mutable staging area for a [`HierarchyIndex`].
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    names: StringInterner,
    keys: Vec<StrId>,
    key_index: AHashMap<StrId, ItemId>,
    parents: Vec<Option<ItemId>>,
    values: AHashMap<StrId, AHashMap<u32, f64>>,
    properties: AHashMap<StrId, AHashMap<u32, StrId>>,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items declared so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Declare a new top-level item.
    pub fn add_item(&mut self, key: &str) -> Result<ItemId> {
        let key_id = self.names.intern(key);
        if self.key_index.contains_key(&key_id) {
            return Err(RollupError::DuplicateKey {
                key: key.to_string(),
            });
        }

        let id = ItemId::new(self.keys.len() as u32);
        self.keys.push(key_id);
        self.key_index.insert(key_id, id);
        self.parents.push(None);
        Ok(id)
    }

    /// Look up an already declared item by key.
    pub fn item_by_key(&self, key: &str) -> Option<ItemId> {
        let key_id = self.names.id_of(key)?;
        self.key_index.get(&key_id).copied()
    }

    /// Record `child -> parent`. An item can be attached only once.
    pub fn set_parent(&mut self, child: ItemId, parent: ItemId) -> Result<()> {
        self.check_known(child)?;
        self.check_known(parent)?;
        if child == parent {
            return Err(RollupError::CycleDetected { item: child });
        }

        match self.parents[child.index()] {
            Some(existing) if existing == parent => Ok(()),
            Some(existing) => Err(RollupError::MultipleParents {
                child,
                existing,
                requested: parent,
            }),
            None => {
                self.parents[child.index()] = Some(parent);
                Ok(())
            }
        }
    }

    /// Record a numeric attribute value. Non-finite values are rejected.
    pub fn set_value(&mut self, item: ItemId, attribute: &str, value: f64) -> Result<()> {
        self.check_known(item)?;
        if !value.is_finite() {
            return Err(RollupError::NonFiniteValue {
                item,
                attribute: attribute.to_string(),
            });
        }

        let attr_id = self.names.intern(attribute);
        self.values
            .entry(attr_id)
            .or_default()
            .insert(item.raw(), value);
        Ok(())
    }

    /// Record a text property (subject, status, type, ...).
    pub fn set_property(&mut self, item: ItemId, property: &str, value: &str) -> Result<()> {
        self.check_known(item)?;
        let prop_id = self.names.intern(property);
        let value_id = self.names.intern(value);
        self.properties
            .entry(prop_id)
            .or_default()
            .insert(item.raw(), value_id);
        Ok(())
    }

    /// Freeze the builder, checking that the parent relation is a forest.
    pub fn build(self) -> Result<HierarchyIndex> {
        let n = self.keys.len();

        // Children are listed in item-id order, which makes descent (and
        // therefore floating point summation order) deterministic.
        let mut children: Vec<Vec<ItemId>> = vec![Vec::new(); n];
        let mut roots = Vec::new();
        for (raw, parent) in self.parents.iter().enumerate() {
            let id = ItemId::new(raw as u32);
            match parent {
                Some(p) => children[p.index()].push(id),
                None => roots.push(id),
            }
        }

        // With at most one parent per item, anything not reachable from a
        // root sits on a cycle (or hangs below one).
        let mut reached = vec![false; n];
        let mut queue: VecDeque<ItemId> = roots.iter().copied().collect();
        while let Some(item) = queue.pop_front() {
            reached[item.index()] = true;
            queue.extend(children[item.index()].iter().copied());
        }
        if let Some(raw) = reached.iter().position(|r| !r) {
            return Err(RollupError::CycleDetected {
                item: ItemId::new(raw as u32),
            });
        }

        tracing::debug!(
            items = n,
            roots = roots.len(),
            attributes = self.values.len(),
            "built hierarchy index"
        );

        Ok(HierarchyIndex {
            token: SnapshotToken::issue(),
            names: self.names,
            keys: self.keys,
            key_index: self.key_index,
            parents: self.parents,
            children,
            roots,
            values: self.values,
            properties: self.properties,
        })
    }

    fn check_known(&self, item: ItemId) -> Result<()> {
        if item.index() < self.keys.len() {
            Ok(())
        } else {
            Err(RollupError::UnknownItem { item })
        }
    }
}

// ============================================================================
// Index
// ============================================================================

/// Immutable arena of items with parent/children adjacency and value columns.
#[derive(Debug)]
pub struct HierarchyIndex {
    token: SnapshotToken,
    names: StringInterner,
    /// item -> key
    keys: Vec<StrId>,
    /// key -> item
    key_index: AHashMap<StrId, ItemId>,
    /// item -> parent
    parents: Vec<Option<ItemId>>,
    /// item -> direct children (unfiltered)
    children: Vec<Vec<ItemId>>,
    /// Items without a parent, ascending
    roots: Vec<ItemId>,
    /// attribute -> (item -> value)
    values: AHashMap<StrId, AHashMap<u32, f64>>,
    /// property -> (item -> value)
    properties: AHashMap<StrId, AHashMap<u32, StrId>>,
}

impl HierarchyIndex {
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::new()
    }

    pub fn token(&self) -> SnapshotToken {
        self.token
    }

    /// Number of items in the universe.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        item.index() < self.keys.len()
    }

    /// All items, ascending.
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        (0..self.keys.len() as u32).map(ItemId::new)
    }

    /// Top-level items (no parent), ascending.
    pub fn roots(&self) -> &[ItemId] {
        &self.roots
    }

    pub fn item_by_key(&self, key: &str) -> Option<ItemId> {
        let key_id = self.names.id_of(key)?;
        self.key_index.get(&key_id).copied()
    }

    /// Resolve a key, failing with [`RollupError::UnknownKey`].
    pub fn require_key(&self, key: &str) -> Result<ItemId> {
        self.item_by_key(key).ok_or_else(|| RollupError::UnknownKey {
            key: key.to_string(),
        })
    }

    pub fn key_of(&self, item: ItemId) -> Result<String> {
        let key_id = *self
            .keys
            .get(item.index())
            .ok_or(RollupError::UnknownItem { item })?;
        self.resolve(key_id)
    }

    pub fn property_of(&self, item: ItemId, property: &str) -> Result<Option<String>> {
        self.check_known(item)?;
        let Some(prop_id) = self.names.id_of(property) else {
            return Ok(None);
        };
        let Some(value_id) = self
            .properties
            .get(&prop_id)
            .and_then(|col| col.get(&item.raw()))
        else {
            return Ok(None);
        };
        self.resolve(*value_id).map(Some)
    }

    /// Number of ancestors above `item` (0 for a top-level item).
    pub fn depth_of(&self, item: ItemId) -> Result<usize> {
        self.check_known(item)?;
        let mut depth = 0;
        let mut current = item;
        while let Some(parent) = self.parents[current.index()] {
            depth += 1;
            current = parent;
        }
        Ok(depth)
    }

    /// Attribute names that have at least one recorded value, sorted.
    pub fn attributes(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .values
            .keys()
            .filter_map(|id| self.names.lookup(*id))
            .collect();
        out.sort();
        out
    }

    /// Property names that have at least one recorded value, sorted.
    pub fn property_names(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .properties
            .keys()
            .filter_map(|id| self.names.lookup(*id))
            .collect();
        out.sort();
        out
    }

    pub(crate) fn value_column(&self, attribute: &str) -> Vec<(ItemId, f64)> {
        let Some(col) = self
            .names
            .id_of(attribute)
            .and_then(|attr_id| self.values.get(&attr_id))
        else {
            return Vec::new();
        };
        let mut out: Vec<(ItemId, f64)> =
            col.iter().map(|(&raw, &v)| (ItemId::new(raw), v)).collect();
        out.sort_by_key(|(item, _)| *item);
        out
    }

    pub(crate) fn property_column(&self, property: &str) -> Vec<(ItemId, String)> {
        let Some(col) = self
            .names
            .id_of(property)
            .and_then(|prop_id| self.properties.get(&prop_id))
        else {
            return Vec::new();
        };
        let mut out: Vec<(ItemId, String)> = col
            .iter()
            .filter_map(|(&raw, &v)| Some((ItemId::new(raw), self.names.lookup(v)?)))
            .collect();
        out.sort_by_key(|(item, _)| *item);
        out
    }

    fn resolve(&self, id: StrId) -> Result<String> {
        self.names
            .lookup(id)
            .ok_or_else(|| RollupError::InvalidSnapshot {
                reason: format!("missing string interner entry {}", id.raw()),
            })
    }

    fn check_known(&self, item: ItemId) -> Result<()> {
        if self.contains(item) {
            Ok(())
        } else {
            Err(RollupError::UnknownItem { item })
        }
    }
}

impl Hierarchy for HierarchyIndex {
    fn snapshot_token(&self) -> Option<SnapshotToken> {
        Some(self.token)
    }

    fn parent_of(&self, item: ItemId) -> Result<Option<ItemId>> {
        self.parents
            .get(item.index())
            .copied()
            .ok_or(RollupError::UnknownItem { item })
    }

    fn children_of(&self, item: ItemId) -> Result<&[ItemId]> {
        self.children
            .get(item.index())
            .map(Vec::as_slice)
            .ok_or(RollupError::UnknownItem { item })
    }

    fn value_of(&self, item: ItemId, attribute: &str) -> Result<Option<f64>> {
        self.check_known(item)?;
        let Some(attr_id) = self.names.id_of(attribute) else {
            return Ok(None);
        };
        Ok(self
            .values
            .get(&attr_id)
            .and_then(|col| col.get(&item.raw()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> (HierarchyIndex, ItemId, ItemId, ItemId) {
        let mut b = HierarchyBuilder::new();
        let parent = b.add_item("Parent").unwrap();
        let first = b.add_item("Child 1").unwrap();
        let second = b.add_item("Child 2").unwrap();
        b.set_parent(first, parent).unwrap();
        b.set_parent(second, parent).unwrap();
        b.set_value(parent, "estimated_hours", 3.0).unwrap();
        b.set_value(first, "estimated_hours", 1.0).unwrap();
        b.set_property(first, "status", "closed").unwrap();
        (b.build().unwrap(), parent, first, second)
    }

    #[test]
    fn adjacency_is_complete() {
        let (index, parent, first, second) = family();

        assert_eq!(index.len(), 3);
        assert_eq!(index.roots(), &[parent]);
        assert_eq!(index.children_of(parent).unwrap(), &[first, second]);
        assert!(index.children_of(first).unwrap().is_empty());
        assert_eq!(index.parent_of(second).unwrap(), Some(parent));
        assert_eq!(index.parent_of(parent).unwrap(), None);
        assert_eq!(index.depth_of(second).unwrap(), 1);
    }

    #[test]
    fn absent_values_are_distinct_from_zero() {
        let (index, parent, _first, second) = family();

        assert_eq!(index.value_of(parent, "estimated_hours").unwrap(), Some(3.0));
        assert_eq!(index.value_of(second, "estimated_hours").unwrap(), None);
        assert_eq!(index.value_of(parent, "story_points").unwrap(), None);
    }

    #[test]
    fn keys_and_properties_resolve() {
        let (index, _parent, first, second) = family();

        assert_eq!(index.item_by_key("Child 1"), Some(first));
        assert_eq!(index.key_of(second).unwrap(), "Child 2");
        assert_eq!(
            index.property_of(first, "status").unwrap().as_deref(),
            Some("closed")
        );
        assert_eq!(index.property_of(second, "status").unwrap(), None);
        assert_eq!(index.attributes(), vec!["estimated_hours".to_string()]);
        assert!(matches!(
            index.require_key("Nope"),
            Err(RollupError::UnknownKey { .. })
        ));
    }

    #[test]
    fn unknown_items_fail_loudly() {
        let (index, ..) = family();
        let ghost = ItemId::new(99);

        assert!(matches!(
            index.parent_of(ghost),
            Err(RollupError::UnknownItem { item }) if item == ghost
        ));
        assert!(index.children_of(ghost).is_err());
        assert!(index.value_of(ghost, "estimated_hours").is_err());
        assert!(index.key_of(ghost).is_err());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut b = HierarchyBuilder::new();
        b.add_item("Single").unwrap();
        assert!(matches!(
            b.add_item("Single"),
            Err(RollupError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn second_parent_is_rejected() {
        let mut b = HierarchyBuilder::new();
        let a = b.add_item("a").unwrap();
        let c = b.add_item("b").unwrap();
        let child = b.add_item("child").unwrap();
        b.set_parent(child, a).unwrap();
        b.set_parent(child, a).unwrap();

        let err = b.set_parent(child, c).unwrap_err();
        assert!(matches!(err, RollupError::MultipleParents { existing, .. } if existing == a));
    }

    #[test]
    fn cycles_are_rejected_at_build() {
        let mut b = HierarchyBuilder::new();
        let root = b.add_item("root").unwrap();
        let x = b.add_item("x").unwrap();
        let y = b.add_item("y").unwrap();
        b.set_parent(x, y).unwrap();
        b.set_parent(y, x).unwrap();
        let _ = root;

        let err = b.build().unwrap_err();
        assert!(matches!(err, RollupError::CycleDetected { item } if item == x));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let mut b = HierarchyBuilder::new();
        let a = b.add_item("a").unwrap();
        assert!(matches!(
            b.set_parent(a, a),
            Err(RollupError::CycleDetected { .. })
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut b = HierarchyBuilder::new();
        let a = b.add_item("a").unwrap();
        assert!(matches!(
            b.set_value(a, "estimated_hours", f64::NAN),
            Err(RollupError::NonFiniteValue { .. })
        ));
        assert!(b.set_value(a, "estimated_hours", f64::INFINITY).is_err());
    }

    #[test]
    fn each_index_gets_its_own_token() {
        let (a, ..) = family();
        let (b, ..) = family();
        assert_ne!(a.token(), b.token());
        assert_eq!(a.snapshot_token(), Some(a.token()));
    }
}
