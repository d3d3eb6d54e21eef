//! Result sets: which items survived the caller's filter.
//!
//! The aggregation engine only asks two things of a result set: "is this
//! item a member?" and "enumerate your members once". [`Membership`] is that
//! seam. [`ResultSet`] is the provided implementation, a Roaring bitmap over
//! item handles with O(1)-ish membership and cheap set algebra.

use roaring::RoaringBitmap;
use std::collections::{BTreeSet, HashSet};
use std::hash::BuildHasher;

use crate::branding::{check_same_snapshot, SnapshotToken};
use crate::error::Result;
use crate::hierarchy::HierarchyIndex;
use crate::ItemId;

/// Membership predicate plus one-shot enumeration.
pub trait Membership {
    fn contains(&self, item: ItemId) -> bool;

    /// Every member, in any order.
    fn members(&self) -> Box<dyn Iterator<Item = ItemId> + '_>;

    /// Brand of the index this set was filtered against, if known.
    fn snapshot_token(&self) -> Option<SnapshotToken> {
        None
    }
}

/// A set of items backed by a Roaring bitmap.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    members: RoaringBitmap,
    token: Option<SnapshotToken>,
}

impl ResultSet {
    /// An empty, unbranded set.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set branded for `index`.
    pub fn for_index(index: &HierarchyIndex) -> Self {
        Self {
            members: RoaringBitmap::new(),
            token: Some(index.token()),
        }
    }

    /// An unbranded set of the given items.
    pub fn from_items(items: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            members: items.into_iter().map(ItemId::raw).collect(),
            token: None,
        }
    }

    /// Every item of `index` (the unfiltered query).
    pub fn all(index: &HierarchyIndex) -> Self {
        Self::from_predicate(index, |_| true)
    }

    /// Items of `index` for which `keep` returns true.
    pub fn from_predicate(index: &HierarchyIndex, mut keep: impl FnMut(ItemId) -> bool) -> Self {
        let mut out = Self::for_index(index);
        for item in index.items() {
            if keep(item) {
                out.members.insert(item.raw());
            }
        }
        out
    }

    /// Brand an existing set for `index`.
    pub fn branded(mut self, index: &HierarchyIndex) -> Self {
        self.token = Some(index.token());
        self
    }

    pub(crate) fn with_token(mut self, token: Option<SnapshotToken>) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> Option<SnapshotToken> {
        self.token
    }

    /// Add an item; returns `false` if it was already a member.
    pub fn insert(&mut self, item: ItemId) -> bool {
        self.members.insert(item.raw())
    }

    pub fn remove(&mut self, item: ItemId) -> bool {
        self.members.remove(item.raw())
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.members.contains(item.raw())
    }

    pub fn len(&self) -> usize {
        self.members.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members, ascending.
    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.members.iter().map(ItemId::new)
    }

    pub fn as_bitmap(&self) -> &RoaringBitmap {
        &self.members
    }

    // Set algebra keeps whichever brand is present. Two different brands
    // mean the operands index different hierarchies.

    pub fn intersection(&self, other: &ResultSet) -> Result<ResultSet> {
        Ok(ResultSet {
            members: &self.members & &other.members,
            token: self.combined_token(other)?,
        })
    }

    pub fn union(&self, other: &ResultSet) -> Result<ResultSet> {
        Ok(ResultSet {
            members: &self.members | &other.members,
            token: self.combined_token(other)?,
        })
    }

    pub fn difference(&self, other: &ResultSet) -> Result<ResultSet> {
        Ok(ResultSet {
            members: &self.members - &other.members,
            token: self.combined_token(other)?,
        })
    }

    fn combined_token(&self, other: &ResultSet) -> Result<Option<SnapshotToken>> {
        check_same_snapshot(self.token, other.token)?;
        Ok(self.token.or(other.token))
    }
}

impl PartialEq for ResultSet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl FromIterator<ItemId> for ResultSet {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self {
        Self::from_items(iter)
    }
}

impl Extend<ItemId> for ResultSet {
    fn extend<I: IntoIterator<Item = ItemId>>(&mut self, iter: I) {
        self.members.extend(iter.into_iter().map(ItemId::raw));
    }
}

impl From<RoaringBitmap> for ResultSet {
    fn from(members: RoaringBitmap) -> Self {
        Self {
            members,
            token: None,
        }
    }
}

impl Membership for ResultSet {
    fn contains(&self, item: ItemId) -> bool {
        ResultSet::contains(self, item)
    }

    fn members(&self) -> Box<dyn Iterator<Item = ItemId> + '_> {
        Box::new(self.iter())
    }

    fn snapshot_token(&self) -> Option<SnapshotToken> {
        self.token
    }
}

impl<S: BuildHasher> Membership for HashSet<ItemId, S> {
    fn contains(&self, item: ItemId) -> bool {
        HashSet::contains(self, &item)
    }

    fn members(&self) -> Box<dyn Iterator<Item = ItemId> + '_> {
        Box::new(self.iter().copied())
    }
}

impl Membership for BTreeSet<ItemId> {
    fn contains(&self, item: ItemId) -> bool {
        BTreeSet::contains(self, &item)
    }

    fn members(&self) -> Box<dyn Iterator<Item = ItemId> + '_> {
        Box::new(self.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyBuilder;

    fn index() -> HierarchyIndex {
        let mut b = HierarchyBuilder::new();
        for key in ["Single", "Parent", "Hidden Child"] {
            let id = b.add_item(key).unwrap();
            b.set_property(id, "subject", key).unwrap();
        }
        b.build().unwrap()
    }

    #[test]
    fn predicate_filters_and_brands() {
        let index = index();
        let visible = ResultSet::from_predicate(&index, |item| {
            !index
                .property_of(item, "subject")
                .ok()
                .flatten()
                .is_some_and(|s| s.starts_with("Hidden"))
        });

        assert_eq!(visible.len(), 2);
        assert!(visible.contains(ItemId::new(0)));
        assert!(!visible.contains(ItemId::new(2)));
        assert_eq!(visible.token(), Some(index.token()));
    }

    #[test]
    fn all_covers_the_universe() {
        let index = index();
        let all = ResultSet::all(&index);
        assert_eq!(all.len(), index.len());
        assert_eq!(all.iter().collect::<Vec<_>>(), index.items().collect::<Vec<_>>());
    }

    #[test]
    fn set_algebra() {
        let a: ResultSet = [0, 1, 2].into_iter().map(ItemId::new).collect();
        let b: ResultSet = [1, 2, 3].into_iter().map(ItemId::new).collect();

        assert_eq!(
            a.intersection(&b).unwrap().iter().map(ItemId::raw).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(a.union(&b).unwrap().len(), 4);
        assert_eq!(
            a.difference(&b).unwrap().iter().map(ItemId::raw).collect::<Vec<_>>(),
            vec![0]
        );
    }

    #[test]
    fn set_algebra_across_indexes_is_rejected() {
        let first = index();
        let second = index();
        let a = ResultSet::all(&first);
        let b = ResultSet::all(&second);

        assert!(matches!(
            a.union(&b),
            Err(crate::RollupError::SnapshotMismatch { .. })
        ));
        assert!(a.intersection(&b).is_err());
        assert!(a.difference(&b).is_err());

        // An unbranded operand adopts the branded side's token.
        let plain = ResultSet::from_items([ItemId::new(0)]);
        assert_eq!(plain.intersection(&a).unwrap().token(), Some(first.token()));
    }

    #[test]
    fn std_sets_are_memberships() {
        let hashed: HashSet<ItemId> = [ItemId::new(4)].into_iter().collect();
        let ordered: BTreeSet<ItemId> = [ItemId::new(4)].into_iter().collect();

        assert!(Membership::contains(&hashed, ItemId::new(4)));
        assert!(!Membership::contains(&ordered, ItemId::new(5)));
        assert_eq!(hashed.members().count(), 1);
        assert_eq!(Membership::snapshot_token(&ordered), None);
    }

    #[test]
    fn equality_ignores_brand() {
        let index = index();
        let branded = ResultSet::from_items([ItemId::new(1)]).branded(&index);
        let plain = ResultSet::from_items([ItemId::new(1)]);
        assert_eq!(branded, plain);
        assert_ne!(branded.token(), plain.token());
    }
}
