use proptest::prelude::*;
use rollup_core::{
    plan, sum, sum_columns, sums_by_group, Column, Hierarchy, HierarchyBuilder, HierarchyIndex,
    ItemId, ResultSet,
};

const MAX_ITEMS: usize = 60;
const HOURS: &str = "estimated_hours";
const POINTS: &str = "story_points";

/// One generated item: parent (always an earlier item, so the result is a
/// forest), optional hours, optional points, result-set membership, group.
type ItemRow = (Option<usize>, Option<u16>, Option<u16>, bool, u8);

fn forest_strategy() -> impl Strategy<Value = Vec<ItemRow>> {
    (0usize..=MAX_ITEMS).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                let parent = if i == 0 {
                    Just(None).boxed()
                } else {
                    prop::option::weighted(0.8, 0..i).boxed()
                };
                (
                    parent,
                    prop::option::of(0u16..100),
                    prop::option::of(0u16..100),
                    prop::bool::weighted(0.7),
                    0u8..3,
                )
            })
            .collect::<Vec<_>>()
    })
}

fn build(rows: &[ItemRow]) -> HierarchyIndex {
    let mut b = HierarchyBuilder::new();
    for i in 0..rows.len() {
        b.add_item(&format!("item-{i}")).unwrap();
    }
    for (i, &(parent, hours, points, _, _)) in rows.iter().enumerate() {
        let id = ItemId::new(i as u32);
        if let Some(p) = parent {
            b.set_parent(id, ItemId::new(p as u32)).unwrap();
        }
        if let Some(h) = hours {
            b.set_value(id, HOURS, f64::from(h)).unwrap();
        }
        if let Some(p) = points {
            b.set_value(id, POINTS, f64::from(p)).unwrap();
        }
    }
    b.build().unwrap()
}

fn members(index: &HierarchyIndex, rows: &[ItemRow]) -> ResultSet {
    ResultSet::from_predicate(index, |item| rows[item.raw() as usize].3)
}

/// Straightforward recursive definition, used as the oracle.
fn node_value(index: &HierarchyIndex, r: &ResultSet, item: ItemId, attribute: &str) -> f64 {
    let children = index.children_of(item).unwrap();
    if children.iter().all(|&c| r.contains(c)) {
        return index.value_of(item, attribute).unwrap().unwrap_or(0.0);
    }
    children
        .iter()
        .filter(|&&c| r.contains(c))
        .map(|&c| node_value(index, r, c, attribute))
        .sum()
}

fn oracle(index: &HierarchyIndex, r: &ResultSet, attribute: &str) -> f64 {
    r.iter()
        .filter(|&item| match index.parent_of(item).unwrap() {
            Some(p) => !r.contains(p),
            None => true,
        })
        .map(|root| node_value(index, r, root, attribute))
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn sum_matches_the_recursive_definition(rows in forest_strategy()) {
        let index = build(&rows);
        let r = members(&index, &rows);
        // Integer-valued inputs, so summation order cannot change the result.
        prop_assert_eq!(sum(&r, &index, &Column::new(HOURS)).unwrap(), oracle(&index, &r, HOURS));
    }

    #[test]
    fn unfiltered_sum_is_the_sum_of_top_level_items(rows in forest_strategy()) {
        let index = build(&rows);
        let expected: f64 = index
            .roots()
            .iter()
            .map(|&root| index.value_of(root, HOURS).unwrap().unwrap_or(0.0))
            .sum();
        prop_assert_eq!(sum(&ResultSet::all(&index), &index, &Column::new(HOURS)).unwrap(), expected);
    }

    #[test]
    fn every_member_is_counted_at_most_once(rows in forest_strategy()) {
        let index = build(&rows);
        let r = members(&index, &rows);
        let plan = plan(&r, &index).unwrap();

        let mut seen = std::collections::BTreeSet::new();
        for &(item, _) in plan.frontier() {
            prop_assert!(r.contains(item));
            prop_assert!(seen.insert(item));
            prop_assert!(index.children_of(item).unwrap().iter().all(|&c| r.contains(c)));
        }

        // Non-negative values: the rollup never exceeds the naive flat sum.
        let flat: f64 = r
            .iter()
            .map(|item| index.value_of(item, HOURS).unwrap().unwrap_or(0.0))
            .sum();
        prop_assert!(plan.sum(&index, &Column::new(HOURS)).unwrap() <= flat);
    }

    #[test]
    fn sum_is_deterministic(rows in forest_strategy()) {
        let index = build(&rows);
        let r = members(&index, &rows);
        let column = Column::new(HOURS);
        let first = sum(&r, &index, &column).unwrap();
        let second = sum(&r, &index, &column).unwrap();
        prop_assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn shared_plan_matches_per_column_sums(rows in forest_strategy()) {
        let index = build(&rows);
        let r = members(&index, &rows);
        let columns = [Column::new(HOURS), Column::new(POINTS)];
        let sums = sum_columns(&r, &index, &columns).unwrap();
        for (column_sum, column) in sums.iter().zip(&columns) {
            prop_assert_eq!(&column_sum.column, column);
            prop_assert_eq!(column_sum.total, sum(&r, &index, column).unwrap());
        }
    }

    #[test]
    fn group_sums_equal_sums_of_intersections(rows in forest_strategy()) {
        let index = build(&rows);
        let r = members(&index, &rows);
        let group_of = |item: ItemId| rows[item.raw() as usize].4;
        let groups = sums_by_group(&r, &index, &Column::new(HOURS), group_of).unwrap();

        for (&group, &total) in &groups {
            let part = ResultSet::from_predicate(&index, |item| r.contains(item) && group_of(item) == group);
            prop_assert!(!part.is_empty());
            prop_assert_eq!(total, sum(&part, &index, &Column::new(HOURS)).unwrap());
        }
        prop_assert_eq!(groups.len(), r.iter().map(group_of).collect::<std::collections::BTreeSet<_>>().len());
    }

    #[test]
    fn snapshot_round_trip_preserves_sums(rows in forest_strategy()) {
        let index = build(&rows);
        let restored = HierarchyIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        let r = members(&index, &rows);
        let r_restored = ResultSet::from_items(r.iter()).branded(&restored);

        for attribute in [HOURS, POINTS] {
            prop_assert_eq!(
                sum(&r, &index, &Column::new(attribute)).unwrap(),
                sum(&r_restored, &restored, &Column::new(attribute)).unwrap()
            );
        }
    }
}
