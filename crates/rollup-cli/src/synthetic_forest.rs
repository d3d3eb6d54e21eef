//! Deterministic synthetic forests for the perf harness.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use rollup_core::{HierarchyBuilder, HierarchyIndex, ItemId};

#[derive(Debug, Clone)]
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Seeds are scrambled through one splitmix64 round first: the perf
    /// harness draws the forest from `seed` and the result set from
    /// `seed + 1`, and raw adjacent seeds would start nearly identical
    /// streams. The scramble never yields the all-zero state.
    pub(crate) fn new(seed: u64) -> Self {
        let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        Self {
            state: if z == 0 { 1 } else { z },
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    pub(crate) fn gen_range_usize(&mut self, upper: usize) -> usize {
        if upper == 0 {
            return 0;
        }
        (self.next_u64() % (upper as u64)) as usize
    }

    /// Uniform in `[0, 1)`.
    pub(crate) fn gen_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

pub(crate) struct SyntheticForest {
    pub(crate) index: HierarchyIndex,
    pub(crate) columns: Vec<String>,
    pub(crate) build_time: Duration,
}

/// Probability that a generated item starts a new tree instead of joining one.
const ROOT_PROBABILITY: f64 = 0.01;

/// Build a forest of `items` items where each parent has at most `fanout`
/// children. Every item gets a whole-hour value per column and a `subject`
/// property (`Hidden …` for roughly one item in ten).
pub(crate) fn build_synthetic_forest(
    items: usize,
    fanout: usize,
    columns: usize,
    seed: u64,
) -> Result<SyntheticForest> {
    if items == 0 {
        return Err(anyhow!("--items must be > 0"));
    }
    if fanout == 0 {
        return Err(anyhow!("--fanout must be > 0"));
    }

    let columns: Vec<String> = (0..columns).map(|c| format!("col_{c}")).collect();
    let mut rng = XorShift64::new(seed);
    let start = Instant::now();

    let mut builder = HierarchyBuilder::new();
    // Items whose child list still has room.
    let mut open: Vec<(ItemId, usize)> = Vec::new();
    for i in 0..items {
        let id = builder.add_item(&format!("item-{i}"))?;

        if !open.is_empty() && rng.gen_f64() >= ROOT_PROBABILITY {
            let slot = rng.gen_range_usize(open.len());
            let (parent, taken) = &mut open[slot];
            builder.set_parent(id, *parent)?;
            *taken += 1;
            if *taken == fanout {
                open.swap_remove(slot);
            }
        }
        open.push((id, 0));

        for column in &columns {
            builder.set_value(id, column, rng.gen_range_usize(41) as f64)?;
        }
        let subject = if rng.gen_range_usize(10) == 0 {
            format!("Hidden item {i}")
        } else {
            format!("Item {i}")
        };
        builder.set_property(id, "subject", &subject)?;
    }

    let index = builder.build()?;
    Ok(SyntheticForest {
        index,
        columns,
        build_time: start.elapsed(),
    })
}
