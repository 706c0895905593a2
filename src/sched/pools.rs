// src/sched/pools.rs

//! Balanced partitioning of weighted items into a fixed number of pools.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::errors::{Result, StagehandError};

/// An item to be pooled, e.g. a contig and its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedItem {
    pub id: String,
    pub weight: u64,
}

impl WeightedItem {
    pub fn new(id: impl Into<String>, weight: u64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

/// One pool of a partition. Members are in assignment order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pool {
    pub pool_id: usize,
    pub members: Vec<String>,
    pub weight: u64,
}

/// Greedy longest-first partition of `items` into exactly `pool_count` pools.
///
/// Items are taken by descending weight (ties by id) and each goes to the
/// currently lightest pool (ties to the pool with fewer members, then the
/// lowest pool id), so the result is a pure function of the input set and
/// `pool_count`, and no pool is left empty.
pub fn partition(items: &[WeightedItem], pool_count: usize) -> Result<Vec<Pool>> {
    if items.is_empty() {
        return Err(StagehandError::PartitionError(
            "no items to partition".to_string(),
        ));
    }
    if pool_count == 0 {
        return Err(StagehandError::PartitionError(
            "pool count must be at least 1".to_string(),
        ));
    }
    if pool_count > items.len() {
        return Err(StagehandError::PartitionError(format!(
            "{pool_count} pools requested for only {} item(s)",
            items.len()
        )));
    }

    let mut seen = BTreeSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(StagehandError::PartitionError(format!(
                "duplicate item '{}'",
                item.id
            )));
        }
    }

    let mut ordered: Vec<&WeightedItem> = items.iter().collect();
    ordered.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.id.cmp(&b.id)));

    let mut pools: Vec<Pool> = (0..pool_count)
        .map(|pool_id| Pool {
            pool_id,
            members: Vec::new(),
            weight: 0,
        })
        .collect();

    for item in ordered {
        let lightest = pools
            .iter_mut()
            .min_by_key(|p| (p.weight, p.members.len(), p.pool_id))
            .ok_or_else(|| StagehandError::PartitionError("no pools".to_string()))?;
        let pool_id = lightest.pool_id;
        lightest.weight = lightest.weight.checked_add(item.weight).ok_or_else(|| {
            StagehandError::PartitionError(format!("total weight of pool {pool_id} overflows"))
        })?;
        lightest.members.push(item.id.clone());
    }

    debug!(
        items = items.len(),
        pools = pool_count,
        heaviest = pools.iter().map(|p| p.weight).max().unwrap_or(0),
        "partitioned items"
    );

    Ok(pools)
}
