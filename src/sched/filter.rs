// src/sched/filter.rs

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::errors::{Result, StagehandError};
use crate::store::WorkUnit;
use crate::types::UnitKind;

/// Payload key of a pool unit's id.
pub const POOL_KEY: &str = "pool";
/// Payload key of a pool unit's comma-separated member list.
pub const MEMBERS_KEY: &str = "members";

/// Which units of a stage a scheduling call may look at.
///
/// Restricting by pool or item is a *subset* request: only part of a
/// group's leaves were asked for, so merges are never offered.
#[derive(Clone, Default)]
pub struct UnitFilter {
    groups: BTreeSet<String>,
    pools: BTreeSet<usize>,
    items: Option<GlobSet>,
    item_patterns: Vec<String>,
    exclude: BTreeSet<PathBuf>,
}

impl fmt::Debug for UnitFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitFilter")
            .field("groups", &self.groups)
            .field("pools", &self.pools)
            .field("items", &self.item_patterns)
            .field("exclude", &self.exclude.len())
            .finish()
    }
}

impl UnitFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn with_pools<I>(mut self, pools: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        self.pools.extend(pools);
        self
    }

    /// Restrict to units whose artifact, or for pools any member item,
    /// matches one of the glob `patterns`.
    pub fn with_items(mut self, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(self);
        }
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let glob = Glob::new(pat).map_err(|e| {
                StagehandError::ConfigError(format!("invalid item pattern '{pat}': {e}"))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| StagehandError::ConfigError(format!("building item patterns: {e}")))?;
        self.items = Some(set);
        self.item_patterns = patterns.to_vec();
        Ok(self)
    }

    /// Skip `artifact` for the rest of this pass.
    pub fn exclude(&mut self, artifact: impl Into<PathBuf>) {
        self.exclude.insert(artifact.into());
    }

    pub fn is_subset(&self) -> bool {
        self.items.is_some() || !self.pools.is_empty()
    }

    pub fn matches(&self, unit: &WorkUnit) -> bool {
        if !self.groups.is_empty() && !self.groups.contains(&unit.group_key) {
            return false;
        }
        if self.exclude.contains(&unit.artifact_path) {
            return false;
        }
        if unit.kind == UnitKind::Merge {
            return !self.is_subset();
        }
        if !self.pools.is_empty() {
            let pool = unit
                .payload
                .get(POOL_KEY)
                .and_then(|p| p.parse::<usize>().ok());
            match pool {
                Some(id) if self.pools.contains(&id) => {}
                _ => return false,
            }
        }
        if let Some(items) = &self.items {
            let artifact_hit = items.is_match(&unit.artifact_path);
            let member_hit = unit
                .payload
                .get(MEMBERS_KEY)
                .map(|m| m.split(',').any(|item| items.is_match(item)))
                .unwrap_or(false);
            if !artifact_hit && !member_hit {
                return false;
            }
        }
        true
    }
}
