// src/sched/stage_graph.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::ConfigFile;
use crate::errors::{Result, StagehandError};

/// Stage dependency graph. Acyclicity is checked by config validation.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Stage name to the stages listed in its `after`.
    upstream: BTreeMap<String, Vec<String>>,
}

impl StageGraph {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let upstream = cfg
            .stage
            .iter()
            .map(|(name, stage)| (name.clone(), stage.after.clone()))
            .collect();
        Self { upstream }
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.upstream.contains_key(stage)
    }

    pub fn upstream_of(&self, stage: &str) -> &[String] {
        self.upstream
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Stages in dependency order (upstream first).
    pub fn order(&self) -> Result<Vec<String>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for (name, deps) in self.upstream.iter() {
            graph.add_node(name.as_str());
            for dep in deps.iter() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }
        toposort(&graph, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .map_err(|cycle| {
                StagehandError::StageCycle(format!(
                    "cycle detected in stage graph involving stage '{}'",
                    cycle.node_id()
                ))
            })
    }
}
