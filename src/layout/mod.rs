// src/layout/mod.rs

//! Config-driven domain glue.
//!
//! [`PipelineLayout`] turns the validated config into work units (declared
//! ones plus the pool and merge units of pooled stages) and resolves a unit
//! into the concrete command, inputs and outputs of its operation.

pub mod template;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::{ConfigFile, StageConfig};
use crate::errors::{Result, StagehandError};
use crate::exec::{checksum, stderr_path};
use crate::fs::FileSystem;
use crate::sched::filter::{MEMBERS_KEY, POOL_KEY};
use crate::sched::pools::{self, Pool, WeightedItem};
use crate::store::{Store, WorkUnit};
use crate::types::{UnitKind, UnitStatus};

/// Concrete description of a unit's operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub command: String,
    pub inputs: Vec<PathBuf>,
    /// Artifact first, then auxiliary outputs. All are guard files.
    pub outputs: Vec<PathBuf>,
    pub checksum: bool,
}

/// Weighted items and target pool count of a pooled stage.
#[derive(Debug, Clone)]
pub struct PoolPlan {
    pub items: Vec<WeightedItem>,
    pub pool_count: usize,
}

/// Supplies the domain knowledge the scheduler treats as opaque.
pub trait Resolver: Send + Sync {
    /// Resolve `unit`; `stage_units` are the current rows of its stage.
    fn resolve(&self, unit: &WorkUnit, stage_units: &[WorkUnit]) -> Result<Resolved>;

    /// Pool inputs for `stage`, or `None` if the stage is not pooled.
    fn pool_plan(&self, _stage: &str) -> Option<PoolPlan> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareReport {
    pub added: usize,
    pub index_done: usize,
    pub index_pending: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineLayout {
    stages: BTreeMap<String, StageConfig>,
    units: Vec<WorkUnit>,
    declared_inputs: BTreeMap<PathBuf, Vec<PathBuf>>,
}

impl PipelineLayout {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut units = Vec::new();
        let mut declared_inputs = BTreeMap::new();

        for (name, stage) in cfg.stage.iter() {
            if stage.is_pooled() {
                expand_pooled(name, stage, &mut units, &mut declared_inputs)?;
            } else {
                for decl in stage.unit.iter() {
                    units.push(WorkUnit::new(
                        name.as_str(),
                        decl.artifact.clone(),
                        decl.group.as_str(),
                        decl.kind,
                    ));
                    declared_inputs.insert(decl.artifact.clone(), decl.inputs.clone());
                }
            }
        }

        let mut seen = BTreeSet::new();
        for unit in units.iter() {
            if !seen.insert(unit.artifact_path.clone()) {
                return Err(StagehandError::ConfigError(format!(
                    "artifact {:?} is produced by more than one unit",
                    unit.artifact_path
                )));
            }
        }

        debug!(units = units.len(), stages = cfg.stage.len(), "built pipeline layout");
        Ok(Self {
            stages: cfg.stage.clone(),
            units,
            declared_inputs,
        })
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    /// Register every unit with the store. Index units are synced with the
    /// presence of their artifact; other units are inserted if absent.
    pub fn prepare(&self, store: &Store, fs: &dyn FileSystem) -> Result<PrepareReport> {
        let (index, rest): (Vec<&WorkUnit>, Vec<&WorkUnit>) =
            self.units.iter().partition(|u| u.kind == UnitKind::Index);

        let rest: Vec<WorkUnit> = rest.into_iter().cloned().collect();
        let mut report = PrepareReport {
            added: store.register_units(&rest)?,
            ..PrepareReport::default()
        };

        for unit in index {
            match store.upsert_index(unit, fs.exists(&unit.artifact_path))? {
                UnitStatus::Done => report.index_done += 1,
                _ => report.index_pending += 1,
            }
        }

        info!(
            added = report.added,
            index_done = report.index_done,
            index_pending = report.index_pending,
            "registered units"
        );
        Ok(report)
    }

    fn stage_config(&self, stage: &str) -> Result<&StageConfig> {
        self.stages
            .get(stage)
            .ok_or_else(|| StagehandError::UnknownStage(stage.to_string()))
    }
}

fn expand_pooled(
    name: &str,
    stage: &StageConfig,
    units: &mut Vec<WorkUnit>,
    declared_inputs: &mut BTreeMap<PathBuf, Vec<PathBuf>>,
) -> Result<()> {
    let items: Vec<WeightedItem> = stage
        .item
        .iter()
        .map(|i| WeightedItem::new(i.name.clone(), i.weight))
        .collect();
    let partition: Vec<Pool> = pools::partition(&items, stage.pools.unwrap_or(0))?;
    let pool_template = stage.pool_artifact.as_deref().ok_or_else(|| {
        StagehandError::ConfigError(format!("pooled stage '{name}' needs `pool_artifact`"))
    })?;

    for group in stage.group.iter() {
        for pool in partition.iter() {
            let vars = BTreeMap::from([
                ("group", group.key.clone()),
                ("stage", name.to_string()),
                ("pool", pool.pool_id.to_string()),
            ]);
            let artifact = PathBuf::from(template::expand(pool_template, &vars)?);
            declared_inputs.insert(artifact.clone(), group.inputs.clone());
            units.push(
                WorkUnit::new(name, artifact, group.key.as_str(), UnitKind::Pool)
                    .with_payload(POOL_KEY, pool.pool_id.to_string())
                    .with_payload(MEMBERS_KEY, pool.members.join(",")),
            );
        }

        if let Some(merge_template) = stage.merge_artifact.as_deref() {
            let vars = BTreeMap::from([
                ("group", group.key.clone()),
                ("stage", name.to_string()),
            ]);
            let artifact = PathBuf::from(template::expand(merge_template, &vars)?);
            declared_inputs.insert(artifact.clone(), Vec::new());
            units.push(WorkUnit::new(name, artifact, group.key.as_str(), UnitKind::Merge));
        }
    }
    Ok(())
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Resolver for PipelineLayout {
    fn resolve(&self, unit: &WorkUnit, stage_units: &[WorkUnit]) -> Result<Resolved> {
        let stage = self.stage_config(&unit.stage)?;
        let mut inputs = self
            .declared_inputs
            .get(&unit.artifact_path)
            .cloned()
            .ok_or_else(|| StagehandError::UnknownUnit(unit.key()))?;

        let template_str = if unit.kind == UnitKind::Merge {
            let mut leaves: Vec<PathBuf> = crate::sched::fan_in::leaves_of(unit, stage_units)
                .map(|u| u.artifact_path.clone())
                .collect();
            leaves.sort();
            inputs.extend(leaves);
            stage.effective_merge_cmd()
        } else {
            stage.cmd.as_str()
        };

        let output = unit.artifact_path.display().to_string();
        let aux_vars = BTreeMap::from([
            ("output", output.clone()),
            ("group", unit.group_key.clone()),
            ("stage", unit.stage.clone()),
        ]);
        let mut outputs = vec![unit.artifact_path.clone()];
        for aux in stage.aux.iter() {
            outputs.push(PathBuf::from(template::expand(aux, &aux_vars)?));
        }
        outputs.push(stderr_path(&unit.artifact_path));
        if stage.checksum {
            outputs.push(checksum::sidecar_path(&unit.artifact_path));
        }

        let members = unit
            .payload
            .get(MEMBERS_KEY)
            .map(|m| m.replace(',', " "))
            .unwrap_or_default();
        let vars = BTreeMap::from([
            ("output", output),
            ("inputs", join_paths(&inputs)),
            ("group", unit.group_key.clone()),
            ("stage", unit.stage.clone()),
            ("pool", unit.payload.get(POOL_KEY).cloned().unwrap_or_default()),
            ("members", members),
        ]);
        let command = template::expand(template_str, &vars)?;

        Ok(Resolved {
            command,
            inputs,
            outputs,
            checksum: stage.checksum,
        })
    }

    fn pool_plan(&self, stage: &str) -> Option<PoolPlan> {
        let cfg = self.stages.get(stage)?;
        let pool_count = cfg.pools?;
        Some(PoolPlan {
            items: cfg
                .item
                .iter()
                .map(|i| WeightedItem::new(i.name.clone(), i.weight))
                .collect(),
            pool_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use crate::fs::mock::MockFileSystem;

    const PIPELINE: &str = r#"
[stage.index]
cmd = "index {inputs} -o {output}"

[[stage.index.unit]]
artifact = "ref/genome.idx"
group = "reference"
kind = "index"
inputs = ["ref/genome.fa"]

[stage.map]
after = ["index"]
cmd = "map {inputs} -o {output}"
merge_cmd = "merge -o {output} {inputs}"
aux = ["{output}.log"]

[[stage.map.unit]]
artifact = "map/s1/l2.bam"
group = "s1"
inputs = ["reads/l2.fq"]

[[stage.map.unit]]
artifact = "map/s1/l1.bam"
group = "s1"
inputs = ["reads/l1.fq"]

[[stage.map.unit]]
artifact = "map/s1/s1.bam"
group = "s1"
kind = "merge"

[stage.call]
after = ["map"]
cmd = "call --contigs {members} {inputs} -o {output}"
merge_cmd = "concat {inputs} -o {output}"
checksum = true
pools = 2
pool_artifact = "call/{group}/{group}_{pool}.bcf"
merge_artifact = "call/{group}.bcf"

[[stage.call.item]]
name = "chr1"
weight = 10

[[stage.call.item]]
name = "chr2"
weight = 4

[[stage.call.item]]
name = "chrM"
weight = 1

[[stage.call.group]]
key = "s1"
inputs = ["map/s1/s1.bam"]
"#;

    fn layout() -> PipelineLayout {
        PipelineLayout::from_config(&load_from_str(PIPELINE).unwrap()).unwrap()
    }

    fn find<'a>(layout: &'a PipelineLayout, path: &str) -> &'a WorkUnit {
        layout
            .units()
            .iter()
            .find(|u| u.artifact_path == PathBuf::from(path))
            .unwrap()
    }

    #[test]
    fn pooled_stage_expands_into_pools_and_merge() {
        let layout = layout();
        let p0 = find(&layout, "call/s1/s1_0.bcf");
        assert_eq!(p0.kind, UnitKind::Pool);
        assert_eq!(p0.payload.get(MEMBERS_KEY).unwrap(), "chr1");
        let p1 = find(&layout, "call/s1/s1_1.bcf");
        assert_eq!(p1.payload.get(MEMBERS_KEY).unwrap(), "chr2,chrM");
        assert_eq!(find(&layout, "call/s1.bcf").kind, UnitKind::Merge);
        assert_eq!(layout.units().len(), 7);
    }

    #[test]
    fn resolve_leaf_with_aux_outputs() {
        let layout = layout();
        let leaf = find(&layout, "map/s1/l1.bam");
        let resolved = layout.resolve(leaf, layout.units()).unwrap();
        assert_eq!(resolved.command, "map reads/l1.fq -o map/s1/l1.bam");
        assert_eq!(
            resolved.outputs,
            vec![
                PathBuf::from("map/s1/l1.bam"),
                PathBuf::from("map/s1/l1.bam.log"),
                PathBuf::from("map/s1/l1.bam.err"),
            ]
        );
        assert!(!resolved.checksum);
    }

    #[test]
    fn resolve_merge_reads_sorted_leaves() {
        let layout = layout();
        let merge = find(&layout, "map/s1/s1.bam");
        let resolved = layout.resolve(merge, layout.units()).unwrap();
        assert_eq!(
            resolved.command,
            "merge -o map/s1/s1.bam map/s1/l1.bam map/s1/l2.bam"
        );
    }

    #[test]
    fn resolve_pool_uses_members_and_checksum() {
        let layout = layout();
        let pool = find(&layout, "call/s1/s1_1.bcf");
        let resolved = layout.resolve(pool, layout.units()).unwrap();
        assert_eq!(
            resolved.command,
            "call --contigs chr2 chrM map/s1/s1.bam -o call/s1/s1_1.bcf"
        );
        assert!(resolved.checksum);
        assert!(resolved.outputs.contains(&PathBuf::from("call/s1/s1_1.bcf.b3")));
    }

    #[test]
    fn pool_plan_only_for_pooled_stages() {
        let layout = layout();
        let plan = layout.pool_plan("call").unwrap();
        assert_eq!(plan.pool_count, 2);
        assert_eq!(plan.items.len(), 3);
        assert!(layout.pool_plan("map").is_none());
    }

    #[test]
    fn prepare_syncs_index_with_disk() {
        let layout = layout();
        let store = Store::open_in_memory().unwrap();
        let fs = MockFileSystem::new();
        fs.add_file("ref/genome.idx", "idx");

        let report = layout.prepare(&store, &fs).unwrap();
        assert_eq!(report.added, 6);
        assert_eq!(report.index_done, 1);

        let again = layout.prepare(&store, &fs).unwrap();
        assert_eq!(again.added, 0);
    }

    #[test]
    fn duplicate_artifacts_are_rejected() {
        let cfg = load_from_str(
            r#"
[stage.a]
cmd = "x"
[[stage.a.unit]]
artifact = "same.out"

[stage.b]
cmd = "y"
[[stage.b.unit]]
artifact = "same.out"
"#,
        )
        .unwrap();
        assert!(matches!(
            PipelineLayout::from_config(&cfg),
            Err(StagehandError::ConfigError(_))
        ));
    }
}
