// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, StageConfig};
use crate::errors::{Result, StagehandError};
use crate::layout::template::{
    self, ARTIFACT_VARS, AUX_VARS, COMMAND_VARS, MERGE_ARTIFACT_VARS,
};
use crate::sched::pools::{self, WeightedItem};
use crate::types::UnitKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StagehandError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.stage))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages(cfg)?;
    validate_global_config(cfg)?;
    validate_stage_dependencies(cfg)?;
    validate_stage_graph(cfg)?;
    for (name, stage) in cfg.stage.iter() {
        validate_templates(name, stage)?;
        if stage.is_pooled() {
            validate_pooled_stage(name, stage)?;
        } else {
            validate_declared_stage(name, stage)?;
        }
    }
    Ok(())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(StagehandError::ConfigError(
            "config must contain at least one [stage.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.jobs == 0 {
        return Err(StagehandError::ConfigError(
            "[config].jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.db_file.as_os_str().is_empty() {
        return Err(StagehandError::ConfigError(
            "[config].db_file must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_stage_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return Err(StagehandError::ConfigError(format!(
                "invalid stage name '{name}'"
            )));
        }
        for dep in stage.after.iter() {
            if !cfg.stage.contains_key(dep) {
                return Err(StagehandError::ConfigError(format!(
                    "stage '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(StagehandError::ConfigError(format!(
                    "stage '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_stage_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: upstream -> stage.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.stage.keys() {
        graph.add_node(name.as_str());
    }

    for (name, stage) in cfg.stage.iter() {
        for dep in stage.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(StagehandError::StageCycle(format!(
            "cycle detected in stage graph involving stage '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_templates(name: &str, stage: &StageConfig) -> Result<()> {
    template::check(&stage.cmd, COMMAND_VARS)?;
    if let Some(ref merge_cmd) = stage.merge_cmd {
        template::check(merge_cmd, COMMAND_VARS)?;
    }
    for aux in stage.aux.iter() {
        template::check(aux, AUX_VARS)?;
        if !template::placeholders(aux).contains(&"output") {
            return Err(StagehandError::ConfigError(format!(
                "stage '{name}': aux template \"{aux}\" must reference {{output}}"
            )));
        }
    }
    Ok(())
}

fn validate_pooled_stage(name: &str, stage: &StageConfig) -> Result<()> {
    if !stage.unit.is_empty() {
        return Err(StagehandError::ConfigError(format!(
            "stage '{name}' is pooled and cannot also declare [[stage.{name}.unit]] entries"
        )));
    }
    if stage.group.is_empty() {
        return Err(StagehandError::ConfigError(format!(
            "pooled stage '{name}' needs at least one [[stage.{name}.group]]"
        )));
    }

    let artifact = stage.pool_artifact.as_deref().ok_or_else(|| {
        StagehandError::ConfigError(format!("pooled stage '{name}' needs `pool_artifact`"))
    })?;
    template::check(artifact, ARTIFACT_VARS)?;
    for required in ["group", "pool"] {
        if !template::placeholders(artifact).contains(&required) {
            return Err(StagehandError::ConfigError(format!(
                "stage '{name}': `pool_artifact` must reference {{{required}}}"
            )));
        }
    }
    if let Some(ref merge) = stage.merge_artifact {
        template::check(merge, MERGE_ARTIFACT_VARS)?;
        if !template::placeholders(merge).contains(&"group") {
            return Err(StagehandError::ConfigError(format!(
                "stage '{name}': `merge_artifact` must reference {{group}}"
            )));
        }
    }

    // Partition now so an impossible pool layout fails at load time.
    let items: Vec<WeightedItem> = stage
        .item
        .iter()
        .map(|i| WeightedItem::new(i.name.clone(), i.weight))
        .collect();
    pools::partition(&items, stage.pools.unwrap_or(0))?;

    Ok(())
}

fn validate_declared_stage(name: &str, stage: &StageConfig) -> Result<()> {
    if stage.unit.is_empty() {
        return Err(StagehandError::ConfigError(format!(
            "stage '{name}' declares no units (add [[stage.{name}.unit]] or make it pooled)"
        )));
    }
    for unit in stage.unit.iter() {
        if unit.artifact.as_os_str().is_empty() {
            return Err(StagehandError::ConfigError(format!(
                "stage '{name}' has a unit with an empty artifact path"
            )));
        }
        if unit.kind == UnitKind::Pool {
            return Err(StagehandError::ConfigError(format!(
                "stage '{name}': pool units are generated from `pools`, not declared ({:?})",
                unit.artifact
            )));
        }
    }
    Ok(())
}
