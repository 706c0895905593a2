#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use stagehand::config::{
    ConfigFile, ConfigSection, GroupSpec, ItemSpec, RawConfigFile, StageConfig, UnitSpec,
};
use stagehand::types::UnitKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.config.config.jobs = jobs;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            stage: StageConfig {
                after: vec![],
                cmd: cmd.to_string(),
                merge_cmd: None,
                aux: vec![],
                checksum: false,
                unit: vec![],
                pools: None,
                item: vec![],
                group: vec![],
                pool_artifact: None,
                merge_artifact: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn merge_cmd(mut self, cmd: &str) -> Self {
        self.stage.merge_cmd = Some(cmd.to_string());
        self
    }

    pub fn aux(mut self, template: &str) -> Self {
        self.stage.aux.push(template.to_string());
        self
    }

    pub fn checksum(mut self) -> Self {
        self.stage.checksum = true;
        self
    }

    pub fn unit(mut self, artifact: &str, group: &str, kind: UnitKind, inputs: &[&str]) -> Self {
        self.stage.unit.push(UnitSpec {
            artifact: PathBuf::from(artifact),
            group: group.to_string(),
            kind,
            inputs: inputs.iter().map(PathBuf::from).collect(),
        });
        self
    }

    pub fn leaf(self, artifact: &str, group: &str, inputs: &[&str]) -> Self {
        self.unit(artifact, group, UnitKind::Leaf, inputs)
    }

    pub fn merge(self, artifact: &str, group: &str) -> Self {
        self.unit(artifact, group, UnitKind::Merge, &[])
    }

    /// Make this a pooled stage with `pools` pools.
    pub fn pooled(mut self, pools: usize, pool_artifact: &str) -> Self {
        self.stage.pools = Some(pools);
        self.stage.pool_artifact = Some(pool_artifact.to_string());
        self
    }

    pub fn merge_artifact(mut self, template: &str) -> Self {
        self.stage.merge_artifact = Some(template.to_string());
        self
    }

    pub fn item(mut self, name: &str, weight: u64) -> Self {
        self.stage.item.push(ItemSpec {
            name: name.to_string(),
            weight,
        });
        self
    }

    pub fn group(mut self, key: &str, inputs: &[&str]) -> Self {
        self.stage.group.push(GroupSpec {
            key: key.to_string(),
            inputs: inputs.iter().map(PathBuf::from).collect(),
        });
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}
