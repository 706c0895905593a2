// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::UnitKind;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// db_file = ".stagehand/stagehand.db"
/// jobs = 2
///
/// [stage.index]
/// cmd = "gem-indexer -i {inputs} -o {output}"
///
/// [[stage.index.unit]]
/// artifact = "ref/genome.gem"
/// group = "reference"
/// kind = "index"
/// inputs = ["ref/genome.fa"]
///
/// [stage.map]
/// after = ["index"]
/// cmd = "gem-mapper {inputs} -o {output}"
/// merge_cmd = "samtools merge {output} {inputs}"
///
/// [[stage.map.unit]]
/// artifact = "map/s1/lane1.bam"
/// group = "s1"
/// inputs = ["reads/lane1.fq.gz"]
///
/// [[stage.map.unit]]
/// artifact = "map/s1/s1.bam"
/// group = "s1"
/// kind = "merge"
/// ```
///
/// This is the unchecked form; [`ConfigFile`] is obtained through
/// `ConfigFile::try_from`, which runs validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All stages from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,
}

/// A validated configuration. Construct via `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub stage: BTreeMap<String, StageConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        stage: BTreeMap<String, StageConfig>,
    ) -> Self {
        Self { config, stage }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Location of the shared store. Every concurrently running instance
    /// must point at the same file on a filesystem with working locks.
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,

    /// Number of groups processed in parallel within one process.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Retire (and delete) leaf outputs once their merge has succeeded.
    #[serde(default)]
    pub remove_consumed: bool,

    /// How long to wait for another process's exclusive store lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_db_file() -> PathBuf {
    PathBuf::from(".stagehand/stagehand.db")
}

fn default_jobs() -> usize {
    1
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
            jobs: default_jobs(),
            remove_consumed: false,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// `[stage.<name>]` section.
///
/// A stage either declares its units explicitly (`[[stage.<name>.unit]]`)
/// or is *pooled*: `pools`, `item` and `group` entries are expanded into one
/// pool unit per group and pool plus one merge per group.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Upstream stages whose units must be complete first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Command template for leaf-like units.
    pub cmd: String,

    /// Command template for merge units; falls back to `cmd`.
    #[serde(default)]
    pub merge_cmd: Option<String>,

    /// Auxiliary output templates (logs, indices) created next to each
    /// artifact. They are guard files for crash recovery.
    #[serde(default)]
    pub aux: Vec<String>,

    /// Write a `<artifact>.b3` checksum sidecar after each success.
    #[serde(default)]
    pub checksum: bool,

    #[serde(default)]
    pub unit: Vec<UnitSpec>,

    /// Target pool count; makes this a pooled stage.
    #[serde(default)]
    pub pools: Option<usize>,

    #[serde(default)]
    pub item: Vec<ItemSpec>,

    #[serde(default)]
    pub group: Vec<GroupSpec>,

    /// Artifact template for pool units, e.g. `call/{group}/{group}_{pool}.bcf`.
    #[serde(default)]
    pub pool_artifact: Option<String>,

    /// Artifact template for the per-group merge of a pooled stage.
    /// Without it, pooled groups have no merge unit.
    #[serde(default)]
    pub merge_artifact: Option<String>,
}

impl StageConfig {
    pub fn is_pooled(&self) -> bool {
        self.pools.is_some()
    }

    pub fn effective_merge_cmd(&self) -> &str {
        self.merge_cmd.as_deref().unwrap_or(&self.cmd)
    }
}

/// An explicitly declared work unit.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitSpec {
    pub artifact: PathBuf,

    #[serde(default)]
    pub group: String,

    #[serde(default = "default_unit_kind")]
    pub kind: UnitKind,

    #[serde(default)]
    pub inputs: Vec<PathBuf>,
}

fn default_unit_kind() -> UnitKind {
    UnitKind::Leaf
}

/// A weighted item of a pooled stage (e.g. a contig and its length).
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    pub weight: u64,
}

/// A group of a pooled stage and the inputs every pool of it reads.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSpec {
    pub key: String,

    #[serde(default)]
    pub inputs: Vec<PathBuf>,
}
