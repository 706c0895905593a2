#![allow(dead_code)]

use stagehand::config::ConfigFile;
use stagehand::fs::mock::MockFileSystem;
use stagehand_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder};

/// `map` stage: two leaves and one merge per group.
/// `call` stage: pooled over three contigs, one merge per group.
pub fn pipeline(groups: &[&str]) -> ConfigFile {
    let mut map = StageConfigBuilder::new("map {inputs} -o {output}")
        .merge_cmd("merge {inputs} -o {output}")
        .aux("{output}.log");
    let mut call = StageConfigBuilder::new("call {members} {inputs} -o {output}")
        .merge_cmd("concat {inputs} -o {output}")
        .after("map")
        .pooled(2, "call/{group}/{group}_{pool}.bcf")
        .merge_artifact("call/{group}.bcf")
        .item("chr1", 10)
        .item("chr2", 4)
        .item("chrM", 1);

    for g in groups {
        map = map
            .leaf(&format!("map/{g}/l1.bam"), g, &[format!("reads/{g}_1.fq").as_str()])
            .leaf(&format!("map/{g}/l2.bam"), g, &[format!("reads/{g}_2.fq").as_str()])
            .merge(&format!("map/{g}/{g}.bam"), g);
        call = call.group(g, &[format!("map/{g}/{g}.bam").as_str()]);
    }

    ConfigFileBuilder::new()
        .with_stage("map", map.build())
        .with_stage("call", call.build())
        .build()
}

/// Put the raw reads every `map` leaf needs on the fake disk.
pub fn seed_reads(fs: &MockFileSystem, groups: &[&str]) {
    for g in groups {
        fs.add_file(format!("reads/{g}_1.fq"), "@r1");
        fs.add_file(format!("reads/{g}_2.fq"), "@r2");
    }
}
