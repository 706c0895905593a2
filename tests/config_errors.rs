// tests/config_errors.rs

use std::io::Write;

use stagehand::config::{load_and_validate, load_from_str};
use stagehand::errors::StagehandError;
use tempfile::NamedTempFile;

fn load(contents: &str) -> Result<stagehand::config::ConfigFile, StagehandError> {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    load_and_validate(file.path())
}

#[test]
fn stage_cycle_returns_structured_error() {
    let result = load(
        r#"
[stage.A]
cmd = "a"
after = ["B"]
[[stage.A.unit]]
artifact = "a.out"

[stage.B]
cmd = "b"
after = ["A"]
[[stage.B.unit]]
artifact = "b.out"
"#,
    );

    match result {
        Err(StagehandError::StageCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        Err(e) => panic!("Expected StageCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_dependency_returns_config_error() {
    let result = load(
        r#"
[stage.A]
cmd = "a"
after = ["NonExistent"]
[[stage.A.unit]]
artifact = "a.out"
"#,
    );

    match result {
        Err(StagehandError::ConfigError(msg)) => {
            assert!(msg.contains("unknown dependency"));
            assert!(msg.contains("NonExistent"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other.err()),
    }
}

#[test]
fn config_without_stages_is_rejected() {
    assert!(matches!(
        load("[config]\njobs = 2\n"),
        Err(StagehandError::ConfigError(_))
    ));
}

#[test]
fn more_pools_than_items_is_a_partition_error() {
    let result = load_from_str(
        r#"
[stage.call]
cmd = "call {members}"
pools = 3
pool_artifact = "call/{group}_{pool}.bcf"

[[stage.call.item]]
name = "chr1"
weight = 10

[[stage.call.item]]
name = "chr2"
weight = 5

[[stage.call.group]]
key = "s1"
"#,
    );
    assert!(matches!(result, Err(StagehandError::PartitionError(_))));
}

#[test]
fn unknown_placeholder_is_a_template_error() {
    let result = load_from_str(
        r#"
[stage.map]
cmd = "map {reads} -o {output}"
[[stage.map.unit]]
artifact = "m.bam"
"#,
    );
    match result {
        Err(StagehandError::TemplateError(msg)) => assert!(msg.contains("{reads}")),
        other => panic!("Expected TemplateError, got: {:?}", other.err()),
    }
}

#[test]
fn pool_artifact_must_name_group_and_pool() {
    let result = load_from_str(
        r#"
[stage.call]
cmd = "call"
pools = 1
pool_artifact = "call/{group}.bcf"

[[stage.call.item]]
name = "chr1"
weight = 1

[[stage.call.group]]
key = "s1"
"#,
    );
    assert!(matches!(result, Err(StagehandError::ConfigError(_))));
}

#[test]
fn merge_artifact_cannot_name_a_pool() {
    let result = load_from_str(
        r#"
[stage.call]
cmd = "call"
pools = 1
pool_artifact = "call/{group}_{pool}.bcf"
merge_artifact = "call/{group}_{pool}.bcf"

[[stage.call.item]]
name = "chr1"
weight = 1

[[stage.call.group]]
key = "s1"
"#,
    );
    match result {
        Err(StagehandError::TemplateError(msg)) => assert!(msg.contains("{pool}")),
        other => panic!("Expected TemplateError, got: {:?}", other.err()),
    }
}

#[test]
fn zero_jobs_is_rejected() {
    let result = load_from_str(
        r#"
[config]
jobs = 0

[stage.map]
cmd = "map"
[[stage.map.unit]]
artifact = "m.bam"
"#,
    );
    assert!(matches!(result, Err(StagehandError::ConfigError(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let result = load_and_validate("/definitely/not/here/Stagehand.toml");
    assert!(matches!(result, Err(StagehandError::IoError(_))));
}
