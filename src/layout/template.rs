// src/layout/template.rs

//! `{name}` placeholder expansion for command and artifact templates.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{Result, StagehandError};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Placeholders available to command templates.
pub const COMMAND_VARS: &[&str] = &["output", "inputs", "group", "stage", "pool", "members"];

/// Placeholders available to `pool_artifact` templates.
pub const ARTIFACT_VARS: &[&str] = &["group", "stage", "pool"];

/// Placeholders allowed in a pooled stage's `merge_artifact`.
pub const MERGE_ARTIFACT_VARS: &[&str] = &["group", "stage"];

/// Placeholders available to auxiliary output templates.
pub const AUX_VARS: &[&str] = &["output", "group", "stage"];

/// Names of all placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Fail if `template` uses a placeholder outside `allowed`.
pub fn check(template: &str, allowed: &[&str]) -> Result<()> {
    for name in placeholders(template) {
        if !allowed.contains(&name) {
            return Err(StagehandError::TemplateError(format!(
                "unknown placeholder '{{{name}}}' in template \"{template}\" (allowed: {})",
                allowed.join(", ")
            )));
        }
    }
    Ok(())
}

/// Substitute every placeholder of `template` from `vars`.
pub fn expand(template: &str, vars: &BTreeMap<&str, String>) -> Result<String> {
    let mut missing: Option<String> = None;

    let out = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(StagehandError::TemplateError(format!(
            "no value for placeholder '{{{name}}}' in template \"{template}\""
        ))),
        None => Ok(out.into_owned()),
    }
}
