//! LS-008: Stack YAML parsing and structural validation.
//!
//! Structural checks only: settings shape, provider bindings, and
//! per-declaration required fields that serde cannot express. Reference and
//! graph checks belong to compilation.

use super::error::ParseError;
use super::pipeline::Orchestrator;
use super::types::*;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stack file from disk.
pub fn parse_stack_file(path: &Path) -> Result<Stack, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_stack(&content)
}

/// Parse a stack from a string.
pub fn parse_stack(yaml: &str) -> Result<Stack, ParseError> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Validate a parsed stack. Returns a list of errors (empty = valid).
pub fn validate_stack(stack: &Stack) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if stack.name.is_empty() {
        push("name must not be empty".to_string());
    }

    // Settings
    for (field, value) in [
        ("workspace_root", &stack.settings.workspace_root),
        ("landing_root", &stack.settings.landing_root),
    ] {
        if !value.ends_with('/') {
            push(format!("settings.{} must end with '/', got '{}'", field, value));
        }
    }
    if let Some(default) = &stack.settings.default_provider {
        if !stack.providers.contains_key(default) {
            push(format!(
                "settings.default_provider names unknown provider '{}'",
                default
            ));
        }
    }

    // Providers
    for (name, binding) in &stack.providers {
        if binding.plugin != "databricks" {
            push(format!(
                "provider '{}' uses unsupported plugin '{}'",
                name, binding.plugin
            ));
        }
    }

    // Pipelines
    for pipeline in &stack.resources.pipelines {
        if pipeline.name.is_empty() {
            push("pipeline with empty name".to_string());
        }
        for (i, node) in pipeline.nodes.iter().enumerate() {
            if node.name.is_empty() {
                push(format!(
                    "pipeline '{}' node {} has an empty name",
                    pipeline.name, i
                ));
            }
        }
        if let Orchestrator::DatabricksJob(job) = &pipeline.orchestrator {
            if let Some(key) = &job.job_cluster_key {
                if !job.clusters.iter().any(|c| &c.name == key) {
                    push(format!(
                        "pipeline '{}' job_cluster_key '{}' names no cluster",
                        pipeline.name, key
                    ));
                }
            }
        }
    }

    // Declarations whose identity can be empty
    for job in &stack.resources.jobs {
        if job.name.is_empty() {
            push("job with empty name".to_string());
        }
    }
    for notebook in &stack.resources.notebooks {
        if notebook.source.is_empty() {
            push("notebook with empty source".to_string());
        }
    }

    errors
}
