//! LS-020: Backend emission — dispatch to one emitter per target format.
//!
//! Emitters are pure functions of a compiled [`Graph`]. Each applies the
//! kind's field rules, rewrites reference placeholders into native syntax,
//! and attaches provider, ordering, and deletion metadata.

pub mod pulumi;
pub mod terraform;

use crate::core::compiler::{Graph, Stage};
use crate::core::error::EmitError;
use crate::core::hasher::hash_string;
use crate::core::types::{Properties, ResourceKind, ResourceNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Target provisioning format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Pulumi YAML program
    Pulumi,
    /// Terraform JSON configuration
    Terraform,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pulumi => write!(f, "pulumi"),
            Self::Terraform => write!(f, "terraform"),
        }
    }
}

/// Emitted document for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub backend: Backend,
    pub body: Value,
}

impl Document {
    /// Conventional file name of the document.
    pub fn file_name(&self) -> &'static str {
        match self.backend {
            Backend::Pulumi => "Pulumi.yaml",
            Backend::Terraform => "main.tf.json",
        }
    }

    /// Serialized text of the document.
    pub fn render(&self) -> Result<String, EmitError> {
        let render_err = |message: String| EmitError::Render {
            backend: self.backend,
            message,
        };
        match self.backend {
            Backend::Pulumi => {
                serde_yaml_ng::to_string(&self.body).map_err(|e| render_err(e.to_string()))
            }
            Backend::Terraform => serde_json::to_string_pretty(&self.body)
                .map(|s| s + "\n")
                .map_err(|e| render_err(e.to_string())),
        }
    }

    /// BLAKE3 of the rendered text.
    pub fn fingerprint(&self) -> Result<String, EmitError> {
        Ok(hash_string(&self.render()?))
    }
}

/// Emit `graph` for `backend`.
pub fn emit(graph: &Graph, backend: Backend) -> Result<Document, EmitError> {
    let result = match backend {
        Backend::Pulumi => pulumi::emit(graph),
        Backend::Terraform => terraform::emit(graph),
    };
    match &result {
        Ok(_) => tracing::info!(
            stack = %graph.name,
            %backend,
            resources = graph.resources.len(),
            stage = %Stage::Emitted,
            "document emitted"
        ),
        Err(e) => tracing::warn!(stack = %graph.name, %backend, error = %e, "emission failed"),
    }
    result
}

// ============================================================================
// Field rules
// ============================================================================

/// Properties a kind cannot carry on a backend.
fn excluded_fields(kind: ResourceKind, backend: Backend) -> &'static [&'static str] {
    match (kind, backend) {
        // Inferred from the source file extension; only valid with inline content.
        (ResourceKind::Notebook, Backend::Terraform) => &["language"],
        _ => &[],
    }
}

/// Properties a kind must carry on every backend.
fn required_fields(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Provider => &[],
        ResourceKind::Catalog
        | ResourceKind::Schema
        | ResourceKind::Table
        | ResourceKind::Volume
        | ResourceKind::Job
        | ResourceKind::DltPipeline
        | ResourceKind::Warehouse
        | ResourceKind::VectorSearchEndpoint => &["name"],
        ResourceKind::Notebook => &["source", "path"],
        ResourceKind::WorkspaceFile => &["path"],
        ResourceKind::Permissions => &["access_controls"],
        ResourceKind::Grants => &["grants"],
        ResourceKind::Group | ResourceKind::ServicePrincipal => &["display_name"],
        ResourceKind::User => &["user_name"],
        ResourceKind::GroupMember => &["group_id", "member_id"],
        ResourceKind::UserRole => &["user_id", "role"],
        ResourceKind::ServicePrincipalRole => &["service_principal_id", "role"],
    }
}

/// Properties of `resource` after exclusions, checked for required fields.
pub(crate) fn prepare(resource: &ResourceNode, backend: Backend) -> Result<Properties, EmitError> {
    let excluded = excluded_fields(resource.kind, backend);
    let properties: Properties = resource
        .properties
        .iter()
        .filter(|(k, _)| !excluded.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for field in required_fields(resource.kind) {
        if properties.get(*field).is_none_or(Value::is_null) {
            return Err(EmitError::IncompatibleBackendField {
                backend,
                resource: resource.id.clone(),
                kind: resource.kind,
                field: field.to_string(),
            });
        }
    }
    Ok(properties)
}

/// Maps whose keys are user data, not schema fields.
pub(crate) const OPAQUE_MAPS: &[&str] = &[
    "configuration",
    "tags",
    "custom_tags",
    "spark_conf",
    "spark_env_vars",
    "base_parameters",
];

/// Rename every schema key in `value`, leaving keys of opaque maps as-is.
pub(crate) fn rename_keys<F>(value: Value, rename: &F) -> Value
where
    F: Fn(&str) -> String,
{
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = if OPAQUE_MAPS.contains(&k.as_str()) {
                        v
                    } else {
                        rename_keys(v, rename)
                    };
                    (rename(&k), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rename_keys(v, rename)).collect()),
        other => other,
    }
}
