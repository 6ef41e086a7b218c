//! LS-021: Pulumi YAML emitter.

use super::{prepare, rename_keys, Backend};
use crate::backends::Document;
use crate::core::compiler::Graph;
use crate::core::error::EmitError;
use crate::core::reference::{self, ReferencePlaceholder};
use crate::core::types::{DeletionPolicy, Properties, ResourceKind, ResourceNode};
use serde_json::{json, Map, Value};

/// Pulumi resource type token of a kind.
pub fn resource_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Provider => "pulumi:providers:databricks",
        ResourceKind::Catalog => "databricks:Catalog",
        ResourceKind::Schema => "databricks:Schema",
        ResourceKind::Table => "databricks:SqlTable",
        ResourceKind::Volume => "databricks:Volume",
        ResourceKind::Grants => "databricks:Grants",
        ResourceKind::Notebook => "databricks:Notebook",
        ResourceKind::WorkspaceFile => "databricks:WorkspaceFile",
        ResourceKind::Permissions => "databricks:Permissions",
        ResourceKind::Job => "databricks:Job",
        ResourceKind::DltPipeline => "databricks:Pipeline",
        ResourceKind::Group => "databricks:Group",
        ResourceKind::User => "databricks:User",
        ResourceKind::ServicePrincipal => "databricks:ServicePrincipal",
        ResourceKind::GroupMember => "databricks:GroupMember",
        ResourceKind::UserRole => "databricks:UserRole",
        ResourceKind::ServicePrincipalRole => "databricks:ServicePrincipalRole",
        ResourceKind::Warehouse => "databricks:SqlEndpoint",
        ResourceKind::VectorSearchEndpoint => "databricks:VectorSearchEndpoint",
    }
}

/// `snake_case` → `camelCase`.
pub fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' && !out.is_empty() {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `${<id>.<attribute>}`, or `${<id>}` for a bare reference.
fn render_reference(p: &ReferencePlaceholder) -> String {
    match &p.attribute {
        Some(attr) => format!("${{{}.{}}}", p.resource, camel_case(attr)),
        None => format!("${{{}}}", p.resource),
    }
}

fn properties(resource: &ResourceNode) -> Result<Value, EmitError> {
    let props: Properties = prepare(resource, Backend::Pulumi)?;
    let rewritten = reference::rewrite(&Value::Object(props), &render_reference);
    Ok(rename_keys(rewritten, &camel_case))
}

fn options(graph: &Graph, resource: &ResourceNode) -> Map<String, Value> {
    let mut options = Map::new();
    if let Some(provider) = &resource.provider_ref {
        options.insert("provider".to_string(), json!(format!("${{{}}}", provider)));
    }
    let hints: Vec<Value> = graph
        .ordering_hints(&resource.id)
        .into_iter()
        .map(|id| json!(format!("${{{}}}", id)))
        .collect();
    if !hints.is_empty() {
        options.insert("dependsOn".to_string(), Value::Array(hints));
    }
    if resource.kind != ResourceKind::Provider && resource.delete_before_replace {
        options.insert("deleteBeforeReplace".to_string(), json!(true));
    }
    if resource.deletion_policy == DeletionPolicy::Retain {
        options.insert("retainOnDelete".to_string(), json!(true));
    }
    options
}

/// Emit a Pulumi YAML program.
pub fn emit(graph: &Graph) -> Result<Document, EmitError> {
    let mut resources = Map::new();
    for resource in &graph.resources {
        let mut entry = Map::new();
        entry.insert("type".to_string(), json!(resource_type(resource.kind)));
        let props = properties(resource)?;
        if props.as_object().is_some_and(|m| !m.is_empty()) {
            entry.insert("properties".to_string(), props);
        }
        let options = options(graph, resource);
        if !options.is_empty() {
            entry.insert("options".to_string(), Value::Object(options));
        }
        resources.insert(resource.id.clone(), Value::Object(entry));
    }

    let mut body = Map::new();
    body.insert("name".to_string(), json!(graph.name));
    body.insert("runtime".to_string(), json!("yaml"));
    if let Some(description) = &graph.description {
        body.insert("description".to_string(), json!(description));
    }
    body.insert("config".to_string(), json!(graph.config));
    body.insert("variables".to_string(), json!(graph.variables));
    body.insert("resources".to_string(), Value::Object(resources));
    body.insert("outputs".to_string(), json!({}));

    Ok(Document {
        backend: Backend::Pulumi,
        body: Value::Object(body),
    })
}
