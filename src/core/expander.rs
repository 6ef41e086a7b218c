//! LS-005: Resource expansion.
//!
//! Each declaration expands into an ordered list of resources: the primary
//! first, then its auxiliaries, then nested declarations. Ids are derived
//! from the declaration's logical path, so equal input expands identically.

use super::error::CompileError;
use super::pipeline::{Pipeline, PipelineGraph};
use super::reference;
use super::types::{Properties, ResourceKind, ResourceNode, ResourceOptions, Settings, Stack};
use crate::resources::{
    catalog::Catalog,
    compute::{SqlWarehouse, VectorSearchEndpoint},
    identity::{Group, ServicePrincipal, User},
    job::Job,
    workspace::{Notebook, WorkspaceFile},
};
use serde::Serialize;

/// Leading delimiters are stripped at most this many times. Paths nested
/// deeper than this keep a leading `-`.
pub const MAX_KEY_STRIP_PASSES: usize = 5;

/// Key derived from a logical path.
///
/// Path separators and punctuation become `-`; leading `-` is stripped
/// up to [`MAX_KEY_STRIP_PASSES`] times.
pub fn resource_key(path: &str) -> String {
    let mut key: String = path
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    for _ in 0..MAX_KEY_STRIP_PASSES {
        if let Some(rest) = key.strip_prefix('-') {
            key = rest.to_string();
        }
    }
    key
}

/// Id of a declaration: the explicit override, else `<prefix>-<key(path)>`.
pub fn resource_id(explicit: Option<&str>, prefix: &str, path: &str) -> String {
    match explicit {
        Some(name) => name.to_string(),
        None => format!("{}-{}", prefix, resource_key(path)),
    }
}

/// Serialize a declaration into properties, dropping authoring-only keys.
pub fn to_properties<T: Serialize>(id: &str, value: &T) -> Result<Properties, CompileError> {
    let value = serde_json::to_value(value)
        .map_err(|e| CompileError::invalid(id, format!("cannot serialize: {}", e)))?;
    match value {
        serde_json::Value::Object(mut map) => {
            map.shift_remove("resource_name");
            map.shift_remove("options");
            map.retain(|_, v| !v.is_null());
            Ok(map)
        }
        _ => Err(CompileError::invalid(id, "declaration is not a mapping")),
    }
}

/// Immutable inputs shared by every expansion call.
#[derive(Debug, Clone)]
pub struct ExpandContext<'a> {
    pub settings: &'a Settings,
    pub default_provider: Option<String>,
}

impl<'a> ExpandContext<'a> {
    pub fn new(settings: &'a Settings, default_provider: Option<String>) -> Self {
        Self {
            settings,
            default_provider,
        }
    }

    /// Primary resource carrying the declaration's options.
    pub fn primary(
        &self,
        id: String,
        kind: ResourceKind,
        properties: Properties,
        options: &ResourceOptions,
    ) -> ResourceNode {
        ResourceNode {
            id,
            kind,
            properties,
            provider_ref: options
                .provider
                .as_deref()
                .map(reference::normalize_id)
                .or_else(|| self.default_provider.clone()),
            depends_on: options
                .depends_on
                .iter()
                .map(|d| reference::normalize_id(d))
                .collect(),
            owner: None,
            deletion_policy: options.deletion_policy,
            delete_before_replace: options
                .delete_before_replace
                .unwrap_or(self.settings.delete_before_replace),
        }
    }
}

/// Capability shared by every top-level declaration kind.
pub trait Expand {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError>;
}

/// Closed set of top-level declarations, in expansion order.
#[derive(Debug, Clone, Copy)]
pub enum Declaration<'a> {
    Group(&'a Group),
    User(&'a User),
    ServicePrincipal(&'a ServicePrincipal),
    Catalog(&'a Catalog),
    Warehouse(&'a SqlWarehouse),
    VectorSearchEndpoint(&'a VectorSearchEndpoint),
    Notebook(&'a Notebook),
    WorkspaceFile(&'a WorkspaceFile),
    Pipeline(&'a Pipeline),
    Job(&'a Job),
}

impl Declaration<'_> {
    pub fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        match self {
            Self::Group(d) => d.expand(ctx),
            Self::User(d) => d.expand(ctx),
            Self::ServicePrincipal(d) => d.expand(ctx),
            Self::Catalog(d) => d.expand(ctx),
            Self::Warehouse(d) => d.expand(ctx),
            Self::VectorSearchEndpoint(d) => d.expand(ctx),
            Self::Notebook(d) => d.expand(ctx),
            Self::WorkspaceFile(d) => d.expand(ctx),
            Self::Pipeline(d) => d.expand(ctx),
            Self::Job(d) => d.expand(ctx),
        }
    }
}

/// All top-level declarations of a stack in expansion order.
pub fn declarations(stack: &Stack) -> Vec<Declaration<'_>> {
    let r = &stack.resources;
    let mut out = Vec::with_capacity(r.len());
    out.extend(r.groups.iter().map(Declaration::Group));
    out.extend(r.users.iter().map(Declaration::User));
    out.extend(r.service_principals.iter().map(Declaration::ServicePrincipal));
    out.extend(r.catalogs.iter().map(Declaration::Catalog));
    out.extend(r.warehouses.iter().map(Declaration::Warehouse));
    out.extend(r.vector_search_endpoints.iter().map(Declaration::VectorSearchEndpoint));
    out.extend(r.notebooks.iter().map(Declaration::Notebook));
    out.extend(r.workspace_files.iter().map(Declaration::WorkspaceFile));
    out.extend(r.pipelines.iter().map(Declaration::Pipeline));
    out.extend(r.jobs.iter().map(Declaration::Job));
    out
}

/// Flat expansion of a whole stack.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub resources: Vec<ResourceNode>,
    pub pipelines: Vec<PipelineGraph>,
}

/// Expand providers and every declaration, in order.
pub fn expand_stack(stack: &Stack) -> Result<Expansion, CompileError> {
    let ctx = ExpandContext::new(&stack.settings, stack.default_provider());
    let mut resources = Vec::new();
    let mut pipelines = Vec::new();

    for (name, binding) in &stack.providers {
        check_addressable(name)?;
        let mut properties = Properties::new();
        for (k, v) in &binding.arguments {
            properties.insert(k.clone(), v.clone());
        }
        resources.push(ResourceNode {
            id: name.clone(),
            kind: ResourceKind::Provider,
            properties,
            provider_ref: None,
            depends_on: Vec::new(),
            owner: None,
            deletion_policy: Default::default(),
            delete_before_replace: stack.settings.delete_before_replace,
        });
    }

    for decl in declarations(stack) {
        let expanded = match decl {
            Declaration::Pipeline(p) => {
                let graph = PipelineGraph::build(p, &stack.settings)?;
                let expanded = p.expand_with(&graph, &ctx)?;
                pipelines.push(graph);
                expanded
            }
            other => other.expand(&ctx)?,
        };
        for resource in &expanded {
            check_addressable(&resource.id)?;
        }
        if let Some(primary) = expanded.first() {
            tracing::debug!(
                id = %primary.id,
                kind = %primary.kind,
                count = expanded.len(),
                "expanded declaration"
            );
        }
        resources.extend(expanded);
    }

    Ok(Expansion {
        resources,
        pipelines,
    })
}

/// Ids end up inside `${resources.<id>...}` placeholders and backend addresses.
fn check_addressable(id: &str) -> Result<(), CompileError> {
    if reference::is_addressable(id) {
        return Ok(());
    }
    Err(CompileError::invalid(
        id,
        "resource id may only contain ASCII letters, digits, '_' and '-'",
    ))
}
