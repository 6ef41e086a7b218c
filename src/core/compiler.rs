//! LS-007: Compilation driver.
//!
//! Runs expansion, uniqueness checks, and dependency resolution in order,
//! producing an immutable [`Graph`]. Any error aborts the whole compilation.

use super::error::CompileError;
use super::expander::expand_stack;
use super::hasher::{composite_hash, hash_string};
use super::pipeline::PipelineGraph;
use super::resolver::{resolve, Edge};
use super::types::{ResourceKind, ResourceNode, Settings, Stack};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Compilation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unexpanded,
    Expanded,
    DependenciesResolved,
    PipelineNodesResolved,
    Emitted,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unexpanded => "unexpanded",
            Self::Expanded => "expanded",
            Self::DependenciesResolved => "dependencies-resolved",
            Self::PipelineNodesResolved => "pipeline-nodes-resolved",
            Self::Emitted => "emitted",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Resolved, dependency-ordered resources of one stack.
#[derive(Debug, Clone, Serialize)]
pub struct Graph {
    pub name: String,
    pub description: Option<String>,
    pub config: IndexMap<String, serde_json::Value>,
    pub variables: IndexMap<String, serde_json::Value>,
    pub settings: Settings,
    /// Resources in provisioning order
    pub resources: Vec<ResourceNode>,
    pub edges: Vec<Edge>,
    #[serde(skip)]
    pub pipelines: Vec<PipelineGraph>,
}

impl Graph {
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineGraph> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Every resource `id` must be provisioned after.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Dependencies a backend must be told about explicitly.
    pub fn ordering_hints(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id && e.is_ordering_hint())
            .map(|e| e.to.as_str())
            .collect()
    }

    pub fn count_by_kind(&self, kind: ResourceKind) -> usize {
        self.resources.iter().filter(|r| r.kind == kind).count()
    }

    /// Hash over every resource in order.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let hashes = self
            .resources
            .iter()
            .map(|r| serde_json::to_string(r).map(|json| hash_string(&json)))
            .collect::<Result<Vec<String>, _>>()?;
        let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
        Ok(composite_hash(&refs))
    }
}

/// Stage bookkeeping with tracing at every transition.
struct Tracker<'a> {
    stack: &'a str,
    stage: Stage,
}

impl<'a> Tracker<'a> {
    fn new(stack: &'a str) -> Self {
        Self {
            stack,
            stage: Stage::Unexpanded,
        }
    }

    fn advance(&mut self, next: Stage, resources: usize) {
        tracing::info!(stack = self.stack, from = %self.stage, to = %next, resources, "stage complete");
        self.stage = next;
    }

    fn fail(&mut self, err: CompileError) -> CompileError {
        tracing::warn!(
            stack = self.stack,
            stage = %self.stage,
            failed_entering = %err.stage(),
            error = %err,
            "compilation failed"
        );
        self.stage = Stage::Failed;
        err
    }
}

/// Compile a stack into a resolved graph.
pub fn compile(stack: &Stack) -> Result<Graph, CompileError> {
    let mut tracker = Tracker::new(&stack.name);

    let expansion = expand_stack(stack).map_err(|e| tracker.fail(e))?;
    tracker.advance(Stage::Expanded, expansion.resources.len());

    check_unique(&expansion.resources).map_err(|e| tracker.fail(e))?;
    let resolution = resolve(&expansion.resources).map_err(|e| tracker.fail(e))?;
    tracker.advance(Stage::DependenciesResolved, expansion.resources.len());

    if !expansion.pipelines.is_empty() {
        tracker.advance(Stage::PipelineNodesResolved, expansion.resources.len());
    }

    let mut slots: Vec<Option<ResourceNode>> = expansion.resources.into_iter().map(Some).collect();
    let resources: Vec<ResourceNode> = resolution
        .order
        .iter()
        .filter_map(|&i| slots[i].take())
        .collect();

    Ok(Graph {
        name: stack.name.clone(),
        description: stack.description.clone(),
        config: stack.config.clone(),
        variables: stack.variables.clone(),
        settings: stack.settings.clone(),
        resources,
        edges: resolution.edges,
        pipelines: expansion.pipelines,
    })
}

fn check_unique(resources: &[ResourceNode]) -> Result<(), CompileError> {
    let mut seen: HashMap<&str, ResourceKind> = HashMap::with_capacity(resources.len());
    for r in resources {
        if let Some(first) = seen.insert(r.id.as_str(), r.kind) {
            return Err(CompileError::DuplicateResourceName {
                id: r.id.clone(),
                first,
                second: r.kind,
            });
        }
    }
    Ok(())
}
