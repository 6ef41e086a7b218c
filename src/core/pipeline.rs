//! LS-006: Pipeline node graph, sink-to-source transform, task derivation.
//!
//! A pipeline is an ordered list of nodes. A node reads from an external
//! event source, an external table, or the sink of another node, and may
//! join further sources. Node-to-node reads become upstream edges; the
//! resulting graph must be acyclic. The orchestrator picks how the graph
//! runs: one continuous pipeline, or one job task per node.

use super::error::CompileError;
use super::resolver::stable_toposort;
use super::types::{default_true, ResourceOptions, Settings, Warehouse};
use crate::resources::access::AccessControl;
use crate::resources::job::{Cluster, JobTask, NotebookTask, TaskDependency};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

// ============================================================================
// Declarations
// ============================================================================

/// Data pipeline declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Execution strategy
    #[serde(default)]
    pub orchestrator: Orchestrator,

    /// Default catalog for node sinks
    #[serde(default)]
    pub catalog: Option<String>,

    /// Default schema for node sinks
    #[serde(default)]
    pub target: Option<String>,

    /// Nodes, in declaration order
    #[serde(default)]
    pub nodes: Vec<PipelineNode>,

    /// Access granted on the pipeline and its configuration file
    #[serde(default)]
    pub access_controls: Vec<AccessControl>,

    /// Whether a node may read from a node declared after it
    #[serde(default = "default_true")]
    pub allow_forward_references: bool,

    #[serde(default)]
    pub resource_name: Option<String>,

    #[serde(default)]
    pub options: ResourceOptions,
}

/// How a pipeline is executed. Chosen by configuration, never by node content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Orchestrator {
    #[serde(rename = "DLT")]
    Dlt(DltOrchestrator),
    #[serde(rename = "DATABRICKS_JOB")]
    DatabricksJob(JobOrchestrator),
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::Dlt(DltOrchestrator::default())
    }
}

impl Orchestrator {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Dlt(_) => ExecutionMode::Continuous,
            Self::DatabricksJob(_) => ExecutionMode::Discrete,
        }
    }
}

/// Continuous pipeline attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DltOrchestrator {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub development: Option<bool>,
    #[serde(default)]
    pub continuous: Option<bool>,
    #[serde(default)]
    pub photon: Option<bool>,
    #[serde(default)]
    pub serverless: Option<bool>,
    #[serde(default)]
    pub edition: Option<String>,
    #[serde(default)]
    pub clusters: Vec<Value>,
    #[serde(default)]
    pub configuration: IndexMap<String, String>,
    #[serde(default)]
    pub notifications: Vec<Value>,
}

/// Discrete job attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOrchestrator {
    /// Job name (defaults to `job-<pipeline name>`)
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    /// Cluster running every node task (defaults to the first cluster)
    #[serde(default)]
    pub job_cluster_key: Option<String>,
    #[serde(default)]
    pub access_controls: Vec<AccessControl>,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    #[serde(default)]
    pub schedule: Option<Value>,
    #[serde(default)]
    pub max_concurrent_runs: Option<u32>,
}

impl JobOrchestrator {
    pub fn cluster_key(&self) -> Option<&str> {
        self.job_cluster_key
            .as_deref()
            .or_else(|| self.clusters.first().map(|c| c.name.as_str()))
    }
}

/// Execution strategy of a compiled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One long-running pipeline resource
    Continuous,
    /// One job task per node
    Discrete,
}

impl ExecutionMode {
    /// Read strategy used by the runner for this mode.
    pub fn read_context(self) -> ReadContext {
        match self {
            Self::Continuous => ReadContext::Engine,
            Self::Discrete => ReadContext::Standalone,
        }
    }
}

/// Where node reads execute. Selected once per pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadContext {
    /// Inside the pipeline engine: sibling tables are addressed by name
    Engine,
    /// Plain job: every table is addressed by its full name
    Standalone,
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineNode {
    pub name: String,

    pub source: DataSource,

    /// Additional sources joined into the main one
    #[serde(default)]
    pub joins: Vec<Join>,

    #[serde(default)]
    pub sink: Option<TableSink>,

    /// Medallion layer (BRONZE, SILVER, GOLD)
    #[serde(default)]
    pub layer: Option<String>,

    /// Transformation chain, passed through to the runner untouched
    #[serde(default)]
    pub transformer: Option<Value>,
}

/// Join of another source into a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub other: DataSource,
    #[serde(default)]
    pub on: Vec<String>,
    #[serde(default)]
    pub how: Option<String>,
}

/// Declared input of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSource {
    Node(NodeSource),
    Table(TableSource),
    Event(EventSource),
}

/// Reads the sink of another node in the same pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSource {
    pub node_name: String,
    #[serde(default)]
    pub as_stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selects: Option<Vec<String>>,
}

/// Reads a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    pub table_name: String,
    #[serde(default)]
    pub warehouse: Warehouse,
    #[serde(default)]
    pub as_stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selects: Option<Vec<String>>,
}

impl TableSource {
    /// `catalog.schema.table`, skipping absent parts.
    pub fn full_name(&self) -> String {
        [
            self.catalog_name.as_deref(),
            self.schema_name.as_deref(),
            Some(self.table_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(".")
    }

    /// Name the runner reads. Tables produced inside the same continuous
    /// pipeline are addressed by bare name.
    pub fn read_target(&self, ctx: ReadContext, produced_in_pipeline: bool) -> String {
        match ctx {
            ReadContext::Engine if produced_in_pipeline => self.table_name.clone(),
            _ => self.full_name(),
        }
    }
}

/// Raw event files landed by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    /// Event name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// Root of all events (defaults to `<landing_root>events/`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub as_stream: bool,
}

impl EventSource {
    /// `<events_root><producer>/<name>/`
    pub fn dirpath(&self, settings: &Settings) -> String {
        let root = self
            .events_root
            .clone()
            .unwrap_or_else(|| format!("{}events/", settings.landing_root));
        let producer = self
            .producer
            .as_deref()
            .map(|p| format!("{}/", p))
            .unwrap_or_default();
        format!("{}{}{}/", root, producer, self.name)
    }
}

/// Write mode of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteMode {
    Append,
    Overwrite,
    Merge,
}

/// Output table of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WriteMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub write_options: IndexMap<String, String>,
}

impl TableSink {
    /// Copy with missing catalog/schema taken from the pipeline defaults.
    pub fn with_defaults(&self, catalog: Option<&str>, schema: Option<&str>) -> TableSink {
        TableSink {
            catalog_name: self
                .catalog_name
                .clone()
                .or_else(|| catalog.map(str::to_string)),
            schema_name: self
                .schema_name
                .clone()
                .or_else(|| schema.map(str::to_string)),
            ..self.clone()
        }
    }

    /// Source reading this sink's table.
    ///
    /// Keeps the table identity, takes read options from `reader`, assigns
    /// `warehouse`, and drops every write-only field.
    pub fn as_source(&self, reader: &NodeSource, warehouse: Warehouse) -> Result<TableSource, String> {
        let table_name = match self.table_name.as_deref() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err("sink has no table_name".to_string()),
        };
        let schema_name = match self.schema_name.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Err(format!("sink '{}' has no schema_name", table_name)),
        };
        Ok(TableSource {
            catalog_name: self.catalog_name.clone(),
            schema_name: Some(schema_name),
            table_name,
            warehouse,
            as_stream: reader.as_stream,
            filter: reader.filter.clone(),
            selects: reader.selects.clone(),
        })
    }
}

// ============================================================================
// Resolved graph
// ============================================================================

/// Source after node references are replaced by table sources.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedSource {
    Event(EventSource),
    Table {
        source: TableSource,
        /// Produced by a node of the same pipeline
        internal: bool,
    },
}

impl ResolvedSource {
    fn describe(&self, ctx: ReadContext, settings: &Settings) -> Value {
        match self {
            Self::Event(e) => {
                let mut v = json!({"type": "event"});
                merge_into(&mut v, e);
                v["dirpath"] = json!(e.dirpath(settings));
                v
            }
            Self::Table { source, internal } => {
                let mut v = json!({"type": "table"});
                merge_into(&mut v, source);
                v["read_target"] = json!(source.read_target(ctx, *internal));
                v
            }
        }
    }
}

fn merge_into<T: Serialize>(target: &mut Value, value: &T) {
    if let (Some(t), Ok(Value::Object(map))) = (target.as_object_mut(), serde_json::to_value(value)) {
        t.extend(map);
    }
}

/// Join with its resolved source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJoin {
    pub other: ResolvedSource,
    pub on: Vec<String>,
    pub how: Option<String>,
}

/// Node with computed upstream set and resolved inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub name: String,
    /// Nodes whose sink feeds this node, source first then joins
    pub upstream: Vec<String>,
    pub source: ResolvedSource,
    pub joins: Vec<ResolvedJoin>,
    /// Sink with pipeline defaults applied
    pub sink: Option<TableSink>,
    pub layer: Option<String>,
    pub transformer: Option<Value>,
}

/// Acyclic node graph of one pipeline, nodes in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineGraph {
    pub name: String,
    pub mode: ExecutionMode,
    pub nodes: Vec<ResolvedNode>,
    settings: Settings,
}

impl PipelineGraph {
    /// Resolve sources, check acyclicity, derive table sources from sinks.
    pub fn build(pipeline: &Pipeline, settings: &Settings) -> Result<Self, CompileError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, node) in pipeline.nodes.iter().enumerate() {
            if node.name.is_empty() {
                return Err(CompileError::invalid(
                    &pipeline.name,
                    format!("node {} has an empty name", i),
                ));
            }
            if index.insert(node.name.as_str(), i).is_some() {
                return Err(CompileError::DuplicateNodeName {
                    pipeline: pipeline.name.clone(),
                    node: node.name.clone(),
                });
            }
        }

        // Upstream indices per node, source first then joins.
        let mut upstream: Vec<Vec<usize>> = vec![Vec::new(); pipeline.nodes.len()];
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for (i, node) in pipeline.nodes.iter().enumerate() {
            for (path, source) in node_inputs(node) {
                let DataSource::Node(ns) = source else {
                    continue;
                };
                let j = match index.get(ns.node_name.as_str()) {
                    Some(&j) if j <= i || pipeline.allow_forward_references => j,
                    _ => {
                        return Err(CompileError::UnresolvedReference {
                            resource: pipeline.name.clone(),
                            path: format!("nodes.{}.{}.node_name", node.name, path),
                            target: ns.node_name.clone(),
                        })
                    }
                };
                if !upstream[i].contains(&j) {
                    upstream[i].push(j);
                    pairs.push((i, j));
                }
            }
        }

        let order = stable_toposort(pipeline.nodes.len(), &pairs).map_err(|cycle| {
            CompileError::CyclicDependency {
                graph: format!("pipeline '{}'", pipeline.name),
                ids: cycle
                    .into_iter()
                    .map(|i| pipeline.nodes[i].name.clone())
                    .collect(),
            }
        })?;

        let sinks: Vec<Option<TableSink>> = pipeline
            .nodes
            .iter()
            .map(|n| {
                n.sink
                    .as_ref()
                    .map(|s| s.with_defaults(pipeline.catalog.as_deref(), pipeline.target.as_deref()))
            })
            .collect();

        let resolve = |source: &DataSource| -> Result<ResolvedSource, CompileError> {
            match source {
                DataSource::Event(e) => Ok(ResolvedSource::Event(e.clone())),
                DataSource::Table(t) => Ok(ResolvedSource::Table {
                    source: t.clone(),
                    internal: false,
                }),
                DataSource::Node(ns) => {
                    // Index existence was checked above.
                    let j = index.get(ns.node_name.as_str()).copied().unwrap_or_default();
                    let transform_err = |reason: String| CompileError::SinkSourceTransform {
                        pipeline: pipeline.name.clone(),
                        node: ns.node_name.clone(),
                        reason,
                    };
                    let sink = sinks[j]
                        .as_ref()
                        .ok_or_else(|| transform_err("node has no sink".to_string()))?;
                    let source = sink
                        .as_source(ns, settings.default_warehouse)
                        .map_err(transform_err)?;
                    Ok(ResolvedSource::Table {
                        source,
                        internal: true,
                    })
                }
            }
        };

        let mut nodes = Vec::with_capacity(order.len());
        for i in order {
            let node = &pipeline.nodes[i];
            let joins = node
                .joins
                .iter()
                .map(|j| {
                    Ok(ResolvedJoin {
                        other: resolve(&j.other)?,
                        on: j.on.clone(),
                        how: j.how.clone(),
                    })
                })
                .collect::<Result<Vec<_>, CompileError>>()?;
            nodes.push(ResolvedNode {
                name: node.name.clone(),
                upstream: upstream[i]
                    .iter()
                    .map(|&j| pipeline.nodes[j].name.clone())
                    .collect(),
                source: resolve(&node.source)?,
                joins,
                sink: sinks[i].clone(),
                layer: node.layer.clone(),
                transformer: node.transformer.clone(),
            });
        }

        tracing::debug!(pipeline = %pipeline.name, nodes = nodes.len(), "resolved pipeline nodes");
        Ok(Self {
            name: pipeline.name.clone(),
            mode: pipeline.orchestrator.mode(),
            nodes,
            settings: settings.clone(),
        })
    }

    pub fn node(&self, name: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Library entries of the continuous pipeline resource.
    pub fn library_entries(&self) -> Vec<Value> {
        vec![json!({"notebook": {"path": self.settings.dlt_runner_path()}})]
    }

    /// One task per node, in execution order.
    ///
    /// Every task runs the shared job runner with a single `node_name`
    /// parameter; its dependencies are the tasks of its upstream nodes.
    pub fn tasks(&self, cluster_key: Option<&str>) -> Vec<JobTask> {
        let runner = self.settings.job_runner_path();
        self.nodes
            .iter()
            .map(|n| JobTask {
                task_key: task_key(&n.name),
                depends_ons: n
                    .upstream
                    .iter()
                    .map(|u| TaskDependency {
                        task_key: task_key(u),
                    })
                    .collect(),
                job_cluster_key: cluster_key.map(str::to_string),
                notebook_task: Some(NotebookTask {
                    notebook_path: runner.clone(),
                    base_parameters: IndexMap::from([("node_name".to_string(), n.name.clone())]),
                }),
                ..JobTask::default()
            })
            .collect()
    }

    /// Configuration document read by the runner notebooks.
    pub fn config_document(&self) -> Value {
        let ctx = self.mode.read_context();
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|n| {
                let mut v = json!({
                    "name": n.name,
                    "upstream": n.upstream,
                    "source": n.source.describe(ctx, &self.settings),
                });
                if !n.joins.is_empty() {
                    v["joins"] = Value::Array(
                        n.joins
                            .iter()
                            .map(|j| {
                                json!({
                                    "other": j.other.describe(ctx, &self.settings),
                                    "on": j.on,
                                    "how": j.how.as_deref().unwrap_or("left"),
                                })
                            })
                            .collect(),
                    );
                }
                if let Some(sink) = &n.sink {
                    v["sink"] = json!(sink);
                }
                if let Some(layer) = &n.layer {
                    v["layer"] = json!(layer);
                }
                if let Some(t) = &n.transformer {
                    v["transformer"] = t.clone();
                }
                v
            })
            .collect();
        json!({
            "name": self.name,
            "mode": self.mode,
            "nodes": nodes,
        })
    }
}

/// Task key of a node.
pub fn task_key(node_name: &str) -> String {
    format!("node-{}", node_name)
}

fn node_inputs(node: &PipelineNode) -> Vec<(String, &DataSource)> {
    let mut inputs = vec![("source".to_string(), &node.source)];
    for (k, j) in node.joins.iter().enumerate() {
        inputs.push((format!("joins[{}].other", k), &j.other));
    }
    inputs
}
