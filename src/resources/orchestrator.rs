//! LS-016: Pipeline resources for each execution strategy.
//!
//! Both strategies upload the pipeline configuration document as a
//! workspace file the runner notebooks read at start-up.

use super::access::{self, AccessControl};
use super::job::{Job, JobParameter};
use crate::core::error::CompileError;
use crate::core::expander::{resource_id, to_properties, Expand, ExpandContext};
use crate::core::pipeline::{DltOrchestrator, JobOrchestrator, Orchestrator, Pipeline, PipelineGraph};
use crate::core::reference::ReferencePlaceholder;
use crate::core::types::{Properties, ResourceKind, ResourceNode, ResourceOptions};
use base64::Engine as _;
use serde_json::{json, Value};

impl Pipeline {
    /// Id of the pipeline's primary resource.
    pub fn resource_id(&self) -> String {
        let prefix = match self.orchestrator {
            Orchestrator::Dlt(_) => "dlt-pipeline",
            Orchestrator::DatabricksJob(_) => "job",
        };
        resource_id(self.resource_name.as_deref(), prefix, &self.name)
    }

    /// Workspace path of the configuration document.
    pub fn config_path(&self, ctx: &ExpandContext<'_>) -> String {
        format!("{}pipelines/{}.json", ctx.settings.workspace_root, self.name)
    }

    /// Expand against an already-built node graph.
    ///
    /// Order: primary, its permissions, the configuration file, the file's
    /// permissions.
    pub fn expand_with(
        &self,
        graph: &PipelineGraph,
        ctx: &ExpandContext<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let id = self.resource_id();
        let config_path = self.config_path(ctx);
        let config_id = resource_id(None, "workspace-file", &config_path);
        let config_ref = ReferencePlaceholder::attr(&config_id, "path");

        let mut out = match &self.orchestrator {
            Orchestrator::Dlt(dlt) => self.dlt_resources(&id, dlt, graph, &config_ref, ctx)?,
            Orchestrator::DatabricksJob(job) => {
                self.job_resources(&id, job, graph, &config_ref, ctx)?
            }
        };
        out.extend(self.config_file(config_id, config_path, graph, ctx)?);
        Ok(out)
    }

    fn dlt_resources(
        &self,
        id: &str,
        dlt: &DltOrchestrator,
        graph: &PipelineGraph,
        config_ref: &str,
        ctx: &ExpandContext<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let mut properties = to_properties(id, dlt)?;
        properties.insert("name".to_string(), json!(self.name));
        if let Some(catalog) = &self.catalog {
            properties.insert("catalog".to_string(), json!(catalog));
        }
        if let Some(target) = &self.target {
            properties.insert("target".to_string(), json!(target));
        }

        let mut configuration = dlt.configuration.clone();
        configuration.insert("pipeline_name".to_string(), self.name.clone());
        configuration.insert("config_filepath".to_string(), config_ref.to_string());
        properties.insert("configuration".to_string(), json!(configuration));
        properties.insert("libraries".to_string(), Value::Array(graph.library_entries()));
        for key in ["clusters", "notifications"] {
            if properties.get(key).and_then(Value::as_array).is_some_and(Vec::is_empty) {
                properties.shift_remove(key);
            }
        }

        let pipeline = ctx.primary(
            id.to_string(),
            ResourceKind::DltPipeline,
            sort_keys_first(properties, &["name"]),
            &self.options,
        );
        let perms = access::permissions(&pipeline, "pipeline_id", "id", &self.access_controls)?;
        Ok(std::iter::once(pipeline).chain(perms).collect())
    }

    fn job_resources(
        &self,
        id: &str,
        orchestrator: &JobOrchestrator,
        graph: &PipelineGraph,
        config_ref: &str,
        ctx: &ExpandContext<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let access_controls: Vec<AccessControl> = self
            .access_controls
            .iter()
            .chain(&orchestrator.access_controls)
            .cloned()
            .collect();
        let job = Job {
            name: orchestrator
                .name
                .clone()
                .unwrap_or_else(|| format!("job-{}", self.name)),
            clusters: orchestrator.clusters.clone(),
            tasks: graph.tasks(orchestrator.cluster_key()),
            parameters: vec![
                parameter("pipeline_name", &self.name),
                parameter("full_refresh", "false"),
                parameter("config_filepath", config_ref),
            ],
            tags: orchestrator.tags.clone(),
            schedule: orchestrator.schedule.clone(),
            max_concurrent_runs: orchestrator.max_concurrent_runs,
            email_notifications: None,
            access_controls,
            resource_name: Some(id.to_string()),
            options: self.options.clone(),
        };
        job.expand(ctx)
    }

    fn config_file(
        &self,
        id: String,
        path: String,
        graph: &PipelineGraph,
        ctx: &ExpandContext<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let document = serde_json::to_string_pretty(&graph.config_document())
            .map_err(|e| CompileError::invalid(&id, format!("cannot render config: {}", e)))?;
        let mut properties = Properties::new();
        properties.insert("path".to_string(), json!(path));
        properties.insert(
            "content_base64".to_string(),
            json!(base64::engine::general_purpose::STANDARD.encode(document)),
        );

        // The file follows the pipeline's provider but none of its other options.
        let options = ResourceOptions {
            provider: self.options.provider.clone(),
            ..ResourceOptions::default()
        };
        let file = ctx.primary(id, ResourceKind::WorkspaceFile, properties, &options);
        let readers: Vec<AccessControl> = self
            .access_controls
            .iter()
            .map(|ac| ac.with_level("CAN_READ"))
            .collect();
        let perms = access::permissions(&file, "workspace_file_path", "path", &readers)?;
        Ok(std::iter::once(file).chain(perms).collect())
    }
}

impl Expand for Pipeline {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        let graph = PipelineGraph::build(self, ctx.settings)?;
        self.expand_with(&graph, ctx)
    }
}

fn parameter(name: &str, default: &str) -> JobParameter {
    JobParameter {
        name: name.to_string(),
        default: default.to_string(),
    }
}

/// Move `keys` to the front, keeping the rest in order.
fn sort_keys_first(properties: Properties, keys: &[&str]) -> Properties {
    let mut out = Properties::new();
    for key in keys {
        if let Some(v) = properties.get(*key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    for (k, v) in properties {
        if !out.contains_key(&k) {
            out.insert(k, v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Settings;

    const DLT: &str = r#"
name: pl-stock-prices
catalog: dev
target: sandbox
orchestrator:
  type: DLT
  channel: PREVIEW
  development: true
access_controls:
  - group_name: account users
    permission_level: CAN_VIEW
nodes:
  - name: brz_stock_prices
    source: {name: stock_price, producer: yahoo_finance, as_stream: true}
    sink: {table_name: brz_stock_prices}
  - name: slv_stock_prices
    source: {node_name: brz_stock_prices, as_stream: true}
    sink: {table_name: slv_stock_prices}
"#;

    fn expand(p: &Pipeline) -> Vec<ResourceNode> {
        let settings = Settings::default();
        let ctx = ExpandContext::new(&settings, Some("databricks".to_string()));
        p.expand(&ctx).unwrap()
    }

    fn ids(nodes: &[ResourceNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_ls016_dlt_resources() {
        let p: Pipeline = serde_yaml_ng::from_str(DLT).unwrap();
        let nodes = expand(&p);
        assert_eq!(
            ids(&nodes),
            vec![
                "dlt-pipeline-pl-stock-prices",
                "permissions-dlt-pipeline-pl-stock-prices",
                "workspace-file-laktory-pipelines-pl-stock-prices-json",
                "permissions-workspace-file-laktory-pipelines-pl-stock-prices-json",
            ]
        );
        let dlt = &nodes[0].properties;
        assert_eq!(dlt.keys().next().map(String::as_str), Some("name"));
        assert_eq!(dlt["channel"], "PREVIEW");
        assert_eq!(dlt["catalog"], "dev");
        assert_eq!(dlt["target"], "sandbox");
        assert_eq!(
            dlt["configuration"]["config_filepath"],
            "${resources.workspace-file-laktory-pipelines-pl-stock-prices-json.path}"
        );
        assert_eq!(dlt["configuration"]["pipeline_name"], "pl-stock-prices");
        assert_eq!(
            dlt["libraries"],
            json!([{"notebook": {"path": "/.laktory/pipelines/dlt_laktory_pl.py"}}])
        );
        assert!(dlt.get("clusters").is_none());
        assert_eq!(nodes[1].properties["pipeline_id"], "${resources.dlt-pipeline-pl-stock-prices.id}");
    }

    #[test]
    fn test_ls016_config_file_content() {
        let p: Pipeline = serde_yaml_ng::from_str(DLT).unwrap();
        let nodes = expand(&p);
        let file = &nodes[2];
        assert_eq!(file.kind, ResourceKind::WorkspaceFile);
        assert_eq!(file.properties["path"], "/.laktory/pipelines/pl-stock-prices.json");
        let encoded = file.properties["content_base64"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let doc: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(doc["name"], "pl-stock-prices");
        assert_eq!(doc["nodes"][1]["source"]["read_target"], "brz_stock_prices");

        let perms = &nodes[3];
        assert_eq!(perms.properties["access_controls"][0]["permission_level"], "CAN_READ");
        assert_eq!(perms.owner.as_deref(), Some(file.id.as_str()));
    }

    #[test]
    fn test_ls016_job_resources() {
        let mut p: Pipeline = serde_yaml_ng::from_str(DLT).unwrap();
        p.orchestrator = serde_yaml_ng::from_str(
            r#"
type: DATABRICKS_JOB
clusters:
  - name: node-cluster
    node_type_id: Standard_DS3_v2
access_controls:
  - group_name: role-engineers
    permission_level: CAN_MANAGE_RUN
"#,
        )
        .unwrap();
        let nodes = expand(&p);
        assert_eq!(
            ids(&nodes),
            vec![
                "job-pl-stock-prices",
                "permissions-job-pl-stock-prices",
                "workspace-file-laktory-pipelines-pl-stock-prices-json",
                "permissions-workspace-file-laktory-pipelines-pl-stock-prices-json",
            ]
        );
        let job = &nodes[0].properties;
        assert_eq!(job["name"], "job-pl-stock-prices");
        assert_eq!(job["tasks"][1]["task_key"], "node-slv_stock_prices");
        assert_eq!(job["tasks"][1]["job_cluster_key"], "node-cluster");
        assert_eq!(
            job["tasks"][1]["depends_ons"],
            json!([{"task_key": "node-brz_stock_prices"}])
        );
        assert_eq!(job["parameters"][1], json!({"name": "full_refresh", "default": "false"}));
        assert_eq!(
            job["parameters"][2]["default"],
            "${resources.workspace-file-laktory-pipelines-pl-stock-prices-json.path}"
        );
        // Pipeline and orchestrator access controls both land on the job
        assert_eq!(
            nodes[1].properties["access_controls"].as_array().map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn test_ls016_resource_name_override() {
        let mut p: Pipeline = serde_yaml_ng::from_str(DLT).unwrap();
        p.resource_name = Some("pl-custom-name".to_string());
        let nodes = expand(&p);
        assert_eq!(nodes[0].id, "pl-custom-name");
        assert_eq!(nodes[1].id, "permissions-pl-custom-name");
    }
}
