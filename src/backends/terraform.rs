//! LS-022: Terraform JSON emitter.

use super::{prepare, rename_keys, Backend, Document};
use crate::core::compiler::Graph;
use crate::core::error::EmitError;
use crate::core::reference::{self, ReferencePlaceholder};
use crate::core::types::{DeletionPolicy, ResourceKind, ResourceNode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Terraform resource type of a kind. Providers are not resources.
pub fn resource_type(kind: ResourceKind) -> Option<&'static str> {
    let t = match kind {
        ResourceKind::Provider => return None,
        ResourceKind::Catalog => "databricks_catalog",
        ResourceKind::Schema => "databricks_schema",
        ResourceKind::Table => "databricks_sql_table",
        ResourceKind::Volume => "databricks_volume",
        ResourceKind::Grants => "databricks_grants",
        ResourceKind::Notebook => "databricks_notebook",
        ResourceKind::WorkspaceFile => "databricks_workspace_file",
        ResourceKind::Permissions => "databricks_permissions",
        ResourceKind::Job => "databricks_job",
        ResourceKind::DltPipeline => "databricks_pipeline",
        ResourceKind::Group => "databricks_group",
        ResourceKind::User => "databricks_user",
        ResourceKind::ServicePrincipal => "databricks_service_principal",
        ResourceKind::GroupMember => "databricks_group_member",
        ResourceKind::UserRole => "databricks_user_role",
        ResourceKind::ServicePrincipalRole => "databricks_service_principal_role",
        ResourceKind::Warehouse => "databricks_sql_endpoint",
        ResourceKind::VectorSearchEndpoint => "databricks_vector_search_endpoint",
    };
    Some(t)
}

/// Repeated blocks are written once per element under a singular name.
const SINGULAR_BLOCKS: &[(&str, &str)] = &[
    ("tasks", "task"),
    ("job_clusters", "job_cluster"),
    ("libraries", "library"),
    ("clusters", "cluster"),
    ("notifications", "notification"),
    ("parameters", "parameter"),
    ("depends_ons", "depends_on"),
    ("access_controls", "access_control"),
    ("grants", "grant"),
    ("columns", "column"),
];

pub fn singular(key: &str) -> String {
    SINGULAR_BLOCKS
        .iter()
        .find(|(plural, _)| *plural == key)
        .map(|(_, s)| s.to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Type of every resource id, for reference rendering.
struct Addresses<'a> {
    types: HashMap<&'a str, &'static str>,
}

impl<'a> Addresses<'a> {
    fn new(graph: &'a Graph) -> Self {
        let types = graph
            .resources
            .iter()
            .filter_map(|r| resource_type(r.kind).map(|t| (r.id.as_str(), t)))
            .collect();
        Self { types }
    }

    /// `<type>.<id>`, or the provider address for provider bindings.
    fn address(&self, id: &str) -> String {
        match self.types.get(id) {
            Some(t) => format!("{}.{}", t, id),
            None => format!("databricks.{}", id),
        }
    }

    /// `${<type>.<id>.<attribute>}`; bare references address `id`.
    fn render(&self, p: &ReferencePlaceholder) -> String {
        let attr = p.attribute.as_deref().unwrap_or("id");
        format!("${{{}.{}}}", self.address(&p.resource), attr)
    }
}

fn block(addresses: &Addresses<'_>, graph: &Graph, resource: &ResourceNode) -> Result<Value, EmitError> {
    let props = prepare(resource, Backend::Terraform)?;
    let rewritten = reference::rewrite(&Value::Object(props), &|p: &ReferencePlaceholder| {
        addresses.render(p)
    });
    let mut body = match rename_keys(rewritten, &singular) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if let Some(provider) = &resource.provider_ref {
        body.insert("provider".to_string(), json!(addresses.address(provider)));
    }
    let hints: Vec<Value> = graph
        .ordering_hints(&resource.id)
        .into_iter()
        .map(|id| json!(addresses.address(id)))
        .collect();
    if !hints.is_empty() {
        body.insert("depends_on".to_string(), Value::Array(hints));
    }
    if resource.deletion_policy == DeletionPolicy::Retain {
        body.insert("lifecycle".to_string(), json!({"prevent_destroy": true}));
    }
    Ok(Value::Object(body))
}

/// Emit a Terraform JSON configuration.
pub fn emit(graph: &Graph) -> Result<Document, EmitError> {
    let addresses = Addresses::new(graph);
    let mut providers = Vec::new();
    let mut resources: Map<String, Value> = Map::new();

    for resource in &graph.resources {
        let Some(kind_type) = resource_type(resource.kind) else {
            let args = prepare(resource, Backend::Terraform)?;
            let mut entry = Map::new();
            entry.insert("alias".to_string(), json!(resource.id));
            entry.extend(args);
            providers.push(Value::Object(entry));
            continue;
        };
        let entry = block(&addresses, graph, resource)?;
        let by_type = resources
            .entry(kind_type.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = by_type {
            map.insert(resource.id.clone(), entry);
        }
    }

    let mut body = Map::new();
    body.insert(
        "terraform".to_string(),
        json!({
            "required_providers": {
                "databricks": {"source": "databricks/databricks"}
            }
        }),
    );
    if !graph.variables.is_empty() {
        let variables: Map<String, Value> = graph
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), json!({"default": v})))
            .collect();
        body.insert("variable".to_string(), Value::Object(variables));
    }
    if !providers.is_empty() {
        body.insert("provider".to_string(), json!({"databricks": providers}));
    }
    body.insert("resource".to_string(), Value::Object(resources));

    Ok(Document {
        backend: Backend::Terraform,
        body: Value::Object(body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler::compile;
    use crate::core::parser::parse_stack;

    const STACK: &str = r#"
name: unit-testing
variables:
  env: dev
providers:
  databricks:
    host: ${var.DATABRICKS_HOST}
resources:
  catalogs:
    - name: dev
      grants:
        - principal: account users
          privileges: [USE_CATALOG]
  notebooks:
    - source: ./notebooks/jobs/job_ingest.py
      language: PYTHON
  pipelines:
    - name: pl-stock-prices
      catalog: dev
      target: sandbox
      orchestrator:
        type: DATABRICKS_JOB
        clusters:
          - name: node-cluster
            spark_version: 14.0.x-scala2.12
      nodes:
        - name: brz
          source: {name: stock_price}
          sink: {table_name: brz}
        - name: slv
          source: {node_name: brz}
          sink: {table_name: slv}
      options:
        deletion_policy: RETAIN
"#;

    fn emitted() -> Value {
        let graph = compile(&parse_stack(STACK).unwrap()).unwrap();
        emit(&graph).unwrap().body
    }

    #[test]
    fn test_ls022_header_and_providers() {
        let doc = emitted();
        assert_eq!(
            doc["terraform"]["required_providers"]["databricks"]["source"],
            "databricks/databricks"
        );
        assert_eq!(
            doc["provider"]["databricks"],
            json!([{"alias": "databricks", "host": "${var.DATABRICKS_HOST}"}])
        );
        assert_eq!(doc["variable"]["env"]["default"], "dev");
    }

    #[test]
    fn test_ls022_resources_grouped_by_type() {
        let doc = emitted();
        let catalog = &doc["resource"]["databricks_catalog"]["catalog-dev"];
        assert_eq!(catalog["name"], "dev");
        assert_eq!(catalog["provider"], "databricks.databricks");
        // No Pulumi-only options leak through
        assert!(catalog.get("delete_before_replace").is_none());
        let grants = &doc["resource"]["databricks_grants"]["grants-catalog-dev"];
        assert_eq!(grants["catalog"], "${databricks_catalog.catalog-dev.name}");
        assert_eq!(grants["grant"][0]["principal"], "account users");
        assert_eq!(grants["depends_on"], json!(["databricks_catalog.catalog-dev"]));
    }

    #[test]
    fn test_ls022_job_blocks_singularized() {
        let doc = emitted();
        let job = &doc["resource"]["databricks_job"]["job-pl-stock-prices"];
        assert_eq!(job["task"][0]["task_key"], "node-brz");
        assert_eq!(job["task"][1]["depends_on"], json!([{"task_key": "node-brz"}]));
        assert_eq!(job["job_cluster"][0]["job_cluster_key"], "node-cluster");
        assert_eq!(job["parameter"][0]["name"], "pipeline_name");
        assert_eq!(
            job["parameter"][2]["default"],
            "${databricks_workspace_file.workspace-file-laktory-pipelines-pl-stock-prices-json.path}"
        );
        assert_eq!(job["lifecycle"], json!({"prevent_destroy": true}));
        assert!(job.get("tasks").is_none());
    }

    #[test]
    fn test_ls022_notebook_language_excluded() {
        let doc = emitted();
        let nb = &doc["resource"]["databricks_notebook"]["notebook-laktory-jobs-job_ingest-py"];
        assert!(nb.get("language").is_none());
        assert_eq!(nb["source"], "./notebooks/jobs/job_ingest.py");
    }

    #[test]
    fn test_ls022_render_is_stable() {
        let graph = compile(&parse_stack(STACK).unwrap()).unwrap();
        let a = emit(&graph).unwrap();
        let b = emit(&graph).unwrap();
        assert_eq!(a.render().unwrap(), b.render().unwrap());
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert!(a.render().unwrap().ends_with("}\n"));
    }

    #[test]
    fn test_ls022_singular() {
        assert_eq!(singular("access_controls"), "access_control");
        assert_eq!(singular("name"), "name");
    }

    #[test]
    fn test_ls022_missing_required_field() {
        let yaml = r#"
name: s
resources:
  notebooks:
    - source: ./scratch/x.py
"#;
        let graph = compile(&parse_stack(yaml).unwrap()).unwrap();
        let err = emit(&graph).unwrap_err();
        assert_eq!(
            err,
            EmitError::IncompatibleBackendField {
                backend: Backend::Terraform,
                resource: "notebook-scratch-x-py".to_string(),
                kind: ResourceKind::Notebook,
                field: "path".to_string(),
            }
        );
    }
}
