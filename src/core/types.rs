//! LS-001: Stack model, compiler settings, and the resource record.
//!
//! The stack is the declarative root handed to the compiler. Resources are the
//! flat, backend-neutral records produced by expansion and consumed by the
//! resolver and emitters.

use crate::core::pipeline::Pipeline;
use crate::resources::{
    catalog::Catalog,
    compute::{SqlWarehouse, VectorSearchEndpoint},
    identity::{Group, ServicePrincipal, User},
    job::Job,
    workspace::{Notebook, WorkspaceFile},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered attribute map of a resource.
pub type Properties = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Top-level stack
// ============================================================================

/// Root declarative document for one deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name (used as the Pulumi project name)
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Compiler settings
    #[serde(default)]
    pub settings: Settings,

    /// Backend configuration entries passed through verbatim
    #[serde(default)]
    pub config: IndexMap<String, serde_json::Value>,

    /// Stack variables passed through verbatim
    #[serde(default)]
    pub variables: IndexMap<String, serde_json::Value>,

    /// Provider bindings, keyed by binding name (order-preserving)
    #[serde(default)]
    pub providers: IndexMap<String, ProviderBinding>,

    /// Resource declarations
    #[serde(default)]
    pub resources: StackResources,
}

impl Stack {
    /// Provider binding used by resources that do not declare one.
    ///
    /// Falls back to the first declared binding when settings name none.
    pub fn default_provider(&self) -> Option<String> {
        self.settings
            .default_provider
            .clone()
            .or_else(|| self.providers.keys().next().cloned())
    }
}

/// Typed resource collections. Expansion walks them in field order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackResources {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub service_principals: Vec<ServicePrincipal>,
    #[serde(default)]
    pub catalogs: Vec<Catalog>,
    #[serde(default)]
    pub warehouses: Vec<SqlWarehouse>,
    #[serde(default)]
    pub vector_search_endpoints: Vec<VectorSearchEndpoint>,
    #[serde(default)]
    pub notebooks: Vec<Notebook>,
    #[serde(default)]
    pub workspace_files: Vec<WorkspaceFile>,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl StackResources {
    /// Total number of top-level declarations.
    pub fn len(&self) -> usize {
        self.groups.len()
            + self.users.len()
            + self.service_principals.len()
            + self.catalogs.len()
            + self.warehouses.len()
            + self.vector_search_endpoints.len()
            + self.notebooks.len()
            + self.workspace_files.len()
            + self.pipelines.len()
            + self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deployment target a resource belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBinding {
    /// Provider plugin name
    #[serde(default = "default_provider_plugin")]
    pub plugin: String,

    /// Provider arguments (host, token, account_id, ...)
    #[serde(flatten)]
    pub arguments: IndexMap<String, serde_json::Value>,
}

fn default_provider_plugin() -> String {
    "databricks".to_string()
}

// ============================================================================
// Settings
// ============================================================================

/// Immutable compiler settings, threaded explicitly through expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Workspace directory holding generated files (trailing slash)
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// Landing root for raw event files (trailing slash)
    #[serde(default = "default_landing_root")]
    pub landing_root: String,

    /// Provider binding for resources without one
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Read-side classification assigned to derived table sources
    #[serde(default)]
    pub default_warehouse: Warehouse,

    /// Notebook running a continuous pipeline
    #[serde(default)]
    pub dlt_runner_path: Option<String>,

    /// Notebook running one node of a discrete job
    #[serde(default)]
    pub job_runner_path: Option<String>,

    /// Default for the Pulumi `deleteBeforeReplace` option
    #[serde(default = "default_true")]
    pub delete_before_replace: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            landing_root: default_landing_root(),
            default_provider: None,
            default_warehouse: Warehouse::default(),
            dlt_runner_path: None,
            job_runner_path: None,
            delete_before_replace: true,
        }
    }
}

impl Settings {
    pub fn dlt_runner_path(&self) -> String {
        self.dlt_runner_path
            .clone()
            .unwrap_or_else(|| format!("{}pipelines/dlt_laktory_pl.py", self.workspace_root))
    }

    pub fn job_runner_path(&self) -> String {
        self.job_runner_path
            .clone()
            .unwrap_or_else(|| format!("{}jobs/job_laktory_pl.py", self.workspace_root))
    }
}

fn default_workspace_root() -> String {
    "/.laktory/".to_string()
}

fn default_landing_root() -> String {
    "/mnt/landing/".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

/// Read-target classification of a table source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Warehouse {
    #[default]
    Databricks,
}

// ============================================================================
// Declaration options
// ============================================================================

/// Options shared by every declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceOptions {
    /// Resources that must be provisioned first (ids or placeholders)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Provider binding (name or placeholder)
    #[serde(default)]
    pub provider: Option<String>,

    /// What the backend does with the object on removal
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Override of `Settings::delete_before_replace`
    #[serde(default)]
    pub delete_before_replace: Option<bool>,
}

/// Deletion behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Retain,
}

// ============================================================================
// Resources
// ============================================================================

/// Concrete resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Provider,
    Catalog,
    Schema,
    Table,
    Volume,
    Grants,
    Notebook,
    WorkspaceFile,
    Permissions,
    Job,
    DltPipeline,
    Group,
    User,
    ServicePrincipal,
    GroupMember,
    UserRole,
    ServicePrincipalRole,
    Warehouse,
    VectorSearchEndpoint,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provider => "provider",
            Self::Catalog => "catalog",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Volume => "volume",
            Self::Grants => "grants",
            Self::Notebook => "notebook",
            Self::WorkspaceFile => "workspace_file",
            Self::Permissions => "permissions",
            Self::Job => "job",
            Self::DltPipeline => "dlt_pipeline",
            Self::Group => "group",
            Self::User => "user",
            Self::ServicePrincipal => "service_principal",
            Self::GroupMember => "group_member",
            Self::UserRole => "user_role",
            Self::ServicePrincipalRole => "service_principal_role",
            Self::Warehouse => "warehouse",
            Self::VectorSearchEndpoint => "vector_search_endpoint",
        };
        write!(f, "{}", s)
    }
}

/// One concrete, backend-neutral infrastructure object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceNode {
    /// Stable id derived from the declaration path
    pub id: String,

    /// Resource kind
    pub kind: ResourceKind,

    /// Attributes; string values may carry reference placeholders
    pub properties: Properties,

    /// Provider binding id
    pub provider_ref: Option<String>,

    /// Explicit dependencies (normalized ids)
    pub depends_on: Vec<String>,

    /// Primary resource when this one is auxiliary
    pub owner: Option<String>,

    pub deletion_policy: DeletionPolicy,

    pub delete_before_replace: bool,
}

impl ResourceNode {
    /// Auxiliary resource bound to `owner`. Inherits the owner's provider.
    pub fn auxiliary(
        id: String,
        kind: ResourceKind,
        properties: Properties,
        owner: &ResourceNode,
    ) -> Self {
        Self {
            id,
            kind,
            properties,
            provider_ref: owner.provider_ref.clone(),
            depends_on: Vec::new(),
            owner: Some(owner.id.clone()),
            deletion_policy: DeletionPolicy::Delete,
            delete_before_replace: owner.delete_before_replace,
        }
    }

    pub fn is_auxiliary(&self) -> bool {
        self.owner.is_some()
    }

    /// String property, if present.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ls001_stack_parse() {
        let yaml = r#"
name: unit-testing
config:
  databricks:host: https://adb.example.net/
providers:
  databricks:
    host: ${var.DATABRICKS_HOST}
    token: ${var.DATABRICKS_TOKEN}
resources:
  notebooks:
    - source: ./notebooks/pipelines/dlt_brz_template.py
"#;
        let stack: Stack = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(stack.name, "unit-testing");
        assert_eq!(stack.providers.len(), 1);
        assert_eq!(stack.providers["databricks"].plugin, "databricks");
        assert_eq!(
            stack.providers["databricks"].arguments["host"],
            "${var.DATABRICKS_HOST}"
        );
        assert_eq!(stack.resources.notebooks.len(), 1);
        assert_eq!(stack.resources.len(), 1);
    }

    #[test]
    fn test_ls001_settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.workspace_root, "/.laktory/");
        assert_eq!(s.default_warehouse, Warehouse::Databricks);
        assert!(s.delete_before_replace);
        assert_eq!(s.dlt_runner_path(), "/.laktory/pipelines/dlt_laktory_pl.py");
        assert_eq!(s.job_runner_path(), "/.laktory/jobs/job_laktory_pl.py");
    }

    #[test]
    fn test_ls001_settings_runner_override() {
        let s: Settings = serde_yaml_ng::from_str("job_runner_path: /jobs/run.py").unwrap();
        assert_eq!(s.job_runner_path(), "/jobs/run.py");
        assert_eq!(s.workspace_root, "/.laktory/");
    }

    #[test]
    fn test_ls001_default_provider_fallback() {
        let yaml = r#"
name: s
providers:
  first: {host: a}
  second: {host: b}
"#;
        let mut stack: Stack = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(stack.default_provider().as_deref(), Some("first"));
        stack.settings.default_provider = Some("second".to_string());
        assert_eq!(stack.default_provider().as_deref(), Some("second"));
    }

    #[test]
    fn test_ls001_deletion_policy_serde() {
        let o: ResourceOptions = serde_yaml_ng::from_str("deletion_policy: RETAIN").unwrap();
        assert_eq!(o.deletion_policy, DeletionPolicy::Retain);
        assert!(o.depends_on.is_empty());
    }

    #[test]
    fn test_ls001_kind_display() {
        assert_eq!(ResourceKind::WorkspaceFile.to_string(), "workspace_file");
        assert_eq!(ResourceKind::DltPipeline.to_string(), "dlt_pipeline");
    }
}
