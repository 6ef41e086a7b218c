//! LS-011: Job declarations and job tasks.

use super::access::{self, AccessControl};
use crate::core::error::CompileError;
use crate::core::expander::{resource_id, to_properties, Expand, ExpandContext};
use crate::core::resolver::stable_toposort;
use crate::core::types::{ResourceKind, ResourceNode, ResourceOptions};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Multi-task job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,

    /// Job clusters shared by the tasks
    #[serde(default)]
    pub clusters: Vec<Cluster>,

    #[serde(default)]
    pub tasks: Vec<JobTask>,

    #[serde(default)]
    pub parameters: Vec<JobParameter>,

    #[serde(default)]
    pub tags: IndexMap<String, String>,

    #[serde(default)]
    pub schedule: Option<Value>,

    #[serde(default)]
    pub max_concurrent_runs: Option<u32>,

    #[serde(default)]
    pub email_notifications: Option<Value>,

    #[serde(default)]
    pub access_controls: Vec<AccessControl>,

    #[serde(default)]
    pub resource_name: Option<String>,

    #[serde(default)]
    pub options: ResourceOptions,
}

/// Named cluster specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    /// Everything else is the cluster spec, passed through
    #[serde(flatten)]
    pub spec: IndexMap<String, Value>,
}

/// One unit of work within a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTask {
    pub task_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_ons: Vec<TaskDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_cluster_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_task: Option<NotebookTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_task: Option<PipelineTask>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<Library>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookTask {
    pub notebook_path: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub base_parameters: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTask {
    /// Usually `${resources.dlt-pipeline-<name>.id}`
    pub pipeline_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pypi: Option<PypiLibrary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whl: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PypiLibrary {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameter {
    pub name: String,
    pub default: String,
}

impl Job {
    pub fn resource_id(&self) -> String {
        resource_id(self.resource_name.as_deref(), "job", &self.name)
    }

    fn validate(&self, id: &str) -> Result<(), CompileError> {
        let mut keys = HashSet::new();
        for task in &self.tasks {
            if task.task_key.is_empty() {
                return Err(CompileError::invalid(id, "task with empty task_key"));
            }
            if !keys.insert(task.task_key.as_str()) {
                return Err(CompileError::invalid(
                    id,
                    format!("task_key '{}' declared more than once", task.task_key),
                ));
            }
        }
        let clusters: HashSet<&str> = self.clusters.iter().map(|c| c.name.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.depends_ons {
                if !keys.contains(dep.task_key.as_str()) {
                    return Err(CompileError::invalid(
                        id,
                        format!(
                            "task '{}' depends on unknown task '{}'",
                            task.task_key, dep.task_key
                        ),
                    ));
                }
            }
            if let Some(key) = &task.job_cluster_key {
                if !clusters.contains(key.as_str()) {
                    return Err(CompileError::invalid(
                        id,
                        format!("task '{}' uses unknown cluster '{}'", task.task_key, key),
                    ));
                }
            }
        }
        self.check_task_order(id)
    }

    /// Task dependencies must form a DAG.
    fn check_task_order(&self, id: &str) -> Result<(), CompileError> {
        let index: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_key.as_str(), i))
            .collect();
        let edges: Vec<(usize, usize)> = self
            .tasks
            .iter()
            .enumerate()
            .flat_map(|(i, t)| {
                t.depends_ons
                    .iter()
                    .filter_map(|d| index.get(d.task_key.as_str()).map(|&j| (i, j)))
                    .collect::<Vec<_>>()
            })
            .collect();
        stable_toposort(self.tasks.len(), &edges)
            .map(|_| ())
            .map_err(|cycle| CompileError::CyclicDependency {
                graph: format!("job '{}' tasks", id),
                ids: cycle
                    .into_iter()
                    .map(|i| self.tasks[i].task_key.clone())
                    .collect(),
            })
    }
}

impl Expand for Job {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        let id = self.resource_id();
        self.validate(&id)?;

        let mut properties = to_properties(&id, self)?;
        for key in ["clusters", "access_controls"] {
            properties.shift_remove(key);
        }
        if !self.clusters.is_empty() {
            let job_clusters: Vec<Value> = self
                .clusters
                .iter()
                .map(|c| json!({"job_cluster_key": c.name, "new_cluster": c.spec}))
                .collect();
            properties.insert("job_clusters".to_string(), Value::Array(job_clusters));
        }
        for key in ["tasks", "parameters"] {
            if properties.get(key).and_then(Value::as_array).is_some_and(Vec::is_empty) {
                properties.shift_remove(key);
            }
        }
        if self.tags.is_empty() {
            properties.shift_remove("tags");
        }

        let job = ctx.primary(id, ResourceKind::Job, properties, &self.options);
        let perms = access::permissions(&job, "job_id", "id", &self.access_controls)?;
        Ok(std::iter::once(job).chain(perms).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Settings;

    fn job(yaml: &str) -> Job {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    fn expand(j: &Job) -> Result<Vec<ResourceNode>, CompileError> {
        let settings = Settings::default();
        let ctx = ExpandContext::new(&settings, Some("databricks".to_string()));
        j.expand(&ctx)
    }

    const STOCK_JOB: &str = r#"
name: job-stock-prices
clusters:
  - name: main
    spark_version: 14.0.x-scala2.12
    node_type_id: Standard_DS3_v2
    spark_conf:
      spark.sql.session.timeZone: UTC
tasks:
  - task_key: ingest
    job_cluster_key: main
    notebook_task:
      notebook_path: /jobs/ingest.py
      base_parameters: {env: dev}
  - task_key: pipeline
    depends_ons: [{task_key: ingest}]
    pipeline_task:
      pipeline_id: ${resources.dlt-pipeline-pl-stock-prices.id}
access_controls:
  - group_name: account users
    permission_level: CAN_VIEW
"#;

    #[test]
    fn test_ls011_job_expands_with_permissions() {
        let nodes = expand(&job(STOCK_JOB)).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "job-job-stock-prices");
        assert_eq!(nodes[0].kind, ResourceKind::Job);
        assert_eq!(nodes[1].id, "permissions-job-job-stock-prices");
        assert_eq!(nodes[1].properties["job_id"], "${resources.job-job-stock-prices.id}");
    }

    #[test]
    fn test_ls011_job_properties() {
        let nodes = expand(&job(STOCK_JOB)).unwrap();
        let p = &nodes[0].properties;
        assert!(p.get("clusters").is_none());
        assert!(p.get("access_controls").is_none());
        assert!(p.get("parameters").is_none());
        assert_eq!(p["job_clusters"][0]["job_cluster_key"], "main");
        assert_eq!(p["job_clusters"][0]["new_cluster"]["node_type_id"], "Standard_DS3_v2");
        assert_eq!(p["tasks"][1]["depends_ons"][0]["task_key"], "ingest");
        assert_eq!(
            p["tasks"][1]["pipeline_task"]["pipeline_id"],
            "${resources.dlt-pipeline-pl-stock-prices.id}"
        );
        assert!(p["tasks"][0].get("depends_ons").is_none());
    }

    #[test]
    fn test_ls011_unknown_task_dependency() {
        let mut j = job(STOCK_JOB);
        j.tasks[1].depends_ons[0].task_key = "ghost".to_string();
        let err = expand(&j).unwrap_err();
        assert!(err.to_string().contains("unknown task 'ghost'"));
    }

    #[test]
    fn test_ls011_cyclic_task_dependencies() {
        let mut j = job(STOCK_JOB);
        j.tasks[0].depends_ons = vec![TaskDependency {
            task_key: j.tasks[1].task_key.clone(),
        }];
        let err = expand(&j).unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicDependency {
                graph: "job 'job-job-stock-prices' tasks".to_string(),
                ids: vec!["ingest".to_string(), "pipeline".to_string()],
            }
        );
    }

    #[test]
    fn test_ls011_duplicate_task_key() {
        let mut j = job(STOCK_JOB);
        j.tasks[1].task_key = "ingest".to_string();
        j.tasks[1].depends_ons.clear();
        assert!(expand(&j).is_err());
    }

    #[test]
    fn test_ls011_unknown_cluster() {
        let mut j = job(STOCK_JOB);
        j.tasks[0].job_cluster_key = Some("other".to_string());
        let err = expand(&j).unwrap_err();
        assert!(err.to_string().contains("unknown cluster 'other'"));
    }

    #[test]
    fn test_ls011_resource_name_override() {
        let mut j = job(STOCK_JOB);
        j.resource_name = Some("job-prices".to_string());
        j.access_controls.clear();
        let nodes = expand(&j).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "job-prices");
    }
}
