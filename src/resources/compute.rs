//! LS-015: SQL warehouses and vector search endpoints.

use super::access::{self, AccessControl};
use crate::core::error::CompileError;
use crate::core::expander::{resource_id, to_properties, Expand, ExpandContext};
use crate::core::types::{ResourceKind, ResourceNode, ResourceOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SQL warehouse sizes accepted by the workspace API.
const CLUSTER_SIZES: &[&str] = &[
    "2X-Small", "X-Small", "Small", "Medium", "Large", "X-Large", "2X-Large", "3X-Large",
    "4X-Large",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlWarehouse {
    pub name: String,
    pub cluster_size: String,
    #[serde(default)]
    pub auto_stop_mins: Option<u32>,
    #[serde(default)]
    pub min_num_clusters: Option<u32>,
    #[serde(default)]
    pub max_num_clusters: Option<u32>,
    #[serde(default)]
    pub enable_serverless_compute: Option<bool>,
    #[serde(default)]
    pub warehouse_type: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default)]
    pub access_controls: Vec<AccessControl>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchEndpoint {
    pub name: String,
    #[serde(default = "default_endpoint_type")]
    pub endpoint_type: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

fn default_endpoint_type() -> String {
    "STANDARD".to_string()
}

impl Expand for SqlWarehouse {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        let id = resource_id(self.resource_name.as_deref(), "warehouse", &self.name);
        if !CLUSTER_SIZES.contains(&self.cluster_size.as_str()) {
            return Err(CompileError::invalid(
                &id,
                format!("unknown cluster_size '{}'", self.cluster_size),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_num_clusters, self.max_num_clusters) {
            if min > max {
                return Err(CompileError::invalid(
                    &id,
                    format!("min_num_clusters {} exceeds max_num_clusters {}", min, max),
                ));
            }
        }
        let mut properties = to_properties(&id, self)?;
        properties.shift_remove("access_controls");

        let primary = ctx.primary(id, ResourceKind::Warehouse, properties, &self.options);
        let perms =
            access::permissions(&primary, "sql_endpoint_id", "id", &self.access_controls)?;
        Ok(std::iter::once(primary).chain(perms).collect())
    }
}

impl Expand for VectorSearchEndpoint {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        let id = resource_id(
            self.resource_name.as_deref(),
            "vector-search-endpoint",
            &self.name,
        );
        let properties = to_properties(&id, self)?;
        Ok(vec![ctx.primary(
            id,
            ResourceKind::VectorSearchEndpoint,
            properties,
            &self.options,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Settings;

    #[test]
    fn test_ls015_warehouse_with_permissions() {
        let w: SqlWarehouse = serde_yaml_ng::from_str(
            r#"
name: default
cluster_size: 2X-Small
auto_stop_mins: 30
access_controls:
  - group_name: account users
    permission_level: CAN_USE
"#,
        )
        .unwrap();
        let settings = Settings::default();
        let nodes = w
            .expand(&ExpandContext::new(&settings, Some("databricks".to_string())))
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "warehouse-default");
        assert_eq!(nodes[0].properties["auto_stop_mins"], 30);
        assert_eq!(nodes[1].properties["sql_endpoint_id"], "${resources.warehouse-default.id}");
    }

    #[test]
    fn test_ls015_warehouse_rejects_bad_size() {
        let w = SqlWarehouse {
            name: "w".to_string(),
            cluster_size: "Huge".to_string(),
            ..SqlWarehouse::default()
        };
        let settings = Settings::default();
        let err = w.expand(&ExpandContext::new(&settings, None)).unwrap_err();
        assert!(err.to_string().contains("Huge"));
    }

    #[test]
    fn test_ls015_warehouse_cluster_bounds() {
        let w = SqlWarehouse {
            name: "w".to_string(),
            cluster_size: "Small".to_string(),
            min_num_clusters: Some(3),
            max_num_clusters: Some(1),
            ..SqlWarehouse::default()
        };
        let settings = Settings::default();
        assert!(w.expand(&ExpandContext::new(&settings, None)).is_err());
    }

    #[test]
    fn test_ls015_vector_search_endpoint() {
        let v: VectorSearchEndpoint = serde_yaml_ng::from_str("name: default").unwrap();
        let settings = Settings::default();
        let nodes = v.expand(&ExpandContext::new(&settings, None)).unwrap();
        assert_eq!(nodes[0].id, "vector-search-endpoint-default");
        assert_eq!(nodes[0].properties["endpoint_type"], "STANDARD");
    }
}
