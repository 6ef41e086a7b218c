//! LS-012: Catalog hierarchy (catalog → schemas → tables/volumes).
//!
//! Children reference their parent through placeholders, so the resolver
//! orders them after it without explicit `depends_on`.

use super::access::{self, Grant};
use crate::core::error::CompileError;
use crate::core::expander::{resource_id, to_properties, Expand, ExpandContext};
use crate::core::reference::ReferencePlaceholder;
use crate::core::types::{Properties, ResourceKind, ResourceNode, ResourceOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub isolation_mode: Option<String>,
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub force_destroy: Option<bool>,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub schemas: Vec<Schema>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub force_destroy: Option<bool>,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub table_type: Option<String>,
    #[serde(default)]
    pub data_source_format: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub view_definition: Option<String>,
    #[serde(default)]
    pub storage_location: Option<String>,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default)]
    pub storage_location: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

fn default_volume_type() -> String {
    "MANAGED".to_string()
}

/// Parent of a nested object: its name and the id of its resource.
struct Parent<'a> {
    name: &'a str,
    id: &'a str,
}

impl Parent<'_> {
    fn name_ref(&self) -> serde_json::Value {
        json!(ReferencePlaceholder::attr(self.id, "name"))
    }
}

fn strip(properties: &mut Properties, keys: &[&str]) {
    for key in keys {
        properties.shift_remove(*key);
    }
}

fn with_grants(
    primary: ResourceNode,
    field: &str,
    attr: &str,
    grants: &[Grant],
) -> Result<Vec<ResourceNode>, CompileError> {
    let grants = access::grants(&primary, field, attr, grants)?;
    Ok(std::iter::once(primary).chain(grants).collect())
}

impl Expand for Catalog {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        if self.name.is_empty() {
            return Err(CompileError::invalid("catalog", "catalog with empty name"));
        }
        let id = resource_id(self.resource_name.as_deref(), "catalog", &self.name);
        let mut properties = to_properties(&id, self)?;
        strip(&mut properties, &["grants", "schemas"]);

        let primary = ctx.primary(id.clone(), ResourceKind::Catalog, properties, &self.options);
        let mut out = with_grants(primary, "catalog", "name", &self.grants)?;
        let parent = Parent {
            name: &self.name,
            id: &id,
        };
        for schema in &self.schemas {
            out.extend(schema.expand_in(ctx, &parent)?);
        }
        Ok(out)
    }
}

impl Schema {
    fn expand_in(
        &self,
        ctx: &ExpandContext<'_>,
        catalog: &Parent<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let path = format!("{}.{}", catalog.name, self.name);
        let id = resource_id(self.resource_name.as_deref(), "schema", &path);
        let mut properties = to_properties(&id, self)?;
        strip(&mut properties, &["grants", "tables", "volumes"]);
        properties.insert("catalog_name".to_string(), catalog.name_ref());

        let primary = ctx.primary(id.clone(), ResourceKind::Schema, properties, &self.options);
        // Grants on a schema address its full name, which is the schema id.
        let mut out = with_grants(primary, "schema", "id", &self.grants)?;
        let parent = Parent {
            name: &self.name,
            id: &id,
        };
        for table in &self.tables {
            out.extend(table.expand_in(ctx, catalog, &parent)?);
        }
        for volume in &self.volumes {
            out.extend(volume.expand_in(ctx, catalog, &parent)?);
        }
        Ok(out)
    }
}

impl Table {
    fn expand_in(
        &self,
        ctx: &ExpandContext<'_>,
        catalog: &Parent<'_>,
        schema: &Parent<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let path = format!("{}.{}.{}", catalog.name, schema.name, self.name);
        let id = resource_id(self.resource_name.as_deref(), "table", &path);
        if self.table_type.as_deref() == Some("VIEW") && self.view_definition.is_none() {
            return Err(CompileError::invalid(&id, "view without view_definition"));
        }
        let mut properties = to_properties(&id, self)?;
        strip(&mut properties, &["grants"]);
        if self.columns.is_empty() {
            properties.shift_remove("columns");
        }
        properties.insert("catalog_name".to_string(), catalog.name_ref());
        properties.insert("schema_name".to_string(), schema.name_ref());

        let primary = ctx.primary(id, ResourceKind::Table, properties, &self.options);
        with_grants(primary, "table", "id", &self.grants)
    }
}

impl Volume {
    fn expand_in(
        &self,
        ctx: &ExpandContext<'_>,
        catalog: &Parent<'_>,
        schema: &Parent<'_>,
    ) -> Result<Vec<ResourceNode>, CompileError> {
        let path = format!("{}.{}.{}", catalog.name, schema.name, self.name);
        let id = resource_id(self.resource_name.as_deref(), "volume", &path);
        if self.volume_type == "EXTERNAL" && self.storage_location.is_none() {
            return Err(CompileError::invalid(
                &id,
                "external volume without storage_location",
            ));
        }
        let mut properties = to_properties(&id, self)?;
        strip(&mut properties, &["grants"]);
        properties.insert("catalog_name".to_string(), catalog.name_ref());
        properties.insert("schema_name".to_string(), schema.name_ref());

        let primary = ctx.primary(id, ResourceKind::Volume, properties, &self.options);
        with_grants(primary, "volume", "id", &self.grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Settings;

    const DEV: &str = r#"
name: dev
isolation_mode: OPEN
grants:
  - principal: account users
    privileges: [USE_CATALOG, USE_SCHEMA]
schemas:
  - name: sandbox
    grants:
      - principal: role-engineers
        privileges: [SELECT, MODIFY]
    tables:
      - name: brz_prices
        columns:
          - {name: symbol, type: string}
          - {name: close, type: double}
      - name: slv_prices_view
        table_type: VIEW
        view_definition: SELECT * FROM dev.sandbox.brz_prices
    volumes:
      - name: landing
        volume_type: EXTERNAL
        storage_location: abfss://landing@lake.dfs.core.windows.net/
"#;

    fn expand(c: &Catalog) -> Result<Vec<ResourceNode>, CompileError> {
        let settings = Settings::default();
        let ctx = ExpandContext::new(&settings, Some("databricks".to_string()));
        c.expand(&ctx)
    }

    #[test]
    fn test_ls012_nested_expansion_order() {
        let catalog: Catalog = serde_yaml_ng::from_str(DEV).unwrap();
        let ids: Vec<String> = expand(&catalog).unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(
            ids,
            vec![
                "catalog-dev",
                "grants-catalog-dev",
                "schema-dev-sandbox",
                "grants-schema-dev-sandbox",
                "table-dev-sandbox-brz_prices",
                "table-dev-sandbox-slv_prices_view",
                "volume-dev-sandbox-landing",
            ]
        );
    }

    #[test]
    fn test_ls012_children_reference_parents() {
        let catalog: Catalog = serde_yaml_ng::from_str(DEV).unwrap();
        let nodes = expand(&catalog).unwrap();
        let schema = &nodes[2];
        assert_eq!(schema.properties["catalog_name"], "${resources.catalog-dev.name}");
        assert!(schema.properties.get("tables").is_none());
        let table = &nodes[4];
        assert_eq!(table.properties["schema_name"], "${resources.schema-dev-sandbox.name}");
        assert_eq!(table.properties["columns"][1]["type"], "double");
        assert_eq!(nodes[1].properties["catalog"], "${resources.catalog-dev.name}");
        assert_eq!(nodes[3].properties["schema"], "${resources.schema-dev-sandbox.id}");
    }

    #[test]
    fn test_ls012_catalog_properties() {
        let catalog: Catalog = serde_yaml_ng::from_str(DEV).unwrap();
        let nodes = expand(&catalog).unwrap();
        let p = &nodes[0].properties;
        assert_eq!(p["name"], "dev");
        assert_eq!(p["isolation_mode"], "OPEN");
        assert!(p.get("schemas").is_none());
        assert!(p.get("grants").is_none());
        assert!(p.get("comment").is_none());
    }

    #[test]
    fn test_ls012_view_needs_definition() {
        let mut catalog: Catalog = serde_yaml_ng::from_str(DEV).unwrap();
        catalog.schemas[0].tables[1].view_definition = None;
        let err = expand(&catalog).unwrap_err();
        assert!(matches!(err, CompileError::InvalidDeclaration { ref resource, .. }
            if resource == "table-dev-sandbox-slv_prices_view"));
    }

    #[test]
    fn test_ls012_external_volume_needs_location() {
        let mut catalog: Catalog = serde_yaml_ng::from_str(DEV).unwrap();
        catalog.schemas[0].volumes[0].storage_location = None;
        assert!(expand(&catalog).is_err());
    }

    #[test]
    fn test_ls012_volume_default_type() {
        let v: Volume = serde_yaml_ng::from_str("name: files").unwrap();
        assert_eq!(v.volume_type, "MANAGED");
    }
}
