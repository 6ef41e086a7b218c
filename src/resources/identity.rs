//! LS-014: Groups, users, and service principals.
//!
//! Memberships and account roles are separate resources bound to the
//! principal, one per group or role.

use crate::core::error::CompileError;
use crate::core::expander::{resource_id, resource_key, to_properties, Expand, ExpandContext};
use crate::core::reference::{self, ReferencePlaceholder};
use crate::core::types::{Properties, ResourceKind, ResourceNode, ResourceOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub display_name: String,
    #[serde(default)]
    pub allow_cluster_create: Option<bool>,
    #[serde(default)]
    pub workspace_access: Option<bool>,
    #[serde(default)]
    pub databricks_sql_access: Option<bool>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub workspace_access: Option<bool>,
    /// Group ids or placeholders (`${resources.group-x.id}`)
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePrincipal {
    pub display_name: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

impl Expand for Group {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        if self.display_name.is_empty() {
            return Err(CompileError::invalid("group", "group with empty display_name"));
        }
        let id = resource_id(self.resource_name.as_deref(), "group", &self.display_name);
        let properties = to_properties(&id, self)?;
        Ok(vec![ctx.primary(id, ResourceKind::Group, properties, &self.options)])
    }
}

/// Key naming a group in member ids: the group resource id when referenced
/// by placeholder, else the raw value.
fn group_key(group_id: &str) -> String {
    resource_key(&reference::normalize_id(group_id))
}

/// Membership and role auxiliaries of a principal.
fn principal_links(
    principal: &ResourceNode,
    group_ids: &[String],
    roles: &[String],
    role_kind: ResourceKind,
    role_prefix: &str,
    role_field: &str,
) -> Vec<ResourceNode> {
    let member_ref = json!(ReferencePlaceholder::attr(&principal.id, "id"));
    let mut out = Vec::with_capacity(group_ids.len() + roles.len());
    for group_id in group_ids {
        let mut properties = Properties::new();
        properties.insert("group_id".to_string(), json!(group_id));
        properties.insert("member_id".to_string(), member_ref.clone());
        out.push(ResourceNode::auxiliary(
            format!("group-member-{}-{}", principal.id, group_key(group_id)),
            ResourceKind::GroupMember,
            properties,
            principal,
        ));
    }
    for role in roles {
        let mut properties = Properties::new();
        properties.insert(role_field.to_string(), member_ref.clone());
        properties.insert("role".to_string(), json!(role));
        out.push(ResourceNode::auxiliary(
            format!("{}-{}-{}", role_prefix, principal.id, resource_key(role)),
            role_kind,
            properties,
            principal,
        ));
    }
    out
}

impl Expand for User {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        if self.user_name.is_empty() {
            return Err(CompileError::invalid("user", "user with empty user_name"));
        }
        let id = resource_id(self.resource_name.as_deref(), "user", &self.user_name);
        let mut properties = to_properties(&id, self)?;
        properties.shift_remove("group_ids");
        properties.shift_remove("roles");

        let primary = ctx.primary(id, ResourceKind::User, properties, &self.options);
        let links = principal_links(
            &primary,
            &self.group_ids,
            &self.roles,
            ResourceKind::UserRole,
            "user-role",
            "user_id",
        );
        Ok(std::iter::once(primary).chain(links).collect())
    }
}

impl Expand for ServicePrincipal {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        if self.display_name.is_empty() {
            return Err(CompileError::invalid(
                "service-principal",
                "service principal with empty display_name",
            ));
        }
        let id = resource_id(
            self.resource_name.as_deref(),
            "service-principal",
            &self.display_name,
        );
        let mut properties = to_properties(&id, self)?;
        properties.shift_remove("group_ids");
        properties.shift_remove("roles");

        let primary = ctx.primary(id, ResourceKind::ServicePrincipal, properties, &self.options);
        let links = principal_links(
            &primary,
            &self.group_ids,
            &self.roles,
            ResourceKind::ServicePrincipalRole,
            "service-principal-role",
            "service_principal_id",
        );
        Ok(std::iter::once(primary).chain(links).collect())
    }
}
