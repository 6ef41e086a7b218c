//! LS-010: Access-control auxiliaries (permissions and grants).

use crate::core::error::CompileError;
use crate::core::reference::ReferencePlaceholder;
use crate::core::types::{Properties, ResourceKind, ResourceNode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Workspace object permission for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal_name: Option<String>,
    pub permission_level: String,
}

impl AccessControl {
    /// The single principal this entry applies to.
    pub fn principal(&self) -> Option<&str> {
        match (
            self.group_name.as_deref(),
            self.user_name.as_deref(),
            self.service_principal_name.as_deref(),
        ) {
            (Some(p), None, None) | (None, Some(p), None) | (None, None, Some(p)) => Some(p),
            _ => None,
        }
    }

    /// Same principal at another level.
    pub fn with_level(&self, level: &str) -> Self {
        Self {
            permission_level: level.to_string(),
            ..self.clone()
        }
    }
}

/// Data privilege set for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub principal: String,
    pub privileges: Vec<String>,
}

/// `permissions-<owner>` bound to `owner`, or nothing when `access` is empty.
///
/// `target_field` is the permissions attribute naming the object
/// (`notebook_path`, `job_id`, ...); it receives `owner.<target_attr>`.
pub fn permissions(
    owner: &ResourceNode,
    target_field: &str,
    target_attr: &str,
    access: &[AccessControl],
) -> Result<Option<ResourceNode>, CompileError> {
    if access.is_empty() {
        return Ok(None);
    }
    let id = format!("permissions-{}", owner.id);
    let mut entries = Vec::with_capacity(access.len());
    for (i, ac) in access.iter().enumerate() {
        if ac.principal().is_none() {
            return Err(CompileError::invalid(
                &id,
                format!("access_controls[{}] must name exactly one principal", i),
            ));
        }
        entries.push(json!(ac));
    }

    let mut properties = Properties::new();
    properties.insert(
        target_field.to_string(),
        json!(ReferencePlaceholder::attr(&owner.id, target_attr)),
    );
    properties.insert("access_controls".to_string(), Value::Array(entries));
    Ok(Some(ResourceNode::auxiliary(
        id,
        ResourceKind::Permissions,
        properties,
        owner,
    )))
}

/// `grants-<owner>` bound to `owner`, or nothing when `grants` is empty.
pub fn grants(
    owner: &ResourceNode,
    target_field: &str,
    target_attr: &str,
    grants: &[Grant],
) -> Result<Option<ResourceNode>, CompileError> {
    if grants.is_empty() {
        return Ok(None);
    }
    let id = format!("grants-{}", owner.id);
    if let Some(g) = grants.iter().find(|g| g.principal.is_empty()) {
        return Err(CompileError::invalid(
            &id,
            format!("grant with privileges {:?} has no principal", g.privileges),
        ));
    }

    let mut properties = Properties::new();
    properties.insert(
        target_field.to_string(),
        json!(ReferencePlaceholder::attr(&owner.id, target_attr)),
    );
    properties.insert("grants".to_string(), json!(grants));
    Ok(Some(ResourceNode::auxiliary(
        id,
        ResourceKind::Grants,
        properties,
        owner,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeletionPolicy;

    fn owner() -> ResourceNode {
        ResourceNode {
            id: "job-stock-prices".to_string(),
            kind: ResourceKind::Job,
            properties: Properties::new(),
            provider_ref: Some("databricks".to_string()),
            depends_on: Vec::new(),
            owner: None,
            deletion_policy: DeletionPolicy::Retain,
            delete_before_replace: true,
        }
    }

    fn group(level: &str) -> AccessControl {
        AccessControl {
            group_name: Some("role-engineers".to_string()),
            user_name: None,
            service_principal_name: None,
            permission_level: level.to_string(),
        }
    }

    #[test]
    fn test_ls010_permissions_shape() {
        let p = permissions(&owner(), "job_id", "id", &[group("CAN_MANAGE_RUN")])
            .unwrap()
            .unwrap();
        assert_eq!(p.id, "permissions-job-stock-prices");
        assert_eq!(p.kind, ResourceKind::Permissions);
        assert_eq!(p.owner.as_deref(), Some("job-stock-prices"));
        assert_eq!(p.provider_ref.as_deref(), Some("databricks"));
        // Auxiliaries never inherit a retain policy
        assert_eq!(p.deletion_policy, DeletionPolicy::Delete);
        assert_eq!(p.properties["job_id"], "${resources.job-stock-prices.id}");
        assert_eq!(
            p.properties["access_controls"],
            json!([{"group_name": "role-engineers", "permission_level": "CAN_MANAGE_RUN"}])
        );
    }

    #[test]
    fn test_ls010_permissions_empty() {
        assert!(permissions(&owner(), "job_id", "id", &[]).unwrap().is_none());
    }

    #[test]
    fn test_ls010_permissions_need_one_principal() {
        let mut ac = group("CAN_READ");
        ac.user_name = Some("jane@example.com".to_string());
        let err = permissions(&owner(), "job_id", "id", &[ac]).unwrap_err();
        assert!(matches!(err, CompileError::InvalidDeclaration { ref resource, .. }
            if resource == "permissions-job-stock-prices"));
    }

    #[test]
    fn test_ls010_with_level() {
        let ac = group("CAN_MANAGE").with_level("CAN_READ");
        assert_eq!(ac.permission_level, "CAN_READ");
        assert_eq!(ac.principal(), Some("role-engineers"));
    }

    #[test]
    fn test_ls010_grants_shape() {
        let g = Grant {
            principal: "role-analysts".to_string(),
            privileges: vec!["USE_CATALOG".to_string(), "SELECT".to_string()],
        };
        let node = grants(&owner(), "catalog", "name", &[g]).unwrap().unwrap();
        assert_eq!(node.id, "grants-job-stock-prices");
        assert_eq!(node.kind, ResourceKind::Grants);
        assert_eq!(node.properties["catalog"], "${resources.job-stock-prices.name}");
        assert_eq!(node.properties["grants"][0]["privileges"][1], "SELECT");
    }

    #[test]
    fn test_ls010_grants_need_principal() {
        let g = Grant {
            principal: String::new(),
            privileges: vec!["SELECT".to_string()],
        };
        assert!(grants(&owner(), "catalog", "name", &[g]).is_err());
    }
}
