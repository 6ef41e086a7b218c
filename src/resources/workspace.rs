//! LS-013: Workspace notebooks and files.
//!
//! The workspace path is the object's identity: the resource id is derived
//! from it, and permissions address the object by it.

use super::access::{self, AccessControl};
use crate::core::error::CompileError;
use crate::core::expander::{resource_id, to_properties, Expand, ExpandContext};
use crate::core::types::{ResourceKind, ResourceNode, ResourceOptions, Settings};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Local source file
    pub source: String,
    /// Workspace path (derived when absent)
    #[serde(default)]
    pub path: Option<String>,
    /// Workspace directory; the source file name is appended
    #[serde(default)]
    pub dirpath: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub access_controls: Vec<AccessControl>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Local source file
    #[serde(default)]
    pub source: Option<String>,
    /// Inline content, base64-encoded
    #[serde(default)]
    pub content_base64: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub dirpath: Option<String>,
    #[serde(default)]
    pub access_controls: Vec<AccessControl>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub options: ResourceOptions,
}

/// Workspace path of an uploaded source.
///
/// Explicit path wins; then `dirpath` plus the file name; then, when the
/// source sits under a `/<marker>/` directory, the part after the marker
/// relocated under the workspace root.
fn workspace_path(
    explicit: Option<&str>,
    dirpath: Option<&str>,
    source: &str,
    marker: &str,
    settings: &Settings,
) -> Option<String> {
    if let Some(p) = explicit {
        return Some(p.to_string());
    }
    let filename = source.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(source);
    if let Some(dir) = dirpath {
        let dir = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        return Some(format!("{}{}", dir, filename));
    }
    let needle = format!("/{}/", marker);
    source
        .find(&needle)
        .map(|i| format!("{}{}", settings.workspace_root, &source[i + needle.len()..]))
}

impl Notebook {
    pub fn resolved_path(&self, settings: &Settings) -> Option<String> {
        workspace_path(
            self.path.as_deref(),
            self.dirpath.as_deref(),
            &self.source,
            "notebooks",
            settings,
        )
    }
}

impl Expand for Notebook {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        let path = self.resolved_path(ctx.settings);
        let key = path.as_deref().unwrap_or(&self.source);
        let id = resource_id(self.resource_name.as_deref(), "notebook", key);

        let mut properties = to_properties(&id, self)?;
        for k in ["dirpath", "access_controls"] {
            properties.shift_remove(k);
        }
        if let Some(p) = &path {
            properties.insert("path".to_string(), json!(p));
        }

        let primary = ctx.primary(id, ResourceKind::Notebook, properties, &self.options);
        let perms = access::permissions(&primary, "notebook_path", "path", &self.access_controls)?;
        Ok(std::iter::once(primary).chain(perms).collect())
    }
}

impl WorkspaceFile {
    pub fn resolved_path(&self, settings: &Settings) -> Option<String> {
        let source = self.source.as_deref().unwrap_or_default();
        workspace_path(
            self.path.as_deref(),
            self.dirpath.as_deref().filter(|_| !source.is_empty()),
            source,
            "workspacefiles",
            settings,
        )
    }
}

impl Expand for WorkspaceFile {
    fn expand(&self, ctx: &ExpandContext<'_>) -> Result<Vec<ResourceNode>, CompileError> {
        let path = self.resolved_path(ctx.settings);
        let key = path
            .as_deref()
            .or(self.source.as_deref())
            .unwrap_or_default();
        if key.is_empty() && self.resource_name.is_none() {
            return Err(CompileError::invalid(
                "workspace-file",
                "workspace file needs a source, a path, or a resource_name",
            ));
        }
        let id = resource_id(self.resource_name.as_deref(), "workspace-file", key);
        if self.source.is_none() && self.content_base64.is_none() {
            return Err(CompileError::invalid(&id, "workspace file has no source or content"));
        }

        let mut properties = to_properties(&id, self)?;
        for k in ["dirpath", "access_controls"] {
            properties.shift_remove(k);
        }
        if let Some(p) = &path {
            properties.insert("path".to_string(), json!(p));
        }

        let primary = ctx.primary(id, ResourceKind::WorkspaceFile, properties, &self.options);
        let perms = access::permissions(
            &primary,
            "workspace_file_path",
            "path",
            &self.access_controls,
        )?;
        Ok(std::iter::once(primary).chain(perms).collect())
    }
}
