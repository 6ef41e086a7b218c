//! LS-002: Structured compiler errors.
//!
//! Every error aborts the whole compilation and names the offending
//! resource ids (and property path where one exists).

use super::compiler::Stage;
use crate::backends::Backend;
use crate::core::types::ResourceKind;
use thiserror::Error;

/// Failure while turning a stack into a resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("duplicate resource name '{id}' (declared as {first} and {second})")]
    DuplicateResourceName {
        id: String,
        first: ResourceKind,
        second: ResourceKind,
    },

    #[error("pipeline '{pipeline}' declares node '{node}' more than once")]
    DuplicateNodeName { pipeline: String, node: String },

    #[error("'{resource}' property '{path}' references unknown '{target}'")]
    UnresolvedReference {
        resource: String,
        path: String,
        target: String,
    },

    #[error("dependency cycle in {graph} involving: {}", ids.join(", "))]
    CyclicDependency { graph: String, ids: Vec<String> },

    #[error("pipeline '{pipeline}' node '{node}': cannot derive source: {reason}")]
    SinkSourceTransform {
        pipeline: String,
        node: String,
        reason: String,
    },

    #[error("invalid declaration '{resource}': {message}")]
    InvalidDeclaration { resource: String, message: String },
}

impl CompileError {
    /// Stage that was being entered when the error occurred.
    pub fn stage(&self) -> Stage {
        match self {
            Self::DuplicateNodeName { .. }
            | Self::SinkSourceTransform { .. }
            | Self::InvalidDeclaration { .. } => Stage::Expanded,
            Self::DuplicateResourceName { .. }
            | Self::UnresolvedReference { .. }
            | Self::CyclicDependency { .. } => Stage::DependenciesResolved,
        }
    }

    pub(crate) fn invalid(resource: &str, message: impl Into<String>) -> Self {
        Self::InvalidDeclaration {
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

/// Failure while serializing a resolved graph for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("{backend}: resource '{resource}' ({kind}) has no value for required field '{field}'")]
    IncompatibleBackendField {
        backend: Backend,
        resource: String,
        kind: ResourceKind,
        field: String,
    },

    #[error("{backend}: cannot render document: {message}")]
    Render { backend: Backend, message: String },
}

/// Failure while loading a stack file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ls002_cycle_message_lists_ids() {
        let e = CompileError::CyclicDependency {
            graph: "resources".to_string(),
            ids: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(e.to_string(), "dependency cycle in resources involving: a, b");
        assert_eq!(e.stage(), Stage::DependenciesResolved);
    }

    #[test]
    fn test_ls002_unresolved_message() {
        let e = CompileError::UnresolvedReference {
            resource: "permissions-notebook-x".to_string(),
            path: "notebook_path".to_string(),
            target: "notebook-x".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("permissions-notebook-x"));
        assert!(msg.contains("notebook_path"));
        assert!(msg.contains("'notebook-x'"));
    }

    #[test]
    fn test_ls002_expansion_errors_stage() {
        let e = CompileError::invalid("job-x", "bad");
        assert_eq!(e.stage(), Stage::Expanded);
        let e = CompileError::SinkSourceTransform {
            pipeline: "pl".to_string(),
            node: "n".to_string(),
            reason: "no sink".to_string(),
        };
        assert_eq!(e.stage(), Stage::Expanded);
    }

    #[test]
    fn test_ls002_emit_error_message() {
        let e = EmitError::IncompatibleBackendField {
            backend: Backend::Terraform,
            resource: "notebook-x".to_string(),
            kind: ResourceKind::Notebook,
            field: "path".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "terraform: resource 'notebook-x' (notebook) has no value for required field 'path'"
        );
    }
}
