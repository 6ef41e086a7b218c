//! LS-004: Dependency edge resolution and stable topological ordering.
//!
//! Edges come from explicit `depends_on`, owner links of auxiliary resources,
//! provider bindings, and reference placeholders found in property values.
//! Ordering uses Kahn's algorithm with declaration-order tie-breaking so an
//! unchanged stack always yields the same order.

use super::error::CompileError;
use super::reference;
use super::types::ResourceNode;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Why an edge exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum EdgeOrigin {
    Explicit,
    Owner,
    Provider,
    Reference { path: String },
}

/// `from` must be provisioned after `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub origin: EdgeOrigin,
}

impl Edge {
    /// Edges a backend must be told about explicitly. Reference edges are
    /// implied by the interpolated value itself.
    pub fn is_ordering_hint(&self) -> bool {
        matches!(self.origin, EdgeOrigin::Explicit | EdgeOrigin::Owner)
    }
}

/// Resolved edges plus the provisioning order (indices into the input).
#[derive(Debug, Clone)]
pub struct Resolution {
    pub edges: Vec<Edge>,
    pub order: Vec<usize>,
}

/// Build the edge set over `resources` and order them.
pub fn resolve(resources: &[ResourceNode]) -> Result<Resolution, CompileError> {
    let index: HashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.as_str(), i))
        .collect();

    let mut edges: Vec<Edge> = Vec::new();
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    let mut seen: HashSet<(usize, usize)> = HashSet::new();

    for (from_idx, resource) in resources.iter().enumerate() {
        let mut candidates: Vec<(String, String, EdgeOrigin)> = Vec::new();

        if let Some(owner) = &resource.owner {
            candidates.push(("owner".to_string(), owner.clone(), EdgeOrigin::Owner));
        }
        for (i, dep) in resource.depends_on.iter().enumerate() {
            candidates.push((
                format!("options.depends_on[{}]", i),
                dep.clone(),
                EdgeOrigin::Explicit,
            ));
        }
        if let Some(provider) = &resource.provider_ref {
            candidates.push((
                "options.provider".to_string(),
                provider.clone(),
                EdgeOrigin::Provider,
            ));
        }
        for (path, placeholder) in reference::scan(&resource.properties) {
            candidates.push((
                path.clone(),
                placeholder.resource,
                EdgeOrigin::Reference { path },
            ));
        }

        for (path, target, origin) in candidates {
            let to_idx = *index.get(target.as_str()).ok_or_else(|| {
                CompileError::UnresolvedReference {
                    resource: resource.id.clone(),
                    path: path.clone(),
                    target: target.clone(),
                }
            })?;
            if to_idx == from_idx {
                return Err(CompileError::CyclicDependency {
                    graph: "resources".to_string(),
                    ids: vec![resource.id.clone()],
                });
            }
            if seen.insert((from_idx, to_idx)) {
                pairs.push((from_idx, to_idx));
                edges.push(Edge {
                    from: resource.id.clone(),
                    to: target,
                    origin,
                });
            }
        }
    }

    let order = stable_toposort(resources.len(), &pairs).map_err(|cycle| {
        CompileError::CyclicDependency {
            graph: "resources".to_string(),
            ids: cycle.into_iter().map(|i| resources[i].id.clone()).collect(),
        }
    })?;

    tracing::debug!(resources = resources.len(), edges = edges.len(), "resolved edges");
    Ok(Resolution { edges, order })
}

/// Kahn's algorithm over `len` nodes; `edges` are `(after, before)` pairs.
///
/// Ready nodes are taken lowest index first. On a cycle, returns the indices
/// of one cycle, ascending.
pub(crate) fn stable_toposort(
    len: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree = vec![0usize; len];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); len];
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); len];

    for &(after, before) in edges {
        dependents[before].push(after);
        dependencies[after].push(before);
        in_degree[after] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..len).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(len);

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == len {
        return Ok(order);
    }

    // Every unordered node still waits on an unordered dependency, so walking
    // dependencies from any of them must revisit a node.
    let placed: HashSet<usize> = order.iter().copied().collect();
    let remaining = |i: &usize| !placed.contains(i);
    let mut current = (0..len).find(remaining).unwrap_or(0);
    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();

    loop {
        if let Some(&start) = position.get(&current) {
            let mut cycle = path[start..].to_vec();
            cycle.sort_unstable();
            return Err(cycle);
        }
        position.insert(current, path.len());
        path.push(current);
        match dependencies[current].iter().copied().filter(remaining).min() {
            Some(next) => current = next,
            None => return Err(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DeletionPolicy, Properties, ResourceKind};
    use serde_json::json;

    fn node(id: &str, depends_on: &[&str], properties: serde_json::Value) -> ResourceNode {
        ResourceNode {
            id: id.to_string(),
            kind: ResourceKind::Notebook,
            properties: properties.as_object().cloned().unwrap_or_else(Properties::new),
            provider_ref: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            owner: None,
            deletion_policy: DeletionPolicy::Delete,
            delete_before_replace: true,
        }
    }

    fn ids(resources: &[ResourceNode], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| resources[i].id.clone()).collect()
    }

    #[test]
    fn test_ls004_topo_linear() {
        let rs = vec![
            node("c", &["b"], json!({})),
            node("b", &["a"], json!({})),
            node("a", &[], json!({})),
        ];
        let res = resolve(&rs).unwrap();
        assert_eq!(ids(&rs, &res.order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ls004_ties_follow_declaration_order() {
        let rs = vec![
            node("zeta", &[], json!({})),
            node("alpha", &[], json!({})),
            node("mid", &[], json!({})),
        ];
        let res = resolve(&rs).unwrap();
        // Declaration order, not alphabetical
        assert_eq!(ids(&rs, &res.order), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_ls004_topo_diamond() {
        let rs = vec![
            node("bottom", &["left", "right"], json!({})),
            node("right", &["top"], json!({})),
            node("left", &["top"], json!({})),
            node("top", &[], json!({})),
        ];
        let res = resolve(&rs).unwrap();
        assert_eq!(ids(&rs, &res.order), vec!["top", "right", "left", "bottom"]);
    }

    #[test]
    fn test_ls004_reference_edge() {
        let rs = vec![
            node("perm", &[], json!({"notebook_path": "${resources.nb.path}"})),
            node("nb", &[], json!({"path": "/x.py"})),
        ];
        let res = resolve(&rs).unwrap();
        assert_eq!(ids(&rs, &res.order), vec!["nb", "perm"]);
        assert_eq!(res.edges.len(), 1);
        assert_eq!(
            res.edges[0].origin,
            EdgeOrigin::Reference {
                path: "notebook_path".to_string()
            }
        );
        assert!(!res.edges[0].is_ordering_hint());
    }

    #[test]
    fn test_ls004_owner_edge() {
        let mut aux = node("permissions-nb", &[], json!({}));
        aux.owner = Some("nb".to_string());
        let rs = vec![aux, node("nb", &[], json!({}))];
        let res = resolve(&rs).unwrap();
        assert_eq!(res.edges[0].from, "permissions-nb");
        assert_eq!(res.edges[0].to, "nb");
        assert_eq!(res.edges[0].origin, EdgeOrigin::Owner);
        assert!(res.edges[0].is_ordering_hint());
    }

    #[test]
    fn test_ls004_duplicate_edges_collapse() {
        let rs = vec![
            node("a", &[], json!({})),
            node("b", &["a"], json!({"x": "${resources.a.id}", "y": "${resources.a.name}"})),
        ];
        let res = resolve(&rs).unwrap();
        assert_eq!(res.edges.len(), 1);
        assert_eq!(res.edges[0].origin, EdgeOrigin::Explicit);
    }

    #[test]
    fn test_ls004_unresolved_reference() {
        let rs = vec![node("a", &[], json!({"p": {"q": "${resources.ghost.id}"}}))];
        let err = resolve(&rs).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedReference {
                resource: "a".to_string(),
                path: "p.q".to_string(),
                target: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn test_ls004_unresolved_provider() {
        let mut r = node("a", &[], json!({}));
        r.provider_ref = Some("databricks".to_string());
        let err = resolve(&[r]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnresolvedReference { ref path, ref target, .. }
                if path == "options.provider" && target == "databricks"
        ));
    }

    #[test]
    fn test_ls004_cycle_names_members() {
        let rs = vec![
            node("root", &[], json!({})),
            node("a", &["b", "root"], json!({})),
            node("b", &["a"], json!({})),
            node("leaf", &["a"], json!({})),
        ];
        let err = resolve(&rs).unwrap_err();
        assert_eq!(
            err,
            CompileError::CyclicDependency {
                graph: "resources".to_string(),
                ids: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn test_ls004_self_reference_is_cycle() {
        let rs = vec![node("a", &[], json!({"x": "${resources.a.id}"}))];
        let err = resolve(&rs).unwrap_err();
        assert!(matches!(err, CompileError::CyclicDependency { ids, .. } if ids == vec!["a"]));
    }

    #[test]
    fn test_ls004_stable_toposort_reports_three_cycle() {
        let cycle = stable_toposort(4, &[(1, 2), (2, 3), (3, 1)]).unwrap_err();
        assert_eq!(cycle, vec![1, 2, 3]);
    }
}
