//! Dependency ordering of artifacts.
//!
//! The graph is bipartite: artifact nodes depend on the attribute nodes they
//! interpolate, and attribute nodes depend on the artifacts that provide
//! them. An artifact becomes reachable once all of its required attributes
//! are provided; an attribute is provided as soon as any one of its
//! providers is reachable. Nodes never reached are left out of the order
//! and reported.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::errors::ArtifactResult;
use crate::registry::ArtifactRegistry;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NodeKey {
    Attribute(String),
    Artifact(String),
}

#[derive(Debug, Default)]
struct DependencyNode {
    /// Unsatisfied prerequisites.
    incoming: BTreeSet<NodeKey>,
    /// Dependents.
    outgoing: BTreeSet<NodeKey>,
    is_provided: bool,
}

/// Output of `arrange`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrangedOrder {
    /// Artifacts in an order where every dependency is provided first.
    pub order: Vec<String>,
    /// Artifacts whose dependencies can never be provided.
    pub unreachable_artifacts: Vec<String>,
    /// Required attributes with no reachable provider.
    pub unreachable_attributes: Vec<String>,
    /// Attributes each artifact waits on, excluding those already known.
    pub requirements: BTreeMap<String, BTreeSet<String>>,
}

/// Arrange `names` and their dependency closure for collection on `os`.
///
/// `is_known` reports attributes already present in the knowledge base;
/// those count as provided from the start.
pub fn arrange(
    registry: &ArtifactRegistry,
    os: &str,
    names: &[String],
    is_known: impl Fn(&str) -> bool,
) -> ArtifactResult<ArrangedOrder> {
    let (artifacts, _) = registry.search_unresolved_dependencies(os, names, &is_known)?;

    let mut graph: BTreeMap<NodeKey, DependencyNode> = BTreeMap::new();
    let mut requirements: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for artifact in &artifacts {
        let definition = registry.get_artifact(artifact)?;
        let required: BTreeSet<String> = if definition.supports_os(os) {
            registry
                .artifact_dependencies(artifact)?
                .into_iter()
                .filter(|attr| !is_known(attr))
                .collect()
        } else {
            BTreeSet::new()
        };

        let artifact_key = NodeKey::Artifact(artifact.clone());
        graph.entry(artifact_key.clone()).or_default();
        for attribute in &required {
            let attribute_key = NodeKey::Attribute(attribute.clone());
            graph
                .entry(attribute_key.clone())
                .or_default()
                .outgoing
                .insert(artifact_key.clone());
            graph
                .entry(artifact_key.clone())
                .or_default()
                .incoming
                .insert(attribute_key);
        }
        requirements.insert(artifact.clone(), required);
    }

    // Provider edges, once every needed attribute node exists.
    let attribute_names: Vec<String> = graph
        .keys()
        .filter_map(|key| match key {
            NodeKey::Attribute(name) => Some(name.clone()),
            NodeKey::Artifact(_) => None,
        })
        .collect();
    for attribute in attribute_names {
        let attribute_key = NodeKey::Attribute(attribute.clone());
        for artifact in &artifacts {
            let definition = registry.get_artifact(artifact)?;
            if definition.supports_os(os) && definition.provides_attribute(&attribute) {
                let artifact_key = NodeKey::Artifact(artifact.clone());
                if let Some(node) = graph.get_mut(&artifact_key) {
                    node.outgoing.insert(attribute_key.clone());
                }
                if let Some(node) = graph.get_mut(&attribute_key) {
                    node.incoming.insert(artifact_key);
                }
            }
        }
    }

    let mut reachable: BTreeSet<NodeKey> = BTreeSet::new();
    for (key, node) in graph.iter_mut() {
        if matches!(key, NodeKey::Artifact(_)) && node.incoming.is_empty() {
            node.is_provided = true;
            reachable.insert(key.clone());
        }
    }

    let mut order = Vec::new();
    while let Some(key) = reachable.pop_first() {
        if let NodeKey::Artifact(name) = &key {
            order.push(name.clone());
        }
        let outgoing: Vec<NodeKey> = graph
            .get(&key)
            .map(|node| node.outgoing.iter().cloned().collect())
            .unwrap_or_default();

        for target in outgoing {
            let Some(node) = graph.get_mut(&target) else {
                continue;
            };
            if node.is_provided {
                continue;
            }
            match target {
                NodeKey::Attribute(_) => {
                    node.is_provided = true;
                    reachable.insert(target);
                }
                NodeKey::Artifact(_) => {
                    node.incoming.remove(&key);
                    if node.incoming.is_empty() {
                        node.is_provided = true;
                        reachable.insert(target);
                    }
                }
            }
        }
    }

    let mut unreachable_artifacts = Vec::new();
    let mut unreachable_attributes = Vec::new();
    for (key, node) in &graph {
        if node.is_provided {
            continue;
        }
        match key {
            NodeKey::Artifact(name) => unreachable_artifacts.push(name.clone()),
            NodeKey::Attribute(name) => unreachable_attributes.push(name.clone()),
        }
    }

    if !unreachable_artifacts.is_empty() {
        info!(
            "Dropping artifacts with unresolvable dependencies: {} (missing attributes: {})",
            unreachable_artifacts.join(", "),
            unreachable_attributes.join(", ")
        );
    }
    debug!("Collection order for {}: {}", os, order.join(", "));

    Ok(ArrangedOrder {
        order,
        unreachable_artifacts,
        unreachable_attributes,
        requirements,
    })
}

/// Convenience wrapper returning only the order.
pub fn get_artifacts_in_proper_order(
    registry: &ArtifactRegistry,
    os: &str,
    names: &[String],
    is_known: impl Fn(&str) -> bool,
) -> ArtifactResult<Vec<String>> {
    Ok(arrange(registry, os, names, is_known)?.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{definition, group};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_provider_before_dependent() {
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("UsersFile", &["/etc/passwd"], &["users"]),
            definition("SshdConfig", &["%%users.homedir%%/.ssh/sshd_config"], &[]),
        ])
        .unwrap();
        let arranged = arrange(&registry, "Linux", &names(&["SshdConfig"]), |_| false).unwrap();
        assert_eq!(arranged.order, names(&["UsersFile", "SshdConfig"]));
        assert!(arranged.unreachable_artifacts.is_empty());
        assert_eq!(
            arranged.requirements["SshdConfig"].iter().cloned().collect::<Vec<_>>(),
            names(&["users.homedir"])
        );
    }

    #[test]
    fn test_known_attributes_are_not_waited_on() {
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("UsersFile", &["/etc/passwd"], &["users"]),
            definition("SshdConfig", &["%%users.homedir%%/.ssh/sshd_config"], &[]),
        ])
        .unwrap();
        let arranged = arrange(&registry, "Linux", &names(&["SshdConfig"]), |a| a == "users.homedir").unwrap();
        assert_eq!(arranged.order, names(&["SshdConfig"]));
    }

    #[test]
    fn test_provider_only_reachable_through_known_attribute_is_skipped() {
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("OsRelease", &["/etc/os-release"], &["os_release"]),
            definition("UsersFile", &["/etc/%%os_release%%/passwd"], &["users"]),
            definition("SshdConfig", &["%%users.homedir%%/.ssh/sshd_config"], &[]),
        ])
        .unwrap();
        let known = |a: &str| a == "users.homedir";
        let arranged = arrange(&registry, "Linux", &names(&["SshdConfig"]), known).unwrap();
        assert_eq!(arranged.order, names(&["SshdConfig"]));
        assert!(!arranged.requirements.contains_key("UsersFile"));

        // Requested by name, the provider and its own chain are kept.
        let arranged = arrange(&registry, "Linux", &names(&["SshdConfig", "UsersFile"]), known).unwrap();
        assert_eq!(arranged.order, names(&["OsRelease", "SshdConfig", "UsersFile"]));
    }

    #[test]
    fn test_cycles_terminate_and_are_excluded() {
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("A", &["%%b_attr%%"], &["a_attr"]),
            definition("B", &["%%a_attr%%"], &["b_attr"]),
            definition("C", &["/etc/c"], &[]),
        ])
        .unwrap();
        let arranged = arrange(&registry, "Linux", &names(&["A", "C"]), |_| false).unwrap();
        assert_eq!(arranged.order, names(&["C"]));
        assert_eq!(arranged.unreachable_artifacts, names(&["A", "B"]));
        assert_eq!(arranged.unreachable_attributes, names(&["a_attr", "b_attr"]));
    }

    #[test]
    fn test_missing_provider_is_unreachable() {
        let registry = ArtifactRegistry::from_definitions(vec![definition(
            "Desktop",
            &["%%users.desktop%%/x"],
            &[],
        )])
        .unwrap();
        let arranged = arrange(&registry, "Windows", &names(&["Desktop"]), |_| false).unwrap();
        assert!(arranged.order.is_empty());
        assert_eq!(arranged.unreachable_artifacts, names(&["Desktop"]));
    }

    #[test]
    fn test_any_provider_satisfies_attribute() {
        // One provider sits in a cycle, the other is free.
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("Stuck", &["%%never%%"], &["shared"]),
            definition("Free", &["/x"], &["shared"]),
            definition("Consumer", &["%%shared%%/y"], &[]),
        ])
        .unwrap();
        let arranged = arrange(&registry, "Linux", &names(&["Consumer"]), |_| false).unwrap();
        assert_eq!(arranged.order, names(&["Free", "Consumer"]));
        assert_eq!(arranged.unreachable_artifacts, names(&["Stuck"]));
    }

    #[test]
    fn test_group_members_contribute_dependencies() {
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("UsersFile", &["/etc/passwd"], &["users"]),
            definition("History", &["%%users.homedir%%/.bash_history"], &[]),
            group("Bundle", &["History"]),
        ])
        .unwrap();
        let order = get_artifacts_in_proper_order(&registry, "Linux", &names(&["Bundle"]), |_| false).unwrap();
        assert!(position(&order, "UsersFile") < position(&order, "Bundle"));
    }

    #[test]
    fn test_order_respects_every_dependency() {
        let registry = ArtifactRegistry::from_definitions(vec![
            definition("Os", &["/etc/os-release"], &["os_release"]),
            definition("Users", &["/etc/%%os_release%%/passwd"], &["users"]),
            definition("Env", &["/env"], &["environ_home"]),
            definition("Keys", &["%%users.homedir%%/%%environ_home%%"], &[]),
        ])
        .unwrap();
        let arranged = arrange(&registry, "Linux", &names(&["Keys"]), |_| false).unwrap();
        for (i, name) in arranged.order.iter().enumerate() {
            for attribute in &arranged.requirements[name] {
                let provided_earlier = arranged.order[..i]
                    .iter()
                    .any(|p| registry.get_artifact(p).unwrap().provides_attribute(attribute));
                assert!(provided_earlier, "{} needs {} before it", name, attribute);
            }
        }
        assert_eq!(arranged.order.len(), 4);
    }

    #[test]
    fn test_unknown_artifact() {
        let registry = ArtifactRegistry::from_definitions(vec![]).unwrap();
        assert!(arrange(&registry, "Linux", &names(&["Nope"]), |_| false).is_err());
    }
}
