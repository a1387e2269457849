//! Attribute dependency queries over a registry snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::ArtifactDefinition;
use crate::errors::{ArtifactError, ArtifactResult};

pub(crate) type DefinitionMap = BTreeMap<String, Arc<ArtifactDefinition>>;

fn lookup<'a>(map: &'a DefinitionMap, name: &str) -> ArtifactResult<&'a Arc<ArtifactDefinition>> {
    map.get(name)
        .ok_or_else(|| ArtifactError::NotRegistered(name.to_string()))
}

/// Attributes an artifact needs before it can be collected: its own
/// placeholders plus those of every group member, recursively.
pub(crate) fn path_dependencies(map: &DefinitionMap, name: &str) -> ArtifactResult<BTreeSet<String>> {
    let mut attributes = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![name.to_string()];

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let definition = lookup(map, &current)?;
        attributes.extend(definition.placeholder_attributes());
        stack.extend(definition.referenced_artifacts());
    }
    Ok(attributes)
}

/// Names of artifacts that supply `attribute` on `os`.
pub(crate) fn providers(map: &DefinitionMap, attribute: &str, os: Option<&str>) -> Vec<String> {
    map.values()
        .filter(|def| os.map_or(true, |os| def.supports_os(os)))
        .filter(|def| def.provides_attribute(attribute))
        .map(|def| def.name.clone())
        .collect()
}

/// Transitive closure of artifacts and attributes needed to collect `names`.
///
/// Alternates between "attributes this artifact needs" and "artifacts that
/// provide this attribute" until nothing new is added. Artifacts that do
/// not support `os` are kept in the result but contribute no dependencies.
/// Attributes for which `is_known` holds are neither returned nor expanded
/// into their providers.
pub(crate) fn search_dependencies(
    map: &DefinitionMap,
    os: &str,
    names: &[String],
    is_known: &dyn Fn(&str) -> bool,
) -> ArtifactResult<(BTreeSet<String>, BTreeSet<String>)> {
    let mut artifacts: BTreeSet<String> = BTreeSet::new();
    let mut attributes: BTreeSet<String> = BTreeSet::new();
    let mut pending: Vec<String> = names.to_vec();

    while let Some(name) = pending.pop() {
        if !artifacts.insert(name.clone()) {
            continue;
        }
        let definition = lookup(map, &name)?;
        if !definition.supports_os(os) {
            continue;
        }
        for attribute in path_dependencies(map, &name)? {
            if is_known(&attribute) || !attributes.insert(attribute.clone()) {
                continue;
            }
            for provider in providers(map, &attribute, Some(os)) {
                if !artifacts.contains(&provider) {
                    pending.push(provider);
                }
            }
        }
    }
    Ok((artifacts, attributes))
}

/// Detect ARTIFACT_GROUP/ARTIFACT_FILES cycles. Returns the first cycle found
/// as a path of names.
pub(crate) fn find_group_cycle(map: &DefinitionMap) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        map: &DefinitionMap,
        name: &str,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());
        if let Some(definition) = map.get(name) {
            for member in definition.referenced_artifacts() {
                if let Some(cycle) = visit(map, &member, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for name in map.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(map, name, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{definition, group};

    fn map(defs: Vec<ArtifactDefinition>) -> DefinitionMap {
        defs.into_iter().map(|d| (d.name.clone(), Arc::new(d))).collect()
    }

    #[test]
    fn test_path_dependencies_include_group_members() {
        let m = map(vec![
            definition("Keys", &["%%users.homedir%%/.ssh/authorized_keys"], &[]),
            definition("Root", &["%%environ_systemroot%%/x"], &[]),
            group("All", &["Keys", "Root"]),
        ]);
        let deps = path_dependencies(&m, "All").unwrap();
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec!["environ_systemroot".to_string(), "users.homedir".to_string()]
        );
        assert!(matches!(
            path_dependencies(&m, "Missing"),
            Err(ArtifactError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_search_dependencies_closure() {
        let m = map(vec![
            definition("Passwd", &["/etc/passwd"], &["users"]),
            definition("Sshd", &["%%users.homedir%%/.ssh/config"], &[]),
            definition("Unrelated", &["/etc/hosts"], &[]),
        ]);
        let names = vec!["Sshd".to_string()];
        let (artifacts, attributes) = search_dependencies(&m, "Linux", &names, &|_| false).unwrap();
        assert_eq!(artifacts.into_iter().collect::<Vec<_>>(), vec!["Passwd", "Sshd"]);
        assert_eq!(attributes.into_iter().collect::<Vec<_>>(), vec!["users.homedir"]);

        let again = search_dependencies(&m, "Linux", &names, &|_| false).unwrap();
        assert_eq!(again, search_dependencies(&m, "Linux", &names, &|_| false).unwrap());
    }

    #[test]
    fn test_search_dependencies_skips_known_attributes() {
        let m = map(vec![
            definition("Passwd", &["/etc/passwd"], &["users"]),
            definition("Sshd", &["%%users.homedir%%/.ssh/config"], &[]),
        ]);
        let known = |attr: &str| attr == "users.homedir";
        let (artifacts, attributes) = search_dependencies(&m, "Linux", &["Sshd".to_string()], &known).unwrap();
        assert_eq!(artifacts.into_iter().collect::<Vec<_>>(), vec!["Sshd"]);
        assert!(attributes.is_empty());

        // Named explicitly, the provider is still collected.
        let names = vec!["Sshd".to_string(), "Passwd".to_string()];
        let (artifacts, _) = search_dependencies(&m, "Linux", &names, &known).unwrap();
        assert_eq!(artifacts.into_iter().collect::<Vec<_>>(), vec!["Passwd", "Sshd"]);
    }

    #[test]
    fn test_search_dependencies_terminates_on_cycles() {
        let m = map(vec![
            definition("A", &["%%b_attr%%"], &["a_attr"]),
            definition("B", &["%%a_attr%%"], &["b_attr"]),
        ]);
        let (artifacts, attributes) = search_dependencies(&m, "Linux", &["A".to_string()], &|_| false).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(attributes.len(), 2);
    }

    #[test]
    fn test_find_group_cycle() {
        let m = map(vec![group("A", &["B"]), group("B", &["C"]), group("C", &["A"])]);
        let cycle = find_group_cycle(&m).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);

        let m = map(vec![group("A", &["B"]), definition("B", &["/x"], &[])]);
        assert!(find_group_cycle(&m).is_none());
    }
}
