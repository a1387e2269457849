//! Folding parsed results back into the knowledge base.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::config::ArtifactDefinition;
use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::{AttributeValue, KnowledgeBase, USER_FIELDS};
use crate::models::ParsedValue;

/// Outcome of merging one artifact's parsed results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub updated: BTreeSet<String>,
    pub conflicts: Vec<String>,
}

/// Merge `results` produced for `definition` into `kb`.
///
/// User records merge by username. Dict-shaped results assign one attribute
/// per key, each of which must be declared in `provides`. Any other value is
/// assigned to the artifact's single provided attribute; several such values
/// are stored together as a list.
pub fn merge_results(
    kb: &mut KnowledgeBase,
    definition: &ArtifactDefinition,
    results: &[ParsedValue],
) -> ArtifactResult<MergeReport> {
    let mut report = MergeReport::default();
    let mut scalars: Vec<AttributeValue> = Vec::new();

    for result in results {
        match result {
            ParsedValue::Anomaly(_) => continue,
            ParsedValue::User(user) => {
                report.updated.insert("users".to_string());
                for field in USER_FIELDS {
                    if user.field(field).is_some() {
                        report.updated.insert(format!("users.{}", field));
                    }
                }
                for conflict in kb.merge_or_add_user(user.clone()) {
                    warn!("Knowledge base merge conflict from {}: {}", definition.name, conflict);
                    report.conflicts.push(conflict.to_string());
                }
            }
            ParsedValue::Attributes(map) => {
                for (key, value) in map {
                    if !definition.provides_attribute(key) {
                        return Err(ArtifactError::definition(
                            definition.name.clone(),
                            format!("result key {} is not declared in provides", key),
                        ));
                    }
                    set_checked(kb, definition, key, value.clone(), &mut report);
                }
            }
            ParsedValue::Value(value) => scalars.push(value.clone()),
            ParsedValue::Record(json) => scalars.push(json_to_attribute(json)),
        }
    }

    if scalars.is_empty() {
        return Ok(report);
    }

    let [attribute] = definition.provides.as_slice() else {
        return Err(ArtifactError::definition(
            definition.name.clone(),
            format!(
                "scalar results need exactly one provided attribute, found {}",
                definition.provides.len()
            ),
        ));
    };

    let value = if scalars.len() == 1 {
        scalars.remove(0)
    } else {
        AttributeValue::List(scalars.iter().flat_map(|v| v.values()).collect())
    };
    set_checked(kb, definition, attribute, value, &mut report);
    Ok(report)
}

fn set_checked(
    kb: &mut KnowledgeBase,
    definition: &ArtifactDefinition,
    attribute: &str,
    value: AttributeValue,
    report: &mut MergeReport,
) {
    if let Some(previous) = kb.get_attribute(attribute) {
        if previous != value {
            let conflict = format!("{}: {} replaced by {}", attribute, previous, value);
            warn!("Knowledge base merge conflict from {}: {}", definition.name, conflict);
            report.conflicts.push(conflict);
        }
    }
    if kb.set_attribute(attribute, value) {
        debug!("{} set knowledge base attribute {}", definition.name, attribute);
        report.updated.insert(attribute.to_string());
    } else {
        warn!(
            "{} produced a value that does not fit knowledge base attribute {}",
            definition.name, attribute
        );
    }
}

fn json_to_attribute(json: &serde_json::Value) -> AttributeValue {
    match json {
        serde_json::Value::String(s) => AttributeValue::Text(s.clone()),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Integer(i),
            None => AttributeValue::Text(n.to_string()),
        },
        serde_json::Value::Array(items) => AttributeValue::List(
            items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        other => AttributeValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::User;
    use crate::models::Anomaly;
    use std::collections::BTreeMap;

    fn definition(name: &str, provides: &[&str]) -> ArtifactDefinition {
        let mut def = ArtifactDefinition::new(name);
        def.provides = provides.iter().map(|p| p.to_string()).collect();
        def
    }

    #[test]
    fn test_single_provides_assigns_value() {
        let mut kb = KnowledgeBase::with_os("Windows");
        let def = definition("SystemRoot", &["environ_systemroot"]);
        let report = merge_results(
            &mut kb,
            &def,
            &[
                ParsedValue::Value("C:\\Windows".into()),
                ParsedValue::Anomaly(Anomaly::parser_anomaly("x", "ignored")),
            ],
        )
        .unwrap();
        assert!(report.updated.contains("environ_systemroot"));
        assert_eq!(kb.get_values("environ_systemroot").unwrap(), vec!["C:\\Windows"]);
    }

    #[test]
    fn test_multiple_scalars_become_a_list() {
        let mut kb = KnowledgeBase::with_os("Linux");
        let def = definition("Shells", &["shells"]);
        merge_results(
            &mut kb,
            &def,
            &[
                ParsedValue::Value("/bin/sh".into()),
                ParsedValue::Record(serde_json::json!("/bin/bash")),
            ],
        )
        .unwrap();
        assert_eq!(kb.get_values("shells").unwrap(), vec!["/bin/sh", "/bin/bash"]);
    }

    #[test]
    fn test_dict_results_require_declared_keys() {
        let mut kb = KnowledgeBase::with_os("Linux");
        let def = definition("OsRelease", &["os_release", "os_major_version"]);

        let mut good = BTreeMap::new();
        good.insert("os_release".to_string(), AttributeValue::from("Ubuntu"));
        good.insert("os_major_version".to_string(), AttributeValue::Integer(22));
        let report = merge_results(&mut kb, &def, &[ParsedValue::Attributes(good)]).unwrap();
        assert_eq!(report.updated.len(), 2);
        assert_eq!(kb.os_major_version, Some(22));

        let mut bad = BTreeMap::new();
        bad.insert("fqdn".to_string(), AttributeValue::from("host"));
        let err = merge_results(&mut kb, &def, &[ParsedValue::Attributes(bad)]).unwrap_err();
        assert!(matches!(err, ArtifactError::Definition { .. }));
    }

    #[test]
    fn test_scalar_with_multiple_provides_is_rejected() {
        let mut kb = KnowledgeBase::with_os("Linux");
        let def = definition("Ambiguous", &["a", "b"]);
        assert!(merge_results(&mut kb, &def, &[ParsedValue::Value("x".into())]).is_err());
    }

    #[test]
    fn test_user_merge_reports_conflicts() {
        let mut kb = KnowledgeBase::with_os("Linux");
        kb.users.push(User::new("alice").with_homedir("/home/alice"));
        let def = definition("LinuxPasswdFile", &["users"]);
        let report = merge_results(
            &mut kb,
            &def,
            &[ParsedValue::User(User::new("alice").with_homedir("/srv/alice"))],
        )
        .unwrap();
        assert!(report.updated.contains("users.homedir"));
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(kb.users.len(), 1);
    }

    #[test]
    fn test_conflicting_scalar_overwrite_is_logged_not_fatal() {
        let mut kb = KnowledgeBase::with_os("Windows");
        kb.set_attribute("environ_systemdrive", "C:".into());
        let def = definition("SystemDrive", &["environ_systemdrive"]);
        let report = merge_results(&mut kb, &def, &[ParsedValue::Value("D:".into())]).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(kb.get_values("environ_systemdrive").unwrap(), vec!["D:"]);
    }
}
