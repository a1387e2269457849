//! Parsers for Linux and macOS artifacts.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::knowledge_base::{AttributeValue, KnowledgeBase, User};
use crate::models::{Anomaly, ParsedValue, ResponsePayload, ResponseType};
use crate::parsers::ResponseParser;

/// `/etc/passwd` lines into user records.
pub struct PasswdParser;

impl PasswdParser {
    fn parse_line(line: &str) -> Option<User> {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 || fields[0].is_empty() {
            return None;
        }
        let mut user = User::new(fields[0]);
        user.uid = Some(fields[2].parse().ok()?);
        user.gid = Some(fields[3].parse().ok()?);
        let full_name = fields[4].split(',').next().unwrap_or_default();
        if !full_name.is_empty() {
            user.full_name = Some(full_name.to_string());
        }
        if !fields[5].is_empty() {
            user.homedir = Some(fields[5].to_string());
        }
        if !fields[6].is_empty() {
            user.shell = Some(fields[6].to_string());
        }
        Some(user)
    }
}

impl ResponseParser for PasswdParser {
    fn name(&self) -> &str {
        "PasswdParser"
    }

    fn supported_artifacts(&self) -> Vec<String> {
        vec!["LinuxPasswdFile".to_string()]
    }

    fn input_types(&self) -> Vec<ResponseType> {
        vec![ResponseType::File]
    }

    fn output_types(&self) -> Vec<String> {
        vec!["User".to_string()]
    }

    fn parse(&self, response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        let ResponsePayload::File(file) = response else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (number, line) in file.data.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Self::parse_line(line) {
                Some(user) => out.push(ParsedValue::User(user)),
                None => out.push(ParsedValue::Anomaly(
                    Anomaly::parser_anomaly(self.name(), format!("malformed passwd entry at line {}", number + 1))
                        .with_finding(line),
                )),
            }
        }
        Ok(out)
    }
}

/// Directory listings of home roots into users with a homedir. Batched so
/// the same user showing up under several roots is reported once.
pub struct HomeDirectoryParser;

const IGNORED_HOMES: &[&str] = &["lost+found", "Shared", "Guest", ".localized"];

impl ResponseParser for HomeDirectoryParser {
    fn name(&self) -> &str {
        "HomeDirectoryParser"
    }

    fn supported_artifacts(&self) -> Vec<String> {
        vec!["LinuxHomeDirectories".to_string(), "MacOSUsers".to_string()]
    }

    fn input_types(&self) -> Vec<ResponseType> {
        vec![ResponseType::Stat]
    }

    fn output_types(&self) -> Vec<String> {
        vec!["User".to_string()]
    }

    fn process_together(&self) -> bool {
        true
    }

    fn parse_multiple(&self, responses: &[ResponsePayload], _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        let mut users: BTreeMap<String, User> = BTreeMap::new();
        for response in responses {
            let ResponsePayload::Stat(stat) = response else {
                continue;
            };
            if !stat.is_dir {
                continue;
            }
            let Some(username) = Path::new(&stat.path).file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if IGNORED_HOMES.contains(&username) {
                continue;
            }
            users
                .entry(username.to_string())
                .or_insert_with(|| User::new(username).with_homedir(stat.path.clone()));
        }
        Ok(users.into_values().map(ParsedValue::User).collect())
    }
}

/// `/etc/os-release` into release name and version numbers.
pub struct OsReleaseParser;

impl ResponseParser for OsReleaseParser {
    fn name(&self) -> &str {
        "OsReleaseParser"
    }

    fn supported_artifacts(&self) -> Vec<String> {
        vec!["LinuxReleaseInfo".to_string()]
    }

    fn input_types(&self) -> Vec<ResponseType> {
        vec![ResponseType::File]
    }

    fn output_types(&self) -> Vec<String> {
        vec!["Attributes".to_string()]
    }

    fn parse(&self, response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        let ResponsePayload::File(file) = response else {
            return Ok(Vec::new());
        };

        let mut fields = BTreeMap::new();
        for line in file.data.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            fields.insert(key.trim().to_string(), value.to_string());
        }

        let Some(name) = fields.get("NAME").or_else(|| fields.get("ID")) else {
            return Ok(vec![ParsedValue::Anomaly(
                Anomaly::parser_anomaly(self.name(), "os-release has no NAME or ID").with_finding(file.path.clone()),
            )]);
        };

        let mut attributes = BTreeMap::new();
        attributes.insert("os_release".to_string(), AttributeValue::Text(name.clone()));
        if let Some(version) = fields.get("VERSION_ID") {
            let mut parts = version.split('.').map(|p| p.parse::<i64>());
            if let Some(Ok(major)) = parts.next() {
                attributes.insert("os_major_version".to_string(), AttributeValue::Integer(major));
            }
            if let Some(Ok(minor)) = parts.next() {
                attributes.insert("os_minor_version".to_string(), AttributeValue::Integer(minor));
            }
        }
        Ok(vec![ParsedValue::Attributes(attributes)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileContent, StatEntry};

    fn file(path: &str, data: &str) -> ResponsePayload {
        ResponsePayload::File(FileContent {
            path: path.to_string(),
            data: data.to_string(),
            truncated: false,
        })
    }

    fn dir(path: &str) -> ResponsePayload {
        ResponsePayload::Stat(StatEntry {
            path: path.to_string(),
            size: 4096,
            is_dir: true,
            modified_time: None,
            sha256: None,
        })
    }

    #[test]
    fn test_passwd_parser() {
        let data = "# comment\nroot:x:0:0:root:/root:/bin/bash\nalice:x:1000:1000:Alice Smith,,,:/home/alice:/bin/zsh\nbroken line\n";
        let out = PasswdParser.parse(&file("/etc/passwd", data), &KnowledgeBase::new()).unwrap();
        assert_eq!(out.len(), 3);
        match &out[1] {
            ParsedValue::User(user) => {
                assert_eq!(user.username, "alice");
                assert_eq!(user.uid, Some(1000));
                assert_eq!(user.full_name.as_deref(), Some("Alice Smith"));
                assert_eq!(user.homedir.as_deref(), Some("/home/alice"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(out[2].is_anomaly());
    }

    #[test]
    fn test_home_directory_parser_dedupes() {
        let responses = vec![dir("/home/alice"), dir("/home/bob"), dir("/home/lost+found"), dir("/export/alice")];
        let out = HomeDirectoryParser
            .parse_multiple(&responses, &KnowledgeBase::new())
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ParsedValue::User(User::new("alice").with_homedir("/home/alice")));
    }

    #[test]
    fn test_os_release_parser() {
        let data = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\n";
        let out = OsReleaseParser.parse(&file("/etc/os-release", data), &KnowledgeBase::new()).unwrap();
        let ParsedValue::Attributes(attributes) = &out[0] else {
            panic!("expected attributes");
        };
        assert_eq!(attributes["os_release"], AttributeValue::Text("Ubuntu".to_string()));
        assert_eq!(attributes["os_major_version"], AttributeValue::Integer(22));
        assert_eq!(attributes["os_minor_version"], AttributeValue::Integer(4));

        let out = OsReleaseParser.parse(&file("/etc/os-release", "FOO=bar\n"), &KnowledgeBase::new()).unwrap();
        assert!(out[0].is_anomaly());
    }
}
