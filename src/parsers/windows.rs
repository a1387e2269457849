//! Parsers for Windows registry artifacts.

use anyhow::{bail, Result};

use crate::knowledge_base::{AttributeValue, KnowledgeBase, User};
use crate::models::{Anomaly, ParsedValue, ResponsePayload, ResponseType};
use crate::parsers::ResponseParser;

/// Registry value data as a single attribute value.
pub struct RegistryValueParser;

impl ResponseParser for RegistryValueParser {
    fn name(&self) -> &str {
        "RegistryValueParser"
    }

    fn supported_artifacts(&self) -> Vec<String> {
        vec![
            "WindowsEnvironmentVariableSystemRoot".to_string(),
            "WindowsEnvironmentVariableProgramFiles".to_string(),
        ]
    }

    fn input_types(&self) -> Vec<ResponseType> {
        vec![ResponseType::Registry, ResponseType::Stat]
    }

    fn output_types(&self) -> Vec<String> {
        vec!["Value".to_string()]
    }

    fn parse(&self, response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        match response {
            ResponsePayload::Registry(entry) => match entry.data.as_deref().map(str::trim) {
                Some(data) if !data.is_empty() => Ok(vec![ParsedValue::Value(AttributeValue::Text(data.to_string()))]),
                _ => Ok(vec![ParsedValue::Anomaly(
                    Anomaly::parser_anomaly(self.name(), "registry value has no data").with_finding(entry.key.clone()),
                )]),
            },
            // Fallbacks report a directory that exists instead of a value
            ResponsePayload::Stat(stat) if stat.is_dir => {
                Ok(vec![ParsedValue::Value(AttributeValue::Text(stat.path.clone()))])
            }
            ResponsePayload::Stat(stat) => bail!("{} is not a directory", stat.path),
            _ => Ok(Vec::new()),
        }
    }
}

/// ProfileList `ProfileImagePath` values into user records keyed by SID.
pub struct ProfileListParser;

impl ResponseParser for ProfileListParser {
    fn name(&self) -> &str {
        "ProfileListParser"
    }

    fn supported_artifacts(&self) -> Vec<String> {
        vec!["WindowsUserProfiles".to_string()]
    }

    fn input_types(&self) -> Vec<ResponseType> {
        vec![ResponseType::Registry]
    }

    fn output_types(&self) -> Vec<String> {
        vec!["User".to_string()]
    }

    fn parse(&self, response: &ResponsePayload, _kb: &KnowledgeBase) -> Result<Vec<ParsedValue>> {
        let ResponsePayload::Registry(entry) = response else {
            return Ok(Vec::new());
        };
        // ...\ProfileList\<SID>\ProfileImagePath
        let mut components = entry.key.rsplit('\\');
        let last = components.next().unwrap_or_default();
        let sid = if last.eq_ignore_ascii_case("ProfileImagePath") {
            components.next().unwrap_or_default()
        } else {
            last
        };

        // Only domain and local accounts, not the builtin service SIDs
        if !sid.starts_with("S-1-5-21-") {
            return Ok(Vec::new());
        }
        let Some(homedir) = entry.data.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(vec![ParsedValue::Anomaly(
                Anomaly::parser_anomaly(self.name(), "profile without ProfileImagePath").with_finding(sid),
            )]);
        };
        let username = homedir.rsplit('\\').next().unwrap_or(homedir);

        let mut user = User::new(username).with_homedir(homedir);
        user.sid = Some(sid.to_string());
        Ok(vec![ParsedValue::User(user)])
    }
}
