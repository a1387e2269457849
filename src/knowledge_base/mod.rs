//! The knowledge base: accumulated facts about one target host.
//!
//! Values are looked up by (possibly dotted) attribute name. A few fields
//! are fixed (`os`, `os_major_version`, `os_minor_version`, `fqdn`,
//! `os_release`), users are kept as records unique by username, and every
//! other attribute lives in an open map.

pub mod merge;
pub mod snapshot;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use merge::{merge_results, MergeReport};
pub use snapshot::{InMemorySnapshotStore, JsonSnapshotStore, KnowledgeBaseStore};

/// Value of an open knowledge base attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    /// Every value this attribute contributes to interpolation.
    pub fn values(&self) -> Vec<String> {
        match self {
            AttributeValue::Integer(i) => vec![i.to_string()],
            AttributeValue::Text(s) => vec![s.clone()],
            AttributeValue::List(items) => items.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Text(s) => s.is_empty(),
            AttributeValue::List(items) => items.is_empty(),
            AttributeValue::Integer(_) => false,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

/// An account discovered on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homedir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appdata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localappdata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<String>,
}

/// Optional user fields, in the order they are merged and reported.
pub const USER_FIELDS: &[&str] = &[
    "uid",
    "gid",
    "sid",
    "homedir",
    "shell",
    "full_name",
    "desktop",
    "appdata",
    "localappdata",
    "temp",
];

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_homedir(mut self, homedir: impl Into<String>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "username" => Some(self.username.clone()),
            "uid" => self.uid.map(|v| v.to_string()),
            "gid" => self.gid.map(|v| v.to_string()),
            "sid" => self.sid.clone(),
            "homedir" => self.homedir.clone(),
            "shell" => self.shell.clone(),
            "full_name" => self.full_name.clone(),
            "desktop" => self.desktop.clone(),
            "appdata" => self.appdata.clone(),
            "localappdata" => self.localappdata.clone(),
            "temp" => self.temp.clone(),
            _ => None,
        }
    }

    /// Set an optional field from its string form. Returns false for unknown
    /// fields or unparsable numeric values.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        match name {
            "uid" => match value.parse() {
                Ok(uid) => self.uid = Some(uid),
                Err(_) => return false,
            },
            "gid" => match value.parse() {
                Ok(gid) => self.gid = Some(gid),
                Err(_) => return false,
            },
            "sid" => self.sid = Some(value),
            "homedir" => self.homedir = Some(value),
            "shell" => self.shell = Some(value),
            "full_name" => self.full_name = Some(value),
            "desktop" => self.desktop = Some(value),
            "appdata" => self.appdata = Some(value),
            "localappdata" => self.localappdata = Some(value),
            "temp" => self.temp = Some(value),
            _ => return false,
        }
        true
    }
}

/// A conflicting overwrite detected while merging user records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMergeConflict {
    pub username: String,
    pub field: String,
    pub previous: String,
    pub replacement: String,
}

impl fmt::Display for UserMergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user {} field {}: {:?} replaced by {:?}",
            self.username, self.field, self.previous, self.replacement
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_major_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_minor_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release: Option<String>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_os(os: impl Into<String>) -> Self {
        Self {
            os: Some(os.into()),
            ..Default::default()
        }
    }

    /// The OS must be known before OS-conditioned artifacts are evaluated.
    pub fn is_initialized(&self) -> bool {
        self.os.is_some()
    }

    /// All values of an attribute, or `None` when it is absent or empty.
    ///
    /// `users.<field>` yields the field of every user that has it, in user
    /// order; `users` yields the usernames.
    pub fn get_values(&self, name: &str) -> Option<Vec<String>> {
        let values: Vec<String> = match name {
            "os" => self.os.iter().cloned().collect(),
            "os_major_version" => self.os_major_version.iter().map(|v| v.to_string()).collect(),
            "os_minor_version" => self.os_minor_version.iter().map(|v| v.to_string()).collect(),
            "fqdn" => self.fqdn.iter().cloned().collect(),
            "os_release" => self.os_release.iter().cloned().collect(),
            "users" => self.users.iter().map(|u| u.username.clone()).collect(),
            _ => match name.strip_prefix("users.") {
                Some(field) => self.users.iter().filter_map(|u| u.field(field)).collect(),
                None => self.attributes.get(name).map(|v| v.values()).unwrap_or_default(),
            },
        };
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_values(name).is_some()
    }

    /// Current value of a scalar attribute (fixed field or open map).
    pub fn get_attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "os" => self.os.clone().map(AttributeValue::Text),
            "os_major_version" => self.os_major_version.map(|v| AttributeValue::Integer(v as i64)),
            "os_minor_version" => self.os_minor_version.map(|v| AttributeValue::Integer(v as i64)),
            "fqdn" => self.fqdn.clone().map(AttributeValue::Text),
            "os_release" => self.os_release.clone().map(AttributeValue::Text),
            _ => self.attributes.get(name).cloned(),
        }
    }

    /// Store a scalar attribute. Returns false if the value does not fit a
    /// fixed field, or if the name addresses user records.
    pub fn set_attribute(&mut self, name: &str, value: AttributeValue) -> bool {
        match name {
            "os" => self.os = Some(value.to_string()),
            "fqdn" => self.fqdn = Some(value.to_string()),
            "os_release" => self.os_release = Some(value.to_string()),
            "os_major_version" | "os_minor_version" => {
                let parsed = match &value {
                    AttributeValue::Integer(i) => u32::try_from(*i).ok(),
                    AttributeValue::Text(s) => s.trim().parse().ok(),
                    AttributeValue::List(_) => None,
                };
                let Some(version) = parsed else {
                    return false;
                };
                if name == "os_major_version" {
                    self.os_major_version = Some(version);
                } else {
                    self.os_minor_version = Some(version);
                }
            }
            "users" => return false,
            _ if name.starts_with("users.") => return false,
            _ => {
                self.attributes.insert(name.to_string(), value);
            }
        }
        true
    }

    pub fn get_user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Merge a user record by username. Fields present on `user` overwrite
    /// the existing record; overwrites of differing values are returned as
    /// conflicts.
    pub fn merge_or_add_user(&mut self, user: User) -> Vec<UserMergeConflict> {
        let Some(existing) = self.users.iter_mut().find(|u| u.username == user.username) else {
            self.users.push(user);
            return Vec::new();
        };

        let mut conflicts = Vec::new();
        for field in USER_FIELDS {
            let Some(replacement) = user.field(field) else {
                continue;
            };
            if let Some(previous) = existing.field(field) {
                if previous != replacement {
                    conflicts.push(UserMergeConflict {
                        username: user.username.clone(),
                        field: field.to_string(),
                        previous,
                        replacement: replacement.clone(),
                    });
                }
            }
            existing.set_field(field, replacement);
        }
        conflicts
    }

    /// Fold facts learned by a nested collection into this knowledge base.
    ///
    /// Scalars present in `other` replace ours, users are merged by
    /// username. Returns the user merge conflicts.
    pub fn absorb(&mut self, other: &KnowledgeBase) -> Vec<UserMergeConflict> {
        if other.os.is_some() {
            self.os = other.os.clone();
        }
        if other.os_major_version.is_some() {
            self.os_major_version = other.os_major_version;
        }
        if other.os_minor_version.is_some() {
            self.os_minor_version = other.os_minor_version;
        }
        if other.fqdn.is_some() {
            self.fqdn = other.fqdn.clone();
        }
        if other.os_release.is_some() {
            self.os_release = other.os_release.clone();
        }
        for (name, value) in &other.attributes {
            self.attributes.insert(name.clone(), value.clone());
        }
        other
            .users
            .iter()
            .flat_map(|user| self.merge_or_add_user(user.clone()))
            .collect()
    }
}
