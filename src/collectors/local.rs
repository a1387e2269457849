//! Transport answering collection requests from the machine the engine
//! runs on.
//!
//! Paths are expanded with shell-style globs: `*` and `?` stay within one
//! path component, `**` crosses any number of them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use regex::Regex;
use sysinfo::{PidExt, ProcessExt, System, SystemExt};
use walkdir::WalkDir;

use crate::collectors::transport::{CollectionRequest, CollectionTransport};
use crate::config::{normalize_path_for_os, PathType};
use crate::constants::{LIST_PROCESSES_ACTION, MAX_GREP_MATCHES, PLATFORM_INFO_ACTION};
use crate::models::{ExecuteResponse, FileContent, GrepMatch, ResponsePayload, StatEntry};
use crate::utils::hash::calculate_sha256;

/// Transport for the local host.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollectionTransport for LocalTransport {
    async fn send(&self, request: &CollectionRequest) -> Result<Vec<ResponsePayload>> {
        match request {
            CollectionRequest::Command { cmd, args } => run_command(cmd, args).await,
            CollectionRequest::FileGlob {
                paths,
                path_type,
                max_file_size,
                fetch_content,
            } => {
                check_path_type(*path_type)?;
                let paths = paths.clone();
                let (max_file_size, fetch_content) = (*max_file_size, *fetch_content);
                tokio::task::spawn_blocking(move || glob_files(&paths, max_file_size, fetch_content))
                    .await
                    .context("File glob task panicked")?
            }
            CollectionRequest::FileGrep {
                paths,
                path_type,
                regexes,
                max_file_size,
            } => {
                check_path_type(*path_type)?;
                let patterns = regexes
                    .iter()
                    .map(|r| Regex::new(r).with_context(|| format!("Invalid grep expression {}", r)))
                    .collect::<Result<Vec<_>>>()?;
                let paths = paths.clone();
                let max_file_size = *max_file_size;
                tokio::task::spawn_blocking(move || grep_files(&paths, &patterns, max_file_size))
                    .await
                    .context("File grep task panicked")?
            }
            CollectionRequest::ClientAction { action, .. } if action == PLATFORM_INFO_ACTION => platform_info(),
            CollectionRequest::ClientAction { action, .. } if action == LIST_PROCESSES_ACTION => Ok(list_processes()),
            CollectionRequest::ClientAction { action, .. } => bail!("Unsupported client action {}", action),
            other => bail!("{} requests are not supported by the local transport", other.kind()),
        }
    }
}

fn check_path_type(path_type: PathType) -> Result<()> {
    match path_type {
        PathType::Os => Ok(()),
        other => bail!("{} path access is not supported by the local transport", other),
    }
}

async fn run_command(cmd: &str, args: &[String]) -> Result<Vec<ResponsePayload>> {
    debug!("Running {} {}", cmd, args.join(" "));
    let started = Instant::now();
    let output = tokio::process::Command::new(cmd)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", cmd))?;

    Ok(vec![ResponsePayload::Command(ExecuteResponse {
        cmd: cmd.to_string(),
        args: args.to_vec(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_status: output.status.code().unwrap_or(-1),
        time_used_ms: started.elapsed().as_millis() as u64,
    })])
}

/// Translate a glob into an anchored regex over the whole path.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expression = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                expression.push_str(".*");
            }
            '*' => expression.push_str(r"[^/\\]*"),
            '?' => expression.push_str(r"[^/\\]"),
            '/' | '\\' => expression.push_str(r"[/\\]"),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression).map_err(|e| anyhow!("Invalid glob {}: {}", pattern, e))
}

fn has_wildcard(component: &str) -> bool {
    component.contains('*') || component.contains('?')
}

/// Paths matching `pattern`, sorted.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = normalize_path_for_os(pattern, host_os());
    if !has_wildcard(&pattern) {
        let path = PathBuf::from(&pattern);
        return Ok(if path.exists() { vec![path] } else { Vec::new() });
    }

    let separator = std::path::MAIN_SEPARATOR;
    let components: Vec<&str> = pattern.split(separator).collect();
    let literal = components.iter().take_while(|c| !has_wildcard(c)).count();
    let mut root = components[..literal].join(&separator.to_string());
    if root.is_empty() {
        root.push(separator);
    }
    let remaining = &components[literal..];
    let max_depth = if remaining.iter().any(|c| c.contains("**")) {
        usize::MAX
    } else {
        remaining.len()
    };

    let matcher = glob_to_regex(&pattern)?;
    let mut matches: Vec<PathBuf> = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", root, e);
                None
            }
        })
        .filter(|entry| matcher.is_match(&entry.path().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();
    Ok(matches)
}

fn host_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        other => other,
    }
}

fn stat(path: &Path, max_file_size: u64) -> Result<StatEntry> {
    let metadata = std::fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified_time = metadata
        .modified()
        .ok()
        .map(|time| DateTime::<Utc>::from(time).to_rfc3339());
    let sha256 = if metadata.is_file() && max_file_size > 0 {
        calculate_sha256(path, max_file_size).unwrap_or_else(|e| {
            warn!("Failed to hash {}: {}", path.display(), e);
            None
        })
    } else {
        None
    };
    Ok(StatEntry {
        path: path.to_string_lossy().into_owned(),
        size: metadata.len(),
        is_dir: metadata.is_dir(),
        modified_time,
        sha256,
    })
}

fn read_limited(path: &Path, max_file_size: u64) -> Result<(String, bool)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut data = Vec::new();
    file.take(max_file_size.saturating_add(1))
        .read_to_end(&mut data)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let limit = usize::try_from(max_file_size).unwrap_or(usize::MAX);
    let truncated = data.len() > limit;
    data.truncate(limit);
    Ok((String::from_utf8_lossy(&data).into_owned(), truncated))
}

/// Stat every match and optionally read it. A match that cannot be read is
/// logged and skipped so the rest of the source still gets collected.
fn glob_files(patterns: &[String], max_file_size: u64, fetch_content: bool) -> Result<Vec<ResponsePayload>> {
    let mut out = Vec::new();
    for pattern in patterns {
        for path in expand_glob(pattern)? {
            let entry = match stat(&path, max_file_size) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping {}: {:#}", path.display(), e);
                    continue;
                }
            };
            let is_file = !entry.is_dir;
            out.push(ResponsePayload::Stat(entry));
            if !(fetch_content && is_file) {
                continue;
            }
            match read_limited(&path, max_file_size) {
                Ok((data, truncated)) => {
                    if truncated {
                        warn!("Truncated {} at {} bytes", path.display(), max_file_size);
                    }
                    out.push(ResponsePayload::File(FileContent {
                        path: path.to_string_lossy().into_owned(),
                        data,
                        truncated,
                    }));
                }
                Err(e) => warn!("Skipping content of {}: {:#}", path.display(), e),
            }
        }
    }
    Ok(out)
}

fn grep_files(patterns: &[String], regexes: &[Regex], max_file_size: u64) -> Result<Vec<ResponsePayload>> {
    let mut out = Vec::new();
    for pattern in patterns {
        for path in expand_glob(pattern)? {
            if !path.is_file() {
                continue;
            }
            let data = match read_limited(&path, max_file_size) {
                Ok((data, _)) => data,
                Err(e) => {
                    warn!("Skipping {}: {:#}", path.display(), e);
                    continue;
                }
            };
            for (index, line) in data.lines().enumerate() {
                if !regexes.iter().any(|r| r.is_match(line)) {
                    continue;
                }
                if out.len() >= MAX_GREP_MATCHES {
                    warn!("Grep stopped after {} matches", MAX_GREP_MATCHES);
                    return Ok(out);
                }
                out.push(ResponsePayload::Grep(GrepMatch {
                    path: path.to_string_lossy().into_owned(),
                    line_number: index as u64 + 1,
                    line: line.to_string(),
                }));
            }
        }
    }
    Ok(out)
}

fn platform_info() -> Result<Vec<ResponsePayload>> {
    let system = System::new();
    let fqdn = hostname::get()
        .context("Failed to read hostname")?
        .to_string_lossy()
        .into_owned();

    let mut info = BTreeMap::new();
    info.insert("system".to_string(), serde_json::json!(host_os()));
    info.insert("fqdn".to_string(), serde_json::json!(fqdn));
    info.insert(
        "release".to_string(),
        serde_json::json!(system.long_os_version().unwrap_or_default()),
    );
    info.insert(
        "version".to_string(),
        serde_json::json!(system.os_version().unwrap_or_default()),
    );
    info.insert(
        "kernel".to_string(),
        serde_json::json!(system.kernel_version().unwrap_or_default()),
    );
    Ok(vec![ResponsePayload::Dict(info)])
}

fn list_processes() -> Vec<ResponsePayload> {
    let mut system = System::new();
    system.refresh_processes();

    let mut processes: Vec<_> = system.processes().iter().collect();
    processes.sort_by_key(|(pid, _)| pid.as_u32());
    processes
        .into_iter()
        .map(|(pid, process)| {
            let mut entry = BTreeMap::new();
            entry.insert("pid".to_string(), serde_json::json!(pid.as_u32()));
            entry.insert("name".to_string(), serde_json::json!(process.name()));
            entry.insert("cmdline".to_string(), serde_json::json!(process.cmd()));
            entry.insert(
                "exe".to_string(),
                serde_json::json!(process.exe().to_string_lossy()),
            );
            entry.insert(
                "parent_pid".to_string(),
                serde_json::json!(process.parent().map(|p| p.as_u32())),
            );
            entry.insert("memory".to_string(), serde_json::json!(process.memory()));
            ResponsePayload::Dict(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("home/alice/.ssh")).unwrap();
        fs::create_dir_all(dir.path().join("home/bob")).unwrap();
        fs::write(dir.path().join("home/alice/.ssh/config"), "Host *\nPort 22\n").unwrap();
        fs::write(dir.path().join("home/alice/notes.txt"), "secret=1\nplain\n").unwrap();
        dir
    }

    fn path(dir: &TempDir, rest: &str) -> String {
        dir.path().join(rest).to_string_lossy().into_owned()
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("/home/*/.ssh/config").unwrap();
        assert!(re.is_match("/home/alice/.ssh/config"));
        assert!(!re.is_match("/home/alice/x/.ssh/config"));
        assert!(glob_to_regex("/var/**/*.log").unwrap().is_match("/var/log/nginx/access.log"));
        assert!(glob_to_regex("/tmp/a?c").unwrap().is_match("/tmp/abc"));
        assert!(!glob_to_regex("/tmp/a.c").unwrap().is_match("/tmp/abc"));
    }

    #[test]
    fn test_expand_glob_single_level() {
        let dir = tree();
        let found = expand_glob(&path(&dir, "home/*")).unwrap();
        assert_eq!(found, vec![dir.path().join("home/alice"), dir.path().join("home/bob")]);

        assert!(expand_glob(&path(&dir, "missing/*")).unwrap().is_empty());
        assert_eq!(expand_glob(&path(&dir, "home/bob")).unwrap().len(), 1);
    }

    #[test]
    fn test_expand_glob_recursive() {
        let dir = tree();
        let found = expand_glob(&path(&dir, "home/**/config")).unwrap();
        assert_eq!(found, vec![dir.path().join("home/alice/.ssh/config")]);
    }

    #[tokio::test]
    async fn test_file_glob_fetches_content() {
        let dir = tree();
        let transport = LocalTransport::new();
        let payloads = transport
            .send(&CollectionRequest::FileGlob {
                paths: vec![path(&dir, "home/*/.ssh/config")],
                path_type: PathType::Os,
                max_file_size: 4,
                fetch_content: true,
            })
            .await
            .unwrap();

        assert_eq!(payloads.len(), 2);
        match &payloads[0] {
            ResponsePayload::Stat(stat) => {
                assert_eq!(stat.size, 15);
                // Larger than the limit, so not hashed.
                assert!(stat.sha256.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
        match &payloads[1] {
            ResponsePayload::File(file) => {
                assert_eq!(file.data, "Host");
                assert!(file.truncated);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_read_limited_bounds_data() {
        let dir = tree();
        let file = dir.path().join("home/alice/notes.txt");
        let (data, truncated) = read_limited(&file, 6).unwrap();
        assert_eq!(data, "secret");
        assert!(truncated);

        let (data, truncated) = read_limited(&file, 15).unwrap();
        assert_eq!(data, "secret=1\nplain\n");
        assert!(!truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_match_does_not_drop_others() {
        use std::os::unix::fs::{symlink, PermissionsExt};

        let dir = tree();
        let ssh = dir.path().join("home/alice/.ssh");
        symlink(ssh.join("gone"), ssh.join("dangling")).unwrap();
        let locked = ssh.join("id_rsa");
        fs::write(&locked, "secret=2\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users can still read it.
        let locked_readable = fs::read(&locked).is_ok();

        let transport = LocalTransport::new();
        let payloads = transport
            .send(&CollectionRequest::FileGlob {
                paths: vec![path(&dir, "home/alice/.ssh/*")],
                path_type: PathType::Os,
                max_file_size: 1024,
                fetch_content: true,
            })
            .await
            .unwrap();
        let files: Vec<&str> = payloads
            .iter()
            .filter_map(|p| match p {
                ResponsePayload::File(file) => Some(file.path.as_str()),
                _ => None,
            })
            .collect();
        assert!(files.iter().any(|f| f.ends_with("config")));
        assert!(!files.iter().any(|f| f.ends_with("dangling")));
        assert_eq!(files.iter().any(|f| f.ends_with("id_rsa")), locked_readable);

        let matches = transport
            .send(&CollectionRequest::FileGrep {
                paths: vec![path(&dir, "home/alice/**")],
                path_type: PathType::Os,
                regexes: vec!["^secret=".to_string()],
                max_file_size: 1024,
            })
            .await
            .unwrap();
        let expected = if locked_readable { 2 } else { 1 };
        assert_eq!(matches.len(), expected);
    }

    #[tokio::test]
    async fn test_file_grep() {
        let dir = tree();
        let payloads = LocalTransport::new()
            .send(&CollectionRequest::FileGrep {
                paths: vec![path(&dir, "home/alice/*")],
                path_type: PathType::Os,
                regexes: vec!["^secret=".to_string()],
                max_file_size: 1024,
            })
            .await
            .unwrap();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            ResponsePayload::Grep(m) => {
                assert_eq!(m.line_number, 1);
                assert_eq!(m.line, "secret=1");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_requests() {
        let transport = LocalTransport::new();
        let err = transport
            .send(&CollectionRequest::RegistryKey {
                keys: vec!["HKEY_LOCAL_MACHINE\\Software".to_string()],
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));

        let err = transport
            .send(&CollectionRequest::FileGlob {
                paths: vec!["/".to_string()],
                path_type: PathType::Tsk,
                max_file_size: 0,
                fetch_content: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("TSK"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_execution() {
        let payloads = LocalTransport::new()
            .send(&CollectionRequest::Command {
                cmd: "echo".to_string(),
                args: vec!["hello".to_string()],
            })
            .await
            .unwrap();
        match &payloads[0] {
            ResponsePayload::Command(response) => {
                assert_eq!(response.stdout.trim(), "hello");
                assert_eq!(response.exit_status, 0);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_platform_info_reports_host_os() {
        let payloads = LocalTransport::new()
            .send(&CollectionRequest::ClientAction {
                action: PLATFORM_INFO_ACTION.to_string(),
                args: BTreeMap::new(),
            })
            .await
            .unwrap();
        match &payloads[0] {
            ResponsePayload::Dict(info) => assert_eq!(info["system"], serde_json::json!(host_os())),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
