//! `%%attribute%%` template expansion against the knowledge base.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::expand_windows_env_vars;
use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::KnowledgeBase;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"%%([A-Za-z0-9_.]+)%%").unwrap();
    static ref GROUPING_RE: Regex = Regex::new(r"\{([^{}]*,[^{}]*)\}").unwrap();
}

/// Attribute names referenced by placeholders, in order of first occurrence.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in PLACEHOLDER_RE.captures_iter(template) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Every combination picking one element from each list, leftmost list
/// varying slowest. An empty input yields a single empty combination.
pub fn cartesian_product<T: Clone>(lists: &[Vec<T>]) -> Vec<Vec<T>> {
    lists.iter().fold(vec![Vec::new()], |combinations, list| {
        combinations
            .iter()
            .flat_map(|prefix| {
                list.iter().map(move |item| {
                    let mut next = prefix.clone();
                    next.push(item.clone());
                    next
                })
            })
            .collect()
    })
}

/// Replace the spans matched by `re` in `template` with each combination of
/// candidate values, one candidate list per match.
fn splice_product(template: &str, re: &Regex, candidates: &[Vec<String>]) -> Vec<String> {
    let spans: Vec<(usize, usize)> = re.find_iter(template).map(|m| (m.start(), m.end())).collect();
    cartesian_product(candidates)
        .into_iter()
        .map(|combination| {
            let mut out = String::with_capacity(template.len());
            let mut last = 0;
            for ((start, end), value) in spans.iter().zip(combination.iter()) {
                out.push_str(&template[last..*start]);
                out.push_str(value);
                last = *end;
            }
            out.push_str(&template[last..]);
            out
        })
        .collect()
}

/// Expand all placeholders in `template`.
///
/// Each placeholder occurrence is expanded independently, so a template
/// naming the same multi-valued attribute twice yields its self-product.
/// A missing attribute is an error unless `ignore_errors` is set, in which
/// case no expansion is produced at all.
pub fn interpolate(template: &str, kb: &KnowledgeBase, ignore_errors: bool) -> ArtifactResult<Vec<String>> {
    let mut candidates = Vec::new();
    for capture in PLACEHOLDER_RE.captures_iter(template) {
        let name = &capture[1];
        match kb.get_values(name) {
            Some(values) => candidates.push(values),
            None if ignore_errors => return Ok(Vec::new()),
            None => {
                return Err(ArtifactError::interpolation(
                    template,
                    format!("knowledge base attribute {} has no value", name),
                ))
            }
        }
    }

    if candidates.is_empty() {
        return Ok(vec![template.to_string()]);
    }
    Ok(splice_product(template, &PLACEHOLDER_RE, &candidates))
}

/// Expand `{a,b,c}` alternations. Nested groupings are not supported.
pub fn expand_groupings(path: &str) -> Vec<String> {
    let candidates: Vec<Vec<String>> = GROUPING_RE
        .captures_iter(path)
        .map(|capture| capture[1].split(',').map(str::to_string).collect())
        .collect();
    if candidates.is_empty() {
        return vec![path.to_string()];
    }
    splice_product(path, &GROUPING_RE, &candidates)
}

/// Full path expansion: placeholders, then groupings, then Windows `%VAR%`
/// tokens. Duplicates are removed, keeping first occurrence.
pub fn interpolate_path(template: &str, kb: &KnowledgeBase, ignore_errors: bool) -> ArtifactResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for expanded in interpolate(template, kb, ignore_errors)? {
        for path in expand_groupings(&expanded) {
            let path = if kb.os.as_deref() == Some("Windows") {
                expand_windows_env_vars(&path, kb)
            } else {
                path
            };
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    Ok(out)
}
