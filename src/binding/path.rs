//! Blob path patterns: `container/blob` with `{token}` placeholders
//!
//! ```text
//! input/{name}.txt   container "input", blob pattern "{name}.txt"
//! logs               container only (blob sets)
//! ```

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::validate::{has_tokens, validate_container_name};
use crate::error::JobHostError;

/// Pattern for {token} placeholders
static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());

const MAX_BLOB_NAME_LEN: usize = 1024;

/// Token names in order of first appearance
pub fn token_names(pattern: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in TOKEN_PATTERN.captures_iter(pattern) {
        let name = &cap[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Substitute every `{token}`, failing on the first token with no value
pub fn apply_tokens(pattern: &str, names: &HashMap<String, String>) -> Result<String, JobHostError> {
    if let Some(missing) = token_names(pattern)
        .into_iter()
        .find(|token| !names.contains_key(token))
    {
        return Err(JobHostError::UnresolvedToken {
            token: missing,
            pattern: pattern.to_string(),
        });
    }
    Ok(TOKEN_PATTERN
        .replace_all(pattern, |cap: &regex::Captures| names[&cap[1]].clone())
        .into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPath {
    container: String,
    blob: String,
}

impl BlobPath {
    /// Parse `container/blob`; the blob part is required
    pub fn parse(path: &str) -> Result<Self, JobHostError> {
        let parsed = Self::parse_prefix(path)?;
        if parsed.blob.is_empty() {
            return Err(invalid(path, "expected 'container/blob'"));
        }
        Ok(parsed)
    }

    /// Parse `container` or `container/prefix`
    pub fn parse_prefix(path: &str) -> Result<Self, JobHostError> {
        let (container, blob) = match path.split_once('/') {
            Some((container, blob)) => (container, blob),
            None => (path, ""),
        };
        if container.is_empty() {
            return Err(invalid(path, "container name is empty"));
        }
        if !has_tokens(container) {
            validate_container_name(container)?;
        }
        if blob.len() > MAX_BLOB_NAME_LEN {
            return Err(invalid(path, "blob name is longer than 1024 characters"));
        }
        Ok(Self {
            container: container.to_string(),
            blob: blob.to_string(),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Blob name or prefix; empty for container-only paths
    pub fn blob(&self) -> &str {
        &self.blob
    }

    pub fn parameter_names(&self) -> Vec<String> {
        token_names(&self.to_string())
    }

    pub fn has_parameters(&self) -> bool {
        has_tokens(&self.container) || has_tokens(&self.blob)
    }

    /// Concrete path with every token replaced
    pub fn apply_names(&self, names: &HashMap<String, String>) -> Result<BlobPath, JobHostError> {
        let pattern = self.to_string();
        let container = apply_tokens(&self.container, names).map_err(|e| with_pattern(e, &pattern))?;
        let blob = apply_tokens(&self.blob, names).map_err(|e| with_pattern(e, &pattern))?;
        validate_container_name(&container)?;
        if blob.len() > MAX_BLOB_NAME_LEN {
            return Err(invalid(&pattern, "blob name is longer than 1024 characters"));
        }
        Ok(BlobPath { container, blob })
    }

    /// Token values that make this pattern produce `actual`, or `None`
    ///
    /// Containers compare case-insensitively. A trailing token takes the rest
    /// of the path, so `{name}.csv` matches `a.b.csv` with name `a.b`.
    pub fn match_path(&self, actual: &BlobPath) -> Option<HashMap<String, String>> {
        let mut names = HashMap::new();
        if !match_part(&self.container, &actual.container, true, &mut names) {
            return None;
        }
        if !match_part(&self.blob, &actual.blob, false, &mut names) {
            return None;
        }
        Some(names)
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blob.is_empty() {
            write!(f, "{}", self.container)
        } else {
            write!(f, "{}/{}", self.container, self.blob)
        }
    }
}

fn invalid(path: &str, reason: &str) -> JobHostError {
    JobHostError::InvalidBlobPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn with_pattern(err: JobHostError, pattern: &str) -> JobHostError {
    match err {
        JobHostError::UnresolvedToken { token, .. } => JobHostError::UnresolvedToken {
            token,
            pattern: pattern.to_string(),
        },
        other => other,
    }
}

/// Match one path part, collecting captures; repeated tokens must agree
fn match_part(
    pattern: &str,
    actual: &str,
    case_insensitive: bool,
    names: &mut HashMap<String, String>,
) -> bool {
    let mut source = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut order = Vec::new();
    let mut last = 0;
    let tokens: Vec<_> = TOKEN_PATTERN.captures_iter(pattern).collect();
    for (i, cap) in tokens.iter().enumerate() {
        let whole = cap.get(0).map_or(0..0, |m| m.range());
        source.push_str(&regex::escape(&pattern[last..whole.start]));
        let is_trailing = i + 1 == tokens.len() && whole.end == pattern.len();
        source.push_str(if is_trailing { "(.*)" } else { "(.*?)" });
        order.push(cap[1].to_string());
        last = whole.end;
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');

    let Ok(re) = Regex::new(&source) else {
        return false;
    };
    let Some(caps) = re.captures(actual) else {
        return false;
    };
    for (i, name) in order.into_iter().enumerate() {
        let value = caps.get(i + 1).map_or("", |m| m.as_str()).to_string();
        match names.get(&name) {
            Some(existing) if *existing != value => return false,
            _ => {
                names.insert(name, value);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════
    // Parsing
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn parse_splits_on_first_slash() {
        let path = BlobPath::parse("input/dir/{name}.txt").unwrap();
        assert_eq!(path.container(), "input");
        assert_eq!(path.blob(), "dir/{name}.txt");
        assert_eq!(path.to_string(), "input/dir/{name}.txt");
    }

    #[test]
    fn parse_requires_blob() {
        let err = BlobPath::parse("input").unwrap_err();
        assert!(err.to_string().contains("JOB-010"));
        assert!(BlobPath::parse_prefix("input").is_ok());
    }

    #[test]
    fn parse_validates_literal_container() {
        assert!(BlobPath::parse("Input/x").is_err());
        assert!(BlobPath::parse("/x").is_err());
        assert!(BlobPath::parse("{env}-data/x").is_ok());
        let long = format!("c01/{}", "b".repeat(1025));
        assert!(BlobPath::parse(&long).is_err());
    }

    // ═══════════════════════════════════════════════════════════════
    // Tokens
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn parameter_names_in_order() {
        let path = BlobPath::parse("{env}-logs/{date}/{name}-{date}.log").unwrap();
        assert_eq!(path.parameter_names(), vec!["env", "date", "name"]);
        assert!(path.has_parameters());
        assert!(!BlobPath::parse("logs/today.log").unwrap().has_parameters());
    }

    #[test]
    fn apply_names_substitutes_everything() {
        let path = BlobPath::parse("container/{name}.txt").unwrap();
        let applied = path.apply_names(&names(&[("name", "foo")])).unwrap();
        assert_eq!(applied.to_string(), "container/foo.txt");
    }

    #[test]
    fn apply_names_reports_missing_token() {
        let path = BlobPath::parse("container/{name}.txt").unwrap();
        match path.apply_names(&HashMap::new()) {
            Err(JobHostError::UnresolvedToken { token, pattern }) => {
                assert_eq!(token, "name");
                assert_eq!(pattern, "container/{name}.txt");
            }
            other => panic!("expected UnresolvedToken, got {:?}", other),
        }
    }

    #[test]
    fn apply_names_validates_substituted_container() {
        let path = BlobPath::parse("{c}/x").unwrap();
        assert!(path.apply_names(&names(&[("c", "Bad_Name")])).is_err());
    }

    // ═══════════════════════════════════════════════════════════════
    // Matching
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn match_extension_keeps_inner_dots() {
        let pattern = BlobPath::parse("input/{name}.csv").unwrap();
        let actual = BlobPath::parse("input/a.b.csv").unwrap();
        assert_eq!(pattern.match_path(&actual), Some(names(&[("name", "a.b")])));
    }

    #[test]
    fn match_trailing_token_takes_rest() {
        let pattern = BlobPath::parse("input/{year}-{rest}").unwrap();
        let actual = BlobPath::parse("input/2024-03-17/x").unwrap();
        assert_eq!(
            pattern.match_path(&actual),
            Some(names(&[("year", "2024"), ("rest", "03-17/x")]))
        );
    }

    #[test]
    fn match_container_case_insensitive() {
        let pattern = BlobPath::parse("{c}/file.txt").unwrap();
        let literal = BlobPath {
            container: "INPUT".into(),
            blob: "file.txt".into(),
        };
        assert!(BlobPath::parse("input/file.txt").unwrap().match_path(&literal).is_some());
        assert_eq!(
            pattern.match_path(&literal),
            Some(names(&[("c", "INPUT")]))
        );
    }

    #[test]
    fn match_rejects_other_paths() {
        let pattern = BlobPath::parse("input/{name}.csv").unwrap();
        assert!(pattern
            .match_path(&BlobPath::parse("input/a.txt").unwrap())
            .is_none());
        assert!(pattern
            .match_path(&BlobPath::parse("other/a.csv").unwrap())
            .is_none());
    }

    #[test]
    fn match_repeated_token_must_agree() {
        let pattern = BlobPath::parse("c01/{id}/{id}.json").unwrap();
        assert!(pattern
            .match_path(&BlobPath::parse("c01/7/7.json").unwrap())
            .is_some());
        assert!(pattern
            .match_path(&BlobPath::parse("c01/7/8.json").unwrap())
            .is_none());
    }
}
