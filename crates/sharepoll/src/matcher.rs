//! File matcher
//!
//! Pure predicate over [`FileAttributes`]. Patterns are compiled once in
//! [`FileMatcher::new`]; [`FileMatcher::matches`] never fails.

use crate::client::FileAttributes;
use crate::error::{ConnectorError, Result};
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tri-state policy for one file type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchPolicy {
    /// Only entries of this type match
    Require,
    #[default]
    Include,
    /// Entries of this type never match
    Exclude,
}

impl MatchPolicy {
    fn accepts(self, is_kind: bool) -> bool {
        match self {
            MatchPolicy::Require => is_kind,
            MatchPolicy::Include => true,
            MatchPolicy::Exclude => !is_kind,
        }
    }
}

/// Declarative matcher configuration. Every unset field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherCriteria {
    /// Matched against the entry name; `glob:` (default) or `regex:` syntax
    pub filename_pattern: Option<String>,
    /// Matched against the share-root-relative path
    pub path_pattern: Option<String>,
    pub timestamp_since: Option<DateTime<Utc>>,
    pub timestamp_until: Option<DateTime<Utc>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub regular_files: MatchPolicy,
    pub directories: MatchPolicy,
    pub sym_links: MatchPolicy,
}

impl MatcherCriteria {
    pub fn with_filename_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.filename_pattern = Some(pattern.into());
        self
    }

    pub fn with_path_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.path_pattern = Some(pattern.into());
        self
    }

    pub fn with_timestamp_since(mut self, since: DateTime<Utc>) -> Self {
        self.timestamp_since = Some(since);
        self
    }

    pub fn with_timestamp_until(mut self, until: DateTime<Utc>) -> Self {
        self.timestamp_until = Some(until);
        self
    }

    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = Some(min_size);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_regular_files(mut self, policy: MatchPolicy) -> Self {
        self.regular_files = policy;
        self
    }

    pub fn with_directories(mut self, policy: MatchPolicy) -> Self {
        self.directories = policy;
        self
    }

    pub fn with_sym_links(mut self, policy: MatchPolicy) -> Self {
        self.sym_links = policy;
        self
    }
}

#[derive(Debug, Clone)]
enum CompiledPattern {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl CompiledPattern {
    fn compile(raw: &str) -> Result<Self> {
        if let Some(expr) = raw.strip_prefix("regex:") {
            let regex = Regex::new(&format!("^(?:{expr})$"))
                .map_err(|e| ConnectorError::config(format!("invalid regex '{expr}': {e}")))?;
            return Ok(CompiledPattern::Regex(regex));
        }
        let glob = raw.strip_prefix("glob:").unwrap_or(raw);
        let matcher = GlobBuilder::new(&normalize_recursive(glob))
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .map(|g| g.compile_matcher())
            .map_err(|e| ConnectorError::config(format!("invalid glob '{glob}': {e}")))?;
        Ok(CompiledPattern::Glob(matcher))
    }

    fn is_match(&self, candidate: &str) -> bool {
        match self {
            CompiledPattern::Glob(m) => m.is_match(candidate),
            CompiledPattern::Regex(r) => r.is_match(candidate),
        }
    }
}

/// `**` is only recursive as a whole path component; anywhere else it acts
/// like `*`, which already crosses `/` here.
fn normalize_recursive(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '*' && chars.get(i + 1) == Some(&'*') {
            let starts_component = i == 0 || chars[i - 1] == '/';
            let ends_component = i + 2 == chars.len() || chars[i + 2] == '/';
            out.push_str(if starts_component && ends_component { "**" } else { "*" });
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Compiled [`MatcherCriteria`].
#[derive(Debug, Clone)]
pub struct FileMatcher {
    criteria: MatcherCriteria,
    filename: Option<CompiledPattern>,
    path: Option<CompiledPattern>,
}

impl FileMatcher {
    pub fn new(criteria: MatcherCriteria) -> Result<Self> {
        let required = [criteria.regular_files, criteria.directories, criteria.sym_links]
            .iter()
            .filter(|p| **p == MatchPolicy::Require)
            .count();
        if required > 1 {
            return Err(ConnectorError::config(
                "at most one of regular_files, directories, sym_links may be REQUIRE",
            ));
        }
        if let (Some(min), Some(max)) = (criteria.min_size, criteria.max_size) {
            if min > max {
                return Err(ConnectorError::config(format!(
                    "min_size ({min}) is greater than max_size ({max})"
                )));
            }
        }
        if let (Some(since), Some(until)) = (criteria.timestamp_since, criteria.timestamp_until) {
            if since > until {
                return Err(ConnectorError::config(format!(
                    "timestamp_since ({since}) is after timestamp_until ({until})"
                )));
            }
        }

        let filename = criteria
            .filename_pattern
            .as_deref()
            .map(CompiledPattern::compile)
            .transpose()?;
        let path = criteria
            .path_pattern
            .as_deref()
            .map(CompiledPattern::compile)
            .transpose()?;

        Ok(Self {
            criteria,
            filename,
            path,
        })
    }

    /// Matcher accepting every entry.
    pub fn accept_all() -> Self {
        Self {
            criteria: MatcherCriteria::default(),
            filename: None,
            path: None,
        }
    }

    pub fn criteria(&self) -> &MatcherCriteria {
        &self.criteria
    }

    pub fn matches(&self, attrs: &FileAttributes) -> bool {
        self.matches_patterns(attrs)
            && self.matches_timestamp(attrs)
            && self.matches_size(attrs)
            && self.matches_kind(attrs)
    }

    fn matches_patterns(&self, attrs: &FileAttributes) -> bool {
        let name_ok = self
            .filename
            .as_ref()
            .map_or(true, |p| p.is_match(&attrs.name));
        let path_ok = self
            .path
            .as_ref()
            .map_or(true, |p| p.is_match(attrs.path.trim_start_matches('/')));
        name_ok && path_ok
    }

    fn matches_timestamp(&self, attrs: &FileAttributes) -> bool {
        let c = &self.criteria;
        if c.timestamp_since.is_none() && c.timestamp_until.is_none() {
            return true;
        }
        let Some(modified) = attrs.last_modified else {
            return false;
        };
        c.timestamp_since.map_or(true, |since| since <= modified)
            && c.timestamp_until.map_or(true, |until| modified <= until)
    }

    fn matches_size(&self, attrs: &FileAttributes) -> bool {
        let c = &self.criteria;
        if c.min_size.is_none() && c.max_size.is_none() {
            return true;
        }
        let Some(size) = attrs.size else {
            return false;
        };
        c.min_size.map_or(true, |min| min <= size) && c.max_size.map_or(true, |max| size <= max)
    }

    fn matches_kind(&self, attrs: &FileAttributes) -> bool {
        let c = &self.criteria;
        c.regular_files.accepts(attrs.is_regular_file())
            && c.directories.accepts(attrs.is_directory())
            && c.sym_links.accepts(attrs.is_symlink())
    }
}

impl Default for FileMatcher {
    fn default() -> Self {
        Self::accept_all()
    }
}
