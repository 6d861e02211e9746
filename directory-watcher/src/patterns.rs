//! Filename pattern matching.

use std::path::Path;

use glob::Pattern;
use tracing::warn;

/// Compiled set of shell-glob patterns matched against a file's base name.
///
/// A set built from an empty list matches every name; a set whose patterns
/// were all malformed matches nothing. Matching is case-sensitive.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    match_all: bool,
}

impl PatternSet {
    /// Compile the given patterns. Malformed patterns are logged and skipped.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut configured = 0usize;
        let patterns = patterns
            .into_iter()
            .inspect(|_| configured += 1)
            .filter_map(|raw| {
                let raw = raw.as_ref();
                match Pattern::new(raw) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        warn!("Skipping malformed file pattern {raw:?}: {e}");
                        None
                    }
                }
            })
            .collect();

        Self {
            patterns,
            match_all: configured == 0,
        }
    }

    /// Whether the set matches every file.
    pub fn matches_all(&self) -> bool {
        self.match_all
    }

    /// Number of usable patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no usable patterns were compiled.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check the base name of `path` against the set.
    pub fn matches(&self, path: &Path) -> bool {
        if self.match_all {
            return true;
        }

        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();

        self.patterns.iter().any(|p| p.matches(&name))
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            match_all: true,
        }
    }
}
