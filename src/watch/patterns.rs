// src/watch/patterns.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use regex::Regex;

/// Default filter: common checkpoint / model file suffixes.
pub const DEFAULT_PATTERN: &str = r"^.*\.(pt|pth|ckpt|model|state)$";

/// Prefix selecting glob syntax instead of a regex, e.g. `glob:epoch_*.pt`.
pub const GLOB_PREFIX: &str = "glob:";

#[derive(Clone)]
enum Matcher {
    /// Regex applied to the full artifact path, anchored at the start only.
    Regex(Regex),
    /// Glob applied to the entry's file name.
    Glob(GlobMatcher),
}

/// Compiled artifact filter.
///
/// The source string is kept so the filter can travel inside a watch
/// payload and be recompiled by whichever worker runs the next tick.
#[derive(Clone)]
pub struct ArtifactFilter {
    source: String,
    matcher: Matcher,
}

impl fmt::Debug for ArtifactFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFilter")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ArtifactFilter {
    /// Compile a filter from its configured form.
    ///
    /// - `glob:<pattern>` compiles a glob matched against the file name.
    /// - anything else compiles a regex matched against the full path.
    pub fn parse(source: &str) -> Result<Self> {
        let matcher = match source.strip_prefix(GLOB_PREFIX) {
            Some(glob) => {
                let glob = Glob::new(glob)
                    .with_context(|| format!("invalid glob pattern: {glob}"))?;
                Matcher::Glob(glob.compile_matcher())
            }
            None => {
                let re = Regex::new(source)
                    .with_context(|| format!("invalid regex filter: {source}"))?;
                Matcher::Regex(re)
            }
        };

        Ok(Self {
            source: source.to_string(),
            matcher,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns true if the entry at `path` (file name `name`) is an artifact.
    pub fn matches(&self, path: &str, name: &str) -> bool {
        match &self.matcher {
            // Leftmost match starting at 0 exists iff any match starts at 0.
            Matcher::Regex(re) => re.find(path).is_some_and(|m| m.start() == 0),
            Matcher::Glob(glob) => glob.is_match(name),
        }
    }
}
