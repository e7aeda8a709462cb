// src/types.rs

//! Small value types shared across the crate.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to one artifact: the path string as observed by the scanner.
///
/// Equality is exact string equality. `ckpt/a.pt` and `./ckpt/a.pt` are two
/// different artifacts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ArtifactRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Every artifact the watch chain has accounted for as of its last scan.
///
/// Ordered so that serialized payloads and logs are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownSet(BTreeSet<ArtifactRef>);

impl KnownSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, artifact: &ArtifactRef) -> bool {
        self.0.contains(artifact)
    }

    pub fn insert(&mut self, artifact: ArtifactRef) -> bool {
        self.0.insert(artifact)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactRef> {
        self.0.iter()
    }

    /// Artifacts present in `self` but not in `previous`.
    ///
    /// Removals (present in `previous` only) are not reported.
    pub fn added_since(&self, previous: &KnownSet) -> Vec<ArtifactRef> {
        self.0.difference(&previous.0).cloned().collect()
    }
}

impl FromIterator<ArtifactRef> for KnownSet {
    fn from_iter<I: IntoIterator<Item = ArtifactRef>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for KnownSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(ArtifactRef::from).collect())
    }
}

impl IntoIterator for KnownSet {
    type Item = ArtifactRef;
    type IntoIter = std::collections::btree_set::IntoIter<ArtifactRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Identifier of one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|e| format!("invalid job id {s:?}: {e}"))
    }
}

/// Identifier of one registered worker, e.g. `evaluation.4711.1a2b3c4d`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Fresh id for a worker of this process subscribed to `queue`.
    pub fn generate(queue: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{queue}.{}.{}", std::process::id(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
