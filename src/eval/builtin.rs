// src/eval/builtin.rs

//! Evaluators registered by default under the `assayer` namespace.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use blake3::Hasher;
use serde_json::Value;

use crate::errors::{AssayerError, Result};
use crate::eval::{Evaluator, ResultRecord};
use crate::fs::FileSystem;
use crate::types::ArtifactRef;

/// `assayer.checksum`: blake3 digest and size of a file artifact.
///
/// Directory artifacts report `kind = "directory"` and no digest.
#[derive(Debug, Clone)]
pub struct ChecksumEvaluator {
    fs: Arc<dyn FileSystem>,
}

impl ChecksumEvaluator {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

/// Hash a file through the filesystem seam; returns (hex digest, bytes read).
fn hash_file(fs: &dyn FileSystem, path: &Path) -> anyhow::Result<(String, u64)> {
    let mut hasher = Hasher::new();
    let mut reader = fs.open_read(path)?;
    let mut buf = [0u8; 8192];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((hasher.finalize().to_hex().to_string(), size))
}

#[async_trait]
impl Evaluator for ChecksumEvaluator {
    async fn evaluate(&self, artifact: &ArtifactRef) -> Result<ResultRecord> {
        let path = Path::new(artifact.as_str()).to_path_buf();
        let mut record = ResultRecord::new();

        if self.fs.is_dir(&path) {
            record.insert("kind".into(), Value::from("directory"));
            return Ok(record);
        }

        let fs = Arc::clone(&self.fs);
        let (digest, size) = tokio::task::spawn_blocking(move || hash_file(fs.as_ref(), &path))
            .await
            .map_err(|e| AssayerError::EvaluatorFailed(format!("checksum task failed: {e}")))?
            .map_err(|e| AssayerError::EvaluatorFailed(format!("{e:#}")))?;

        record.insert("kind".into(), Value::from("file"));
        record.insert("blake3".into(), Value::from(digest));
        record.insert("size".into(), Value::from(size));
        Ok(record)
    }
}

/// `assayer.noop`: accepts every artifact and records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvaluator;

#[async_trait]
impl Evaluator for NoopEvaluator {
    async fn evaluate(&self, _artifact: &ArtifactRef) -> Result<ResultRecord> {
        Ok(ResultRecord::new())
    }
}
