use super::Value;
use async_recursion::async_recursion;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Outcome of resolving one record payload.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The payload with every file reference replaced by its identifier.
    pub body: serde_json::Value,
    /// Referenced files in traversal order, one entry per reference.
    pub files: Vec<ResolvedFile>,
}

/// A local file together with its content-derived identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub identifier: String,
}

/// Walk `value` depth-first and build a new JSON tree in which every
/// [`Value::File`] reference is substituted by its identifier string.
///
/// Identifiers are derived solely from file bytes and extension, so two
/// references to identical content under the same extension yield the same
/// identifier. The input is never mutated; arrays keep their element order
/// and objects keep their keys.
pub async fn resolve_files(value: &Value) -> Result<Resolved> {
    let mut files = Vec::new();
    let body = traverse(value, &mut files).await?;
    Ok(Resolved { body, files })
}

#[async_recursion]
async fn traverse(value: &Value, files: &mut Vec<ResolvedFile>) -> Result<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Number(n) => Ok(serde_json::Value::Number(n.clone())),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(traverse(item, files).await?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                out.insert(key.clone(), traverse(val, files).await?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::File(path) => {
            let resolved = hash_file(path).await?;
            tracing::debug!(
                path = %resolved.path.display(),
                identifier = %resolved.identifier,
                "Resolved file reference"
            );
            let identifier = resolved.identifier.clone();
            files.push(resolved);
            Ok(serde_json::Value::String(identifier))
        }
    }
}

/// Derive a file's identifier: sha-256 over the content bytes followed by
/// the extension bytes, hex-encoded, with the extension appended.
async fn hash_file(path: &Path) -> Result<ResolvedFile> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|source| ResolveError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

    let extension = extension_with_dot(path);
    let mut hasher = Sha256::new();
    hasher.update(&data);
    hasher.update(extension.as_bytes());

    Ok(ResolvedFile {
        path: path.to_path_buf(),
        identifier: format!("{:x}{}", hasher.finalize(), extension),
    })
}

/// Extension including its leading dot, or empty when the file name has none.
fn extension_with_dot(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    }
}
