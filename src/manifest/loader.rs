//! # Manifest Loader
//!
//! Reads resource documents from a file or a directory tree.
//!
//! Directories are walked recursively and every `.yaml`, `.yml` and `.json`
//! file is read in lexical path order. Files may hold several YAML documents;
//! empty documents are skipped.

use super::{ManifestError, ResourceSet};
use kube::core::DynamicObject;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Load every resource found under `path`
pub fn load(path: &Path) -> Result<ResourceSet, ManifestError> {
    let files = manifest_files(path)?;
    let mut resources = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file).map_err(|source| ManifestError::Io {
            path: file.clone(),
            source,
        })?;
        resources.extend(parse_documents(file, &content)?);
    }
    debug!(
        path = %path.display(),
        files = files.len(),
        resources = resources.len(),
        "Loaded manifest"
    );
    ResourceSet::new(resources)
}

fn manifest_files(path: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let metadata = std::fs::metadata(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|source| ManifestError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && is_manifest(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

/// Parse all documents of one file
pub fn parse_documents(path: &Path, content: &str) -> Result<Vec<DynamicObject>, ManifestError> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let resource: DynamicObject =
            serde_json::from_value(json).map_err(|e| ManifestError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        resources.push(resource);
    }
    Ok(resources)
}
