//! Write the coverage artifact.
//!
//! Serializes the [`CoverageDocument`] to JSON and writes it to the
//! configured path (or stdout for `-`). The artifact carries no timestamps,
//! so identical inputs give byte-identical files; the SHA-256 of the bytes
//! is reported so runs can be compared.

use anyhow::{Context, Result};
use key_coverage_core::export::CoverageDocument;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Where the artifact went and what it hashed to.
#[derive(Debug, Clone)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
}

pub fn render(document: &CoverageDocument, pretty: bool) -> Result<String> {
    let mut json = if pretty {
        serde_json::to_string_pretty(document)?
    } else {
        serde_json::to_string(document)?
    };
    json.push('\n');
    Ok(json)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write the document. A path of `-` writes to stdout.
pub fn write_artifact(document: &CoverageDocument, path: &Path, pretty: bool) -> Result<WrittenArtifact> {
    let json = render(document, pretty)?;
    if path.as_os_str() == "-" {
        print!("{}", json);
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write artifact: {}", path.display()))?;
    }
    Ok(WrittenArtifact {
        path: path.to_path_buf(),
        bytes: json.len(),
        sha256: sha256_hex(json.as_bytes()),
    })
}

pub fn read_artifact(path: &Path) -> Result<CoverageDocument> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact: {}", path.display()))
}
