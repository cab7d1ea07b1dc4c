//! Loading manifest documents from files.
//!
//! The reconciler core only requires decoded, validated records; this module
//! is the file-based configuration source used by the CLI. A path may be a
//! single YAML file or a directory of `*.yaml` / `*.yml` files, each holding
//! one or more documents separated by `---`.

use super::ManifestRecord;
use crate::error::{Result, StevedoreError};
use serde::Deserialize;
use std::path::Path;

/// Parse all manifest documents in a YAML string.
///
/// Every document is validated; the first invalid document fails the whole
/// parse so a partially-applied file never reaches the store. `origin` is
/// only used for error reporting.
pub fn parse_manifests(input: &str, origin: &Path) -> Result<Vec<ManifestRecord>> {
    let mut records = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| {
            StevedoreError::ManifestParse {
                path: origin.to_path_buf(),
                cause: e.to_string(),
            }
        })?;
        // Skip empty documents (a trailing `---` produces a null value).
        if value.is_null() {
            continue;
        }
        let record: ManifestRecord =
            serde_yaml::from_value(value).map_err(|e| StevedoreError::ManifestParse {
                path: origin.to_path_buf(),
                cause: e.to_string(),
            })?;
        record.validate()?;
        records.push(record);
    }
    Ok(records)
}

/// Load manifest records from a file or a directory.
///
/// Directories are read non-recursively; files are taken in name order so
/// repeated loads apply documents deterministically.
pub fn load_path(path: &Path) -> Result<Vec<ManifestRecord>> {
    let io_err = |e: std::io::Error| StevedoreError::Io {
        path: path.to_path_buf(),
        cause: e.to_string(),
    };

    if path.is_dir() {
        let mut files: Vec<_> = std::fs::read_dir(path)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        files.sort();

        let mut records = Vec::new();
        for file in files {
            records.extend(load_file(&file)?);
        }
        Ok(records)
    } else {
        load_file(path)
    }
}

fn load_file(path: &Path) -> Result<Vec<ManifestRecord>> {
    let contents = std::fs::read_to_string(path).map_err(|e| StevedoreError::Io {
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;
    let records = parse_manifests(&contents, path)?;
    tracing::debug!(path = %path.display(), count = records.len(), "Loaded manifests");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManifestKind;
    use std::io::Write;

    const TWO_DOCS: &str = r#"
kind: Deployment
name: web-a
desiredReplicas: 2
image: registry.local/web-a:v1
ports: [8080]
selectorLabels:
  app: web-a
---
kind: Service
name: web-a
ports: [8080]
selectorLabels:
  app: web-a
"#;

    #[test]
    fn parses_multi_document_stream() {
        let records = parse_manifests(TWO_DOCS, Path::new("test.yaml")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ManifestKind::Deployment);
        assert_eq!(records[0].desired_replicas, 2);
        assert_eq!(records[1].kind, ManifestKind::Service);
        assert_eq!(records[1].target_port(), Some(8080));
    }

    #[test]
    fn trailing_separator_is_ignored() {
        let input = format!("{}---\n", TWO_DOCS);
        let records = parse_manifests(&input, Path::new("test.yaml")).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn invalid_document_fails_whole_parse() {
        let input = format!("{}---\nkind: Deployment\nname: bad\nimage: ''\n", TWO_DOCS);
        let err = parse_manifests(&input, Path::new("test.yaml")).unwrap_err();
        assert_eq!(err.code(), "E001");
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let input = "kind: CronJob\nname: web-a\n";
        let err = parse_manifests(input, Path::new("test.yaml")).unwrap_err();
        assert_eq!(err.code(), "E901");
    }

    #[test]
    fn loads_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = std::fs::File::create(dir.path().join("b.yaml")).unwrap();
        writeln!(
            b,
            "kind: Service\nname: web-b\nports: [80]\nselectorLabels: {{app: web-b}}"
        )
        .unwrap();
        let mut a = std::fs::File::create(dir.path().join("a.yml")).unwrap();
        writeln!(
            a,
            "kind: Deployment\nname: web-a\nimage: web:v1\nselectorLabels: {{app: web-a}}"
        )
        .unwrap();
        // Non-manifest files are skipped.
        std::fs::File::create(dir.path().join("notes.txt")).unwrap();

        let records = load_path(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "web-a");
        assert_eq!(records[1].name, "web-b");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_path(Path::new("/nonexistent/manifests.yaml")).unwrap_err();
        assert_eq!(err.code(), "E902");
    }
}
