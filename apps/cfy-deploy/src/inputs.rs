//! Deployment inputs and workflow parameters.

use std::path::{Path, PathBuf};

use manager_sdk::Inputs;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputsError {
    #[error("failed to read inputs file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("inputs file {path} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
    #[error("inputs file {path} must contain a mapping at the top level")]
    NotAMapping { path: PathBuf },
    #[error("expected key=value, got '{0}'")]
    MalformedPair(String),
    #[error("value for '{key}' is not valid YAML: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_yaml_ng::Error,
    },
}

/// Loads and shallow-merges inputs files left to right.
pub async fn load_files(paths: &[PathBuf]) -> Result<Inputs, InputsError> {
    let mut merged = Inputs::new();
    for path in paths {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| InputsError::Read {
                path: path.clone(),
                source,
            })?;
        merged.extend(parse_document(path, &raw)?);
    }
    Ok(merged)
}

/// Parses one YAML (or JSON) document into a mapping. Blank documents are empty.
pub fn parse_document(path: &Path, raw: &str) -> Result<Inputs, InputsError> {
    if raw.trim().is_empty() {
        return Ok(Inputs::new());
    }
    let value: Value = serde_yaml_ng::from_str(raw).map_err(|source| InputsError::Parse {
        path: path.to_owned(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Inputs::new()),
        _ => Err(InputsError::NotAMapping {
            path: path.to_owned(),
        }),
    }
}

/// Parses repeated `key=value` overrides. Values are read as YAML so that
/// `3`, `true` and `[a, b]` keep their type; a bare word stays a string.
pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Inputs, InputsError> {
    let mut parsed = Inputs::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(InputsError::MalformedPair(pair.to_string()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(InputsError::MalformedPair(pair.to_string()));
        }
        let value = if raw.trim().is_empty() {
            Value::String(String::new())
        } else {
            serde_yaml_ng::from_str(raw).map_err(|source| InputsError::InvalidValue {
                key: key.to_string(),
                source,
            })?
        };
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

/// Files first, then `key=value` overrides on top.
pub async fn resolve_inputs<S: AsRef<str>>(
    files: &[PathBuf],
    overrides: &[S],
) -> Result<Inputs, InputsError> {
    let mut inputs = load_files(files).await?;
    inputs.extend(parse_pairs(overrides)?);
    Ok(inputs)
}
