//! Blueprint packaging.
//!
//! The source directory becomes a gzip-compressed tar archive with a single
//! top-level directory named after the blueprint id, which is the layout the
//! manager expects for uploads.

use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("blueprint directory {0} does not exist or is not a directory")]
    MissingDirectory(PathBuf),
    #[error("application file '{file}' not found in {dir}")]
    MissingApplicationFile { dir: PathBuf, file: String },
    #[error("application file '{0}' must be a relative path inside the blueprint directory")]
    InvalidApplicationFile(String),
    #[error("failed to archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("packaging task failed: {0}")]
    Task(String),
}

/// Packages `source_dir` for upload as blueprint `blueprint_id`.
pub async fn package_blueprint(
    blueprint_id: &str,
    source_dir: &Path,
    application_file: &str,
) -> Result<Bytes, PackageError> {
    check_layout(source_dir, application_file)?;
    let blueprint_id = blueprint_id.to_string();
    let source_dir = source_dir.to_owned();
    spawn_blocking(move || package_sync(&blueprint_id, &source_dir))
        .await
        .map_err(|err| PackageError::Task(err.to_string()))?
}

fn check_layout(source_dir: &Path, application_file: &str) -> Result<(), PackageError> {
    if !source_dir.is_dir() {
        return Err(PackageError::MissingDirectory(source_dir.to_owned()));
    }
    let relative = Path::new(application_file);
    let escapes = application_file.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(PackageError::InvalidApplicationFile(
            application_file.to_string(),
        ));
    }
    if !source_dir.join(relative).is_file() {
        return Err(PackageError::MissingApplicationFile {
            dir: source_dir.to_owned(),
            file: application_file.to_string(),
        });
    }
    Ok(())
}

fn package_sync(blueprint_id: &str, source_dir: &Path) -> Result<Bytes, PackageError> {
    let io_err = |path: &Path| {
        let path = path.to_owned();
        move |source| PackageError::Io { path, source }
    };
    let root = Path::new(blueprint_id);

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir(root, source_dir)
        .map_err(io_err(source_dir))?;

    let mut entries = 0usize;
    for path in walk(source_dir).map_err(io_err(source_dir))? {
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| PackageError::Io {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
            })?;
        let name = root.join(relative);
        if path.is_dir() {
            builder.append_dir(&name, &path).map_err(io_err(&path))?;
        } else {
            builder
                .append_path_with_name(&path, &name)
                .map_err(io_err(&path))?;
        }
        entries += 1;
    }

    let encoder = builder.into_inner().map_err(io_err(source_dir))?;
    let archive = encoder.finish().map_err(io_err(source_dir))?;
    debug!(
        blueprint_id,
        entries,
        archive_bytes = archive.len(),
        "packaged blueprint"
    );
    Ok(Bytes::from(archive))
}

/// Every path below `dir`, depth first, siblings in name order so the
/// archive is stable across runs.
fn walk(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    children.sort();

    let mut paths = Vec::new();
    for child in children {
        let is_dir = std::fs::symlink_metadata(&child)?.is_dir();
        paths.push(child.clone());
        if is_dir {
            paths.extend(walk(&child)?);
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn entries(archive: &Bytes) -> Vec<(String, Vec<u8>)> {
        let mut tar = tar::Archive::new(GzDecoder::new(archive.as_ref()));
        let mut out = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            out.push((name, body));
        }
        out
    }

    #[tokio::test]
    async fn archive_has_single_top_level_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blueprint.yaml"), "tosca_definitions_version: x").unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("scripts/install.sh"), "#!/bin/sh\nexit 0\n").unwrap();

        let archive = package_blueprint("web-bp", dir.path(), "blueprint.yaml")
            .await
            .unwrap();
        let entries = entries(&archive);

        assert!(entries
            .iter()
            .all(|(name, _)| name == "web-bp" || name.starts_with("web-bp/")));
        let script = entries
            .iter()
            .find(|(name, _)| name == "web-bp/scripts/install.sh")
            .expect("script packaged");
        assert_eq!(script.1, b"#!/bin/sh\nexit 0\n");
        assert!(entries.iter().any(|(name, _)| name == "web-bp/blueprint.yaml"));
    }

    #[tokio::test]
    async fn missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = package_blueprint("web-bp", &missing, "blueprint.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::MissingDirectory(_)));
    }

    #[tokio::test]
    async fn missing_application_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("other.yaml"), "").unwrap();
        let err = package_blueprint("web-bp", dir.path(), "blueprint.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::MissingApplicationFile { .. }));
    }

    #[tokio::test]
    async fn application_file_cannot_escape_directory() {
        let dir = TempDir::new().unwrap();
        let err = package_blueprint("web-bp", dir.path(), "../blueprint.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::InvalidApplicationFile(_)));
    }
}
