use std::path::PathBuf;
use std::sync::Arc;

use manager_sdk::{validate_resource_id, BlueprintUpload, ClientError, ConfigError, ManagerApi};
use thiserror::Error;
use tracing::info;

use crate::archive::{package_blueprint, PackageError};

/// A blueprint as it exists locally: an id and the directory it is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintRef {
    pub id: String,
    pub source_dir: PathBuf,
    pub application_file: String,
}

impl BlueprintRef {
    pub fn new(
        id: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        application_file: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        validate_resource_id("blueprint", &id)?;
        Ok(Self {
            id,
            source_dir: source_dir.into(),
            application_file: application_file.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Uploaded,
    /// Reused as-is; content is not compared.
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("blueprint {blueprint_id} is already bound to different content: {message}")]
    Conflict {
        blueprint_id: String,
        message: String,
    },
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Client(ClientError),
}

pub struct BlueprintPublisher {
    manager: Arc<dyn ManagerApi>,
}

impl BlueprintPublisher {
    pub fn new(manager: Arc<dyn ManagerApi>) -> Self {
        Self { manager }
    }

    /// Makes sure `blueprint` exists on the manager, uploading it only when
    /// absent.
    pub async fn publish(&self, blueprint: &BlueprintRef) -> Result<PublishOutcome, PublishError> {
        if self
            .manager
            .blueprint_exists(&blueprint.id)
            .await
            .map_err(PublishError::Client)?
        {
            info!(blueprint_id = %blueprint.id, "blueprint already present, skipping upload");
            return Ok(PublishOutcome::AlreadyPresent);
        }

        info!(
            blueprint_id = %blueprint.id,
            source_dir = %blueprint.source_dir.display(),
            "publishing blueprint"
        );
        let archive = package_blueprint(
            &blueprint.id,
            &blueprint.source_dir,
            &blueprint.application_file,
        )
        .await?;
        let upload = BlueprintUpload {
            blueprint_id: blueprint.id.clone(),
            application_file: blueprint.application_file.clone(),
            archive,
        };
        match self.manager.upload_blueprint(&upload).await {
            Ok(()) => {
                info!(blueprint_id = %blueprint.id, "blueprint uploaded");
                Ok(PublishOutcome::Uploaded)
            }
            Err(err) if err.is_conflict() => Err(PublishError::Conflict {
                blueprint_id: blueprint.id.clone(),
                message: err.message().to_string(),
            }),
            Err(err) => Err(PublishError::Client(err)),
        }
    }
}
