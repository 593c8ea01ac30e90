//! Deployment reconciliation: publish the blueprint, then bring the
//! deployment in line with the requested blueprint and inputs.

use std::fmt;
use std::sync::Arc;

use manager_sdk::{
    validate_resource_id, ClientError, ConfigError, Deployment, DeploymentSpec, Inputs,
    ManagerApi, PermanentKind,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::publisher::{BlueprintPublisher, BlueprintRef, PublishError, PublishOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequest {
    pub deployment_id: String,
    pub blueprint: BlueprintRef,
    pub inputs: Inputs,
    /// Leave an existing deployment untouched, whatever it is bound to.
    pub skip_if_exists: bool,
}

impl DeploymentRequest {
    pub fn new(
        deployment_id: impl Into<String>,
        blueprint: BlueprintRef,
        inputs: Inputs,
    ) -> Result<Self, ConfigError> {
        let deployment_id = deployment_id.into();
        validate_resource_id("deployment", &deployment_id)?;
        Ok(Self {
            deployment_id,
            blueprint,
            inputs,
            skip_if_exists: false,
        })
    }

    pub fn skip_if_exists(mut self, skip: bool) -> Self {
        self.skip_if_exists = skip;
        self
    }

    /// What the manager should hold once the request is applied.
    pub fn spec(&self) -> DeploymentSpec {
        DeploymentSpec {
            blueprint_id: self.blueprint.id.clone(),
            inputs: self.inputs.clone(),
        }
    }
}

/// What to do when an existing deployment is bound to another blueprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlueprintChangePolicy {
    /// Re-bind the deployment in place.
    #[default]
    Update,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentPolicy {
    pub create_if_missing: bool,
    pub on_blueprint_change: BlueprintChangePolicy,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            on_blueprint_change: BlueprintChangePolicy::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStage {
    NotStarted,
    BlueprintPublishing,
    BlueprintReady,
    DeploymentCreating,
    DeploymentReady,
    Failed,
}

impl DeploymentStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStage::DeploymentReady | DeploymentStage::Failed)
    }

    pub fn can_advance_to(self, next: DeploymentStage) -> bool {
        use DeploymentStage::*;
        match (self, next) {
            (current, Failed) => !current.is_terminal(),
            (NotStarted, BlueprintPublishing)
            | (BlueprintPublishing, BlueprintReady)
            | (BlueprintReady, DeploymentCreating)
            | (DeploymentCreating, DeploymentReady) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStage::NotStarted => "not_started",
            DeploymentStage::BlueprintPublishing => "blueprint_publishing",
            DeploymentStage::BlueprintReady => "blueprint_ready",
            DeploymentStage::DeploymentCreating => "deployment_creating",
            DeploymentStage::DeploymentReady => "deployment_ready",
            DeploymentStage::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentAction {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

impl DeploymentAction {
    /// Whether the manager runs its own execution as a result of this action.
    pub fn changed_remote_state(self) -> bool {
        matches!(self, DeploymentAction::Created | DeploymentAction::Updated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentAction::Created => "created",
            DeploymentAction::Updated => "updated",
            DeploymentAction::Unchanged => "unchanged",
            DeploymentAction::Skipped => "skipped",
        }
    }
}

impl fmt::Display for DeploymentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsuredDeployment {
    pub deployment: Deployment,
    pub action: DeploymentAction,
    pub blueprint: PublishOutcome,
    pub stages: Vec<DeploymentStage>,
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("manager rejected deployment {deployment_id}: {source}")]
    Rejected {
        deployment_id: String,
        #[source]
        source: ClientError,
    },
    #[error("deployment {deployment_id} does not exist and creation is disabled")]
    Missing { deployment_id: String },
    #[error(
        "deployment {deployment_id} is bound to blueprint {current}, refusing to switch to {requested}"
    )]
    BlueprintMismatch {
        deployment_id: String,
        current: String,
        requested: String,
    },
    #[error("deployment {deployment_id}: {source}")]
    Client {
        deployment_id: String,
        #[source]
        source: ClientError,
    },
}

struct StageLog<'a> {
    deployment_id: &'a str,
    stages: Vec<DeploymentStage>,
}

impl<'a> StageLog<'a> {
    fn new(deployment_id: &'a str) -> Self {
        Self {
            deployment_id,
            stages: vec![DeploymentStage::NotStarted],
        }
    }

    fn current(&self) -> DeploymentStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(DeploymentStage::NotStarted)
    }

    fn advance(&mut self, next: DeploymentStage) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "invalid stage transition {current} -> {next}"
        );
        info!(
            deployment_id = self.deployment_id,
            from = %current,
            to = %next,
            "deployment stage"
        );
        self.stages.push(next);
    }

    fn fail(&mut self, err: OrchestrationError) -> OrchestrationError {
        warn!(
            deployment_id = self.deployment_id,
            stage = %self.current(),
            error = %err,
            "deployment failed"
        );
        self.advance(DeploymentStage::Failed);
        err
    }
}

pub struct DeploymentOrchestrator {
    manager: Arc<dyn ManagerApi>,
    publisher: BlueprintPublisher,
    policy: DeploymentPolicy,
}

impl DeploymentOrchestrator {
    pub fn new(manager: Arc<dyn ManagerApi>, policy: DeploymentPolicy) -> Self {
        Self {
            publisher: BlueprintPublisher::new(manager.clone()),
            manager,
            policy,
        }
    }

    /// Publishes the blueprint, then creates, updates or keeps the
    /// deployment. Never deletes anything on failure.
    pub async fn ensure_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<EnsuredDeployment, OrchestrationError> {
        let deployment_id = request.deployment_id.as_str();
        let mut log = StageLog::new(deployment_id);

        log.advance(DeploymentStage::BlueprintPublishing);
        let blueprint = match self.publisher.publish(&request.blueprint).await {
            Ok(outcome) => outcome,
            Err(err) => return Err(log.fail(err.into())),
        };
        log.advance(DeploymentStage::BlueprintReady);

        log.advance(DeploymentStage::DeploymentCreating);
        let (deployment, action) = match self.reconcile(request).await {
            Ok(result) => result,
            Err(err) => return Err(log.fail(err)),
        };
        log.advance(DeploymentStage::DeploymentReady);

        info!(
            deployment_id,
            blueprint_id = %deployment.blueprint_id,
            action = %action,
            "deployment ready"
        );
        Ok(EnsuredDeployment {
            deployment,
            action,
            blueprint,
            stages: log.stages,
        })
    }

    async fn reconcile(
        &self,
        request: &DeploymentRequest,
    ) -> Result<(Deployment, DeploymentAction), OrchestrationError> {
        let deployment_id = request.deployment_id.as_str();
        let spec = request.spec();
        let existing = self
            .manager
            .get_deployment(deployment_id)
            .await
            .map_err(|source| OrchestrationError::Client {
                deployment_id: deployment_id.to_string(),
                source,
            })?;

        let Some(existing) = existing else {
            if !self.policy.create_if_missing {
                return Err(OrchestrationError::Missing {
                    deployment_id: deployment_id.to_string(),
                });
            }
            info!(deployment_id, blueprint_id = %spec.blueprint_id, "creating deployment");
            let created = self
                .manager
                .create_deployment(deployment_id, &spec)
                .await
                .map_err(|err| classify(deployment_id, err))?;
            return Ok((created, DeploymentAction::Created));
        };

        if request.skip_if_exists {
            info!(deployment_id, "deployment exists, leaving it untouched");
            return Ok((existing, DeploymentAction::Skipped));
        }
        if existing.matches(&spec) {
            info!(deployment_id, "deployment already up to date");
            return Ok((existing, DeploymentAction::Unchanged));
        }
        if existing.blueprint_id != spec.blueprint_id
            && self.policy.on_blueprint_change == BlueprintChangePolicy::Reject
        {
            return Err(OrchestrationError::BlueprintMismatch {
                deployment_id: deployment_id.to_string(),
                current: existing.blueprint_id,
                requested: spec.blueprint_id,
            });
        }

        info!(
            deployment_id,
            from_blueprint = %existing.blueprint_id,
            to_blueprint = %spec.blueprint_id,
            "updating deployment in place"
        );
        let updated = self
            .manager
            .update_deployment(deployment_id, &spec)
            .await
            .map_err(|err| classify(deployment_id, err))?;
        Ok((updated, DeploymentAction::Updated))
    }
}

/// Refusals of the request itself are rejections; auth and exhausted
/// retries stay client errors.
fn classify(deployment_id: &str, source: ClientError) -> OrchestrationError {
    let deployment_id = deployment_id.to_string();
    match source.kind() {
        Some(PermanentKind::Auth) | None => OrchestrationError::Client {
            deployment_id,
            source,
        },
        Some(_) => OrchestrationError::Rejected {
            deployment_id,
            source,
        },
    }
}
