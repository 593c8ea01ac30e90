//! The full `deploy` run: reconcile, settle, start, wait. Stages run strictly
//! in order and each one starts only after the previous one finished.

use std::sync::Arc;

use manager_sdk::{ClientError, ConfigError, Execution, Inputs, ManagerApi};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::exit;
use crate::inputs::InputsError;
use crate::orchestrator::{
    DeploymentAction, DeploymentOrchestrator, DeploymentPolicy, DeploymentRequest,
    OrchestrationError,
};
use crate::publisher::{PublishError, PublishOutcome};
use crate::watcher::{ExecutionWatcher, WatchError, WatchOptions};

#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub request: DeploymentRequest,
    pub policy: DeploymentPolicy,
    /// `None` stops after the deployment is ready.
    pub workflow: Option<String>,
    pub parameters: Inputs,
    pub wait: bool,
    pub watch: WatchOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployReport {
    pub deployment_id: String,
    pub action: DeploymentAction,
    pub blueprint: PublishOutcome,
    /// Last observed state of the workflow execution, if one was started.
    pub execution: Option<Execution>,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Inputs(#[from] InputsError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
    #[error("failed to start workflow {workflow} on {deployment_id}: {source}")]
    Start {
        deployment_id: String,
        workflow: String,
        #[source]
        source: ClientError,
    },
    #[error(transparent)]
    Client(ClientError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("interrupted")]
    Interrupted,
}

impl DeployError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Config(_) | DeployError::Inputs(_) => exit::CONFIG,
            DeployError::Orchestration(err) => match err {
                OrchestrationError::Publish(PublishError::Client(_))
                | OrchestrationError::Client { .. } => exit::CLIENT,
                OrchestrationError::Publish(_) => exit::PUBLISH,
                OrchestrationError::Rejected { .. }
                | OrchestrationError::Missing { .. }
                | OrchestrationError::BlueprintMismatch { .. } => exit::ORCHESTRATION,
            },
            DeployError::Start { .. } | DeployError::Client(_) => exit::CLIENT,
            DeployError::Watch(err) => match err {
                WatchError::Terminal { .. } => exit::WORKFLOW,
                WatchError::Timeout { .. } => exit::TIMEOUT,
                WatchError::Cancelled { .. } => exit::INTERRUPTED,
                WatchError::Client { .. } => exit::CLIENT,
            },
            DeployError::Interrupted => exit::INTERRUPTED,
        }
    }

    /// The execution a failure relates to, for follow-up inspection.
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            DeployError::Watch(err) => Some(err.execution_id()),
            _ => None,
        }
    }
}

pub async fn run_deploy(
    manager: Arc<dyn ManagerApi>,
    plan: &DeployPlan,
    cancel: &CancellationToken,
) -> Result<DeployReport, DeployError> {
    let deployment_id = plan.request.deployment_id.as_str();
    checkpoint(cancel)?;

    let orchestrator = DeploymentOrchestrator::new(manager.clone(), plan.policy);
    let ensured = orchestrator.ensure_deployment(&plan.request).await?;

    if ensured.action.changed_remote_state() {
        checkpoint(cancel)?;
        settle(manager.clone(), deployment_id, plan.watch, cancel).await?;
    }

    let mut report = DeployReport {
        deployment_id: deployment_id.to_string(),
        action: ensured.action,
        blueprint: ensured.blueprint,
        execution: None,
    };
    let Some(workflow) = plan.workflow.as_deref() else {
        info!(deployment_id, "no workflow requested");
        return Ok(report);
    };

    checkpoint(cancel)?;
    let execution = manager
        .start_execution(deployment_id, workflow, &plan.parameters)
        .await
        .map_err(|source| DeployError::Start {
            deployment_id: deployment_id.to_string(),
            workflow: workflow.to_string(),
            source,
        })?;
    info!(
        deployment_id,
        workflow,
        execution_id = %execution.id,
        "execution started"
    );

    if !plan.wait {
        report.execution = Some(execution);
        return Ok(report);
    }

    checkpoint(cancel)?;
    let watcher = ExecutionWatcher::new(manager, plan.watch);
    let finished = watcher.wait_for(&execution.id, cancel).await?;
    report.execution = Some(finished);
    Ok(report)
}

/// Waits out executions the manager runs on its own after a create or
/// update, so the workflow does not race them.
pub async fn settle(
    manager: Arc<dyn ManagerApi>,
    deployment_id: &str,
    watch: WatchOptions,
    cancel: &CancellationToken,
) -> Result<usize, DeployError> {
    let running: Vec<Execution> = manager
        .list_executions(deployment_id)
        .await
        .map_err(DeployError::Client)?
        .into_iter()
        .filter(|execution| !execution.status.is_terminal())
        .collect();
    if running.is_empty() {
        return Ok(0);
    }

    let watcher = ExecutionWatcher::new(
        manager,
        WatchOptions {
            cancel_on_timeout: false,
            ..watch
        },
    );
    for execution in &running {
        info!(
            deployment_id,
            execution_id = %execution.id,
            workflow = %execution.workflow,
            "waiting for manager execution to finish"
        );
        watcher.wait_for(&execution.id, cancel).await?;
    }
    Ok(running.len())
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), DeployError> {
    if cancel.is_cancelled() {
        Err(DeployError::Interrupted)
    } else {
        Ok(())
    }
}
