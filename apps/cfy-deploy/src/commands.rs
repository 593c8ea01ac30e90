//! Subcommand execution. Result lines go to `out`; everything else is logged.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use manager_sdk::{resolve, Execution, ManagerApi, ManagerClient, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{Command, ConnectionArgs, DeployArgs};
use crate::exit;
use crate::inputs::{parse_pairs, resolve_inputs};
use crate::orchestrator::{DeploymentPolicy, DeploymentRequest};
use crate::pipeline::{run_deploy, DeployError, DeployPlan};
use crate::publisher::{BlueprintRef, PublishOutcome};
use crate::watcher::{ExecutionWatcher, WatchError};

/// Resolves the connection and builds the HTTP client. No network traffic.
pub fn connect(args: &ConnectionArgs) -> Result<ManagerClient, DeployError> {
    let config = resolve(&args.to_params())?;
    info!(
        manager = %config.endpoint(),
        tenant = config.tenant(),
        verify_tls = config.verify_tls(),
        "manager connection resolved"
    );
    ManagerClient::new(config, RetryPolicy::default()).map_err(DeployError::Client)
}

/// Validates a `deploy` invocation into a plan without touching the manager.
pub async fn build_plan(args: &DeployArgs) -> Result<DeployPlan, DeployError> {
    let blueprint = BlueprintRef::new(
        args.blueprint_id.clone(),
        args.blueprint_dir.clone(),
        args.application_file.clone(),
    )?;
    let inputs = resolve_inputs(&args.inputs, args.input.as_slice()).await?;
    let parameters = parse_pairs(args.param.as_slice())?;
    let request = DeploymentRequest::new(args.deployment_id.clone(), blueprint, inputs)?
        .skip_if_exists(args.skip_if_exists);

    Ok(DeployPlan {
        request,
        policy: DeploymentPolicy {
            create_if_missing: !args.no_create,
            on_blueprint_change: args.on_blueprint_change.into(),
        },
        workflow: (!args.no_execute).then(|| args.workflow.clone()),
        parameters,
        wait: args.wait,
        watch: args.watch.to_options(),
    })
}

pub async fn execute<W: Write>(
    command: &Command,
    manager: Arc<dyn ManagerApi>,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Deploy(args) => {
            let plan = build_plan(args).await?;
            deploy(&plan, manager, cancel, out).await
        }
        Command::Status(args) => {
            let execution = manager
                .get_execution(&args.execution_id)
                .await
                .map_err(DeployError::Client)?;
            write_execution(out, &execution)?;
            if let Some(error) = &execution.error {
                writeln!(out, "error: {error}")?;
            }
            Ok(())
        }
        Command::Wait(args) => {
            let watcher = ExecutionWatcher::new(manager, args.watch.to_options());
            match watcher.wait_for(&args.execution_id, cancel).await {
                Ok(execution) => write_execution(out, &execution),
                Err(err) => {
                    write_watch_failure(out, &err)?;
                    Err(DeployError::from(err).into())
                }
            }
        }
        Command::Cancel(args) => {
            manager
                .cancel_execution(&args.execution_id)
                .await
                .map_err(DeployError::Client)?;
            writeln!(out, "execution {} cancel requested", args.execution_id)?;
            Ok(())
        }
        Command::Executions(args) => {
            let executions = manager
                .list_executions(&args.deployment_id)
                .await
                .map_err(DeployError::Client)?;
            for execution in &executions {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    execution.id, execution.workflow, execution.status
                )?;
            }
            Ok(())
        }
    }
}

async fn deploy<W: Write>(
    plan: &DeployPlan,
    manager: Arc<dyn ManagerApi>,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<()> {
    let report = match run_deploy(manager, plan, cancel).await {
        Ok(report) => report,
        Err(DeployError::Watch(err)) => {
            write_watch_failure(out, &err)?;
            return Err(DeployError::Watch(err).into());
        }
        Err(err) => return Err(err.into()),
    };

    let blueprint = match report.blueprint {
        PublishOutcome::Uploaded => "uploaded",
        PublishOutcome::AlreadyPresent => "already present",
    };
    writeln!(
        out,
        "blueprint {} {}",
        plan.request.blueprint.id, blueprint
    )?;
    writeln!(out, "deployment {} {}", report.deployment_id, report.action)?;
    if let Some(execution) = &report.execution {
        write_execution(out, execution)?;
    }
    Ok(())
}

fn write_execution<W: Write>(out: &mut W, execution: &Execution) -> Result<()> {
    writeln!(
        out,
        "execution {} {} (deployment {}, workflow {})",
        execution.id, execution.status, execution.deployment_id, execution.workflow
    )
    .context("failed to write result")
}

fn write_watch_failure<W: Write>(out: &mut W, err: &WatchError) -> Result<()> {
    let status = match err {
        WatchError::Terminal { status, .. } => status.as_str(),
        WatchError::Timeout { .. } => "timeout",
        WatchError::Cancelled { .. } => "interrupted",
        WatchError::Client { .. } => "unknown",
    };
    writeln!(out, "execution {} {}", err.execution_id(), status)
        .context("failed to write result")
}

/// Exit code for an error returned by [`execute`] or [`connect`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<DeployError>()
        .map(DeployError::exit_code)
        .unwrap_or(exit::CLIENT)
}
