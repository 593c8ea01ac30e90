use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    BlueprintUpload, ClientError, Deployment, DeploymentSpec, Execution, ExecutionStatus, Inputs,
    ManagerApi, PermanentKind,
};

/// Every trait call the in-memory manager received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    BlueprintExists(String),
    UploadBlueprint(String),
    GetDeployment(String),
    CreateDeployment(String),
    UpdateDeployment(String),
    StartExecution { deployment_id: String, workflow: String },
    GetExecution(String),
    ListExecutions(String),
    CancelExecution(String),
}

/// What a single `get_execution` poll answers.
#[derive(Debug, Clone)]
pub enum PollStep {
    Status(ExecutionStatus),
    /// Terminal status with the manager's error text.
    StatusWithError(ExecutionStatus, String),
    /// The poll itself fails.
    Fault(ClientError),
}

#[derive(Default)]
struct MemoryState {
    blueprints: HashMap<String, BlueprintUpload>,
    deployments: HashMap<String, Deployment>,
    executions: HashMap<String, Execution>,
    scripts: HashMap<String, VecDeque<PollStep>>,
    pending_scripts: HashMap<String, VecDeque<PollStep>>,
    conflicting_blueprints: HashSet<String>,
    rejected_deployments: HashMap<String, String>,
    faults: HashMap<&'static str, VecDeque<ClientError>>,
    calls: Vec<ManagerCall>,
}

/// In-process manager for tests and dry wiring. Executions follow scripted
/// poll sequences; once a script runs dry the last reported status repeats.
#[derive(Default)]
pub struct InMemoryManager {
    state: Mutex<MemoryState>,
}

impl InMemoryManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Poll sequence for the next execution started with `workflow`.
    pub async fn script_workflow(&self, workflow: &str, steps: Vec<PollStep>) {
        self.state
            .lock()
            .await
            .pending_scripts
            .insert(workflow.to_string(), steps.into());
    }

    /// Registers an execution that already exists on the manager.
    pub async fn insert_execution(&self, execution: Execution, steps: Vec<PollStep>) {
        let mut state = self.state.lock().await;
        state.scripts.insert(execution.id.clone(), steps.into());
        state.executions.insert(execution.id.clone(), execution);
    }

    pub async fn insert_blueprint(&self, blueprint_id: &str) {
        self.state.lock().await.blueprints.insert(
            blueprint_id.to_string(),
            BlueprintUpload {
                blueprint_id: blueprint_id.to_string(),
                application_file: "blueprint.yaml".into(),
                archive: Default::default(),
            },
        );
    }

    pub async fn insert_deployment(&self, deployment: Deployment) {
        self.state
            .lock()
            .await
            .deployments
            .insert(deployment.id.clone(), deployment);
    }

    /// Uploads of `blueprint_id` will be refused as bound to other content.
    pub async fn reject_blueprint_as_conflict(&self, blueprint_id: &str) {
        self.state
            .lock()
            .await
            .conflicting_blueprints
            .insert(blueprint_id.to_string());
    }

    /// Creates and updates of `deployment_id` will be refused with `message`.
    pub async fn reject_deployment(&self, deployment_id: &str, message: &str) {
        self.state
            .lock()
            .await
            .rejected_deployments
            .insert(deployment_id.to_string(), message.to_string());
    }

    /// Queues an error for the next call of `operation` (a [`ManagerCall`]
    /// name in snake case, e.g. `"get_execution"`).
    pub async fn inject_fault(&self, operation: &'static str, error: ClientError) {
        self.state
            .lock()
            .await
            .faults
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub async fn calls(&self) -> Vec<ManagerCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn uploaded_blueprint(&self, blueprint_id: &str) -> Option<BlueprintUpload> {
        self.state.lock().await.blueprints.get(blueprint_id).cloned()
    }

    pub async fn deployment(&self, deployment_id: &str) -> Option<Deployment> {
        self.state.lock().await.deployments.get(deployment_id).cloned()
    }
}

impl MemoryState {
    fn record(&mut self, operation: &'static str, call: ManagerCall) -> Result<(), ClientError> {
        self.calls.push(call);
        match self.faults.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rejection(&self, deployment_id: &str, operation: &str) -> Result<(), ClientError> {
        match self.rejected_deployments.get(deployment_id) {
            Some(message) => Err(ClientError::Permanent {
                operation: operation.to_string(),
                kind: PermanentKind::Rejected,
                status: Some(400),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ManagerApi for InMemoryManager {
    async fn blueprint_exists(&self, blueprint_id: &str) -> Result<bool, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "blueprint_exists",
            ManagerCall::BlueprintExists(blueprint_id.to_string()),
        )?;
        Ok(state.blueprints.contains_key(blueprint_id))
    }

    async fn upload_blueprint(&self, upload: &BlueprintUpload) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "upload_blueprint",
            ManagerCall::UploadBlueprint(upload.blueprint_id.clone()),
        )?;
        if state.conflicting_blueprints.contains(&upload.blueprint_id)
            || state.blueprints.contains_key(&upload.blueprint_id)
        {
            return Err(ClientError::Permanent {
                operation: "upload blueprint".into(),
                kind: PermanentKind::Conflict,
                status: Some(409),
                message: format!("blueprint {} already exists", upload.blueprint_id),
            });
        }
        state
            .blueprints
            .insert(upload.blueprint_id.clone(), upload.clone());
        Ok(())
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "get_deployment",
            ManagerCall::GetDeployment(deployment_id.to_string()),
        )?;
        Ok(state.deployments.get(deployment_id).cloned())
    }

    async fn create_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "create_deployment",
            ManagerCall::CreateDeployment(deployment_id.to_string()),
        )?;
        state.rejection(deployment_id, "create deployment")?;
        if !state.blueprints.contains_key(&spec.blueprint_id) {
            return Err(ClientError::permanent(
                "create deployment",
                PermanentKind::NotFound,
                format!("blueprint {} not found", spec.blueprint_id),
            ));
        }
        if state.deployments.contains_key(deployment_id) {
            return Err(ClientError::permanent(
                "create deployment",
                PermanentKind::Conflict,
                format!("deployment {deployment_id} already exists"),
            ));
        }
        let deployment = Deployment {
            id: deployment_id.to_string(),
            blueprint_id: spec.blueprint_id.clone(),
            inputs: spec.inputs.clone(),
        };
        state
            .deployments
            .insert(deployment_id.to_string(), deployment.clone());
        Ok(deployment)
    }

    async fn update_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "update_deployment",
            ManagerCall::UpdateDeployment(deployment_id.to_string()),
        )?;
        state.rejection(deployment_id, "update deployment")?;
        let Some(existing) = state.deployments.get_mut(deployment_id) else {
            return Err(ClientError::permanent(
                "update deployment",
                PermanentKind::NotFound,
                format!("deployment {deployment_id} not found"),
            ));
        };
        existing.blueprint_id = spec.blueprint_id.clone();
        for (name, value) in &spec.inputs {
            existing.inputs.insert(name.clone(), value.clone());
        }
        Ok(existing.clone())
    }

    async fn start_execution(
        &self,
        deployment_id: &str,
        workflow: &str,
        _parameters: &Inputs,
    ) -> Result<Execution, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "start_execution",
            ManagerCall::StartExecution {
                deployment_id: deployment_id.to_string(),
                workflow: workflow.to_string(),
            },
        )?;
        if !state.deployments.contains_key(deployment_id) {
            return Err(ClientError::permanent(
                "start execution",
                PermanentKind::NotFound,
                format!("deployment {deployment_id} not found"),
            ));
        }
        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            deployment_id: deployment_id.to_string(),
            workflow: workflow.to_string(),
            status: ExecutionStatus::Pending,
            error: None,
        };
        let script = state.pending_scripts.remove(workflow).unwrap_or_default();
        state.scripts.insert(execution.id.clone(), script);
        state
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "get_execution",
            ManagerCall::GetExecution(execution_id.to_string()),
        )?;
        let step = state
            .scripts
            .get_mut(execution_id)
            .and_then(VecDeque::pop_front);
        let Some(execution) = state.executions.get_mut(execution_id) else {
            return Err(ClientError::permanent(
                "get execution",
                PermanentKind::NotFound,
                format!("execution {execution_id} not found"),
            ));
        };
        match step {
            Some(PollStep::Status(status)) => execution.status = status,
            Some(PollStep::StatusWithError(status, message)) => {
                execution.status = status;
                execution.error = Some(message);
            }
            Some(PollStep::Fault(err)) => return Err(err),
            None => {}
        }
        Ok(execution.clone())
    }

    async fn list_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "list_executions",
            ManagerCall::ListExecutions(deployment_id.to_string()),
        )?;
        let mut executions: Vec<Execution> = state
            .executions
            .values()
            .filter(|e| e.deployment_id == deployment_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(executions)
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.record(
            "cancel_execution",
            ManagerCall::CancelExecution(execution_id.to_string()),
        )?;
        match state.executions.get_mut(execution_id) {
            Some(execution) if !execution.status.is_terminal() => {
                execution.status = ExecutionStatus::Cancelling;
                Ok(())
            }
            Some(execution) => Err(ClientError::permanent(
                "cancel execution",
                PermanentKind::Rejected,
                format!("execution {execution_id} already {}", execution.status),
            )),
            None => Err(ClientError::permanent(
                "cancel execution",
                PermanentKind::NotFound,
                format!("execution {execution_id} not found"),
            )),
        }
    }
}
