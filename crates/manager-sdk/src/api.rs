use async_trait::async_trait;

use crate::{BlueprintUpload, ClientError, Deployment, DeploymentSpec, Execution, Inputs};

/// Operations the deploy core needs from a manager. Implementations absorb
/// transient faults within their own retry budget.
#[async_trait]
pub trait ManagerApi: Send + Sync {
    async fn blueprint_exists(&self, blueprint_id: &str) -> Result<bool, ClientError>;

    async fn upload_blueprint(&self, upload: &BlueprintUpload) -> Result<(), ClientError>;

    async fn get_deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, ClientError>;

    async fn create_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError>;

    /// Re-binds an existing deployment to `spec` in place.
    async fn update_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError>;

    /// Declarative deploy: create when absent, update when the blueprint or a
    /// requested input differs, otherwise leave the deployment alone.
    ///
    /// `DeploymentOrchestrator` layers skip, no-create and blueprint-change
    /// policy over the same three steps; with its default policy the two must
    /// leave the manager in the same state.
    async fn create_or_update_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError> {
        match self.get_deployment(deployment_id).await? {
            None => self.create_deployment(deployment_id, spec).await,
            Some(existing) if existing.matches(spec) => Ok(existing),
            Some(_) => self.update_deployment(deployment_id, spec).await,
        }
    }

    async fn start_execution(
        &self,
        deployment_id: &str,
        workflow: &str,
        parameters: &Inputs,
    ) -> Result<Execution, ClientError>;

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, ClientError>;

    async fn list_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, ClientError>;

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), ClientError>;
}
