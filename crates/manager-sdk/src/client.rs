use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::is_transient_status;
use crate::retry::{with_retry, RetryPolicy};
use crate::{
    BlueprintUpload, ClientError, ConnectionConfig, Deployment, DeploymentSpec, Execution, Inputs,
    ManagerApi, PermanentKind,
};

const TENANT_HEADER: &str = "Tenant";
const TOKEN_HEADER: &str = "Authentication-Token";

/// HTTP implementation of [`ManagerApi`]. Cheap to clone; clones share the
/// connection pool and the authentication token.
#[derive(Clone)]
pub struct ManagerClient {
    http: Client,
    config: Arc<ConnectionConfig>,
    retry: RetryPolicy,
    token: Arc<OnceCell<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct DeploymentUpdateResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    execution_id: Option<String>,
}

impl ManagerClient {
    pub fn new(config: ConnectionConfig, retry: RetryPolicy) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout().min(Duration::from_secs(10)))
            .danger_accept_invalid_certs(!config.verify_tls())
            .build()
            .map_err(|err| {
                ClientError::permanent("build http client", PermanentKind::Rejected, err.to_string())
            })?;

        Ok(Self {
            http,
            config: Arc::new(config),
            retry,
            token: Arc::new(OnceCell::new()),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn token(&self) -> Result<&str, ClientError> {
        self.token
            .get_or_try_init(|| self.authenticate())
            .await
            .map(String::as_str)
    }

    async fn authenticate(&self) -> Result<String, ClientError> {
        const OPERATION: &str = "authenticate";
        let url = self.config.api_url("tokens");
        let payload = json!({
            "username": self.config.username(),
            "password": self.config.password(),
            "tenant_name": self.config.tenant(),
        });

        info!(
            manager = %self.config.endpoint(),
            api_version = self.config.api_version(),
            "authenticating to manager"
        );
        let (status, body) = with_retry(&self.retry, OPERATION, |_| {
            let request = self
                .http
                .post(&url)
                .basic_auth(self.config.username(), Some(self.config.password()))
                .header(TENANT_HEADER, self.config.tenant())
                .json(&payload);
            exchange(OPERATION, request)
        })
        .await?;

        let response: TokenResponse = decode(OPERATION, status, &body)?;
        response
            .value
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ClientError::permanent(OPERATION, PermanentKind::Decode, "token missing in response")
            })
    }

    /// Authenticated request with the client's retry policy applied.
    async fn call<F>(&self, operation: &'static str, build: F) -> Result<(StatusCode, Bytes), ClientError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.token().await?.to_string();
        with_retry(&self.retry, operation, |attempt| {
            debug!(operation, attempt, "manager request");
            let request = build(&self.http)
                .header(TENANT_HEADER, self.config.tenant())
                .header(TOKEN_HEADER, token.as_str());
            exchange(operation, request)
        })
        .await
    }
}

/// One attempt: send and read the whole body, so a connection dropped
/// mid-response is retried like any other transient fault.
async fn exchange(
    operation: &'static str,
    request: RequestBuilder,
) -> Result<(StatusCode, Bytes), ClientError> {
    let response = request
        .send()
        .await
        .map_err(|err| ClientError::from_reqwest(operation, &err))?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| ClientError::from_reqwest(operation, &err))?;
    if is_transient_status(status) {
        return Err(ClientError::from_status(
            operation,
            status,
            String::from_utf8_lossy(&body).into_owned(),
        ));
    }
    Ok((status, body))
}

fn expect_success(operation: &str, status: StatusCode, body: &Bytes) -> Result<(), ClientError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ClientError::from_status(
            operation,
            status,
            String::from_utf8_lossy(body).into_owned(),
        ))
    }
}

fn decode<T: DeserializeOwned>(
    operation: &str,
    status: StatusCode,
    body: &Bytes,
) -> Result<T, ClientError> {
    expect_success(operation, status, body)?;
    serde_json::from_slice(body)
        .map_err(|err| ClientError::permanent(operation, PermanentKind::Decode, err.to_string()))
}

#[async_trait]
impl ManagerApi for ManagerClient {
    async fn blueprint_exists(&self, blueprint_id: &str) -> Result<bool, ClientError> {
        const OPERATION: &str = "get blueprint";
        let url = self.config.api_url(&format!("blueprints/{blueprint_id}"));
        let (status, body) = self.call(OPERATION, |http| http.get(&url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(OPERATION, status, &body)?;
        Ok(true)
    }

    async fn upload_blueprint(&self, upload: &BlueprintUpload) -> Result<(), ClientError> {
        const OPERATION: &str = "upload blueprint";
        let url = self
            .config
            .api_url(&format!("blueprints/{}", upload.blueprint_id));
        info!(
            blueprint_id = %upload.blueprint_id,
            application_file = %upload.application_file,
            archive_bytes = upload.archive.len(),
            "uploading blueprint archive"
        );
        let (status, body) = self
            .call(OPERATION, |http| {
                http.put(&url)
                    .query(&[("application_file_name", upload.application_file.as_str())])
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(upload.archive.clone())
            })
            .await?;
        expect_success(OPERATION, status, &body)
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<Option<Deployment>, ClientError> {
        const OPERATION: &str = "get deployment";
        let url = self.config.api_url(&format!("deployments/{deployment_id}"));
        let (status, body) = self.call(OPERATION, |http| http.get(&url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(OPERATION, status, &body).map(Some)
    }

    async fn create_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError> {
        const OPERATION: &str = "create deployment";
        let url = self.config.api_url(&format!("deployments/{deployment_id}"));
        let (status, body) = self
            .call(OPERATION, |http| http.put(&url).json(spec))
            .await?;
        decode(OPERATION, status, &body)
    }

    async fn update_deployment(
        &self,
        deployment_id: &str,
        spec: &DeploymentSpec,
    ) -> Result<Deployment, ClientError> {
        const OPERATION: &str = "update deployment";
        let url = self
            .config
            .api_url(&format!("deployment-updates/{deployment_id}/update/initiate"));
        let (status, body) = self
            .call(OPERATION, |http| http.post(&url).json(spec))
            .await?;
        let update: DeploymentUpdateResponse = decode(OPERATION, status, &body)?;
        debug!(
            deployment_id,
            update_id = update.id.as_deref().unwrap_or("-"),
            execution_id = update.execution_id.as_deref().unwrap_or("-"),
            "deployment update initiated"
        );
        Ok(Deployment {
            id: deployment_id.to_string(),
            blueprint_id: spec.blueprint_id.clone(),
            inputs: spec.inputs.clone(),
        })
    }

    async fn start_execution(
        &self,
        deployment_id: &str,
        workflow: &str,
        parameters: &Inputs,
    ) -> Result<Execution, ClientError> {
        const OPERATION: &str = "start execution";
        let url = self.config.api_url("executions");
        let mut payload = json!({
            "deployment_id": deployment_id,
            "workflow_id": workflow,
        });
        if !parameters.is_empty() {
            payload["parameters"] = serde_json::Value::Object(parameters.clone());
        }
        let (status, body) = self
            .call(OPERATION, |http| http.post(&url).json(&payload))
            .await?;
        decode(OPERATION, status, &body)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, ClientError> {
        const OPERATION: &str = "get execution";
        let url = self.config.api_url(&format!("executions/{execution_id}"));
        let (status, body) = self.call(OPERATION, |http| http.get(&url)).await?;
        decode(OPERATION, status, &body)
    }

    async fn list_executions(&self, deployment_id: &str) -> Result<Vec<Execution>, ClientError> {
        const OPERATION: &str = "list executions";
        let url = self.config.api_url("executions");
        let (status, body) = self
            .call(OPERATION, |http| {
                http.get(&url).query(&[("deployment_id", deployment_id)])
            })
            .await?;
        let list: ListResponse<Execution> = decode(OPERATION, status, &body)?;
        Ok(list.items)
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<(), ClientError> {
        const OPERATION: &str = "cancel execution";
        let url = self.config.api_url(&format!("executions/{execution_id}"));
        let payload = json!({ "action": "cancel" });
        let (status, body) = self
            .call(OPERATION, |http| http.post(&url).json(&payload))
            .await?;
        expect_success(OPERATION, status, &body)
    }
}
