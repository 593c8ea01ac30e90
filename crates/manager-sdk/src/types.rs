use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered input (or workflow parameter) values keyed by name.
pub type Inputs = Map<String, Value>;

/// A blueprint archive ready to be uploaded.
#[derive(Debug, Clone)]
pub struct BlueprintUpload {
    pub blueprint_id: String,
    /// Entry file inside the archive's top-level directory.
    pub application_file: String,
    pub archive: Bytes,
}

/// What a deployment should be bound to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentSpec {
    pub blueprint_id: String,
    pub inputs: Inputs,
}

/// Last-known state of a remote deployment. The manager owns the real thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub blueprint_id: String,
    #[serde(default)]
    pub inputs: Inputs,
}

impl Deployment {
    /// True when the deployment already reflects `spec`. Only the requested
    /// inputs are compared; the manager also reports blueprint defaults.
    pub fn matches(&self, spec: &DeploymentSpec) -> bool {
        self.blueprint_id == spec.blueprint_id
            && spec
                .inputs
                .iter()
                .all(|(name, value)| self.inputs.get(name) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecutionStatus {
    Pending,
    Started,
    Cancelling,
    Cancelled,
    Failed,
    Succeeded,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Started => "started",
            ExecutionStatus::Cancelling => "cancelling",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Succeeded => "succeeded",
        }
    }

    /// Maps the manager's status vocabulary onto the local one.
    pub fn from_remote(raw: &str) -> Option<Self> {
        let status = match raw {
            "pending" | "queued" | "scheduled" => ExecutionStatus::Pending,
            "started" => ExecutionStatus::Started,
            "cancelling" | "force_cancelling" | "kill_cancelling" => ExecutionStatus::Cancelling,
            "cancelled" => ExecutionStatus::Cancelled,
            "failed" => ExecutionStatus::Failed,
            "terminated" | "succeeded" => ExecutionStatus::Succeeded,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Cancelled | ExecutionStatus::Failed | ExecutionStatus::Succeeded
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ExecutionStatus::from_remote(&value)
            .ok_or_else(|| format!("unknown execution status '{value}'"))
    }
}

impl From<ExecutionStatus> for String {
    fn from(value: ExecutionStatus) -> Self {
        value.as_str().to_string()
    }
}

/// One run of a workflow against a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub deployment_id: String,
    #[serde(rename = "workflow_id")]
    pub workflow: String,
    pub status: ExecutionStatus,
    /// Empty strings from the manager are normalised to `None`.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub error: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
