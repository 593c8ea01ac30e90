use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use manager_sdk::ConnectionParams;

use crate::orchestrator::BlueprintChangePolicy;
use crate::watcher::WatchOptions;

#[derive(Parser, Debug)]
#[command(
    name = "cfy-deploy",
    about = "Publish a blueprint, reconcile a deployment and run a workflow on an orchestration manager",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[arg(
        long = "log-filter",
        global = true,
        env = "RUST_LOG",
        default_value = "info",
        help = "tracing filter directive, e.g. info or cfy_deploy=debug,manager_sdk=debug"
    )]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    #[arg(
        long = "manager",
        global = true,
        env = "CFY_MANAGER_URL",
        value_name = "URL",
        help = "Manager base URL, e.g. https://manager.example.com"
    )]
    pub manager: Option<String>,

    #[arg(long, global = true, env = "CFY_USERNAME")]
    pub username: Option<String>,

    #[arg(long, global = true, env = "CFY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(
        long,
        global = true,
        env = "CFY_TENANT",
        default_value = "default_tenant"
    )]
    pub tenant: Option<String>,

    #[arg(
        long,
        global = true,
        env = "CFY_INSECURE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_name = "BOOL",
        help = "Skip TLS certificate verification"
    )]
    pub insecure: Option<String>,

    #[arg(long = "api-version", global = true, env = "CFY_API_VERSION")]
    pub api_version: Option<String>,

    #[arg(
        long = "request-timeout-sec",
        global = true,
        env = "CFY_REQUEST_TIMEOUT_SEC",
        value_name = "SECS"
    )]
    pub request_timeout_sec: Option<String>,
}

impl ConnectionArgs {
    pub fn to_params(&self) -> ConnectionParams {
        ConnectionParams {
            endpoint: self.manager.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tenant: self.tenant.clone(),
            insecure: self.insecure.clone(),
            api_version: self.api_version.clone(),
            request_timeout_secs: self.request_timeout_sec.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish the blueprint, create or update the deployment and run a workflow
    Deploy(DeployArgs),
    /// Print one execution
    Status(ExecutionArgs),
    /// Wait for an execution to finish
    Wait(WaitArgs),
    /// Ask the manager to cancel an execution
    Cancel(ExecutionArgs),
    /// List a deployment's executions
    Executions(ExecutionsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[arg(long = "blueprint-id")]
    pub blueprint_id: String,

    #[arg(long = "blueprint-dir", value_name = "DIR")]
    pub blueprint_dir: PathBuf,

    #[arg(long = "application-file", default_value = "blueprint.yaml")]
    pub application_file: String,

    #[arg(long = "deployment-id")]
    pub deployment_id: String,

    #[arg(
        long = "inputs",
        value_name = "FILE",
        help = "YAML inputs file; repeat to merge, later files win"
    )]
    pub inputs: Vec<PathBuf>,

    #[arg(long = "input", value_name = "KEY=VALUE", help = "Single input override")]
    pub input: Vec<String>,

    #[arg(long, default_value = "install")]
    pub workflow: String,

    #[arg(long = "no-execute", help = "Stop once the deployment is ready")]
    pub no_execute: bool,

    #[arg(long = "param", value_name = "KEY=VALUE", help = "Workflow parameter")]
    pub param: Vec<String>,

    #[arg(long, help = "Block until the workflow execution finishes")]
    pub wait: bool,

    #[command(flatten)]
    pub watch: WatchArgs,

    #[arg(long = "skip-if-exists", help = "Leave an existing deployment untouched")]
    pub skip_if_exists: bool,

    #[arg(long = "no-create", help = "Fail instead of creating a missing deployment")]
    pub no_create: bool,

    #[arg(long = "on-blueprint-change", value_enum, default_value_t = BlueprintChange::Update)]
    pub on_blueprint_change: BlueprintChange,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[arg(
        long = "poll-interval-sec",
        env = "CFY_POLL_INTERVAL_SEC",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_sec: u64,

    #[arg(
        long = "exec-timeout-sec",
        env = "CFY_EXEC_TIMEOUT_SEC",
        default_value_t = 3600,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub exec_timeout_sec: u64,

    #[arg(long = "cancel-on-timeout")]
    pub cancel_on_timeout: bool,
}

impl WatchArgs {
    pub fn to_options(&self) -> WatchOptions {
        WatchOptions {
            poll_interval: Duration::from_secs(self.poll_interval_sec),
            timeout: Duration::from_secs(self.exec_timeout_sec),
            cancel_on_timeout: self.cancel_on_timeout,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExecutionArgs {
    pub execution_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    pub execution_id: String,

    #[command(flatten)]
    pub watch: WatchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ExecutionsArgs {
    #[arg(long = "deployment-id")]
    pub deployment_id: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueprintChange {
    Update,
    Reject,
}

impl From<BlueprintChange> for BlueprintChangePolicy {
    fn from(value: BlueprintChange) -> Self {
        match value {
            BlueprintChange::Update => BlueprintChangePolicy::Update,
            BlueprintChange::Reject => BlueprintChangePolicy::Reject,
        }
    }
}
