//! Blueprint deployment against an orchestration manager: package and
//! publish a blueprint, reconcile a deployment, start a workflow and follow
//! its execution to completion.

pub mod archive;
pub mod cli;
pub mod commands;
pub mod exit;
pub mod inputs;
pub mod orchestrator;
pub mod pipeline;
pub mod publisher;
pub mod telemetry;
pub mod watcher;
