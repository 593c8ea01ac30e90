//! Process exit codes. Pipelines key off these, so they never change meaning.

pub const SUCCESS: i32 = 0;
/// Bad connection settings, identifiers or inputs.
pub const CONFIG: i32 = 2;
/// The manager refused a call outright or stayed unreachable.
pub const CLIENT: i32 = 3;
/// Blueprint id collision or packaging failure.
pub const PUBLISH: i32 = 4;
pub const ORCHESTRATION: i32 = 5;
/// The workflow itself failed or was cancelled on the manager.
pub const WORKFLOW: i32 = 6;
pub const TIMEOUT: i32 = 7;
pub const INTERRUPTED: i32 = 130;
