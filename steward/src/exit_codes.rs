//! Stable exit codes for steward CLI commands.

/// Command succeeded; for `run`, the plan completed.
pub const OK: i32 = 0;
/// Invalid config, workspace, or arguments.
pub const INVALID: i32 = 1;
/// `steward run` ended in a failed state.
pub const FAILED: i32 = 2;
/// `steward run` was stopped by the user.
pub const STOPPED: i32 = 3;
