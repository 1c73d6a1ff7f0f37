//! Stable exit codes for `cloudpilot` commands.

/// Command succeeded or the checked command is allowed.
pub const OK: i32 = 0;
/// Invalid arguments, config or other errors.
pub const INVALID: i32 = 1;
/// The model adapter could not be reached or returned garbage.
pub const MODEL_UNAVAILABLE: i32 = 2;
/// `cloudpilot check` or `cloudpilot eval` refused the input.
pub const REJECTED: i32 = 3;
/// `cloudpilot check` found a destructive keyword; the command needs confirmation.
pub const NEEDS_CONFIRMATION: i32 = 4;
