// ABOUTME: Permission system — levels, the session allow-list checker, and the approval gate.
// ABOUTME: The gate is what the agent loop calls to run tools.

pub mod checker;
pub mod gate;
pub mod policy;
pub mod types;

pub use checker::{ALLOW_ALL, PermissionChecker};
pub use gate::{PERMISSION_DENIED, PermissionGate};
pub use policy::evaluate_permission;
pub use types::*;
