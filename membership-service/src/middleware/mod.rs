pub mod metrics;
pub mod permission;

pub use metrics::metrics_middleware;
pub use permission::{permission_gate, AuthMember, GateState};
