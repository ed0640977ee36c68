//! Connection lifecycle: state monitoring, heartbeat, retry, and the
//! single-operation guard.

pub mod guard;
pub mod heartbeat;
pub mod monitor;
pub mod retry;

pub use guard::{GuardPermit, OperationGuard};
pub use heartbeat::HeartbeatScheduler;
pub use monitor::{ConnectionState, ConnectionStateMonitor};
pub use retry::RetryCoordinator;
