//! Presence evaluation and lifecycle handling.

pub mod debounce;
pub mod evaluator;
pub mod lifecycle;
pub mod status;

pub use debounce::Debouncer;
pub use evaluator::{OnlineEvaluator, evaluate, presence_status};
pub use lifecycle::{AppLifecycle, LifecycleObserver};
pub use status::PresenceStatus;
