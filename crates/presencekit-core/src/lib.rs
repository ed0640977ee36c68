//! # presencekit-core
//!
//! Core crate for PresenceKit. Contains the typed presence model, the store
//! adapter traits, configuration schemas, the clock abstraction, and the
//! unified error system.
//!
//! This crate has **no** internal dependencies on other PresenceKit crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use clock::{Clock, SharedClock, SystemClock, TokioClock};
pub use error::{AppError, ErrorKind};
pub use result::AppResult;
