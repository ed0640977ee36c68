//! App lifecycle signals and their debounced presence effect.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::debounce::Debouncer;

/// Lifecycle transition reported by the host app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    /// App became visible.
    Foreground,
    /// App moved to the background.
    Background,
    /// App is being terminated.
    Terminate,
}

impl AppLifecycle {
    /// Whether the app is visible after this transition.
    pub fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground)
    }
}

/// Turns lifecycle bursts into at most one online/offline change.
///
/// The debounced value is the target online flag.
#[derive(Debug)]
pub struct LifecycleObserver {
    debouncer: Debouncer<bool>,
}

impl LifecycleObserver {
    /// Create an observer with the given quiet period.
    pub fn new(quiet: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(quiet),
        }
    }

    /// The debouncer carrying the target online flag.
    pub fn debouncer(&self) -> &Debouncer<bool> {
        &self.debouncer
    }

    /// Online flag waiting to be applied, if any.
    pub fn pending(&self) -> Option<bool> {
        self.debouncer.pending()
    }

    /// Drop a pending change.
    pub fn cancel(&self) -> Option<bool> {
        self.debouncer.cancel_pending()
    }
}
