//! Quiet-period debouncing of bursty state transitions.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Collapses a burst of values into one delayed action for the last value.
#[derive(Debug)]
pub struct Debouncer<T> {
    quiet: Duration,
    state: Arc<Mutex<DebounceState<T>>>,
}

#[derive(Debug)]
struct DebounceState<T> {
    /// Bumped on every `set_state`; a timer whose generation is stale is a no-op.
    generation: u64,
    pending: Option<Pending<T>>,
}

#[derive(Debug)]
struct Pending<T> {
    value: T,
    handle: JoinHandle<()>,
}

impl<T> Debouncer<T>
where
    T: Clone + Send + 'static,
{
    /// Create a debouncer with the given quiet period.
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            state: Arc::new(Mutex::new(DebounceState {
                generation: 0,
                pending: None,
            })),
        }
    }

    /// Replace any pending value and restart the quiet period.
    ///
    /// `apply` runs with the value once no further `set_state` arrives
    /// within the quiet period.
    pub fn set_state<F, Fut>(&self, value: T, apply: F)
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = state.pending.take() {
            previous.handle.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        let shared = Arc::clone(&self.state);
        let quiet = self.quiet;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            let value = {
                let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                if state.generation != generation {
                    return;
                }
                match state.pending.take() {
                    Some(pending) => pending.value,
                    None => return,
                }
            };
            trace!(generation, "Debounce quiet period elapsed");
            apply(value).await;
        });

        state.pending = Some(Pending { value, handle });
    }

    /// Drop the pending value without applying it.
    pub fn cancel_pending(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.generation += 1;
        state.pending.take().map(|pending| {
            pending.handle.abort();
            pending.value
        })
    }

    /// The value waiting for its quiet period, if any.
    pub fn pending(&self) -> Option<T> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .as_ref()
            .map(|pending| pending.value.clone())
    }

    /// Quiet period length.
    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pending) = state.pending.take() {
            pending.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) + Clone) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let applied = Arc::clone(&applied);
            move |v: &'static str| applied.lock().unwrap().push(v)
        };
        (applied, sink)
    }

    fn set(
        debouncer: &Debouncer<&'static str>,
        value: &'static str,
        sink: impl Fn(&'static str) + Send + 'static,
    ) {
        debouncer.set_state(value, move |v| async move { sink(v) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_value_applied() {
        let debouncer = Debouncer::new(Duration::from_millis(2500));
        let (applied, sink) = recorder();

        set(&debouncer, "background", sink.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        set(&debouncer, "foreground", sink.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        set(&debouncer, "background", sink.clone());
        assert_eq!(debouncer.pending(), Some("background"));

        tokio::time::sleep(Duration::from_millis(2400)).await;
        assert!(applied.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*applied.lock().unwrap(), vec!["background"]);
        assert_eq!(debouncer.pending(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_values_each_apply() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let (applied, sink) = recorder();

        set(&debouncer, "a", sink.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        set(&debouncer, "b", sink.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(*applied.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_skips_apply() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let (applied, sink) = recorder();

        set(&debouncer, "background", sink);
        assert_eq!(debouncer.cancel_pending(), Some("background"));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(applied.lock().unwrap().is_empty());
        assert_eq!(debouncer.cancel_pending(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timer() {
        let (applied, sink) = recorder();
        {
            let debouncer = Debouncer::new(Duration::from_millis(100));
            set(&debouncer, "background", sink);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(applied.lock().unwrap().is_empty());
    }
}
