//! Shared elapsed-time ticker.
//!
//! One timer drives every "elapsed" display. It starts with the first
//! subscriber and stops when the last subscription is dropped. Must be used
//! from within a tokio runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

#[derive(Default)]
struct TickerState {
    subscribers: usize,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    period: Duration,
    tx: broadcast::Sender<u64>,
    state: Mutex<TickerState>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, TickerState> {
        // State is two plain fields; a poisoned guard is still usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn start_locked(&self, state: &mut TickerState) {
        if state.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let tx = self.tx.clone();
        let period = self.period;
        state.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            let mut n: u64 = 0;
            loop {
                interval.tick().await;
                n += 1;
                let _ = tx.send(n);
            }
        }));
        tracing::debug!(period_ms = period.as_millis() as u64, "ticker started");
    }

    fn stop_locked(state: &mut TickerState) {
        if let Some(task) = state.task.take() {
            task.abort();
            tracing::debug!("ticker stopped");
        }
    }
}

#[derive(Clone)]
pub struct ElapsedTicker {
    inner: Arc<Inner>,
}

impl Default for ElapsedTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl ElapsedTicker {
    pub fn new() -> Self {
        Self::with_period(DEFAULT_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                period,
                tx,
                state: Mutex::new(TickerState::default()),
            }),
        }
    }

    /// Start the timer. No-op if already running.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        self.inner.start_locked(&mut state);
    }

    /// Stop the timer. No-op if not running.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        Inner::stop_locked(&mut state);
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lock()
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers
    }

    /// Subscribe to ticks; the first subscriber starts the timer.
    pub fn subscribe(&self) -> TickerSubscription {
        let mut state = self.inner.lock();
        let receiver = self.inner.tx.subscribe();
        state.subscribers += 1;
        self.inner.start_locked(&mut state);
        TickerSubscription {
            receiver,
            inner: self.inner.clone(),
        }
    }
}

/// Live subscription. Dropping the last one stops the timer.
pub struct TickerSubscription {
    receiver: broadcast::Receiver<u64>,
    inner: Arc<Inner>,
}

impl TickerSubscription {
    /// Wait for the next tick. Missed ticks are skipped, not replayed.
    pub async fn tick(&mut self) -> Option<u64> {
        loop {
            match self.receiver.recv().await {
                Ok(n) => return Some(n),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for TickerSubscription {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            Inner::stop_locked(&mut state);
        }
    }
}
