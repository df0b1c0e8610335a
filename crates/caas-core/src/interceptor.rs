//! Event Interceptor (CEI): bounded intake queue, synchronous handler
//! fan-out, and a pull interface.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::model::{ComplianceEvent, EventType};

/// Handler invoked synchronously on the calling thread for every
/// successfully intercepted event. A handler that panics is caught and
/// logged; it never aborts interception or blocks other handlers.
pub type Handler = Box<dyn Fn(&ComplianceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InterceptorConfig {
    pub queue_capacity: usize,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self { queue_capacity: 10_000 }
    }
}

/// Additive allow-list filter: `matches` is the conjunction of every
/// non-empty list. An empty list imposes no constraint on that field.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub tenant_ids: Vec<String>,
    pub buckets: Vec<String>,
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn matches(&self, event: &ComplianceEvent) -> bool {
        (self.tenant_ids.is_empty() || self.tenant_ids.iter().any(|t| t == &event.tenant_id))
            && (self.buckets.is_empty() || self.buckets.iter().any(|b| b == &event.bucket))
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
    }
}

/// Receives events, buffers them in a bounded queue, and fans each one out
/// to registered handlers synchronously before (non-blockingly) offering it
/// to the pull queue.
pub struct EventInterceptor {
    sender: mpsc::Sender<ComplianceEvent>,
    receiver: Mutex<mpsc::Receiver<ComplianceEvent>>,
    handlers: StdRwLock<Vec<Handler>>,
    count: AtomicU64,
}

impl Default for EventInterceptor {
    fn default() -> Self {
        Self::new(InterceptorConfig::default())
    }
}

impl EventInterceptor {
    pub fn new(config: InterceptorConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            handlers: StdRwLock::new(Vec::new()),
            count: AtomicU64::new(0),
        }
    }

    /// Registers a handler to be invoked synchronously in the intercept
    /// path, in registration order.
    pub fn register_handler<F>(&self, handler: F)
    where
        F: Fn(&ComplianceEvent) + Send + Sync + 'static,
    {
        self.handlers.write().expect("handlers lock poisoned").push(Box::new(handler));
    }

    /// Fans `event` out to every registered handler, then non-blockingly
    /// offers it to the pull queue. `count()` is incremented regardless of
    /// whether the queue had room — completeness outranks availability.
    /// Returns `false` (and logs the drop) when the queue was full; the
    /// event is still counted as intercepted.
    pub fn intercept(&self, event: ComplianceEvent) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst);

        let handlers = self.handlers.read().expect("handlers lock poisoned");
        for handler in handlers.iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(event_id = %event.event_id, "compliance event handler panicked; continuing");
            }
        }
        drop(handlers);

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                warn!("event queue full; event counted but dropped from pull interface");
                false
            }
        }
    }

    /// Returns the head of the queue, waiting up to `timeout` if given, or
    /// returning immediately (`None` if nothing is queued) when no timeout
    /// is supplied. Never suspends the caller beyond the requested timeout.
    pub async fn next(&self, timeout: Option<Duration>) -> Option<ComplianceEvent> {
        let mut receiver = self.receiver.lock().await;
        match timeout {
            Some(duration) => tokio::time::timeout(duration, receiver.recv()).await.ok().flatten(),
            None => receiver.try_recv().ok(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn verify_completeness(&self, expected: u64) -> bool {
        self.count() == expected
    }
}
