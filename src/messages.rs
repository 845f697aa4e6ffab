//! Outbound operator message queue.
//!
//! The capture worker produces human-readable diagnostic messages ("Dropped
//! frame.", "Recording finalized.", ...). Delivering them through a callback
//! invoked under the controller's lock would invite reentrancy trouble, so
//! messages land in a bounded drop-oldest queue that the owning thread drains
//! at its leisure. Every message is mirrored to `tracing` so headless
//! deployments still get structured logs.
//!
//! An optional sink closure can be installed for applications that prefer
//! push delivery. The sink runs on whichever thread emitted the message with
//! no controller lock held; it must not call back into the controller.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Callback type for push delivery of operator messages.
pub type MessageSink = Box<dyn Fn(&str) + Send + Sync>;

/// Bounded queue of diagnostic messages with optional push delivery.
pub struct MessageQueue {
    inner: Mutex<VecDeque<String>>,
    // Shared so a clone can be invoked after the slot lock is released.
    sink: Mutex<Option<Arc<dyn Fn(&str) + Send + Sync>>>,
    capacity: usize,
}

impl MessageQueue {
    /// Create a queue retaining at most `capacity` undrained messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            sink: Mutex::new(None),
            capacity: capacity.max(1),
        }
    }

    /// Install the message sink, replacing any previous one.
    pub fn set_sink(&self, sink: MessageSink) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(Arc::from(sink));
        }
    }

    /// Emit a message.
    ///
    /// If a sink is installed the message is handed to it directly and the
    /// queue is bypassed; otherwise it is enqueued, evicting the oldest entry
    /// when the queue is full.
    pub fn emit(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "miniscope_daq::messages", "{message}");

        // Clone the sink out so it runs without the slot lock held; a sink is
        // then free to install a replacement from inside its own invocation.
        let sink = self.sink.lock().ok().and_then(|slot| slot.clone());
        if let Some(sink) = sink {
            sink(&message);
            return;
        }

        if let Ok(mut queue) = self.inner.lock() {
            if queue.len() == self.capacity {
                queue.pop_front();
            }
            queue.push_back(message);
        }
    }

    /// Pop the oldest undrained message, if any.
    pub fn next(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Drain all pending messages in emission order.
    pub fn drain(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of undrained messages.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
