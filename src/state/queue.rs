use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::errors::lock;

struct Tail {
    ticket: u64,
    done: oneshot::Receiver<()>,
}

/// Per-key mailbox: each submitted operation waits for the one submitted
/// before it under the same key. Keys with nothing pending hold no memory.
#[derive(Default)]
pub struct KeyedQueue {
    tails: Mutex<HashMap<String, Tail>>,
    next_ticket: AtomicU64,
}

impl KeyedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot synchronously, so ordering follows submission even if
    /// the returned futures are polled in a different order.
    pub fn submit<F, T>(self: &Arc<Self>, key: &str, op: F) -> impl Future<Output = T> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let previous = lock(&self.tails).insert(
            key.to_string(),
            Tail {
                ticket,
                done: done_rx,
            },
        );

        let slot = Slot {
            queue: Arc::clone(self),
            key: key.to_string(),
            ticket,
        };
        async move {
            let _slot = slot;
            if let Some(previous) = previous {
                // A dropped sender (cancelled or panicked predecessor) also releases us.
                let _ = previous.done.await;
            }
            let out = op.await;
            let _ = done_tx.send(());
            out
        }
    }

    pub fn pending_keys(&self) -> usize {
        lock(&self.tails).len()
    }

    fn release(&self, key: &str, ticket: u64) {
        let mut tails = lock(&self.tails);
        if tails.get(key).is_some_and(|tail| tail.ticket == ticket) {
            tails.remove(key);
        }
    }
}

/// Frees the key's mailbox when the submitted future finishes, panics or is
/// dropped unpolled.
struct Slot {
    queue: Arc<KeyedQueue>,
    key: String,
    ticket: u64,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.queue.release(&self.key, self.ticket);
    }
}
