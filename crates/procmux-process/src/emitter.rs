//! Single-producer, multi-subscriber notification point
//!
//! Each subscriber gets its own unbounded queue, so a slow consumer never
//! causes another subscriber to miss events. Events emitted before a
//! subscription are not replayed. Closing the emitter ends every
//! subscriber's stream.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Notification point delivering cloned events to every live subscriber
#[derive(Debug)]
pub struct Emitter<T> {
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Clone> Emitter<T> {
    /// Create an open emitter with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Subscribe to future events
    ///
    /// Subscribing to a closed emitter yields a receiver that is already
    /// finished.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = lock(&self.subscribers);
        if let Some(subscribers) = guard.as_mut() {
            subscribers.push(tx);
        }
        rx
    }

    /// Deliver an event to all subscribers, dropping the ones that went away
    ///
    /// Returns the number of subscribers that received it.
    pub fn emit(&self, event: T) -> usize {
        let mut guard = lock(&self.subscribers);
        let Some(subscribers) = guard.as_mut() else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Stop delivering events and end all subscriber streams
    pub fn close(&self) {
        lock(&self.subscribers).take();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        lock(&self.subscribers).is_none()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut guard = lock(&self.subscribers);
        match guard.as_mut() {
            Some(subscribers) => {
                subscribers.retain(|tx| !tx.is_closed());
                subscribers.len()
            }
            None => 0,
        }
    }
}

impl<T: Clone> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

// A panicking subscriber callback cannot leave the list half-updated, so a
// poisoned lock is still safe to use.
fn lock<U>(mutex: &Mutex<U>) -> std::sync::MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
