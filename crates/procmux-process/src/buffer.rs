//! Coalescing output buffer
//!
//! Accepts byte pushes of arbitrary size and timing and re-emits them as
//! chunks no larger than `max_chunk_size`, at most one chunk per
//! `emit_interval`. Pushes arriving while bytes are already pending are
//! appended and ride along with the next emission.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use procmux_process::{BufferConfig, CoalescingBuffer};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let buffer = CoalescingBuffer::new(BufferConfig::new(10, Duration::from_millis(16)));
//! let mut chunks = buffer.subscribe();
//!
//! buffer.push(b"ab");
//! buffer.push(b"cd");
//!
//! assert_eq!(chunks.recv().await, Some(b"abcd".to_vec()));
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BufferConfig;
use crate::emitter::Emitter;

/// Rate- and size-bounded byte chunker
///
/// Must be used from within a Tokio runtime: the first push into an empty
/// buffer spawns the emission timer. Dropping the buffer disposes it.
#[derive(Debug)]
pub struct CoalescingBuffer {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    config: BufferConfig,
    state: Mutex<BufferState>,
    data: Emitter<Vec<u8>>,
    idle: Notify,
}

/// `timer` is `Some` exactly when `pending` is `Some` and non-empty.
#[derive(Debug, Default)]
struct BufferState {
    pending: Option<Vec<u8>>,
    timer: Option<JoinHandle<()>>,
    disposed: bool,
}

impl CoalescingBuffer {
    /// Create a buffer with the given bounds
    pub fn new(mut config: BufferConfig) -> Self {
        if config.max_chunk_size == 0 {
            warn!("max_chunk_size of 0 would never make progress, using 1");
            config.max_chunk_size = 1;
        }

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BufferState::default()),
                data: Emitter::new(),
                idle: Notify::new(),
            }),
        }
    }

    /// Buffer configuration
    pub fn config(&self) -> &BufferConfig {
        &self.shared.config
    }

    /// Append bytes for later emission
    ///
    /// Never suspends. Empty pushes and pushes after disposal are ignored.
    pub fn push(&self, chunk: impl AsRef<[u8]>) {
        let chunk = chunk.as_ref();
        if chunk.is_empty() {
            return;
        }

        let mut state = self.shared.lock();
        if state.disposed {
            debug!(len = chunk.len(), "Ignoring push into disposed buffer");
            return;
        }

        match state.pending.as_mut() {
            Some(pending) => pending.extend_from_slice(chunk),
            None => {
                state.pending = Some(chunk.to_vec());
                state.timer = Some(Shared::arm(&self.shared));
            }
        }
    }

    /// Receive every chunk emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.shared.data.subscribe()
    }

    /// Number of bytes waiting to be emitted
    pub fn pending_len(&self) -> usize {
        self.shared
            .lock()
            .pending
            .as_ref()
            .map_or(0, Vec::len)
    }

    /// Whether an emission timer is currently scheduled
    pub fn is_armed(&self) -> bool {
        self.shared.lock().timer.is_some()
    }

    /// Whether the buffer has been disposed
    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Wait until every pushed byte has been emitted or the buffer is disposed
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.shared.lock();
                if state.disposed || state.pending.is_none() {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Stop emitting, cancel the timer and drop pending bytes
    ///
    /// Subscriber streams end. Idempotent.
    pub fn dispose(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.pending.take().map_or(0, |pending| pending.len())
        };

        self.shared.data.close();
        self.shared.idle.notify_waiters();

        if dropped > 0 {
            debug!(dropped, "Dropped pending output on dispose");
        }
    }
}

impl Drop for CoalescingBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the emission timer; it keeps re-arming while a backlog remains.
    fn arm(shared: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(shared);
        let interval = shared.config.emit_interval();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if !shared.emit_next() {
                    return;
                }
            }
        })
    }

    /// Emit one bounded prefix of the backlog, returning whether more remains.
    fn emit_next(&self) -> bool {
        let mut state = self.lock();
        if state.disposed {
            return false;
        }

        let Some(pending) = state.pending.as_mut() else {
            state.timer = None;
            return false;
        };

        let take = pending.len().min(self.config.max_chunk_size);
        let rest = pending.split_off(take);
        let chunk = std::mem::replace(pending, rest);
        let more = !pending.is_empty();

        if !more {
            state.pending = None;
            state.timer = None;
        }

        // Emitting under the lock keeps chunks in push order.
        self.data.emit(chunk);
        drop(state);

        if !more {
            self.idle.notify_waiters();
        }
        more
    }
}
