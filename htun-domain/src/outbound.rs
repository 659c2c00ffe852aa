//! [`OutboundQueue`] — the backend-to-client byte buffer shared by bridge
//! implementations.
//!
//! A producer (the backend reader task, or a test peer) pushes bytes and
//! eventually closes the queue; the consumer is a [`crate::BridgeHandle`]
//! forwarding `read_available` and `on_data_available` here.
//!
//! ```text
//!  producer ── push / close ──► [ buf | closed | waiter ] ◄── drain / on_data_available ── switch
//! ```
//!
//! Waiters are fired after the internal lock is released, so a callback
//! may take other locks freely.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

// ---

use super::bridge::DataCallback;
use super::error::{Result, TunnelError};

// ---------------------------------------------------------------------------
// OutboundQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct OutboundQueue {
    // ---
    inner: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    // ---
    buf: BytesMut,

    /// `Some(reason)` once the producer has gone away.
    closed: Option<String>,

    waiter: Option<DataCallback>,
}

// ---

impl OutboundQueue {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    /// Append `data` and wake the registered waiter. Ignored after close.
    pub fn push(&self, data: &[u8]) {
        // ---
        if data.is_empty() {
            return;
        }

        let waiter = {
            let mut st = self.state();
            if st.closed.is_some() {
                return;
            }
            st.buf.extend_from_slice(data);
            st.waiter.take()
        };

        if let Some(wake) = waiter {
            wake();
        }
    }

    // ---

    /// Mark the producer gone. Buffered bytes stay readable; once they are
    /// drained, [`Self::drain`] reports [`TunnelError::Backend`] with `reason`.
    pub fn close(&self, reason: impl Into<String>) {
        // ---
        let waiter = {
            let mut st = self.state();
            if st.closed.is_none() {
                st.closed = Some(reason.into());
            }
            st.waiter.take()
        };

        if let Some(wake) = waiter {
            wake();
        }
    }

    // ---

    /// Take every buffered byte.
    pub fn drain(&self) -> Result<Bytes> {
        // ---
        let mut st = self.state();
        if !st.buf.is_empty() {
            return Ok(st.buf.split().freeze());
        }
        match &st.closed {
            Some(reason) => Err(TunnelError::Backend(reason.clone())),
            None => Ok(Bytes::new()),
        }
    }

    // ---

    /// Register `callback`; fire it now if data or closure is already visible.
    pub fn on_data_available(&self, callback: DataCallback) {
        // ---
        let ready = {
            let mut st = self.state();
            if st.buf.is_empty() && st.closed.is_none() {
                st.waiter = Some(callback);
                None
            } else {
                Some(callback)
            }
        };

        if let Some(wake) = ready {
            wake();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, DataCallback) {
        // ---
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    // ---

    #[test]
    fn drain_preserves_push_order() {
        // ---
        let q = OutboundQueue::new();
        q.push(b"ab");
        q.push(b"cd");
        assert_eq!(q.drain().unwrap(), Bytes::from_static(b"abcd"));
        assert!(q.drain().unwrap().is_empty());
    }

    #[test]
    fn waiter_fires_once_on_push() {
        // ---
        let q = OutboundQueue::new();
        let (hits, cb) = counter();
        q.on_data_available(cb);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        q.push(b"x");
        q.push(b"y");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "callback is one-shot");
    }

    #[test]
    fn waiter_fires_immediately_when_data_waiting() {
        // ---
        let q = OutboundQueue::new();
        q.push(b"x");
        let (hits, cb) = counter();
        q.on_data_available(cb);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_reports_backend_after_drain() {
        // ---
        let q = OutboundQueue::new();
        let (hits, cb) = counter();
        q.on_data_available(cb);

        q.push(b"tail");
        q.close("upstream eof");
        q.push(b"ignored");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(q.drain().unwrap(), Bytes::from_static(b"tail"));

        let err = q.drain().unwrap_err();
        assert!(err.to_string().contains("upstream eof"));
    }

    #[test]
    fn closed_queue_wakes_new_waiters() {
        // ---
        let q = OutboundQueue::new();
        q.close("gone");
        let (hits, cb) = counter();
        q.on_data_available(cb);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
