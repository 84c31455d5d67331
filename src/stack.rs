//! Bounded LIFO stack shared by every session.
//!
//! The stack holds at most `capacity` payloads. Pushing onto a full stack
//! waits until a pop frees a slot; popping an empty stack waits until a push
//! supplies one. Waiters sleep on a [`Notify`] rather than polling, and every
//! wait is tied to a [`CancellationToken`] so eviction and shutdown can
//! release it.
//!
//! # Usage
//!
//! ```ignore
//! let stack = BoundedStack::new(100);
//! let cancel = CancellationToken::new();
//!
//! stack.push(Bytes::from_static(b"a"), &cancel).await?;
//! let top = stack.pop(&cancel).await?;
//! ```
//!
//! # Guarantees
//!
//! - The capacity check and the mutation happen under one lock acquisition.
//! - A cancelled wait never mutates the stack.
//! - No ordering is promised between waiters; a woken waiter that loses the
//!   race simply waits again.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{LifoError, Result};

/// Default maximum number of stored payloads.
pub const DEFAULT_MAX_STACK_SIZE: usize = 100;

#[derive(Debug)]
struct Inner {
    /// Stored payloads, top of stack at the end.
    items: Mutex<Vec<Bytes>>,
    /// Maximum number of stored payloads.
    capacity: usize,
    /// Signalled whenever a pop frees a slot.
    not_full: Notify,
    /// Signalled whenever a push stores a payload.
    not_empty: Notify,
}

/// Bounded LIFO stack with blocking, cancellable push and pop.
///
/// Cloning is cheap and every clone shares the same stack.
#[derive(Debug, Clone)]
pub struct BoundedStack {
    inner: Arc<Inner>,
}

impl BoundedStack {
    /// Create an empty stack holding at most `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                not_full: Notify::new(),
                not_empty: Notify::new(),
            }),
        }
    }

    /// Get maximum stack size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Get current element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Element count, or `None` if the lock is held elsewhere.
    pub fn try_len(&self) -> Option<usize> {
        self.inner.items.try_lock().map(|items| items.len())
    }

    /// Check if the stack holds no payloads.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Check if a push would have to wait.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.items.lock().len() >= self.inner.capacity
    }

    /// Get available capacity.
    #[inline]
    pub fn available_capacity(&self) -> usize {
        let current = self.inner.items.lock().len();
        self.inner.capacity.saturating_sub(current)
    }

    /// Try to push without waiting.
    ///
    /// Returns the new length, or hands the payload back if the stack is full.
    pub fn try_push(&self, payload: Bytes) -> std::result::Result<usize, Bytes> {
        let len = {
            let mut items = self.inner.items.lock();
            if items.len() >= self.inner.capacity {
                return Err(payload);
            }
            items.push(payload);
            items.len()
        };

        self.inner.not_empty.notify_waiters();
        Ok(len)
    }

    /// Try to pop without waiting.
    pub fn try_pop(&self) -> Option<Bytes> {
        let payload = self.inner.items.lock().pop()?;
        self.inner.not_full.notify_waiters();
        Some(payload)
    }

    /// Push a payload, waiting while the stack is full.
    ///
    /// Returns the stack length after the push, or `Err(Cancelled)` if
    /// `cancel` fires first. A cancelled push leaves the stack untouched.
    pub async fn push(&self, payload: Bytes, cancel: &CancellationToken) -> Result<usize> {
        let mut payload = payload;

        loop {
            if cancel.is_cancelled() {
                return Err(LifoError::Cancelled);
            }

            let notified = self.inner.not_full.notified();
            tokio::pin!(notified);
            // Register before checking so a pop between check and await is not missed
            notified.as_mut().enable();

            match self.try_push(payload) {
                Ok(len) => return Ok(len),
                Err(returned) => payload = returned,
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LifoError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Pop the most recently pushed payload, waiting while the stack is empty.
    ///
    /// Returns `Err(Cancelled)` if `cancel` fires first.
    pub async fn pop(&self, cancel: &CancellationToken) -> Result<Bytes> {
        loop {
            if cancel.is_cancelled() {
                return Err(LifoError::Cancelled);
            }

            let notified = self.inner.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.try_pop() {
                return Ok(payload);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LifoError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }
}

impl Default for BoundedStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STACK_SIZE)
    }
}
