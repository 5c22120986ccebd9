//! Outbound message queue and the per-session close signal.
//!
//! The queue belongs to the connection and outlives sessions, so messages
//! sent while a connect is pending go out once a session is up. Each session
//! gets its own [`SessionSignal`]; the send thread of a finished session
//! therefore never mistakes a newer session for its own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// How a session's send pipeline should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    /// Deliver messages as they arrive.
    Open,
    /// Deliver what is queued, then exit.
    Draining,
    /// Exit at once.
    Closed,
}

impl SessionPhase {
    const fn to_raw(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Draining => 1,
            Self::Closed => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Close signal observed by both pipelines of one session.
#[derive(Debug)]
pub(crate) struct SessionSignal {
    phase: AtomicU8,
}

impl SessionSignal {
    pub(crate) const fn new() -> Self {
        Self {
            phase: AtomicU8::new(SessionPhase::Open.to_raw()),
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        SessionPhase::from_raw(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed
    }

    fn store(&self, phase: SessionPhase) {
        self.phase.store(phase.to_raw(), Ordering::SeqCst);
    }
}

/// Most messages a connection holds for its send pipeline. Past this,
/// [`OutboundQueue::offer`] refuses new messages.
pub(crate) const PENDING_LIMIT: usize = 4096;

/// FIFO of encoded messages awaiting the send pipeline.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    messages: Mutex<VecDeque<String>>,
    ready: Condvar,
    limit: usize,
}

impl OutboundQueue {
    pub(crate) const fn new() -> Self {
        Self::with_limit(PENDING_LIMIT)
    }

    pub(crate) const fn with_limit(limit: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            limit,
        }
    }

    /// Appends a caller's message unless the queue is full.
    ///
    /// Returns `false` when the message was refused.
    pub(crate) fn offer(&self, message: String) -> bool {
        let mut messages = self.lock();
        if messages.len() >= self.limit {
            return false;
        }
        messages.push_back(message);
        drop(messages);
        self.ready.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_back(&self, message: String) {
        self.lock().push_back(message);
        self.ready.notify_all();
    }

    pub(crate) fn push_front(&self, message: String) {
        self.lock().push_front(message);
        self.ready.notify_all();
    }

    pub(crate) fn pop_front(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Drops every queued message and returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let mut messages = self.lock();
        let dropped = messages.len();
        messages.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Moves `signal` to `phase` and wakes any waiting send pipeline.
    ///
    /// The store happens under the queue lock so a pipeline between its
    /// phase check and its wait cannot miss the change.
    pub(crate) fn signal(&self, signal: &SessionSignal, phase: SessionPhase) {
        let guard = self.lock();
        signal.store(phase);
        drop(guard);
        self.ready.notify_all();
    }

    /// Blocks until a message is available for the session owning `signal`.
    ///
    /// Returns `None` once the session is closed, or once it is draining and
    /// the queue is empty.
    pub(crate) fn next(&self, signal: &SessionSignal) -> Option<String> {
        let mut messages = self.lock();
        loop {
            let phase = signal.phase();
            if phase == SessionPhase::Closed {
                return None;
            }
            if let Some(message) = messages.pop_front() {
                return Some(message);
            }
            if phase == SessionPhase::Draining {
                return None;
            }
            messages = self
                .ready
                .wait(messages)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
