//! Per-connection protocol state machine.
//!
//! The machine owns the session state and its [`FrameBuffer`], and is driven
//! by feeding it received chunks. It performs no I/O, so every transition can
//! be exercised without a socket.
//!
//! ```text
//!          ┌──────────────► Popping ──────┐
//!          │                              ▼
//!  Start ──┼──► Accumulating ──► Pushing ─► Done
//!          │
//!          └──► Busy
//!
//!  any non-terminal state ──► Abandoned
//! ```

use std::fmt;

use crate::error::{LifoError, Result};
use crate::protocol::{Decode, FrameBuffer, Request};

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Admitted, nothing received yet.
    Start,
    /// Push header received, collecting payload bytes.
    Accumulating,
    /// Pop request decoded, waiting for the stack to yield a payload.
    Popping,
    /// Push payload complete, waiting for room on the stack.
    Pushing,
    /// Response sent.
    Done,
    /// Rejected by admission control.
    Busy,
    /// Torn down before a response was sent (peer close, eviction, shutdown, error).
    Abandoned,
}

impl SessionState {
    /// Whether the session has finished its single request/response cycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Busy | SessionState::Abandoned
        )
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Start, Accumulating | Popping | Busy) => true,
            (Accumulating, Pushing) => true,
            (Popping | Pushing, Done) => true,
            (from, Abandoned) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Lowercase name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Start => "start",
            SessionState::Accumulating => "accumulating",
            SessionState::Popping => "pop",
            SessionState::Pushing => "push",
            SessionState::Done => "done",
            SessionState::Busy => "busy",
            SessionState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the driver should do after a chunk was fed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep reading.
    NeedMore,
    /// The request is complete; run it against the stack.
    Ready(Request),
    /// The chunk was dropped (busy session, or data after the request).
    Ignored,
    /// The chunk cannot be interpreted; close without a response.
    Malformed(&'static str),
}

/// State value consumed by one session's driving task.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    buffer: FrameBuffer,
}

impl SessionMachine {
    /// Machine for an admitted session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Start,
            buffer: FrameBuffer::new(),
        }
    }

    /// Machine for a connection rejected by admission control.
    pub fn busy() -> Self {
        let mut machine = Self::new();
        machine.state = SessionState::Busy;
        machine
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Payload bytes buffered so far and the declared total, while accumulating.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.buffer
            .declared_len()
            .map(|declared| (self.buffer.len(), declared))
    }

    /// Move to `next`, refusing backward or sideways transitions.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(LifoError::Protocol(format!(
                "invalid session transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Feed one received chunk.
    pub fn on_chunk(&mut self, data: &[u8]) -> Step {
        match self.state {
            SessionState::Start | SessionState::Accumulating => {}
            _ => return Step::Ignored,
        }

        match self.buffer.push(data) {
            Decode::NeedMore => {
                if self.state == SessionState::Start && self.buffer.declared_len().is_some() {
                    self.transition(SessionState::Accumulating, Step::NeedMore)
                } else {
                    Step::NeedMore
                }
            }
            Decode::Complete(Request::Pop) => {
                self.transition(SessionState::Popping, Step::Ready(Request::Pop))
            }
            Decode::Complete(request) => {
                if self.state == SessionState::Start {
                    self.state = SessionState::Accumulating;
                }
                self.transition(SessionState::Pushing, Step::Ready(request))
            }
            Decode::Malformed(reason) => Step::Malformed(reason),
        }
    }

    /// Mark the response as sent.
    pub fn finish(&mut self) -> Result<()> {
        self.advance(SessionState::Done)
    }

    /// Mark the session as torn down without a response.
    ///
    /// Does nothing if the session already reached a terminal state.
    pub fn abandon(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Abandoned;
        }
    }

    fn transition(&mut self, next: SessionState, step: Step) -> Step {
        match self.advance(next) {
            Ok(()) => step,
            Err(_) => Step::Malformed("unexpected frame for session state"),
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_pop_path() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.state(), SessionState::Start);

        assert_eq!(machine.on_chunk(&[0x80]), Step::Ready(Request::Pop));
        assert_eq!(machine.state(), SessionState::Popping);

        machine.finish().unwrap();
        assert_eq!(machine.state(), SessionState::Done);
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_single_chunk_push_path() {
        let mut machine = SessionMachine::new();
        let step = machine.on_chunk(&[0x02, b'o', b'k']);

        assert_eq!(step, Step::Ready(Request::Push(Bytes::from_static(b"ok"))));
        assert_eq!(machine.state(), SessionState::Pushing);
        machine.finish().unwrap();
        assert_eq!(machine.state(), SessionState::Done);
    }

    #[test]
    fn test_multi_chunk_push_accumulates() {
        let mut machine = SessionMachine::new();

        assert_eq!(machine.on_chunk(&[0x03, b'a']), Step::NeedMore);
        assert_eq!(machine.state(), SessionState::Accumulating);
        assert_eq!(machine.progress(), Some((1, 3)));

        assert_eq!(machine.on_chunk(b"b"), Step::NeedMore);
        assert_eq!(machine.state(), SessionState::Accumulating);

        let step = machine.on_chunk(b"c");
        assert_eq!(step, Step::Ready(Request::Push(Bytes::from_static(b"abc"))));
        assert_eq!(machine.state(), SessionState::Pushing);
    }

    #[test]
    fn test_busy_ignores_data() {
        let mut machine = SessionMachine::busy();
        assert_eq!(machine.state(), SessionState::Busy);
        assert_eq!(machine.on_chunk(&[0x80]), Step::Ignored);
        assert_eq!(machine.on_chunk(&[0x01, 0x02]), Step::Ignored);
        assert_eq!(machine.state(), SessionState::Busy);
    }

    #[test]
    fn test_data_while_waiting_is_ignored() {
        let mut machine = SessionMachine::new();
        machine.on_chunk(&[0x80]);
        assert_eq!(machine.on_chunk(&[0x01, b'z']), Step::Ignored);
        assert_eq!(machine.state(), SessionState::Popping);
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut machine = SessionMachine::new();
        machine.on_chunk(&[0x80]);
        machine.finish().unwrap();

        assert!(machine.advance(SessionState::Start).is_err());
        assert!(machine.advance(SessionState::Popping).is_err());
        assert!(machine.finish().is_err());
        assert_eq!(machine.state(), SessionState::Done);
    }

    #[test]
    fn test_no_sideways_transitions() {
        assert!(!SessionState::Popping.can_advance_to(SessionState::Pushing));
        assert!(!SessionState::Accumulating.can_advance_to(SessionState::Popping));
        assert!(!SessionState::Start.can_advance_to(SessionState::Done));
        assert!(!SessionState::Busy.can_advance_to(SessionState::Start));
    }

    #[test]
    fn test_abandon() {
        let mut machine = SessionMachine::new();
        machine.on_chunk(&[0x05, b'a']);
        machine.abandon();
        assert_eq!(machine.state(), SessionState::Abandoned);

        // Terminal states are kept
        let mut done = SessionMachine::new();
        done.on_chunk(&[0x80]);
        done.finish().unwrap();
        done.abandon();
        assert_eq!(done.state(), SessionState::Done);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Start.to_string(), "start");
        assert_eq!(SessionState::Popping.as_str(), "pop");
        assert_eq!(SessionState::Pushing.as_str(), "push");
        assert_eq!(SessionState::Busy.as_str(), "busy");
    }
}
