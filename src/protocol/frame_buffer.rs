//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` so the completed payload is frozen without a copy.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: nothing received yet
//! - `WaitingForPayload`: push header parsed, need N more payload bytes
//! - `Complete`: one request decoded; a connection carries exactly one
//!
//! Bytes beyond the declared payload length are discarded. There is no
//! pipelining of a second request on the same connection.
//!
//! # Example
//!
//! ```
//! use lifo_server::protocol::{Decode, FrameBuffer, Request};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Header says 4 bytes, only 2 arrive in the first read
//! assert_eq!(buffer.push(&[0x04, b'a', b'b']), Decode::NeedMore);
//!
//! match buffer.push(b"cd") {
//!     Decode::Complete(Request::Push(payload)) => assert_eq!(&payload[..], b"abcd"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, MAX_PAYLOAD_SIZE};
use super::Request;

/// Outcome of feeding one chunk into the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    /// Frame not finished yet, keep reading.
    NeedMore,
    /// A full request was decoded.
    Complete(Request),
    /// The chunk cannot belong to a valid frame.
    Malformed(&'static str),
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the header byte.
    WaitingForHeader,
    /// Push header parsed, waiting for payload bytes.
    WaitingForPayload { declared: usize },
    /// A request has already been handed out.
    Complete,
}

/// Buffer accumulating the bytes of a single request.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Accumulated payload bytes (header excluded).
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
}

impl FrameBuffer {
    /// Create an empty frame buffer sized for the largest payload.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_PAYLOAD_SIZE),
            state: State::WaitingForHeader,
        }
    }

    /// Push one received chunk and report whether the frame is complete.
    ///
    /// The first byte ever received is the header. A pop header completes the
    /// frame immediately; any bytes after it are ignored.
    pub fn push(&mut self, data: &[u8]) -> Decode {
        match self.state {
            State::WaitingForHeader => {
                let Some((&first, rest)) = data.split_first() else {
                    return Decode::NeedMore;
                };

                let header = Header::decode(first);
                if header.is_pop() {
                    self.state = State::Complete;
                    return Decode::Complete(Request::Pop);
                }

                self.state = State::WaitingForPayload {
                    declared: header.payload_length as usize,
                };
                self.accumulate(rest)
            }
            State::WaitingForPayload { .. } => self.accumulate(data),
            State::Complete => Decode::Malformed("data received after frame was complete"),
        }
    }

    /// Append payload bytes and finish the push once the declared length is met.
    fn accumulate(&mut self, data: &[u8]) -> Decode {
        let State::WaitingForPayload { declared } = self.state else {
            return Decode::Malformed("payload bytes without a push header");
        };

        // Never hold more than the declared length
        let wanted = declared.saturating_sub(self.buffer.len());
        let take = wanted.min(data.len());
        self.buffer.extend_from_slice(&data[..take]);

        if self.buffer.len() < declared {
            return Decode::NeedMore;
        }

        self.state = State::Complete;
        let payload = self.buffer.split().freeze();
        Decode::Complete(Request::Push(payload))
    }

    /// Declared payload length of the push being accumulated.
    pub fn declared_len(&self) -> Option<usize> {
        match self.state {
            State::WaitingForPayload { declared } => Some(declared),
            _ => None,
        }
    }

    /// Get the number of buffered payload bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no payload bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if a request has been decoded.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
            State::Complete => "Complete",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
