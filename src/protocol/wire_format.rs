//! Wire format encoding and decoding.
//!
//! Every request starts with a single header byte:
//! ```text
//! ┌────────┬──────────────────────┐
//! │ bit 7  │ bits 6..0            │
//! │ op     │ payload length (0-127)│
//! │ 0=push │ push only            │
//! │ 1=pop  │ ignored for pop      │
//! └────────┴──────────────────────┘
//! ```
//!
//! Responses reuse the same layout: a push is acknowledged with `0x00`, a pop
//! answers with `len` followed by the payload, and a rejected connection gets
//! the busy byte `0xFF`.

use crate::error::{LifoError, Result};

/// Header size in bytes (fixed, exactly 1).
pub const HEADER_SIZE: usize = 1;

/// Largest payload the 7 length bits can describe.
pub const MAX_PAYLOAD_SIZE: usize = 0x7F;

/// Operation selector bit (bit 7).
pub const OP_MASK: u8 = 0b1000_0000;

/// Payload length bits (bits 0-6).
pub const LENGTH_MASK: u8 = 0b0111_1111;

/// Single-byte acknowledgment for a completed push.
pub const PUSH_ACK: u8 = 0x00;

/// Single-byte response for a connection rejected by admission control.
pub const BUSY_BYTE: u8 = 0xFF;

/// Operation encoded in the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Store a payload on top of the stack.
    Push,
    /// Remove and return the top of the stack.
    Pop,
}

/// Decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Requested operation.
    pub op: Op,
    /// Declared payload length. Always 0 for pops.
    pub payload_length: u8,
}

impl Header {
    /// Header for a push of `payload_length` bytes.
    pub fn push(payload_length: u8) -> Self {
        Self {
            op: Op::Push,
            payload_length: payload_length & LENGTH_MASK,
        }
    }

    /// Header for a pop request.
    pub fn pop() -> Self {
        Self {
            op: Op::Pop,
            payload_length: 0,
        }
    }

    /// Encode header to its wire byte.
    ///
    /// # Example
    ///
    /// ```
    /// use lifo_server::protocol::Header;
    ///
    /// assert_eq!(Header::push(5).encode(), 0x05);
    /// assert_eq!(Header::pop().encode(), 0x80);
    /// ```
    pub fn encode(&self) -> u8 {
        match self.op {
            Op::Push => self.payload_length & LENGTH_MASK,
            Op::Pop => OP_MASK,
        }
    }

    /// Decode a header byte.
    ///
    /// Length bits of a pop header are ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use lifo_server::protocol::{Header, Op};
    ///
    /// let header = Header::decode(0x8F);
    /// assert_eq!(header.op, Op::Pop);
    /// assert_eq!(header.payload_length, 0);
    /// ```
    pub fn decode(byte: u8) -> Self {
        if byte & OP_MASK != 0 {
            Self::pop()
        } else {
            Self::push(byte & LENGTH_MASK)
        }
    }

    /// Check if this is a pop request.
    #[inline]
    pub fn is_pop(&self) -> bool {
        self.op == Op::Pop
    }
}

/// Build the header byte of a pop response carrying `len` payload bytes.
///
/// Returns a protocol error if `len` does not fit in 7 bits.
pub fn encode_pop_response_header(len: usize) -> Result<u8> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(LifoError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(len as u8 & LENGTH_MASK)
}

/// Decode a header byte (standalone function).
#[inline]
pub fn decode_header(byte: u8) -> Header {
    Header::decode(byte)
}
