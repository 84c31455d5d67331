//! Transport module - TCP listeners for the stack and diagnostics ports.

mod tcp;

pub use tcp::{StackListener, ACCEPT_ERROR_BACKOFF};
