//! Session module - per-connection state, registry and admission.
//!
//! One session exists per admitted connection and serves exactly one
//! request/response cycle:
//! - [`SessionMachine`] decodes the request and tracks the session state
//! - [`SessionRegistry`] records live sessions for admission and diagnostics
//! - [`AdmissionController`] accepts, evicts the oldest, or rejects
//! - [`run_session`] is the task that drives a connection to completion

mod admission;
mod driver;
mod registry;
mod state;

pub use admission::{
    Admission, AdmissionController, AdmissionPolicy, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_STALE_CONNECTION_PERIOD,
};
pub use driver::{reject_busy, run_session, SessionContext};
pub use registry::{SessionEntry, SessionHandle, SessionId, SessionRegistry};
pub use state::{SessionMachine, SessionState, Step};
