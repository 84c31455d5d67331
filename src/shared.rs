//! State shared by every connection.
//!
//! The stack and the session registry are the only shared mutable resources.
//! Both serialize their own access; this struct only bundles them so they
//! are injected together instead of living in globals.

use std::sync::Arc;

use crate::diagnostics::DiagnosticSnapshot;
use crate::session::SessionRegistry;
use crate::stack::BoundedStack;

/// Stack and registry shared by acceptors, sessions and diagnostics.
#[derive(Debug, Clone)]
pub struct SharedState {
    /// The LIFO store.
    pub stack: BoundedStack,
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
}

impl SharedState {
    /// Fresh state with an empty stack of the given capacity.
    pub fn new(max_stack_size: usize) -> Self {
        Self {
            stack: BoundedStack::new(max_stack_size),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Current connection count and stack size.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            app_server_connections: self.registry.len(),
            lifo_stack_size: self.stack.len(),
        }
    }

    /// Snapshot without waiting, `None` if either lock is held.
    pub fn try_snapshot(&self) -> Option<DiagnosticSnapshot> {
        Some(DiagnosticSnapshot {
            app_server_connections: self.registry.try_len()?,
            lifo_stack_size: self.stack.try_len()?,
        })
    }
}
