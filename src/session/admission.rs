//! Admission control for new connections.
//!
//! Each new connection is counted together with the live sessions. If the
//! total stays within `max_connections` it is admitted. Otherwise the oldest
//! session is evicted when it has been open longer than the stale period,
//! and the new connection takes its place. If no session is stale enough the
//! new connection is rejected with the busy byte.
//!
//! The decision and the registry mutation happen under one registry lock, so
//! two concurrent admissions cannot both take the last slot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::registry::{oldest_in, SessionHandle, SessionId, SessionRegistry};

/// Default admission threshold.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default age after which a session may be evicted.
pub const DEFAULT_STALE_CONNECTION_PERIOD: Duration = Duration::from_secs(10);

/// Limits applied to new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Maximum number of admitted sessions, the new one included.
    pub max_connections: usize,
    /// Sessions strictly older than this may be evicted.
    pub stale_period: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            stale_period: DEFAULT_STALE_CONNECTION_PERIOD,
        }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// Registered without displacing anyone.
    Admitted(SessionHandle),
    /// Registered after closing the oldest session.
    AdmittedAfterEviction {
        /// The new session.
        session: SessionHandle,
        /// ID of the evicted session.
        evicted: SessionId,
        /// Ordinal of the evicted session.
        evicted_ordinal: u64,
    },
    /// Not registered; the caller must answer with the busy byte.
    Rejected {
        /// Connection count that triggered the rejection, the new one included.
        connections: usize,
    },
}

impl Admission {
    /// Handle of the admitted session, if any.
    pub fn session(&self) -> Option<&SessionHandle> {
        match self {
            Admission::Admitted(session) => Some(session),
            Admission::AdmittedAfterEviction { session, .. } => Some(session),
            Admission::Rejected { .. } => None,
        }
    }

    /// Check if the connection was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected { .. })
    }
}

/// Decides accept / evict-oldest / reject for each new connection.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    registry: Arc<SessionRegistry>,
    policy: AdmissionPolicy,
}

impl AdmissionController {
    /// Create a controller over a shared registry.
    pub fn new(registry: Arc<SessionRegistry>, policy: AdmissionPolicy) -> Self {
        Self { registry, policy }
    }

    /// Decide on a new connection.
    ///
    /// Admitted sessions get a child of `parent` as their cancellation token,
    /// so cancelling `parent` reaches every session.
    pub fn admit(
        &self,
        peer: Option<SocketAddr>,
        parent: &CancellationToken,
        now: Instant,
    ) -> Admission {
        let mut sessions = self.registry.lock();
        let connections = sessions.len() + 1;
        debug!(
            ?peer,
            connections, "Client connected. There are {} connections now", connections
        );

        let mut evicted = None;
        if connections > self.policy.max_connections {
            let stale = oldest_in(&sessions)
                .filter(|oldest| {
                    now.saturating_duration_since(oldest.created_at) > self.policy.stale_period
                })
                .map(|oldest| oldest.id);

            match stale.and_then(|id| sessions.remove(&id)) {
                Some(oldest) => {
                    debug!(
                        session = %oldest.id,
                        ordinal = oldest.ordinal,
                        age_ms = now.saturating_duration_since(oldest.created_at).as_millis() as u64,
                        "Disconnecting stale client"
                    );
                    oldest.cancel.cancel();
                    evicted = Some((oldest.id, oldest.ordinal));
                }
                None => {
                    warn!(
                        "Too many connections [{} >= {}] ... returning busy byte",
                        connections, self.policy.max_connections
                    );
                    return Admission::Rejected { connections };
                }
            }
        }

        // One eviction is not enough if the registry was filled past the limit
        if sessions.len() + 1 > self.policy.max_connections {
            warn!(
                "Too many connections [{} >= {}] ... returning busy byte",
                sessions.len() + 1,
                self.policy.max_connections
            );
            return Admission::Rejected {
                connections: sessions.len() + 1,
            };
        }

        let entry = self.registry.new_entry(peer, now, parent.child_token());
        let session = entry.handle();
        debug!(session = %session.id, ordinal = session.ordinal, "Added session");
        sessions.insert(entry.id, entry);

        match evicted {
            Some((evicted, evicted_ordinal)) => Admission::AdmittedAfterEviction {
                session,
                evicted,
                evicted_ordinal,
            },
            None => Admission::Admitted(session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_connections: usize, stale_secs: u64) -> (AdmissionController, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let policy = AdmissionPolicy {
            max_connections,
            stale_period: Duration::from_secs(stale_secs),
        };
        (AdmissionController::new(registry.clone(), policy), registry)
    }

    #[test]
    fn test_admits_up_to_limit() {
        let (ctrl, registry) = controller(3, 60);
        let root = CancellationToken::new();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(matches!(ctrl.admit(None, &root, now), Admission::Admitted(_)));
        }
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_rejects_when_full_and_nothing_stale() {
        let (ctrl, registry) = controller(2, 60);
        let root = CancellationToken::new();
        let now = Instant::now();

        ctrl.admit(None, &root, now);
        ctrl.admit(None, &root, now);

        let decision = ctrl.admit(None, &root, now + Duration::from_secs(30));
        assert!(decision.is_rejected());
        assert!(decision.session().is_none());
        assert!(matches!(decision, Admission::Rejected { connections: 3 }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_evicts_oldest_stale_session() {
        let (ctrl, registry) = controller(2, 10);
        let root = CancellationToken::new();
        let base = Instant::now();

        let oldest = ctrl.admit(None, &root, base).session().cloned().unwrap();
        let newer = ctrl
            .admit(None, &root, base + Duration::from_secs(5))
            .session()
            .cloned()
            .unwrap();

        let decision = ctrl.admit(None, &root, base + Duration::from_secs(11));
        match decision {
            Admission::AdmittedAfterEviction {
                session,
                evicted,
                evicted_ordinal,
            } => {
                assert_eq!(evicted, oldest.id);
                assert_eq!(evicted_ordinal, oldest.ordinal);
                assert!(registry.contains(&session.id));
            }
            other => panic!("expected eviction, got {:?}", other),
        }

        assert!(oldest.cancel.is_cancelled());
        assert!(!newer.cancel.is_cancelled());
        assert!(!registry.contains(&oldest.id));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stale_threshold_is_strict() {
        let (ctrl, _registry) = controller(1, 10);
        let root = CancellationToken::new();
        let base = Instant::now();

        ctrl.admit(None, &root, base);
        let decision = ctrl.admit(None, &root, base + Duration::from_secs(10));
        assert!(decision.is_rejected());
    }

    #[test]
    fn test_zero_limit_rejects_even_when_empty() {
        let (ctrl, registry) = controller(0, 0);
        let root = CancellationToken::new();

        assert!(ctrl.admit(None, &root, Instant::now()).is_rejected());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sessions_inherit_parent_cancellation() {
        let (ctrl, _registry) = controller(4, 60);
        let root = CancellationToken::new();

        let session = ctrl.admit(None, &root, Instant::now()).session().cloned().unwrap();
        assert!(!session.cancel.is_cancelled());

        root.cancel();
        assert!(session.cancel.is_cancelled());
    }

    #[test]
    fn test_slot_freed_by_deregister() {
        let (ctrl, registry) = controller(1, 60);
        let root = CancellationToken::new();
        let now = Instant::now();

        let first = ctrl.admit(None, &root, now).session().cloned().unwrap();
        assert!(ctrl.admit(None, &root, now).is_rejected());

        registry.deregister(&first.id);
        assert!(matches!(ctrl.admit(None, &root, now), Admission::Admitted(_)));
    }
}
