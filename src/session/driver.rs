//! Per-connection session task.
//!
//! Drives a [`SessionMachine`] from socket reads, runs the decoded request
//! against the [`BoundedStack`], writes the single response and closes. The
//! session deregisters itself on every exit path.
//!
//! A blocked push or pop ends early when:
//! - the peer closes or errors (`ConnectionClosed`)
//! - the session is evicted or the server shuts down (`Cancelled`)
//! - the optional session timeout elapses (`Timeout`)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::registry::{SessionHandle, SessionRegistry};
use super::state::{SessionMachine, Step};
use crate::error::{LifoError, Result};
use crate::protocol::{Request, Response};
use crate::stack::BoundedStack;

/// Read buffer size. Larger than any single frame.
const READ_BUFFER_SIZE: usize = 256;

/// Everything a session task needs besides its stream.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Identity and cancellation of this session.
    pub handle: SessionHandle,
    /// Shared stack.
    pub stack: BoundedStack,
    /// Shared registry, for self-deregistration.
    pub registry: Arc<SessionRegistry>,
    /// Upper bound on the whole session, if configured.
    pub timeout: Option<Duration>,
}

/// Serve one admitted connection until its request is answered or abandoned.
pub async fn run_session<S>(stream: S, ctx: SessionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let SessionContext {
        handle,
        stack,
        registry,
        timeout,
    } = ctx;
    let mut machine = SessionMachine::new();

    let deadline = timeout.map(|limit| Instant::now() + limit);
    let result = serve(stream, &mut machine, &handle, &stack, deadline).await;

    match &result {
        Ok(()) => {}
        Err(LifoError::Timeout) => {
            machine.abandon();
            debug!(session = %handle.id, ordinal = handle.ordinal, "Client request time out");
        }
        Err(e) if e.is_session_end() => {
            machine.abandon();
            debug!(
                session = %handle.id,
                ordinal = handle.ordinal,
                "Client disconnected: {}", e
            );
        }
        Err(e) => {
            machine.abandon();
            warn!(session = %handle.id, ordinal = handle.ordinal, "Client error: {}", e);
        }
    }

    if registry.deregister(&handle.id).is_some() {
        debug!(
            session = %handle.id,
            state = %machine.state(),
            connections = registry.len(),
            "Deleting session"
        );
    } else {
        trace!(session = %handle.id, "Session already removed by eviction");
    }
}

/// Answer a connection refused by admission control with the busy byte.
pub async fn reject_busy<S>(mut stream: S)
where
    S: AsyncWrite + Unpin,
{
    let machine = SessionMachine::busy();
    let result = async {
        let busy = Response::Busy.encode()?;
        stream.write_all(&busy).await?;
        stream.shutdown().await?;
        Ok::<_, LifoError>(())
    }
    .await;

    if let Err(e) = result {
        debug!(state = %machine.state(), "Busy response not delivered: {}", e);
    }
}

async fn serve<S>(
    stream: S,
    machine: &mut SessionMachine,
    handle: &SessionHandle,
    stack: &BoundedStack,
    deadline: Option<Instant>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let cancel = &handle.cancel;

    let request = before_deadline(deadline, read_request(&mut reader, machine, handle)).await?;
    debug!(
        session = %handle.id,
        ordinal = handle.ordinal,
        state = %machine.state(),
        "Decoded {} request", request.name()
    );

    let response = match request {
        Request::Pop => {
            let waiting = until_peer_closes(&mut reader, stack.pop(cancel));
            let payload = before_deadline(deadline, waiting).await?;
            debug!(
                session = %handle.id,
                len = payload.len(),
                remaining = stack.len(),
                "Popped {} byte payload from LIFO", payload.len()
            );
            Response::Popped(payload)
        }
        Request::Push(payload) => {
            let len = payload.len();
            let waiting = until_peer_closes(&mut reader, stack.push(payload, cancel));
            let depth = before_deadline(deadline, waiting).await?;
            debug!(
                session = %handle.id,
                len,
                depth,
                "Pushed {} byte payload onto LIFO", len
            );
            Response::PushAck
        }
    };

    // The deadline no longer applies: a popped payload must reach the client
    let bytes = response.encode()?;
    trace!(session = %handle.id, "Sending response: [{}]", hex(&bytes));
    writer.write_all(&bytes).await?;
    writer.shutdown().await?;
    machine.finish()
}

/// Read chunks until the machine yields a request.
async fn read_request<R>(
    reader: &mut R,
    machine: &mut SessionMachine,
    handle: &SessionHandle,
) -> Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => return Err(LifoError::Cancelled),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            // Partial pushes are dropped, nothing reached the stack
            return Err(LifoError::ConnectionClosed);
        }

        let chunk = &buf[..n];
        trace!(session = %handle.id, "Received {} bytes: [{}]", n, hex(chunk));

        match machine.on_chunk(chunk) {
            Step::Ready(request) => return Ok(request),
            Step::NeedMore => {
                if let Some((got, declared)) = machine.progress() {
                    trace!(
                        session = %handle.id,
                        "payload serialized - got {} of {} bytes", got, declared
                    );
                }
            }
            Step::Ignored => {
                warn!(
                    session = %handle.id,
                    state = %machine.state(),
                    "Unknown state on data, ignoring {} bytes", n
                );
            }
            Step::Malformed(reason) => {
                return Err(LifoError::Protocol(reason.to_string()));
            }
        }
    }
}

/// Fail with `Timeout` if `fut` has not finished by `deadline`.
async fn before_deadline<F, T>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .unwrap_or(Err(LifoError::Timeout)),
        None => fut.await,
    }
}

/// Run a stack operation while watching the peer.
///
/// The operation is polled first, so a request the stack can serve right
/// away is served even if the peer already half-closed. Bytes that arrive
/// while it waits are discarded; EOF or a read error abandons the operation
/// before it can mutate the stack.
async fn until_peer_closes<R, F, T>(reader: &mut R, op: F) -> Result<T>
where
    R: AsyncRead + Unpin,
    F: Future<Output = Result<T>>,
{
    tokio::pin!(op);
    let mut scratch = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            biased;
            result = &mut op => return result,
            read = reader.read(&mut scratch) => match read {
                Ok(0) => return Err(LifoError::ConnectionClosed),
                Ok(n) => trace!("Discarding {} bytes received while waiting", n),
                Err(e) => return Err(e.into()),
            },
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
