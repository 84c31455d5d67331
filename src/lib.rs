//! # lifo-server
//!
//! A single shared, bounded LIFO stack served over TCP.
//!
//! Each connection carries exactly one request:
//!
//! - **Push**: header `0LLLLLLL` followed by `L` payload bytes (0..=127).
//!   Answered with `0x00` once the payload is on the stack.
//! - **Pop**: header `1xxxxxxx`. Answered with the popped payload's length
//!   byte followed by the payload.
//!
//! A push on a full stack and a pop on an empty stack block until the other
//! side makes room, the peer disconnects, or the session is cancelled.
//! Connections beyond the limit either evict a stale session or receive the
//! busy byte `0xFF`. A second port serves a JSON snapshot of the counters.
//!
//! ## Example
//!
//! ```ignore
//! use lifo_server::{Config, ServerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml".as_ref())?;
//!     let server = ServerBuilder::from_config(&config).bind().await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod stack;
pub mod telemetry;
pub mod transport;

mod shared;

pub use config::{Config, LogLevel, LoggingConfig};
pub use diagnostics::DiagnosticSnapshot;
pub use error::{LifoError, Result};
pub use server::{LifoServer, ServerBuilder};
pub use shared::SharedState;
pub use shutdown::ShutdownCoordinator;
pub use stack::BoundedStack;
