//! Lightweight async PostgreSQL adapter over tokio-postgres.
//!
//! Four capability groups:
//! - connection lifecycle against a deadpool-managed pool or a dedicated
//!   socket, with the connect attempt raced against a timeout
//!   ([`gateway::Gateway`]);
//! - backpressure-aware streaming of query results in bounded batches over a
//!   server-side cursor ([`cursor::QueryCursor`]);
//! - direct statement execution with affected-row reporting
//!   ([`gateway::ConnectionHandle::execute_sql`]);
//! - LISTEN/NOTIFY bridging to registered route callbacks, plus asynchronous
//!   connection-loss escalation to a long-lived observer
//!   ([`gateway::ConnectionHandle::listen`]).
//!
//! ```no_run
//! use std::sync::Arc;
//! use pg_conduit::prelude::*;
//!
//! # async fn demo() -> Result<(), PgConduitError> {
//! let options = ConnectOptions::new("localhost", 5432, "app", "user", "secret");
//! let gateway = Gateway::pooled(options, 8)?;
//!
//! let (handle, observer) = gateway
//!     .connect(Arc::new(|err| eprintln!("connection lost: {err}")))
//!     .await?;
//!
//! let (mut cursor, first) = handle.query("SELECT * FROM events", 100).await?;
//! let mut batch = first;
//! while batch.len() == 100 {
//!     batch = cursor.more_results(100).await?;
//! }
//!
//! handle.disconnect(false, observer).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod gateway;
pub mod pool;
pub mod prelude;
pub mod session;

mod executor;
mod notify;

pub use config::ConnectOptions;
pub use cursor::QueryCursor;
pub use error::PgConduitError;
pub use gateway::{ConnectionHandle, Gateway};
pub use pool::{SessionPool, build_pool};
pub use session::{ConnectionLostCallback, ListenerToken, ObserverToken, RouteCallback};
