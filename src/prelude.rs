//! Convenient imports for common functionality.

pub use crate::config::ConnectOptions;
pub use crate::cursor::QueryCursor;
pub use crate::error::PgConduitError;
pub use crate::gateway::{ConnectionHandle, Gateway};
pub use crate::pool::{SessionManager, SessionPool, build_pool};
pub use crate::session::{
    ConnectionLostCallback, ListenerToken, ObserverToken, PgSession, RouteCallback,
};
