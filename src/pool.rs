use deadpool::managed::{self, Metrics, RecycleError, RecycleResult};

use crate::config::ConnectOptions;
use crate::error::PgConduitError;
use crate::session::PgSession;

/// deadpool manager producing self-driven sessions.
///
/// The stock deadpool-postgres manager spawns the connection future
/// internally, which hides notifications and socket errors; this manager
/// creates [`PgSession`]s so the crate keeps the driver task under its own
/// control.
pub struct SessionManager {
    config: tokio_postgres::Config,
}

impl SessionManager {
    /// # Errors
    /// Returns `PgConduitError::Config` for invalid connection options.
    pub fn new(options: &ConnectOptions) -> Result<Self, PgConduitError> {
        Ok(Self {
            config: options.to_pg_config()?,
        })
    }
}

impl managed::Manager for SessionManager {
    type Type = PgSession;
    type Error = tokio_postgres::Error;

    async fn create(&self) -> Result<PgSession, tokio_postgres::Error> {
        PgSession::establish(&self.config).await
    }

    async fn recycle(
        &self,
        session: &mut PgSession,
        _metrics: &Metrics,
    ) -> RecycleResult<tokio_postgres::Error> {
        if session.is_poisoned() {
            return Err(RecycleError::Message(
                "session poisoned by an async connection error".into(),
            ));
        }
        if session.is_closed() {
            return Err(RecycleError::Message("connection closed".into()));
        }
        // The next borrower must not inherit LISTEN routes or the previous
        // observer.
        session.registry().reset();
        Ok(())
    }
}

/// Connection pool of [`PgSession`]s.
pub type SessionPool = managed::Pool<SessionManager>;

/// Build a pool over `options` with at most `max_size` physical connections.
///
/// # Errors
/// Returns `PgConduitError::Config` if the options are invalid or the pool
/// cannot be constructed.
pub fn build_pool(options: &ConnectOptions, max_size: usize) -> Result<SessionPool, PgConduitError> {
    let manager = SessionManager::new(options)?;
    SessionPool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| PgConduitError::Config(format!("failed to build session pool: {e}")))
}
