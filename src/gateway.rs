//! Connection lifecycle: open against a pool or a dedicated socket, raced
//! with a timeout; close with optional force-destroy.

use std::fmt;
use std::sync::Arc;

use deadpool::managed::Object;
use tokio::time::timeout;

use crate::config::ConnectOptions;
use crate::cursor::QueryCursor;
use crate::error::PgConduitError;
use crate::executor;
use crate::notify;
use crate::pool::{SessionManager, SessionPool, build_pool};
use crate::session::{
    ConnectionLostCallback, ListenerToken, ObserverToken, PgSession, Registry, RouteCallback,
};

/// Opens and closes connections, pooled or direct.
pub struct Gateway {
    options: ConnectOptions,
    pool: Option<SessionPool>,
}

impl Gateway {
    /// Gateway backed by a shared pool of at most `max_size` connections.
    ///
    /// # Errors
    /// Returns `PgConduitError::Config` for invalid options.
    pub fn pooled(options: ConnectOptions, max_size: usize) -> Result<Self, PgConduitError> {
        let pool = build_pool(&options, max_size)?;
        Ok(Self {
            options,
            pool: Some(pool),
        })
    }

    /// Gateway that opens a dedicated socket per connect.
    #[must_use]
    pub fn direct(options: ConnectOptions) -> Self {
        Self {
            options,
            pool: None,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Open a connection, racing the attempt against the configured timeout,
    /// and attach `on_lost` as the connection's error observer.
    ///
    /// On timeout the in-flight acquire future is dropped: a late-succeeding
    /// connection is torn down without ever being surfaced, and `on_lost` is
    /// never invoked for it. Exactly one of {timeout, failure, success} is
    /// reported.
    ///
    /// # Errors
    /// `PgConduitError::ConnectTimeout` if the timer wins,
    /// `PgConduitError::PoolAcquisition` if the attempt fails first.
    pub async fn connect(
        &self,
        on_lost: ConnectionLostCallback,
    ) -> Result<(ConnectionHandle, ObserverToken), PgConduitError> {
        let wait = self.options.connect_timeout;
        let inner = match &self.pool {
            Some(pool) => match timeout(wait, pool.get()).await {
                Err(_) => return Err(self.options.timeout_error()),
                Ok(Err(e)) => return Err(self.options.acquisition_error(e.to_string())),
                Ok(Ok(object)) => HandleInner::Pooled(object),
            },
            None => {
                let config = self.options.to_pg_config()?;
                match timeout(wait, PgSession::establish(&config)).await {
                    Err(_) => return Err(self.options.timeout_error()),
                    Ok(Err(e)) => return Err(self.options.acquisition_error(e.to_string())),
                    Ok(Ok(session)) => HandleInner::Direct(session),
                }
            }
        };
        let handle = ConnectionHandle { inner };
        let token = handle.registry().attach_observer(on_lost)?;
        Ok((handle, token))
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("endpoint", &self.options.endpoint())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

enum HandleInner {
    Pooled(Object<SessionManager>),
    Direct(PgSession),
}

/// An open connection, exclusively owned between connect and disconnect.
pub struct ConnectionHandle {
    inner: HandleInner,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            HandleInner::Pooled(_) => "pooled",
            HandleInner::Direct(_) => "direct",
        };
        f.debug_struct("ConnectionHandle")
            .field("kind", &kind)
            .field("poisoned", &self.session().is_poisoned())
            .finish()
    }
}

impl ConnectionHandle {
    fn session(&self) -> &PgSession {
        match &self.inner {
            HandleInner::Pooled(object) => &**object,
            HandleInner::Direct(session) => session,
        }
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        self.session().registry()
    }

    fn ensure_usable(&self) -> Result<&PgSession, PgConduitError> {
        let session = self.session();
        if session.is_poisoned() {
            return Err(PgConduitError::ConnectionLost(
                "connection previously lost".to_string(),
            ));
        }
        Ok(session)
    }

    /// Execute `sql` directly and return the affected-row count.
    ///
    /// # Errors
    /// `PgConduitError::QueryExecution` on failure, or
    /// `PgConduitError::ConnectionLost` if the connection already died.
    pub async fn execute_sql(&self, sql: &str) -> Result<u64, PgConduitError> {
        let session = self.ensure_usable()?;
        executor::execute_sql(session.client(), sql).await
    }

    /// Open a streaming cursor over `sql` and fetch the first batch.
    ///
    /// Receiving fewer than `batch_size` rows means the result set is
    /// already exhausted.
    ///
    /// # Errors
    /// `PgConduitError::QueryExecution` if the statement is rejected,
    /// `PgConduitError::StreamRead` if the first batch fails mid-read.
    pub async fn query(
        &self,
        sql: &str,
        batch_size: usize,
    ) -> Result<(QueryCursor, Vec<String>), PgConduitError> {
        let session = self.ensure_usable()?;
        let mut cursor = QueryCursor::open(session.client(), sql).await?;
        let rows = cursor.more_results(batch_size).await?;
        Ok((cursor, rows))
    }

    /// Issue `LISTEN` on `channel` and register `route` for its payloads.
    /// A worker task owned by the registration invokes `route` once per
    /// notification, in socket arrival order, off the driver task.
    ///
    /// # Errors
    /// `PgConduitError::ListenStatement` if the statement fails or the
    /// channel already has an active registration.
    pub async fn listen(
        &self,
        channel: &str,
        route: RouteCallback,
    ) -> Result<ListenerToken, PgConduitError> {
        let session = self.ensure_usable()?;
        notify::listen(session, channel, route).await
    }

    /// Issue `UNLISTEN` on `channel` and drop the registration identified by
    /// `token`. Dropping an already-removed registration is a no-op.
    ///
    /// # Errors
    /// `PgConduitError::ListenStatement` if the statement fails.
    pub async fn unlisten(
        &self,
        channel: &str,
        token: ListenerToken,
    ) -> Result<(), PgConduitError> {
        let session = self.ensure_usable()?;
        notify::unlisten(session, channel, token).await
    }

    /// Close the handle, detaching the observer identified by `token` first.
    ///
    /// `discard` forces the physical connection to be destroyed instead of
    /// returned to the pool; a session that suffered an async error is
    /// destroyed regardless. Direct handles terminate their socket. Even when
    /// an error is returned the handle is disconnected.
    ///
    /// # Errors
    /// `PgConduitError::Teardown` if the connection driver task failed.
    pub async fn disconnect(
        self,
        discard: bool,
        token: ObserverToken,
    ) -> Result<(), PgConduitError> {
        self.registry().detach_observer(token);
        match self.inner {
            HandleInner::Pooled(object) => {
                if discard || object.is_poisoned() || object.is_closed() {
                    let session = Object::take(object);
                    session.shutdown().await
                } else {
                    // the driver keeps polling while the session sits idle in
                    // the pool; routes must not outlive the handle
                    object.registry().reset();
                    drop(object);
                    Ok(())
                }
            }
            HandleInner::Direct(session) => session.shutdown().await,
        }
    }
}
