use thiserror::Error;

/// Errors produced by the adapter.
///
/// Synchronous failures are returned from the call that caused them.
/// Asynchronous connection-scoped failures are delivered once through the
/// connection-lost observer registered at connect time; operations attempted
/// after that point fail with [`PgConduitError::ConnectionLost`].
#[derive(Debug, Error)]
pub enum PgConduitError {
    /// The connect attempt did not finish before the configured timeout.
    /// `elapsed_secs` keeps the fractional part so a sub-second timeout does
    /// not report "0 seconds".
    #[error("Connection timeout after {elapsed_secs} seconds to {host}:{port}/{database}")]
    ConnectTimeout {
        host: String,
        port: u16,
        database: String,
        elapsed_secs: f64,
    },

    /// The pool (or the socket, for direct gateways) reported a failure
    /// before the timeout fired.
    #[error("Attempt to retrieve pooled connection for {host}:{port}/{database}. Failed with: {message}")]
    PoolAcquisition {
        host: String,
        port: u16,
        database: String,
        message: String,
    },

    /// Invalid connection options or pool construction failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A statement submitted for direct execution failed.
    #[error("SQL execution error: {0}")]
    QueryExecution(String),

    /// The cursor's underlying row stream failed mid-read.
    #[error("Cursor stream error: {0}")]
    StreamRead(String),

    /// The cursor already reported end-of-stream; open a new one.
    #[error("Cursor is exhausted")]
    CursorExhausted,

    /// The connection died out-of-band; the handle is unusable.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A LISTEN or UNLISTEN statement or registration failed.
    #[error("LISTEN/UNLISTEN failed: {0}")]
    ListenStatement(String),

    /// Local teardown failure during disconnect. The handle still counts as
    /// disconnected after this is returned.
    #[error("Teardown error: {0}")]
    Teardown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_timeout_message_names_the_endpoint() {
        let err = PgConduitError::ConnectTimeout {
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            elapsed_secs: 5.0,
        };
        assert_eq!(
            err.to_string(),
            "Connection timeout after 5 seconds to localhost:5432/app"
        );
    }

    #[test]
    fn sub_second_timeout_renders_fractionally() {
        let err = PgConduitError::ConnectTimeout {
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            elapsed_secs: 0.4,
        };
        assert_eq!(
            err.to_string(),
            "Connection timeout after 0.4 seconds to localhost:5432/app"
        );
    }

    #[test]
    fn pool_acquisition_message_carries_the_underlying_error() {
        let err = PgConduitError::PoolAcquisition {
            host: "db".into(),
            port: 5433,
            database: "warehouse".into(),
            message: "too many clients".into(),
        };
        assert_eq!(
            err.to_string(),
            "Attempt to retrieve pooled connection for db:5433/warehouse. Failed with: too many clients"
        );
    }
}
