use std::time::Duration;

use pg_conduit::prelude::*;

/// Connection options for the live-database tests, or `None` to skip.
///
/// Set `PG_CONDUIT_TEST_HOST` (and optionally `PG_CONDUIT_TEST_PORT`,
/// `PG_CONDUIT_TEST_DB`, `PG_CONDUIT_TEST_USER`, `PG_CONDUIT_TEST_PASSWORD`)
/// to run them against a real server.
pub fn options_from_env() -> Option<ConnectOptions> {
    let host = std::env::var("PG_CONDUIT_TEST_HOST").ok()?;
    let port = std::env::var("PG_CONDUIT_TEST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5432);
    let database =
        std::env::var("PG_CONDUIT_TEST_DB").unwrap_or_else(|_| "testing".to_string());
    let user = std::env::var("PG_CONDUIT_TEST_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("PG_CONDUIT_TEST_PASSWORD").unwrap_or_default();
    Some(
        ConnectOptions::new(host, port, database, user, password)
            .with_connect_timeout(Duration::from_secs(10)),
    )
}
