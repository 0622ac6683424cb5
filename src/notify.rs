//! LISTEN/UNLISTEN bridging.
//!
//! `listen` issues the statement first and only then registers the route, so
//! a registration always corresponds to a server-side subscription. The
//! payload callback is dispatched by the session driver as an independent
//! task per notification (see `session::Registry::dispatch`).

use crate::error::PgConduitError;
use crate::executor;
use crate::session::{ListenerToken, PgSession, RouteCallback};

/// Quote a channel name as a Postgres identifier.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn validate_channel(name: &str) -> Result<(), PgConduitError> {
    if name.is_empty() {
        return Err(PgConduitError::ListenStatement(
            "channel name must not be empty".to_string(),
        ));
    }
    if name.contains('\0') {
        return Err(PgConduitError::ListenStatement(
            "channel name must not contain NUL".to_string(),
        ));
    }
    Ok(())
}

fn as_listen_error(err: PgConduitError) -> PgConduitError {
    match err {
        PgConduitError::QueryExecution(message) => PgConduitError::ListenStatement(message),
        other => other,
    }
}

pub(crate) async fn listen(
    session: &PgSession,
    channel: &str,
    route: RouteCallback,
) -> Result<ListenerToken, PgConduitError> {
    validate_channel(channel)?;
    executor::execute_sql(
        session.client(),
        &format!("LISTEN {}", quote_identifier(channel)),
    )
    .await
    .map_err(as_listen_error)?;
    session.registry().register_route(channel, route)
}

pub(crate) async fn unlisten(
    session: &PgSession,
    channel: &str,
    token: ListenerToken,
) -> Result<(), PgConduitError> {
    validate_channel(channel)?;
    executor::execute_sql(
        session.client(),
        &format!("UNLISTEN {}", quote_identifier(channel)),
    )
    .await
    .map_err(as_listen_error)?;
    // removing an already-removed registration is a local no-op
    session.registry().remove_route(channel, token);
    Ok(())
}
