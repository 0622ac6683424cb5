use tokio_postgres::{Client, SimpleQueryMessage};

use crate::error::PgConduitError;

/// Execute `sql` directly (not cursor-backed) and report the affected-row
/// count of the last completed statement.
///
/// Uses the simple query protocol, matching the behavior of unparameterized
/// execution: multi-statement scripts are accepted, and DDL completes with a
/// count of zero.
///
/// # Errors
/// Returns `PgConduitError::QueryExecution` if submission fails.
pub(crate) async fn execute_sql(client: &Client, sql: &str) -> Result<u64, PgConduitError> {
    let messages = client
        .simple_query(sql)
        .await
        .map_err(|e| PgConduitError::QueryExecution(format!("postgres execute error: {e}")))?;
    let row_count = messages
        .iter()
        .rev()
        .find_map(|message| match message {
            SimpleQueryMessage::CommandComplete(count) => Some(*count),
            _ => None,
        })
        .unwrap_or(0);
    Ok(row_count)
}
