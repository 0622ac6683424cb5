use std::fmt;
use std::pin::Pin;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{Client, Row, RowStream};

use crate::error::PgConduitError;

/// Server-side streaming cursor over one SQL statement.
///
/// Rows are decoded from the wire one at a time, so memory is bounded by the
/// socket buffer rather than the size of the result set. A fetch returning
/// fewer rows than requested means the stream is exhausted; fetching again
/// after that is an error. Overlapping fetches on one cursor cannot be
/// expressed: [`QueryCursor::more_results`] takes `&mut self`.
pub struct QueryCursor {
    stream: Pin<Box<RowStream>>,
    exhausted: bool,
}

impl fmt::Debug for QueryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCursor")
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

fn slice_iter<'a>(
    params: &'a [&'a (dyn ToSql + Sync)],
) -> impl ExactSizeIterator<Item = &'a dyn ToSql> + 'a {
    params.iter().map(|p| *p as _)
}

impl QueryCursor {
    /// Open a cursor over `sql`.
    ///
    /// # Errors
    /// Returns `PgConduitError::QueryExecution` if the statement is rejected.
    pub(crate) async fn open(client: &Client, sql: &str) -> Result<Self, PgConduitError> {
        let stream = client
            .query_raw(sql, slice_iter(&[]))
            .await
            .map_err(|e| PgConduitError::QueryExecution(format!("cursor open failed: {e}")))?;
        Ok(Self {
            stream: Box::pin(stream),
            exhausted: false,
        })
    }

    /// Fetch up to `batch_size` rows, each serialized as a JSON object text
    /// keyed by column name. Only real rows are counted; a short (possibly
    /// empty) batch signals end-of-stream.
    ///
    /// # Errors
    /// `PgConduitError::CursorExhausted` if the stream already ended,
    /// `PgConduitError::StreamRead` if the underlying stream fails.
    pub async fn more_results(&mut self, batch_size: usize) -> Result<Vec<String>, PgConduitError> {
        if batch_size == 0 {
            return Err(PgConduitError::QueryExecution(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.exhausted {
            return Err(PgConduitError::CursorExhausted);
        }
        let mut rows = Vec::with_capacity(batch_size);
        while rows.len() < batch_size {
            match self.stream.next().await {
                Some(Ok(row)) => rows.push(row_to_json_text(&row)?),
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Err(PgConduitError::StreamRead(e.to_string()));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// True once the stream has signalled end-of-stream or failed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

fn row_to_json_text(row: &Row) -> Result<String, PgConduitError> {
    let mut object = Map::with_capacity(row.len());
    for idx in 0..row.len() {
        let name = row.columns()[idx].name().to_string();
        object.insert(name, column_to_json(row, idx)?);
    }
    serde_json::to_string(&Value::Object(object))
        .map_err(|e| PgConduitError::StreamRead(format!("row serialization failed: {e}")))
}

fn decode<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, PgConduitError>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| PgConduitError::StreamRead(format!("column decode failed: {e}")))
}

/// Convert one column to JSON, dispatching on the column's type name.
fn column_to_json(row: &Row, idx: usize) -> Result<Value, PgConduitError> {
    let type_name = row.columns()[idx].type_().name();
    let value = match type_name {
        "int2" => decode::<i16>(row, idx)?.map_or(Value::Null, |v| Value::from(i64::from(v))),
        "int4" => decode::<i32>(row, idx)?.map_or(Value::Null, |v| Value::from(i64::from(v))),
        "int8" => decode::<i64>(row, idx)?.map_or(Value::Null, Value::from),
        "float4" => decode::<f32>(row, idx)?.map_or(Value::Null, |v| Value::from(f64::from(v))),
        "float8" => decode::<f64>(row, idx)?.map_or(Value::Null, Value::from),
        "bool" => decode::<bool>(row, idx)?.map_or(Value::Null, Value::from),
        "timestamp" => {
            decode::<NaiveDateTime>(row, idx)?.map_or(Value::Null, |v| Value::from(v.to_string()))
        }
        "timestamptz" => {
            decode::<DateTime<Utc>>(row, idx)?.map_or(Value::Null, |v| Value::from(v.to_rfc3339()))
        }
        "date" => decode::<NaiveDate>(row, idx)?.map_or(Value::Null, |v| Value::from(v.to_string())),
        "json" | "jsonb" => decode::<Value>(row, idx)?.unwrap_or(Value::Null),
        "bytea" => decode::<Vec<u8>>(row, idx)?.map_or(Value::Null, |v| {
            // postgres hex text format
            let mut text = String::with_capacity(2 + v.len() * 2);
            text.push_str("\\x");
            for byte in v {
                text.push_str(&format!("{byte:02x}"));
            }
            Value::from(text)
        }),
        // text, varchar, char, name and anything else textual
        _ => decode::<String>(row, idx)?.map_or(Value::Null, Value::from),
    };
    Ok(value)
}
