//! Conversion between `events`/`snapshots` rows and in-memory records.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Decode, Postgres, Row, Type, postgres::PgRow};

use crate::{AggregateId, DecodeError, Event, GlobalVersion, Snapshot, Version};

/// Expands to the column list every event query selects, in the order
/// [`decode_event`] reads them. A macro so queries can be built with `concat!`.
macro_rules! event_columns {
    () => {
        "seq, id, version, reason, aggregate_type, timestamp, data, metadata"
    };
}
pub(crate) use event_columns;

pub const EVENT_COLUMNS: &str = event_columns!();

fn column<'r, T>(row: &'r PgRow, index: usize, name: &'static str) -> Result<T, DecodeError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(index)
        .map_err(|source| DecodeError::Column {
            column: name,
            source,
        })
}

/// Formats a timestamp the way it is stored: RFC3339, whole seconds, `Z`.
pub fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a stored RFC3339 timestamp, normalizing it to UTC.
pub fn decode_timestamp(value: String) -> Result<DateTime<Utc>, DecodeError> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(timestamp) => Ok(timestamp.with_timezone(&Utc)),
        Err(source) => Err(DecodeError::Timestamp { value, source }),
    }
}

/// Decodes a row selected with [`EVENT_COLUMNS`].
pub fn decode_event(row: &PgRow) -> Result<Event, DecodeError> {
    let global_version: i64 = column(row, 0, "seq")?;
    let id: String = column(row, 1, "id")?;
    let version: i64 = column(row, 2, "version")?;
    let reason: String = column(row, 3, "reason")?;
    let aggregate_type: String = column(row, 4, "aggregate_type")?;
    let timestamp: String = column(row, 5, "timestamp")?;
    let data: Option<Vec<u8>> = column(row, 6, "data")?;
    let metadata: Option<Vec<u8>> = column(row, 7, "metadata")?;

    Ok(Event {
        aggregate_id: AggregateId::new(id),
        aggregate_type,
        version: Version::new(version),
        global_version: GlobalVersion::new(global_version),
        reason,
        timestamp: decode_timestamp(timestamp)?,
        data: data.unwrap_or_default(),
        metadata: metadata.unwrap_or_default(),
    })
}

/// Decodes a `(version, global_version, state)` snapshot row.
pub fn decode_snapshot(
    row: &PgRow,
    id: &AggregateId,
    aggregate_type: &str,
) -> Result<Snapshot, DecodeError> {
    let version: i64 = column(row, 0, "version")?;
    let global_version: i64 = column(row, 1, "global_version")?;
    let state: Option<Vec<u8>> = column(row, 2, "state")?;

    Ok(Snapshot {
        id: id.clone(),
        aggregate_type: aggregate_type.to_string(),
        version: Version::new(version),
        global_version: GlobalVersion::new(global_version),
        state: state.unwrap_or_default(),
    })
}
