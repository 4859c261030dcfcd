use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};

use crate::schema::SCHEMA;

/// Handle to the clinic store, backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted and all calls
/// against one handle are serialized onto its worker thread. Cross-process
/// writers are serialized by immediate-mode transactions (see the booking
/// committer and the absence cascade).
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the store at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .context("failed to open sqlite database")?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// In-memory store for tests. Each call yields an independent database.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .context("failed to open in-memory sqlite database")?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        self.call(|conn| conn.execute_batch(SCHEMA))
            .await
            .context("failed to apply schema")
    }

    /// Run `f` against the underlying connection on its worker thread.
    ///
    /// The closure gets the raw `rusqlite` connection, so services can open
    /// transactions with whatever behavior the operation needs.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(move |conn| f(conn).map_err(tokio_rusqlite::Error::from))
            .await
            .map_err(anyhow::Error::from)
    }
}

/// Encode a UTC instant as fixed-width RFC 3339 (`2026-08-23T09:00:00Z`).
///
/// Second precision, always `Z`: lexicographic order on the stored text is
/// chronological order, which the overlap queries rely on.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp {raw:?}"))
}

/// Variant of [`parse_ts`] usable inside a `rusqlite` row-mapping closure.
pub fn ts_from_sql(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Encode a clinic-local wall-clock time as `HH:MM`.
pub fn encode_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Variant of time-of-day parsing usable inside a row-mapping closure.
/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn time_from_sql(raw: String) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamp_encoding_is_fixed_width_and_ordered() {
        let early = Utc.with_ymd_and_hms(2026, 8, 23, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 8, 23, 10, 30, 0).unwrap();
        let a = encode_ts(early);
        let b = encode_ts(late);
        assert_eq!(a, "2026-08-23T09:00:00Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_ts(&a).unwrap(), early);
    }

    #[test]
    fn time_of_day_round_trips() {
        let nine_thirty = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert_eq!(encode_time(nine_thirty), "09:30");
        assert_eq!(time_from_sql("09:30".to_string()).unwrap(), nine_thirty);
        assert_eq!(time_from_sql("09:30:00".to_string()).unwrap(), nine_thirty);
        assert!(time_from_sql("not a time".to_string()).is_err());
    }
}
