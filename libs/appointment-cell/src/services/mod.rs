pub mod booking;
pub mod cascade;
pub mod clinical;
pub mod interval;
pub mod lifecycle;
pub mod slots;
pub mod urgent;

pub use booking::BookingService;
pub use cascade::{CascadeOutcome, CascadeService};
pub use clinical::{ClinicalRecordsService, FollowUpBlock};
pub use interval::{walk_slots, Interval};
pub use lifecycle::{LifecycleService, TransitionOutcome};
pub use slots::SlotService;
pub use urgent::UrgentRequestService;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::params;

use shared_database::{encode_ts, ts_from_sql};

use crate::models::{Appointment, AppointmentStatus};

pub(crate) const APPOINTMENT_COLUMNS: &str =
    "id, patient_id, doctor_id, appointment_type_id, doctor_visit_type_id, start_time, \
     duration_minutes, status, notes, created_at, updated_at";

pub(crate) fn appointment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    let status_raw: String = row.get(7)?;
    let status = AppointmentStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown appointment status {status_raw:?}").into(),
        )
    })?;
    Ok(Appointment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        doctor_id: row.get(2)?,
        appointment_type_id: row.get(3)?,
        doctor_visit_type_id: row.get(4)?,
        start_time: ts_from_sql(row.get(5)?)?,
        duration_minutes: row.get(6)?,
        status,
        notes: row.get(8)?,
        created_at: ts_from_sql(row.get(9)?)?,
        updated_at: ts_from_sql(row.get(10)?)?,
    })
}

/// Pending/confirmed appointments for the doctor whose start lies in
/// `[from, to)`, as blocking intervals sorted by start. Rows without a stored
/// duration fall back to `fallback_minutes`.
pub(crate) fn busy_intervals_for(
    conn: &rusqlite::Connection,
    doctor_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    fallback_minutes: i64,
) -> rusqlite::Result<Vec<Interval>> {
    let mut stmt = conn.prepare(
        "SELECT start_time, duration_minutes FROM appointments
         WHERE doctor_id = ?1 AND status IN ('pending', 'confirmed')
           AND start_time >= ?2 AND start_time < ?3
         ORDER BY start_time",
    )?;
    let rows = stmt.query_map(params![doctor_id, encode_ts(from), encode_ts(to)], |row| {
        let start = ts_from_sql(row.get(0)?)?;
        let minutes: Option<i64> = row.get(1)?;
        Ok((start, minutes))
    })?;

    let mut intervals = Vec::new();
    for row in rows {
        let (start, minutes) = row?;
        let end = start + Duration::minutes(minutes.unwrap_or(fallback_minutes));
        if let Some(interval) = Interval::new(start, end) {
            intervals.push(interval);
        }
    }
    Ok(intervals)
}

/// Interpret a clinic-local wall-clock time in the configured offset.
pub(crate) fn local_to_utc(offset: FixedOffset, local: NaiveDateTime) -> DateTime<Utc> {
    match offset.from_local_datetime(&local) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        // A fixed offset maps every wall-clock time exactly once.
        _ => DateTime::from_naive_utc_and_offset(local - offset, Utc),
    }
}

/// RFC 3339 in the clinic's offset, second precision.
pub(crate) fn iso_local(offset: FixedOffset, ts: DateTime<Utc>) -> String {
    ts.with_timezone(&offset)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}
