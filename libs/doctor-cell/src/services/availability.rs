use chrono::NaiveTime;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use shared_database::{encode_time, encode_ts, time_from_sql, ts_from_sql, AppState, Database};

use crate::models::{
    CreateAvailabilityRequest, DayOfWeek, DoctorAvailability, DoctorError, UpdateAvailabilityRequest,
};

/// Weekly recurring availability windows, one row per doctor and weekday.
#[derive(Clone)]
pub struct AvailabilityService {
    db: Database,
}

fn availability_from_row(row: &Row<'_>) -> rusqlite::Result<DoctorAvailability> {
    let day: String = row.get(1)?;
    let day_of_week = DayOfWeek::parse(&day).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown weekday: {day}").into(),
        )
    })?;
    Ok(DoctorAvailability {
        id: row.get(0)?,
        day_of_week,
        doctor_id: row.get(2)?,
        start_time: time_from_sql(row.get(3)?)?,
        end_time: time_from_sql(row.get(4)?)?,
        created_at: ts_from_sql(row.get(5)?)?,
        updated_at: ts_from_sql(row.get(6)?)?,
    })
}

const AVAILABILITY_COLUMNS: &str =
    "id, day_of_week, doctor_id, start_time, end_time, created_at, updated_at";

impl AvailabilityService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    pub async fn list_for_doctor(
        &self,
        doctor_id: i64,
    ) -> Result<Vec<DoctorAvailability>, DoctorError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {AVAILABILITY_COLUMNS} FROM doctor_availability
                     WHERE doctor_id = ?1 ORDER BY id"
                ))?;
                let rows = stmt
                    .query_map(params![doctor_id], availability_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    /// The doctor's working window on the given weekday, if any.
    pub async fn window_for_weekday(
        &self,
        doctor_id: i64,
        day: DayOfWeek,
    ) -> Result<Option<(NaiveTime, NaiveTime)>, DoctorError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT start_time, end_time FROM doctor_availability
                     WHERE doctor_id = ?1 AND day_of_week = ?2",
                    params![doctor_id, day.as_str()],
                    |row| {
                        Ok((
                            time_from_sql(row.get(0)?)?,
                            time_from_sql(row.get(1)?)?,
                        ))
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    pub async fn create(
        &self,
        doctor_id: i64,
        request: CreateAvailabilityRequest,
    ) -> Result<DoctorAvailability, DoctorError> {
        if request.start_time >= request.end_time {
            return Err(DoctorError::Validation(
                "start_time must be before end_time.".to_string(),
            ));
        }

        let now = encode_ts(Utc::now());
        let created = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO doctor_availability
                     (doctor_id, day_of_week, start_time, end_time, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![
                        doctor_id,
                        request.day_of_week.as_str(),
                        encode_time(request.start_time),
                        encode_time(request.end_time),
                        now,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                conn.query_row(
                    &format!("SELECT {AVAILABILITY_COLUMNS} FROM doctor_availability WHERE id = ?1"),
                    params![id],
                    availability_from_row,
                )
            })
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint failed") {
                    DoctorError::Conflict("Availability for this day already exists.".to_string())
                } else {
                    DoctorError::Database(msg)
                }
            })?;

        debug!(
            "Created availability {} for doctor {} on {}",
            created.id, doctor_id, created.day_of_week
        );
        Ok(created)
    }

    pub async fn update(
        &self,
        doctor_id: i64,
        availability_id: i64,
        request: UpdateAvailabilityRequest,
    ) -> Result<DoctorAvailability, DoctorError> {
        let current = self
            .db
            .call(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {AVAILABILITY_COLUMNS} FROM doctor_availability
                         WHERE id = ?1 AND doctor_id = ?2"
                    ),
                    params![availability_id, doctor_id],
                    availability_from_row,
                )
                .optional()
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?
            .ok_or_else(|| DoctorError::NotFound("Availability window not found.".to_string()))?;

        let start = request.start_time.unwrap_or(current.start_time);
        let end = request.end_time.unwrap_or(current.end_time);
        if start >= end {
            return Err(DoctorError::Validation(
                "start_time must be before end_time.".to_string(),
            ));
        }

        let now = encode_ts(Utc::now());
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE doctor_availability
                     SET start_time = ?1, end_time = ?2, updated_at = ?3
                     WHERE id = ?4 AND doctor_id = ?5",
                    params![
                        encode_time(start),
                        encode_time(end),
                        now,
                        availability_id,
                        doctor_id,
                    ],
                )?;
                conn.query_row(
                    &format!("SELECT {AVAILABILITY_COLUMNS} FROM doctor_availability WHERE id = ?1"),
                    params![availability_id],
                    availability_from_row,
                )
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    pub async fn delete(&self, doctor_id: i64, availability_id: i64) -> Result<(), DoctorError> {
        let deleted = self
            .db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM doctor_availability WHERE id = ?1 AND doctor_id = ?2",
                    params![availability_id, doctor_id],
                )
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        if deleted == 0 {
            return Err(DoctorError::NotFound(
                "Availability window not found.".to_string(),
            ));
        }
        debug!("Deleted availability {availability_id} for doctor {doctor_id}");
        Ok(())
    }
}
