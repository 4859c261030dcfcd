use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use shared_database::{encode_ts, ts_from_sql, AppState, Database};

use crate::models::{AbsenceKind, DoctorAbsence, DoctorError, UpdateAbsenceRequest};

/// Absolute time-off periods. Planned leave comes in through the CRUD
/// surface; emergency absences are written by the cancellation cascade.
#[derive(Clone)]
pub struct AbsenceService {
    db: Database,
}

fn absence_from_row(row: &Row<'_>) -> rusqlite::Result<DoctorAbsence> {
    let kind: String = row.get(4)?;
    let kind = AbsenceKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown absence kind: {kind}").into(),
        )
    })?;
    Ok(DoctorAbsence {
        id: row.get(0)?,
        doctor_id: row.get(1)?,
        start_time: ts_from_sql(row.get(2)?)?,
        end_time: ts_from_sql(row.get(3)?)?,
        kind,
        notes: row.get(5)?,
        created_at: ts_from_sql(row.get(6)?)?,
        updated_at: ts_from_sql(row.get(7)?)?,
    })
}

const ABSENCE_COLUMNS: &str =
    "id, doctor_id, start_time, end_time, kind, notes, created_at, updated_at";

impl AbsenceService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    pub async fn list(&self, doctor_filter: Option<i64>) -> Result<Vec<DoctorAbsence>, DoctorError> {
        self.db
            .call(move |conn| match doctor_filter {
                Some(doctor_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ABSENCE_COLUMNS} FROM doctor_absences
                         WHERE doctor_id = ?1 ORDER BY start_time"
                    ))?;
                    let rows = stmt
                        .query_map(params![doctor_id], absence_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>();
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {ABSENCE_COLUMNS} FROM doctor_absences ORDER BY start_time"
                    ))?;
                    let rows = stmt
                        .query_map([], absence_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>();
                    rows
                }
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    /// Absences touching the half-open window `[from, to)`.
    pub async fn overlapping(
        &self,
        doctor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DoctorAbsence>, DoctorError> {
        let from = encode_ts(from);
        let to = encode_ts(to);
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ABSENCE_COLUMNS} FROM doctor_absences
                     WHERE doctor_id = ?1 AND start_time < ?2 AND end_time > ?3
                     ORDER BY start_time"
                ))?;
                let rows = stmt
                    .query_map(params![doctor_id, to, from], absence_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    pub async fn create(
        &self,
        doctor_id: i64,
        kind: AbsenceKind,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<DoctorAbsence, DoctorError> {
        if start_time >= end_time {
            return Err(DoctorError::Validation(
                "start_time must be before end_time.".to_string(),
            ));
        }

        let now = encode_ts(Utc::now());
        let created = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO doctor_absences
                     (doctor_id, start_time, end_time, kind, notes, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        doctor_id,
                        encode_ts(start_time),
                        encode_ts(end_time),
                        kind.as_str(),
                        notes,
                        now,
                    ],
                )?;
                let id = conn.last_insert_rowid();
                conn.query_row(
                    &format!("SELECT {ABSENCE_COLUMNS} FROM doctor_absences WHERE id = ?1"),
                    params![id],
                    absence_from_row,
                )
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        debug!(
            "Created {} absence {} for doctor {}",
            created.kind.as_str(),
            created.id,
            doctor_id
        );
        Ok(created)
    }

    pub async fn get(&self, absence_id: i64) -> Result<Option<DoctorAbsence>, DoctorError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {ABSENCE_COLUMNS} FROM doctor_absences WHERE id = ?1"),
                    params![absence_id],
                    absence_from_row,
                )
                .optional()
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    pub async fn update(
        &self,
        absence_id: i64,
        request: UpdateAbsenceRequest,
    ) -> Result<DoctorAbsence, DoctorError> {
        let current = self
            .get(absence_id)
            .await?
            .ok_or_else(|| DoctorError::NotFound("Not found.".to_string()))?;

        let start = request.start_time.unwrap_or(current.start_time);
        let end = request.end_time.unwrap_or(current.end_time);
        if start >= end {
            return Err(DoctorError::Validation(
                "start_time must be before end_time.".to_string(),
            ));
        }
        let notes = match request.notes {
            Some(notes) => Some(notes),
            None => current.notes,
        };

        let now = encode_ts(Utc::now());
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE doctor_absences
                     SET start_time = ?1, end_time = ?2, notes = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![encode_ts(start), encode_ts(end), notes, now, absence_id],
                )?;
                conn.query_row(
                    &format!("SELECT {ABSENCE_COLUMNS} FROM doctor_absences WHERE id = ?1"),
                    params![absence_id],
                    absence_from_row,
                )
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    pub async fn delete(&self, absence_id: i64) -> Result<(), DoctorError> {
        let deleted = self
            .db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM doctor_absences WHERE id = ?1",
                    params![absence_id],
                )
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        if deleted == 0 {
            return Err(DoctorError::NotFound("Not found.".to_string()));
        }
        debug!("Deleted absence {absence_id}");
        Ok(())
    }
}
