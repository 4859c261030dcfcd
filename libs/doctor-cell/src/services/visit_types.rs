use rusqlite::{params, OptionalExtension};
use tracing::debug;

use shared_database::{AppState, Database};

use crate::models::{CatalogEntry, DoctorError, ResolvedVisitType, VisitTypeCatalog, VisitTypeSelector};

/// Bookings longer than this would slip past the one-day overlap scan used
/// by the slot generator and the booking committer.
pub const MAX_APPOINTMENT_MINUTES: i64 = 24 * 60;

/// Duration resolution and the per-doctor visit-type catalog.
#[derive(Clone)]
pub struct VisitTypeService {
    db: Database,
}

impl VisitTypeService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    /// Resolve the effective appointment length for a doctor and selector.
    ///
    /// Shared catalog types honor the doctor's duration override when one
    /// exists; doctor-private types carry their own duration. The resolved
    /// value must be positive and at most a day.
    pub async fn resolve_duration(
        &self,
        doctor_id: i64,
        selector: VisitTypeSelector,
    ) -> Result<ResolvedVisitType, DoctorError> {
        if !selector.is_exactly_one() {
            return Err(DoctorError::Validation(
                "Provide exactly one of appointment_type_id or doctor_specific_visit_type_id."
                    .to_string(),
            ));
        }

        let resolved = if let Some(type_id) = selector.appointment_type_id {
            self.resolve_shared_type(doctor_id, type_id).await?
        } else if let Some(visit_type_id) = selector.doctor_visit_type_id {
            self.resolve_doctor_type(doctor_id, visit_type_id).await?
        } else {
            unreachable!("selector validated above");
        };

        if resolved.duration_minutes <= 0 || resolved.duration_minutes > MAX_APPOINTMENT_MINUTES {
            return Err(DoctorError::InvalidDuration(resolved.duration_minutes));
        }

        debug!(
            "Resolved visit type {:?} for doctor {} to {} minutes",
            resolved.type_name, doctor_id, resolved.duration_minutes
        );
        Ok(resolved)
    }

    async fn resolve_shared_type(
        &self,
        doctor_id: i64,
        type_id: i64,
    ) -> Result<ResolvedVisitType, DoctorError> {
        let row = self
            .db
            .call(move |conn| {
                let base = conn
                    .query_row(
                        "SELECT type_name, default_duration_minutes, requires_approved_files
                         FROM appointment_types WHERE id = ?1",
                        params![type_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, bool>(2)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((type_name, default_minutes, requires_approved_files)) = base else {
                    return Ok(None);
                };

                let override_minutes: Option<i64> = conn
                    .query_row(
                        "SELECT duration_minutes FROM doctor_appointment_types
                         WHERE doctor_id = ?1 AND appointment_type_id = ?2",
                        params![doctor_id, type_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                Ok(Some((
                    type_name,
                    override_minutes.unwrap_or(default_minutes),
                    requires_approved_files,
                )))
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        let (type_name, duration_minutes, requires_approved_files) =
            row.ok_or_else(|| DoctorError::NotConfigured("AppointmentType not found.".to_string()))?;

        Ok(ResolvedVisitType {
            duration_minutes,
            requires_approved_files,
            appointment_type_id: Some(type_id),
            doctor_visit_type_id: None,
            type_name,
        })
    }

    async fn resolve_doctor_type(
        &self,
        doctor_id: i64,
        visit_type_id: i64,
    ) -> Result<ResolvedVisitType, DoctorError> {
        let row = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT name, duration_minutes FROM doctor_visit_types
                     WHERE id = ?1 AND doctor_id = ?2",
                    params![visit_type_id, doctor_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))?;

        let (type_name, duration_minutes) = row.ok_or_else(|| {
            DoctorError::NotConfigured("Visit type not found for this doctor.".to_string())
        })?;

        Ok(ResolvedVisitType {
            duration_minutes,
            requires_approved_files: false,
            appointment_type_id: None,
            doctor_visit_type_id: Some(visit_type_id),
            type_name,
        })
    }

    /// Everything a patient can book with this doctor, shared catalog first.
    pub async fn catalog(&self, doctor_id: i64) -> Result<VisitTypeCatalog, DoctorError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT at.id, at.type_name, at.description,
                            COALESCE(dat.duration_minutes, at.default_duration_minutes),
                            at.requires_approved_files
                     FROM appointment_types at
                     LEFT JOIN doctor_appointment_types dat
                       ON dat.appointment_type_id = at.id AND dat.doctor_id = ?1
                     ORDER BY at.type_name",
                )?;
                let shared = stmt
                    .query_map(params![doctor_id], |row| {
                        Ok(CatalogEntry {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            duration_minutes: row.get(3)?,
                            requires_approved_files: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut stmt = conn.prepare(
                    "SELECT id, name, description, duration_minutes
                     FROM doctor_visit_types WHERE doctor_id = ?1
                     ORDER BY name",
                )?;
                let doctor_specific = stmt
                    .query_map(params![doctor_id], |row| {
                        Ok(CatalogEntry {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            duration_minutes: row.get(3)?,
                            requires_approved_files: false,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(VisitTypeCatalog {
                    shared,
                    doctor_specific,
                })
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }
}
