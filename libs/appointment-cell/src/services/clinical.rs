//! Query seam onto the clinical collaborator's tables. The engine only ever
//! reads these; writes happen elsewhere.

use rusqlite::{params, OptionalExtension};

use shared_database::{AppState, Database};

use crate::models::SchedulingError;

/// Why the follow-up gate blocks a booking or confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpBlock {
    /// No open order exists for the doctor/patient pair at all.
    NoOpenOrders,
    /// An open order has no uploaded files yet.
    MissingFiles { order_id: i64 },
    /// An open order has files awaiting review or rejected.
    UnapprovedFiles { order_id: i64 },
}

#[derive(Clone)]
pub struct ClinicalRecordsService {
    db: Database,
}

impl ClinicalRecordsService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    /// Booking-stage follow-up gate: the patient must have an open order with
    /// this doctor, and every open order needs at least one file with all of
    /// them approved.
    pub async fn booking_follow_up_block(
        &self,
        doctor_id: i64,
        patient_id: i64,
    ) -> Result<Option<FollowUpBlock>, SchedulingError> {
        match self.open_order_scan(doctor_id, patient_id).await? {
            OpenOrderScan::NoOrders => Ok(Some(FollowUpBlock::NoOpenOrders)),
            OpenOrderScan::Blocked(block) => Ok(Some(block)),
            OpenOrderScan::Clear => Ok(None),
        }
    }

    /// Confirm-stage follow-up gate. Unlike booking, a pair with no open
    /// orders passes: confirmation only audits orders that exist.
    pub async fn confirm_follow_up_block(
        &self,
        doctor_id: i64,
        patient_id: i64,
    ) -> Result<Option<FollowUpBlock>, SchedulingError> {
        match self.open_order_scan(doctor_id, patient_id).await? {
            OpenOrderScan::Blocked(block) => Ok(Some(block)),
            _ => Ok(None),
        }
    }

    /// Does a clinical order or prescription reference this appointment?
    pub async fn locks_cancellation(
        &self,
        appointment_id: i64,
    ) -> Result<bool, SchedulingError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT 1 WHERE EXISTS
                       (SELECT 1 FROM clinical_orders WHERE appointment_id = ?1)
                     OR EXISTS
                       (SELECT 1 FROM prescriptions WHERE appointment_id = ?1)",
                    params![appointment_id],
                    |_| Ok(()),
                )
                .optional()
                .map(|found| found.is_some())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))
    }

    /// As [`Self::locks_cancellation`], additionally counting adherence rows
    /// hanging off the appointment's prescriptions.
    pub async fn locks_no_show(&self, appointment_id: i64) -> Result<bool, SchedulingError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT 1 WHERE EXISTS
                       (SELECT 1 FROM clinical_orders WHERE appointment_id = ?1)
                     OR EXISTS
                       (SELECT 1 FROM prescriptions WHERE appointment_id = ?1)
                     OR EXISTS
                       (SELECT 1 FROM medication_adherence ma
                        JOIN prescriptions p ON p.id = ma.prescription_id
                        WHERE p.appointment_id = ?1)",
                    params![appointment_id],
                    |_| Ok(()),
                )
                .optional()
                .map(|found| found.is_some())
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))
    }

    async fn open_order_scan(
        &self,
        doctor_id: i64,
        patient_id: i64,
    ) -> Result<OpenOrderScan, SchedulingError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM clinical_orders
                     WHERE doctor_id = ?1 AND patient_id = ?2 AND status = 'open'
                     ORDER BY id",
                )?;
                let order_ids = stmt
                    .query_map(params![doctor_id, patient_id], |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                if order_ids.is_empty() {
                    return Ok(OpenOrderScan::NoOrders);
                }

                for order_id in order_ids {
                    let (total, approved): (i64, i64) = conn.query_row(
                        "SELECT COUNT(*),
                                COALESCE(SUM(CASE WHEN review_status = 'approved' THEN 1 ELSE 0 END), 0)
                         FROM record_files WHERE order_id = ?1",
                        params![order_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    if total == 0 {
                        return Ok(OpenOrderScan::Blocked(FollowUpBlock::MissingFiles {
                            order_id,
                        }));
                    }
                    if approved < total {
                        return Ok(OpenOrderScan::Blocked(FollowUpBlock::UnapprovedFiles {
                            order_id,
                        }));
                    }
                }

                Ok(OpenOrderScan::Clear)
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))
    }
}

enum OpenOrderScan {
    NoOrders,
    Blocked(FollowUpBlock),
    Clear,
}
