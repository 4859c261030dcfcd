use rusqlite::{params, OptionalExtension};

use shared_database::{AppState, Database};
use shared_models::Role;

use crate::models::{DoctorError, UserAccount};

/// Read access to the identity mirror; the engine never writes users.
#[derive(Clone)]
pub struct DoctorService {
    db: Database,
}

impl DoctorService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
        }
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, DoctorError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, role, full_name FROM users WHERE id = ?1",
                    params![user_id],
                    |row| {
                        let role_raw: String = row.get(1)?;
                        let role = Role::parse(&role_raw).ok_or_else(|| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                rusqlite::types::Type::Text,
                                format!("unknown role {role_raw:?}").into(),
                            )
                        })?;
                        Ok(UserAccount {
                            id: row.get(0)?,
                            role,
                            full_name: row.get(2)?,
                        })
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }

    /// Does `doctor_id` name an actual doctor account?
    pub async fn is_doctor(&self, doctor_id: i64) -> Result<bool, DoctorError> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT 1 FROM users WHERE id = ?1 AND role = 'doctor'",
                    params![doctor_id],
                    |_| Ok(()),
                )
                .optional()
                .map(|found| found.is_some())
            })
            .await
            .map_err(|e| DoctorError::Database(e.to_string()))
    }
}
