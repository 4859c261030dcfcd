use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sqlite::{encode_ts, Database};

/// A notification destined for the external delivery worker.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub event_type: String,
    pub actor_id: Option<i64>,
    pub recipient_id: Option<i64>,
    pub entity_type: String,
    pub entity_id: i64,
    pub route: Option<String>,
    pub payload: serde_json::Value,
}

/// Append-only writer for the notification outbox.
///
/// Delivery is somebody else's job; recording must never fail the operation
/// that triggered it, so every error ends here as a warning.
#[derive(Clone)]
pub struct OutboxService {
    db: Database,
}

impl OutboxService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn emit(&self, event: NotificationEvent) {
        let event_uuid = Uuid::new_v4().to_string();
        let created_at = encode_ts(Utc::now());
        let event_type = event.event_type.clone();
        let payload = event.payload.to_string();

        let result = self
            .db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO outbox_events
                     (event_uuid, event_type, actor_id, recipient_id, entity_type, entity_id, route, payload, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        event_uuid,
                        event.event_type,
                        event.actor_id,
                        event.recipient_id,
                        event.entity_type,
                        event.entity_id,
                        event.route,
                        payload,
                        created_at,
                    ],
                )
                .map(|_| ())
            })
            .await;

        match result {
            Ok(()) => debug!("Recorded notification event {}", event_type),
            Err(e) => warn!("Failed to record notification event {}: {}", event_type, e),
        }
    }
}
