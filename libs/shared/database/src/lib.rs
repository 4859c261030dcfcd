pub mod outbox;
pub mod schema;
pub mod sqlite;
pub mod state;

pub use outbox::{NotificationEvent, OutboxService};
pub use sqlite::{encode_time, encode_ts, parse_ts, time_from_sql, ts_from_sql, Database};
pub use state::AppState;
