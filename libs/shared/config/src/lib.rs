use std::env;

use chrono::FixedOffset;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub jwt_secret: String,
    /// Fixed UTC offset the clinic's wall clock runs on. Weekly availability
    /// rows and slot labels are expressed in this offset.
    pub clinic_utc_offset: FixedOffset,
    pub triage_engine: String,
    pub triage_model_url: String,
    pub triage_model_api_key: String,
    pub triage_model_timeout_s: u64,
    pub rebooking_token_validity_days: i64,
    pub slot_range_max_days: i64,
}

const DEFAULT_CLINIC_UTC_OFFSET: &str = "+03:00";

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_PATH not set, using ./clinic.db");
                    "./clinic.db".to_string()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            clinic_utc_offset: env::var("CLINIC_UTC_OFFSET")
                .ok()
                .and_then(|raw| {
                    let parsed = parse_utc_offset(&raw);
                    if parsed.is_none() {
                        warn!("CLINIC_UTC_OFFSET {:?} is not a valid +HH:MM offset, using {}", raw, DEFAULT_CLINIC_UTC_OFFSET);
                    }
                    parsed
                })
                .unwrap_or_else(default_clinic_offset),
            triage_engine: env::var("TRIAGE_ENGINE")
                .unwrap_or_else(|_| {
                    warn!("TRIAGE_ENGINE not set, using rules");
                    "rules".to_string()
                }),
            triage_model_url: env::var("TRIAGE_MODEL_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| {
                    warn!("TRIAGE_MODEL_URL not set, using empty value");
                    String::new()
                }),
            triage_model_api_key: env::var("TRIAGE_MODEL_API_KEY").unwrap_or_default(),
            triage_model_timeout_s: env_number("TRIAGE_MODEL_TIMEOUT_S", 20),
            rebooking_token_validity_days: env_number("REBOOKING_TOKEN_VALIDITY_DAYS", 14),
            slot_range_max_days: env_number("SLOT_RANGE_MAX_DAYS", 31),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_path.is_empty() && !self.jwt_secret.is_empty()
    }

    pub fn is_triage_model_configured(&self) -> bool {
        self.triage_engine == "model" && !self.triage_model_url.is_empty()
    }
}

fn default_clinic_offset() -> FixedOffset {
    // +03:00; east_opt only fails beyond +/-24h.
    FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

/// Parse a `+HH:MM` / `-HH:MM` offset string.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1i32, &raw[1..]),
        b'-' => (-1i32, &raw[1..]),
        _ => (1i32, raw),
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn env_number<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid number, using default", name);
            default
        }),
        Err(_) => default,
    }
}
