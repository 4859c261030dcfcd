//! SQL schema for the clinic store.
//!
//! Applied at every open; idempotent thanks to `CREATE ... IF NOT EXISTS`.
//! Timestamps are fixed-width RFC 3339 UTC text (`encode_ts`), so string
//! comparison in SQL is chronological comparison. Times of day are `HH:MM`
//! clinic-local text.

pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

-- Identity mirror. Users are created by the external identity provider;
-- the engine only reads them to verify roles on booking targets.
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY,
    role       TEXT NOT NULL CHECK (role IN ('patient', 'doctor', 'admin')),
    full_name  TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS appointment_types (
    id                       INTEGER PRIMARY KEY,
    type_name                TEXT NOT NULL UNIQUE,
    description              TEXT,
    default_duration_minutes INTEGER NOT NULL DEFAULT 15 CHECK (default_duration_minutes >= 1),
    requires_approved_files  INTEGER NOT NULL DEFAULT 0,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL
);

-- Per-doctor duration override for a shared catalog type.
CREATE TABLE IF NOT EXISTS doctor_appointment_types (
    id                  INTEGER PRIMARY KEY,
    doctor_id           INTEGER NOT NULL REFERENCES users(id),
    appointment_type_id INTEGER NOT NULL REFERENCES appointment_types(id),
    duration_minutes    INTEGER NOT NULL CHECK (duration_minutes >= 1),
    UNIQUE (doctor_id, appointment_type_id)
);

-- Doctor-private visit types.
CREATE TABLE IF NOT EXISTS doctor_visit_types (
    id               INTEGER PRIMARY KEY,
    doctor_id        INTEGER NOT NULL REFERENCES users(id),
    name             TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes >= 1),
    description      TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (doctor_id, name)
);

-- Weekly availability template: one row per doctor and weekday.
CREATE TABLE IF NOT EXISTS doctor_availability (
    id          INTEGER PRIMARY KEY,
    doctor_id   INTEGER NOT NULL REFERENCES users(id),
    day_of_week TEXT NOT NULL CHECK (day_of_week IN
        ('monday','tuesday','wednesday','thursday','friday','saturday','sunday')),
    start_time  TEXT NOT NULL,
    end_time    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (doctor_id, day_of_week),
    CHECK (start_time < end_time)
);

CREATE TABLE IF NOT EXISTS doctor_absences (
    id         INTEGER PRIMARY KEY,
    doctor_id  INTEGER NOT NULL REFERENCES users(id),
    start_time TEXT NOT NULL,
    end_time   TEXT NOT NULL,
    kind       TEXT NOT NULL DEFAULT 'planned' CHECK (kind IN ('planned', 'emergency')),
    notes      TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (start_time < end_time)
);

-- Appointments are never deleted; status transitions are the only mutation.
-- Exactly one visit-type selector is set.
CREATE TABLE IF NOT EXISTS appointments (
    id                   INTEGER PRIMARY KEY,
    patient_id           INTEGER NOT NULL REFERENCES users(id),
    doctor_id            INTEGER NOT NULL REFERENCES users(id),
    appointment_type_id  INTEGER REFERENCES appointment_types(id),
    doctor_visit_type_id INTEGER REFERENCES doctor_visit_types(id),
    start_time           TEXT NOT NULL,
    duration_minutes     INTEGER CHECK (duration_minutes IS NULL OR duration_minutes >= 1),
    status               TEXT NOT NULL DEFAULT 'pending'
                         CHECK (status IN ('pending', 'confirmed', 'cancelled', 'no_show')),
    notes                TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,
    CHECK ((appointment_type_id IS NULL) != (doctor_visit_type_id IS NULL))
);

-- One triage snapshot per appointment; immutable once written.
CREATE TABLE IF NOT EXISTS triage_assessments (
    id             INTEGER PRIMARY KEY,
    appointment_id INTEGER NOT NULL UNIQUE REFERENCES appointments(id),
    patient_id     INTEGER NOT NULL REFERENCES users(id),
    symptoms_text  TEXT,
    temperature_c  REAL,
    bp_systolic    INTEGER,
    bp_diastolic   INTEGER,
    heart_rate     INTEGER,
    score          INTEGER NOT NULL CHECK (score BETWEEN 1 AND 10),
    confidence     INTEGER CHECK (confidence BETWEEN 0 AND 100),
    missing_fields TEXT NOT NULL DEFAULT '[]',
    score_version  TEXT NOT NULL DEFAULT 'triage_v1',
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS urgent_requests (
    id                       INTEGER PRIMARY KEY,
    patient_id               INTEGER NOT NULL REFERENCES users(id),
    doctor_id                INTEGER NOT NULL REFERENCES users(id),
    appointment_type_id      INTEGER NOT NULL REFERENCES appointment_types(id),
    symptoms_text            TEXT,
    temperature_c            REAL,
    bp_systolic              INTEGER,
    bp_diastolic             INTEGER,
    heart_rate               INTEGER,
    score                    INTEGER CHECK (score IS NULL OR score BETWEEN 1 AND 10),
    confidence               INTEGER CHECK (confidence IS NULL OR confidence BETWEEN 0 AND 100),
    missing_fields           TEXT NOT NULL DEFAULT '[]',
    score_version            TEXT,
    notes                    TEXT,
    status                   TEXT NOT NULL DEFAULT 'open'
                             CHECK (status IN ('open', 'handled', 'rejected', 'cancelled')),
    handled_type             TEXT CHECK (handled_type IS NULL OR handled_type IN ('scheduled', 'rejected')),
    handled_by               INTEGER REFERENCES users(id),
    rejected_reason          TEXT,
    scheduled_appointment_id INTEGER REFERENCES appointments(id),
    created_at               TEXT NOT NULL,
    handled_at               TEXT
);

-- Fairness credential issued by the emergency-absence cascade.
-- A consumed token is inactive forever.
CREATE TABLE IF NOT EXISTS rebooking_tokens (
    id                      INTEGER PRIMARY KEY,
    patient_id              INTEGER NOT NULL REFERENCES users(id),
    doctor_id               INTEGER NOT NULL REFERENCES users(id),
    absence_id              INTEGER REFERENCES doctor_absences(id),
    issued_at               TEXT NOT NULL,
    expires_at              TEXT NOT NULL,
    is_active               INTEGER NOT NULL DEFAULT 1,
    consumed_at             TEXT,
    consumed_appointment_id INTEGER REFERENCES appointments(id),
    CHECK (issued_at < expires_at),
    CHECK (consumed_at IS NULL OR is_active = 0)
);

-- Audit trail for cascade cancellations; re-running a cascade must not
-- duplicate rows.
CREATE TABLE IF NOT EXISTS absence_cancellation_logs (
    id             INTEGER PRIMARY KEY,
    absence_id     INTEGER NOT NULL REFERENCES doctor_absences(id),
    appointment_id INTEGER NOT NULL REFERENCES appointments(id),
    cancelled_at   TEXT NOT NULL,
    UNIQUE (absence_id, appointment_id)
);

-- Fire-and-forget notification sink. Append-only; an external worker drains it.
CREATE TABLE IF NOT EXISTS outbox_events (
    id           INTEGER PRIMARY KEY,
    event_uuid   TEXT NOT NULL UNIQUE,
    event_type   TEXT NOT NULL,
    actor_id     INTEGER,
    recipient_id INTEGER,
    entity_type  TEXT NOT NULL,
    entity_id    INTEGER NOT NULL,
    route        TEXT,
    payload      TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL
);

-- Clinical collaborator's tables, mirrored for the gate queries. The engine
-- only ever reads these outside of test setup.
CREATE TABLE IF NOT EXISTS clinical_orders (
    id             INTEGER PRIMARY KEY,
    doctor_id      INTEGER NOT NULL REFERENCES users(id),
    patient_id     INTEGER NOT NULL REFERENCES users(id),
    appointment_id INTEGER REFERENCES appointments(id),
    status         TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'closed')),
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS record_files (
    id            INTEGER PRIMARY KEY,
    order_id      INTEGER NOT NULL REFERENCES clinical_orders(id),
    patient_id    INTEGER NOT NULL REFERENCES users(id),
    review_status TEXT NOT NULL DEFAULT 'pending'
                  CHECK (review_status IN ('pending', 'approved', 'rejected')),
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prescriptions (
    id             INTEGER PRIMARY KEY,
    doctor_id      INTEGER NOT NULL REFERENCES users(id),
    patient_id     INTEGER NOT NULL REFERENCES users(id),
    appointment_id INTEGER REFERENCES appointments(id),
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS medication_adherence (
    id              INTEGER PRIMARY KEY,
    patient_id      INTEGER NOT NULL REFERENCES users(id),
    prescription_id INTEGER NOT NULL REFERENCES prescriptions(id),
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS appointments_doctor_idx
    ON appointments(doctor_id, status, start_time);
CREATE INDEX IF NOT EXISTS appointments_patient_idx
    ON appointments(patient_id, start_time);
CREATE INDEX IF NOT EXISTS absences_doctor_idx
    ON doctor_absences(doctor_id, start_time);
CREATE INDEX IF NOT EXISTS rebooking_tokens_lookup_idx
    ON rebooking_tokens(patient_id, doctor_id, is_active, expires_at);
CREATE INDEX IF NOT EXISTS urgent_requests_doctor_idx
    ON urgent_requests(doctor_id, status, created_at);
CREATE INDEX IF NOT EXISTS urgent_requests_patient_idx
    ON urgent_requests(patient_id, created_at);

PRAGMA user_version = 1;
";
