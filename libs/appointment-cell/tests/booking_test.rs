use std::sync::Arc;

use assert_matches::assert_matches;

use appointment_cell::models::{AppointmentStatus, BookingRequest, SchedulingError};
use appointment_cell::services::BookingService;
use shared_database::{AppState, Database};
use shared_models::{AuthUser, Role};
use shared_utils::test_utils::{test_config, test_state, StubSymptomModel};
use triage_cell::TriageInput;

const PATIENT: AuthUser = AuthUser {
    id: 3,
    role: Role::Patient,
};
const DOCTOR: AuthUser = AuthUser {
    id: 1,
    role: Role::Doctor,
};

const SEED: &str = "
    INSERT INTO users (id, role, full_name) VALUES
        (1, 'doctor', 'Dr. Reyes'),
        (3, 'patient', 'Ana Lima'),
        (4, 'patient', 'Beto Cruz');
    INSERT INTO appointment_types
        (id, type_name, default_duration_minutes, requires_approved_files, created_at, updated_at)
    VALUES
        (10, 'standard', 30, 0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z'),
        (11, 'follow_up', 30, 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');
    INSERT INTO doctor_availability
        (doctor_id, day_of_week, start_time, end_time, created_at, updated_at)
    VALUES (1, 'monday', '09:00', '12:00', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');";

async fn seed(state: &Arc<AppState>) {
    state
        .db
        .call(|conn| conn.execute_batch(SEED))
        .await
        .expect("seed succeeds");
}

fn request(date_time: &str) -> BookingRequest {
    BookingRequest {
        doctor_id: 1,
        appointment_type_id: Some(10),
        doctor_specific_visit_type_id: None,
        date_time: date_time.to_string(),
        notes: None,
        triage: None,
    }
}

async fn outbox_count(state: &Arc<AppState>, event_type: &'static str) -> i64 {
    state
        .db
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM outbox_events WHERE event_type = ?1",
                [event_type],
                |row| row.get(0),
            )
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn books_a_pending_appointment_and_notifies_the_doctor() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    // Naive date-time is read as clinic-local wall-clock time.
    let booked = service
        .book(PATIENT, request("2027-01-04T10:00"))
        .await
        .unwrap();

    assert_eq!(booked.appointment.status, AppointmentStatus::Pending);
    assert_eq!(booked.appointment.duration_minutes, Some(30));
    assert_eq!(booked.appointment.patient_id, 3);
    assert!(booked.triage.is_none());
    assert_eq!(outbox_count(&state, "appointment_created").await, 1);
}

#[tokio::test]
async fn offset_date_times_are_normalized() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    // 07:00 UTC is 10:00 at the +03:00 clinic.
    let booked = service
        .book(PATIENT, request("2027-01-04T07:00:00+00:00"))
        .await
        .unwrap();

    let stored: String = state
        .db
        .call(move |conn| {
            conn.query_row(
                "SELECT start_time FROM appointments WHERE id = ?1",
                [booked.appointment.id],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
    assert_eq!(stored, "2027-01-04T07:00:00Z");
}

#[tokio::test]
async fn only_patients_can_book() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    let result = service.book(DOCTOR, request("2027-01-04T10:00")).await;

    assert_matches!(result, Err(SchedulingError::Forbidden(_)));
}

#[tokio::test]
async fn exactly_one_visit_type_selector_is_required() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    let mut both = request("2027-01-04T10:00");
    both.doctor_specific_visit_type_id = Some(20);
    assert_matches!(
        service.book(PATIENT, both).await,
        Err(SchedulingError::Validation(_))
    );

    let mut neither = request("2027-01-04T10:00");
    neither.appointment_type_id = None;
    assert_matches!(
        service.book(PATIENT, neither).await,
        Err(SchedulingError::Validation(_))
    );
}

#[tokio::test]
async fn unconfigured_visit_type_is_a_configuration_error() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    let mut unknown = request("2027-01-04T10:00");
    unknown.appointment_type_id = Some(99);
    assert_matches!(
        service.book(PATIENT, unknown).await,
        Err(SchedulingError::Configuration(_))
    );
}

#[tokio::test]
async fn rejects_times_outside_the_weekly_window() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    // Tuesday: no weekly row at all.
    assert_matches!(
        service.book(PATIENT, request("2027-01-05T10:00")).await,
        Err(SchedulingError::AvailabilityConflict(msg))
            if msg.contains("not available")
    );
    // Before the window opens.
    assert_matches!(
        service.book(PATIENT, request("2027-01-04T08:30")).await,
        Err(SchedulingError::AvailabilityConflict(msg))
            if msg.contains("outside")
    );
    // Starts inside but runs past the close.
    assert_matches!(
        service.book(PATIENT, request("2027-01-04T11:45")).await,
        Err(SchedulingError::AvailabilityConflict(msg))
            if msg.contains("exceeds")
    );
}

#[tokio::test]
async fn rejects_overlapping_bookings() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    service
        .book(PATIENT, request("2027-01-04T10:00"))
        .await
        .unwrap();

    // Same slot, different patient.
    let other = AuthUser {
        id: 4,
        role: Role::Patient,
    };
    assert_matches!(
        service.book(other, request("2027-01-04T10:00")).await,
        Err(SchedulingError::AvailabilityConflict(msg))
            if msg.contains("already booked")
    );
    // Half-overlapping is just as booked.
    assert_matches!(
        service.book(other, request("2027-01-04T10:15")).await,
        Err(SchedulingError::AvailabilityConflict(_))
    );
    // Back-to-back is fine.
    assert!(service.book(other, request("2027-01-04T10:30")).await.is_ok());
}

#[tokio::test]
async fn follow_up_booking_requires_approved_files() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    let mut follow_up = request("2027-01-04T10:00");
    follow_up.appointment_type_id = Some(11);

    // No open order with the doctor at all: blocked.
    assert_matches!(
        service.book(PATIENT, follow_up.clone()).await,
        Err(SchedulingError::StateConflict(msg)) if msg.contains("Follow-up")
    );

    // Open order with a file still pending review: blocked.
    state
        .db
        .call(|conn| {
            conn.execute_batch(
                "INSERT INTO clinical_orders (id, doctor_id, patient_id, status, created_at)
                 VALUES (50, 1, 3, 'open', '2026-01-01T00:00:00Z');
                 INSERT INTO record_files (order_id, patient_id, review_status, created_at)
                 VALUES (50, 3, 'pending', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .unwrap();
    assert_matches!(
        service.book(PATIENT, follow_up.clone()).await,
        Err(SchedulingError::StateConflict(_))
    );

    // Approving the file clears the gate.
    state
        .db
        .call(|conn| {
            conn.execute(
                "UPDATE record_files SET review_status = 'approved' WHERE order_id = 50",
                [],
            )
        })
        .await
        .unwrap();
    assert!(service.book(PATIENT, follow_up).await.is_ok());
}

#[tokio::test]
async fn triage_snapshot_is_stored_with_the_booking() {
    let state = test_state().await;
    seed(&state).await;
    let service = BookingService::new(&state);

    let mut with_triage = request("2027-01-04T10:00");
    with_triage.triage = Some(TriageInput {
        symptoms_text: Some("fever and a persistent cough for three days".to_string()),
        temperature_c: Some(39.6),
        bp_systolic: None,
        bp_diastolic: None,
        heart_rate: None,
    });

    let booked = service.book(PATIENT, with_triage).await.unwrap();

    let snapshot = booked.triage.expect("snapshot persisted");
    // 39.6 trips both temperature increments, floored at 4 with symptoms.
    assert_eq!(snapshot.score, 4);
    assert!(snapshot
        .missing_fields
        .iter()
        .any(|field| field == "heart_rate"));
    assert!(snapshot
        .missing_fields
        .iter()
        .any(|field| field == "bp_systolic"));
}

#[tokio::test]
async fn consumes_the_soonest_expiring_rebooking_token() {
    let state = test_state().await;
    seed(&state).await;
    state
        .db
        .call(|conn| {
            conn.execute_batch(
                "INSERT INTO rebooking_tokens
                     (id, patient_id, doctor_id, issued_at, expires_at, is_active)
                 VALUES
                     (70, 3, 1, '2026-12-01T00:00:00Z', '2028-01-20T00:00:00Z', 1),
                     (71, 3, 1, '2026-12-01T00:00:00Z', '2028-01-10T00:00:00Z', 1);",
            )
        })
        .await
        .unwrap();
    let service = BookingService::new(&state);

    let booked = service
        .book(PATIENT, request("2027-01-04T10:00"))
        .await
        .unwrap();

    let (is_active, consumed_appointment): (bool, Option<i64>) = state
        .db
        .call(|conn| {
            conn.query_row(
                "SELECT is_active, consumed_appointment_id FROM rebooking_tokens WHERE id = 71",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })
        .await
        .unwrap();
    assert!(!is_active);
    assert_eq!(consumed_appointment, Some(booked.appointment.id));

    // The later-expiring token is untouched, and the next booking takes it.
    let untouched: bool = state
        .db
        .call(|conn| {
            conn.query_row(
                "SELECT is_active FROM rebooking_tokens WHERE id = 70",
                [],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
    assert!(untouched);

    service
        .book(PATIENT, request("2027-01-04T11:00"))
        .await
        .unwrap();
    let remaining: i64 = state
        .db
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM rebooking_tokens WHERE is_active = 1",
                [],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn expired_tokens_are_never_consumed() {
    let state = test_state().await;
    seed(&state).await;
    state
        .db
        .call(|conn| {
            conn.execute(
                "INSERT INTO rebooking_tokens
                     (id, patient_id, doctor_id, issued_at, expires_at, is_active)
                 VALUES (72, 3, 1, '2026-01-01T00:00:00Z', '2026-02-01T00:00:00Z', 1)",
                [],
            )
        })
        .await
        .unwrap();
    let service = BookingService::new(&state);

    service
        .book(PATIENT, request("2027-01-04T10:00"))
        .await
        .unwrap();

    let (is_active, consumed_appointment): (bool, Option<i64>) = state
        .db
        .call(|conn| {
            conn.query_row(
                "SELECT is_active, consumed_appointment_id FROM rebooking_tokens WHERE id = 72",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })
        .await
        .unwrap();
    assert!(is_active);
    assert_eq!(consumed_appointment, None);
}

#[tokio::test]
async fn concurrent_overlapping_bookings_have_exactly_one_winner() {
    // A file-backed store so two independent connections contend for real.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.db");

    let db_a = Database::open(&path).await.unwrap();
    let db_b = Database::open(&path).await.unwrap();
    db_a.call(|conn| conn.execute_batch(SEED)).await.unwrap();

    let state_a = Arc::new(AppState::new(
        test_config(),
        db_a,
        Arc::new(StubSymptomModel(None)),
    ));
    let state_b = Arc::new(AppState::new(
        test_config(),
        db_b,
        Arc::new(StubSymptomModel(None)),
    ));

    let service_a = BookingService::new(&state_a);
    let service_b = BookingService::new(&state_b);

    let other = AuthUser {
        id: 4,
        role: Role::Patient,
    };
    let (first, second) = tokio::join!(
        service_a.book(PATIENT, request("2027-01-04T10:00")),
        service_b.book(other, request("2027-01-04T10:00")),
    );

    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one concurrent booking must win");
    let loser = if first.is_ok() { second } else { first };
    assert_matches!(loser, Err(SchedulingError::AvailabilityConflict(_)));

    let committed: i64 = state_a
        .db
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM appointments WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
    assert_eq!(committed, 1);
}
