use std::sync::Arc;

use assert_matches::assert_matches;

use appointment_cell::models::{
    AppointmentStatus, CreateUrgentRequest, RejectUrgentRequest, ScheduleUrgentRequest,
    SchedulingError, UrgentHandledType, UrgentListQuery, UrgentRequestStatus,
};
use appointment_cell::services::UrgentRequestService;
use shared_database::AppState;
use shared_models::{AuthUser, Role};
use shared_utils::test_utils::test_state;
use triage_cell::TriageInput;

const DOCTOR: AuthUser = AuthUser {
    id: 1,
    role: Role::Doctor,
};
const OTHER_DOCTOR: AuthUser = AuthUser {
    id: 2,
    role: Role::Doctor,
};
const PATIENT: AuthUser = AuthUser {
    id: 3,
    role: Role::Patient,
};

async fn seed(state: &Arc<AppState>) {
    state
        .db
        .call(|conn| {
            conn.execute_batch(
                "INSERT INTO users (id, role, full_name) VALUES
                     (1, 'doctor', 'Dr. Reyes'),
                     (2, 'doctor', 'Dr. Okafor'),
                     (3, 'patient', 'Ana Lima');
                 INSERT INTO appointment_types
                     (id, type_name, default_duration_minutes, requires_approved_files,
                      created_at, updated_at)
                 VALUES (10, 'standard', 30, 0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');
                 INSERT INTO doctor_availability
                     (doctor_id, day_of_week, start_time, end_time, created_at, updated_at)
                 VALUES (1, 'monday', '09:00', '12:00', '2026-01-01T00:00:00Z',
                         '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
}

fn feverish() -> CreateUrgentRequest {
    CreateUrgentRequest {
        doctor_id: 1,
        appointment_type_id: 10,
        notes: Some("needs a same-week slot".to_string()),
        triage: Some(TriageInput {
            symptoms_text: Some("high fever and dizziness since last night".to_string()),
            temperature_c: Some(39.6),
            bp_systolic: None,
            bp_diastolic: None,
            heart_rate: None,
        }),
    }
}

#[tokio::test]
async fn patient_raises_an_urgent_request_with_a_triage_score() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);

    let created = service.create(PATIENT, feverish()).await.unwrap();

    assert_eq!(created.status, UrgentRequestStatus::Open);
    assert_eq!(created.score, Some(4));
    assert_eq!(created.patient_id, 3);
    assert!(created.handled_by.is_none());

    let notified: i64 = state
        .db
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM outbox_events WHERE event_type = 'urgent_request_created'",
                [],
                |row| row.get(0),
            )
        })
        .await
        .unwrap();
    assert_eq!(notified, 1);
}

#[tokio::test]
async fn creation_validates_caller_doctor_and_type() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);

    assert_matches!(
        service.create(DOCTOR, feverish()).await,
        Err(SchedulingError::Forbidden(_))
    );

    let mut unknown_doctor = feverish();
    unknown_doctor.doctor_id = 99;
    assert_matches!(
        service.create(PATIENT, unknown_doctor).await,
        Err(SchedulingError::NotFound(_))
    );

    let mut unknown_type = feverish();
    unknown_type.appointment_type_id = 99;
    assert_matches!(
        service.create(PATIENT, unknown_type).await,
        Err(SchedulingError::Configuration(_))
    );
}

#[tokio::test]
async fn doctor_queue_defaults_to_open_requests() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);
    let created = service.create(PATIENT, feverish()).await.unwrap();

    let queue = service
        .list_for_caller(DOCTOR, UrgentListQuery::default())
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, created.id);

    // Another doctor's queue is empty.
    assert!(service
        .list_for_caller(OTHER_DOCTOR, UrgentListQuery::default())
        .await
        .unwrap()
        .is_empty());

    service
        .reject(DOCTOR, created.id, RejectUrgentRequest::default())
        .await
        .unwrap();

    // Resolved requests leave the default queue but stay under status=all,
    // and the patient keeps seeing their own either way.
    assert!(service
        .list_for_caller(DOCTOR, UrgentListQuery::default())
        .await
        .unwrap()
        .is_empty());
    let all = service
        .list_for_caller(
            DOCTOR,
            UrgentListQuery {
                status: Some("all".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    let own = service
        .list_for_caller(PATIENT, UrgentListQuery::default())
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].status, UrgentRequestStatus::Rejected);
}

#[tokio::test]
async fn rejection_records_the_reason_and_is_final() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);
    let created = service.create(PATIENT, feverish()).await.unwrap();

    // Only the targeted doctor (or an admin) may resolve it.
    assert_matches!(
        service
            .reject(OTHER_DOCTOR, created.id, RejectUrgentRequest::default())
            .await,
        Err(SchedulingError::NotFound(_))
    );

    let rejected = service
        .reject(
            DOCTOR,
            created.id,
            RejectUrgentRequest {
                reason: Some("please use the regular booking flow".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, UrgentRequestStatus::Rejected);
    assert_eq!(rejected.handled_type, Some(UrgentHandledType::Rejected));
    assert_eq!(rejected.handled_by, Some(DOCTOR.id));
    assert!(rejected.rejected_reason.is_some());

    assert_matches!(
        service
            .reject(DOCTOR, created.id, RejectUrgentRequest::default())
            .await,
        Err(SchedulingError::StateConflict(_))
    );
}

#[tokio::test]
async fn scheduling_turns_the_request_into_a_confirmed_appointment() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);
    let created = service.create(PATIENT, feverish()).await.unwrap();

    let (updated, booked) = service
        .schedule(
            DOCTOR,
            created.id,
            ScheduleUrgentRequest {
                date_time: "2027-01-04T10:00".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, UrgentRequestStatus::Handled);
    assert_eq!(updated.handled_type, Some(UrgentHandledType::Scheduled));
    assert_eq!(updated.scheduled_appointment_id, Some(booked.appointment.id));
    assert_eq!(booked.appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(booked.appointment.patient_id, PATIENT.id);

    // The stored snapshot rides along instead of a fresh assessment.
    let snapshot = booked.triage.expect("snapshot carried over");
    assert_eq!(snapshot.score, 4);

    assert_matches!(
        service
            .schedule(
                DOCTOR,
                created.id,
                ScheduleUrgentRequest {
                    date_time: "2027-01-04T11:00".to_string(),
                },
            )
            .await,
        Err(SchedulingError::StateConflict(_))
    );
}

#[tokio::test]
async fn scheduling_still_honors_the_availability_window() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);
    let created = service.create(PATIENT, feverish()).await.unwrap();

    // Tuesday: no weekly window.
    assert_matches!(
        service
            .schedule(
                DOCTOR,
                created.id,
                ScheduleUrgentRequest {
                    date_time: "2027-01-05T10:00".to_string(),
                },
            )
            .await,
        Err(SchedulingError::AvailabilityConflict(_))
    );

    // The failed attempt must leave the request open for another try.
    let queue = service
        .list_for_caller(DOCTOR, UrgentListQuery::default())
        .await
        .unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, UrgentRequestStatus::Open);
}

#[tokio::test]
async fn patients_can_withdraw_their_own_open_requests() {
    let state = test_state().await;
    seed(&state).await;
    let service = UrgentRequestService::new(&state);
    let created = service.create(PATIENT, feverish()).await.unwrap();

    // The doctor cannot use the patient's withdrawal surface.
    assert_matches!(
        service.cancel(DOCTOR, created.id).await,
        Err(SchedulingError::NotFound(_))
    );

    let cancelled = service.cancel(PATIENT, created.id).await.unwrap();
    assert_eq!(cancelled.status, UrgentRequestStatus::Cancelled);

    assert_matches!(
        service.cancel(PATIENT, created.id).await,
        Err(SchedulingError::StateConflict(_))
    );
}
