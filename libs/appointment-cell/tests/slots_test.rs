use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use appointment_cell::models::{SchedulingError, SlotQuery, SlotRangeQuery};
use appointment_cell::services::SlotService;
use shared_database::AppState;
use shared_utils::test_utils::test_state;

// 2027-01-04 is a Monday. The clinic clock runs at +03:00 in tests, so the
// 09:00-12:00 local window is 06:00-09:00 UTC.
const MONDAY: &str = "2027-01-04";

async fn seed_schedule(state: &Arc<AppState>) {
    state
        .db
        .call(|conn| {
            conn.execute_batch(
                "INSERT INTO users (id, role, full_name) VALUES
                     (1, 'doctor', 'Dr. Reyes'),
                     (3, 'patient', 'Ana Lima');
                 INSERT INTO appointment_types
                     (id, type_name, default_duration_minutes, requires_approved_files, created_at, updated_at)
                 VALUES (10, 'standard', 30, 0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');
                 INSERT INTO doctor_availability
                     (doctor_id, day_of_week, start_time, end_time, created_at, updated_at)
                 VALUES (1, 'monday', '09:00', '12:00', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
}

fn day_query(date: &str) -> SlotQuery {
    SlotQuery {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        appointment_type_id: 10,
        duration_minutes: None,
    }
}

#[tokio::test]
async fn unbooked_monday_yields_the_full_slot_grid() {
    let state = test_state().await;
    seed_schedule(&state).await;
    let service = SlotService::new(&state);

    let outcome = service.day_slots(1, day_query(MONDAY)).await.unwrap();

    assert_eq!(outcome.duration_minutes, 30);
    let window = outcome.availability.expect("weekly window exists");
    assert_eq!(window.start, "09:00");
    assert_eq!(window.end, "12:00");
    assert_eq!(
        outcome.slots,
        vec!["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"]
    );
}

#[tokio::test]
async fn weekday_without_availability_yields_no_slots() {
    let state = test_state().await;
    seed_schedule(&state).await;
    let service = SlotService::new(&state);

    // 2027-01-05 is a Tuesday; the doctor only works Mondays.
    let outcome = service.day_slots(1, day_query("2027-01-05")).await.unwrap();

    assert!(outcome.availability.is_none());
    assert!(outcome.slots.is_empty());
}

#[tokio::test]
async fn booked_slot_disappears_and_neighbors_remain() {
    let state = test_state().await;
    seed_schedule(&state).await;
    state
        .db
        .call(|conn| {
            // 10:00-10:30 clinic-local, confirmed.
            conn.execute_batch(
                "INSERT INTO appointments
                     (patient_id, doctor_id, appointment_type_id, start_time, duration_minutes,
                      status, created_at, updated_at)
                 VALUES (3, 1, 10, '2027-01-04T07:00:00Z', 30, 'confirmed',
                         '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
    let service = SlotService::new(&state);

    let outcome = service.day_slots(1, day_query(MONDAY)).await.unwrap();

    assert!(!outcome.slots.contains(&"10:00".to_string()));
    assert!(outcome.slots.contains(&"09:30".to_string()));
    assert!(outcome.slots.contains(&"10:30".to_string()));
}

#[tokio::test]
async fn cancelled_appointments_do_not_block() {
    let state = test_state().await;
    seed_schedule(&state).await;
    state
        .db
        .call(|conn| {
            conn.execute_batch(
                "INSERT INTO appointments
                     (patient_id, doctor_id, appointment_type_id, start_time, duration_minutes,
                      status, created_at, updated_at)
                 VALUES (3, 1, 10, '2027-01-04T07:00:00Z', 30, 'cancelled',
                         '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
    let service = SlotService::new(&state);

    let outcome = service.day_slots(1, day_query(MONDAY)).await.unwrap();

    assert!(outcome.slots.contains(&"10:00".to_string()));
}

#[tokio::test]
async fn absence_blocks_its_whole_window() {
    let state = test_state().await;
    seed_schedule(&state).await;
    state
        .db
        .call(|conn| {
            // 09:00-11:00 clinic-local.
            conn.execute_batch(
                "INSERT INTO doctor_absences
                     (doctor_id, start_time, end_time, kind, created_at, updated_at)
                 VALUES (1, '2027-01-04T06:00:00Z', '2027-01-04T08:00:00Z', 'planned',
                         '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
    let service = SlotService::new(&state);

    let outcome = service.day_slots(1, day_query(MONDAY)).await.unwrap();

    assert_eq!(outcome.slots, vec!["11:00", "11:30"]);
}

#[tokio::test]
async fn no_slot_overlaps_any_blocking_interval() {
    let state = test_state().await;
    seed_schedule(&state).await;
    state
        .db
        .call(|conn| {
            // An awkward 09:20-09:50 local blocker plus a 11:10-11:40 one.
            conn.execute_batch(
                "INSERT INTO appointments
                     (patient_id, doctor_id, appointment_type_id, start_time, duration_minutes,
                      status, created_at, updated_at)
                 VALUES
                     (3, 1, 10, '2027-01-04T06:20:00Z', 30, 'pending',
                      '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z'),
                     (3, 1, 10, '2027-01-04T08:10:00Z', 30, 'confirmed',
                      '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
    let service = SlotService::new(&state);

    let outcome = service.day_slots(1, day_query(MONDAY)).await.unwrap();

    let blockers = [("09:20", "09:50"), ("11:10", "11:40")];
    for slot in &outcome.slots {
        let slot_end = {
            let (h, m) = slot.split_once(':').unwrap();
            let minutes = h.parse::<u32>().unwrap() * 60 + m.parse::<u32>().unwrap() + 30;
            format!("{:02}:{:02}", minutes / 60, minutes % 60)
        };
        for (b_start, b_end) in blockers {
            assert!(
                slot.as_str() >= b_end || slot_end.as_str() <= b_start,
                "slot {slot} overlaps blocker {b_start}-{b_end}"
            );
        }
    }
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let state = test_state().await;
    seed_schedule(&state).await;
    let service = SlotService::new(&state);

    let result = service.day_slots(99, day_query(MONDAY)).await;

    assert_matches!(result, Err(SchedulingError::NotFound(_)));
}

fn range_query(from: &str, to: &str) -> SlotRangeQuery {
    SlotRangeQuery {
        appointment_type_id: 10,
        from: Some(NaiveDate::parse_from_str(from, "%Y-%m-%d").unwrap()),
        to: Some(NaiveDate::parse_from_str(to, "%Y-%m-%d").unwrap()),
        days: None,
        duration_minutes: None,
    }
}

#[tokio::test]
async fn range_omits_days_without_slots() {
    let state = test_state().await;
    seed_schedule(&state).await;
    let service = SlotService::new(&state);

    // Monday through Wednesday; only Monday has a weekly row.
    let outcome = service
        .range_slots(1, range_query("2027-01-04", "2027-01-06"))
        .await
        .unwrap();

    assert_eq!(outcome.days.len(), 1);
    assert_eq!(
        outcome.days[0].date,
        NaiveDate::parse_from_str(MONDAY, "%Y-%m-%d").unwrap()
    );
    assert_eq!(outcome.days[0].slots.len(), 6);
}

#[tokio::test]
async fn cross_midnight_absence_lands_on_both_days() {
    let state = test_state().await;
    seed_schedule(&state).await;
    state
        .db
        .call(|conn| {
            conn.execute_batch(
                "INSERT INTO doctor_availability
                     (doctor_id, day_of_week, start_time, end_time, created_at, updated_at)
                 VALUES (1, 'tuesday', '09:00', '12:00', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');
                 -- Monday 23:00 local through Tuesday 09:30 local.
                 INSERT INTO doctor_absences
                     (doctor_id, start_time, end_time, kind, created_at, updated_at)
                 VALUES (1, '2027-01-04T20:00:00Z', '2027-01-05T06:30:00Z', 'planned',
                         '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z');",
            )
        })
        .await
        .expect("seed succeeds");
    let service = SlotService::new(&state);

    let outcome = service
        .range_slots(1, range_query("2027-01-04", "2027-01-05"))
        .await
        .unwrap();

    assert_eq!(outcome.days.len(), 2);
    // Monday is untouched: the absence starts after the window closes.
    assert_eq!(outcome.days[0].slots.len(), 6);
    // Tuesday loses its first half hour.
    assert_eq!(outcome.days[1].slots[0], "09:30");
    assert_eq!(outcome.days[1].slots.len(), 5);
}

#[tokio::test]
async fn range_accepts_exactly_one_form() {
    let state = test_state().await;
    seed_schedule(&state).await;
    let service = SlotService::new(&state);

    let both = SlotRangeQuery {
        appointment_type_id: 10,
        from: Some(NaiveDate::parse_from_str(MONDAY, "%Y-%m-%d").unwrap()),
        to: None,
        days: Some(7),
        duration_minutes: None,
    };
    assert_matches!(
        service.range_slots(1, both).await,
        Err(SchedulingError::Validation(_))
    );

    let neither = SlotRangeQuery {
        appointment_type_id: 10,
        from: None,
        to: None,
        days: None,
        duration_minutes: None,
    };
    assert_matches!(
        service.range_slots(1, neither).await,
        Err(SchedulingError::Validation(_))
    );
}

#[tokio::test]
async fn range_caps_the_span() {
    let state = test_state().await;
    seed_schedule(&state).await;
    let service = SlotService::new(&state);

    // 32 days inclusive.
    let result = service
        .range_slots(1, range_query("2027-01-04", "2027-02-04"))
        .await;

    assert_matches!(result, Err(SchedulingError::Validation(msg)) if msg.contains("31"));
}
