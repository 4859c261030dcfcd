use std::collections::HashMap;

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use tracing::debug;

use doctor_cell::models::{DayOfWeek, VisitTypeSelector};
use doctor_cell::services::{
    AbsenceService, AvailabilityService, DoctorService, VisitTypeService, MAX_APPOINTMENT_MINUTES,
};
use shared_database::{encode_time, AppState, Database};

use crate::models::{
    AvailabilityWindow, DaySlots, DaySlotsOutcome, RangeSlotsOutcome, SchedulingError, SlotQuery,
    SlotRangeQuery,
};
use crate::services::interval::{truncate_to_minute, walk_slots, Interval};
use crate::services::{busy_intervals_for, local_to_utc};

/// Bookable-slot generation for a single day or a bounded date range.
pub struct SlotService {
    db: Database,
    clinic_offset: FixedOffset,
    range_max_days: i64,
    doctors: DoctorService,
    availability: AvailabilityService,
    absences: AbsenceService,
    visit_types: VisitTypeService,
}

impl SlotService {
    pub fn new(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            clinic_offset: state.config.clinic_utc_offset,
            range_max_days: state.config.slot_range_max_days,
            doctors: DoctorService::new(state),
            availability: AvailabilityService::new(state),
            absences: AbsenceService::new(state),
            visit_types: VisitTypeService::new(state),
        }
    }

    pub async fn day_slots(
        &self,
        doctor_id: i64,
        query: SlotQuery,
    ) -> Result<DaySlotsOutcome, SchedulingError> {
        if !self.doctors.is_doctor(doctor_id).await? {
            return Err(SchedulingError::NotFound("Doctor not found.".to_string()));
        }
        let duration = self
            .resolve_slot_duration(doctor_id, query.appointment_type_id, query.duration_minutes)
            .await?;

        let day = DayOfWeek::from(query.date.weekday());
        let Some((start_t, end_t)) = self.availability.window_for_weekday(doctor_id, day).await?
        else {
            // No weekly row for this weekday: an empty day, not an error.
            return Ok(DaySlotsOutcome {
                duration_minutes: duration,
                availability: None,
                slots: Vec::new(),
            });
        };
        let window = AvailabilityWindow {
            start: encode_time(start_t),
            end: encode_time(end_t),
        };

        let mut window_start = local_to_utc(self.clinic_offset, query.date.and_time(start_t));
        let window_end = local_to_utc(self.clinic_offset, query.date.and_time(end_t));

        let now = Utc::now();
        let today_local = now.with_timezone(&self.clinic_offset).date_naive();
        if query.date == today_local && now > window_start {
            window_start = truncate_to_minute(now);
        }
        if window_start >= window_end {
            return Ok(DaySlotsOutcome {
                duration_minutes: duration,
                availability: Some(window),
                slots: Vec::new(),
            });
        }

        let busy = self
            .day_blocking_intervals(doctor_id, window_start, window_end, duration)
            .await?;
        let slots = self.walk_local(window_start, window_end, duration, &busy);

        debug!(
            "Generated {} slots for doctor {} on {}",
            slots.len(),
            doctor_id,
            query.date
        );
        Ok(DaySlotsOutcome {
            duration_minutes: duration,
            availability: Some(window),
            slots,
        })
    }

    pub async fn range_slots(
        &self,
        doctor_id: i64,
        query: SlotRangeQuery,
    ) -> Result<RangeSlotsOutcome, SchedulingError> {
        if !self.doctors.is_doctor(doctor_id).await? {
            return Err(SchedulingError::NotFound("Doctor not found.".to_string()));
        }
        let duration = self
            .resolve_slot_duration(doctor_id, query.appointment_type_id, query.duration_minutes)
            .await?;

        let now = Utc::now();
        let today_local = now.with_timezone(&self.clinic_offset).date_naive();
        let (from, to) = self.resolve_range(&query, today_local)?;
        if from > to {
            // The requested window lies entirely in the past.
            return Ok(RangeSlotsOutcome {
                duration_minutes: duration,
                from,
                to,
                days: Vec::new(),
            });
        }

        let weekly: Vec<(DayOfWeek, NaiveTime, NaiveTime)> = self
            .availability
            .list_for_doctor(doctor_id)
            .await?
            .into_iter()
            .map(|row| (row.day_of_week, row.start_time, row.end_time))
            .collect();

        // One fetch for the whole range, bucketed under every clinic-local
        // date the interval touches.
        let range_start = local_to_utc(self.clinic_offset, from.and_time(NaiveTime::MIN));
        let range_end =
            local_to_utc(self.clinic_offset, (to + Duration::days(1)).and_time(NaiveTime::MIN));
        let lookback = range_start - Duration::days(1);
        let fallback = duration;
        let mut all_busy = self
            .db
            .call(move |conn| busy_intervals_for(conn, doctor_id, lookback, range_end, fallback))
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;
        for absence in self
            .absences
            .overlapping(doctor_id, range_start, range_end)
            .await?
        {
            if let Some(interval) = Interval::new(absence.start_time, absence.end_time) {
                all_busy.push(interval);
            }
        }

        let mut buckets: HashMap<NaiveDate, Vec<Interval>> = HashMap::new();
        for interval in all_busy {
            let first = interval.start().with_timezone(&self.clinic_offset).date_naive();
            let last = interval.end().with_timezone(&self.clinic_offset).date_naive();
            let mut date = first;
            while date <= last {
                buckets.entry(date).or_default().push(interval);
                date += Duration::days(1);
            }
        }

        let mut days = Vec::new();
        let mut date = from;
        while date <= to {
            let weekday = DayOfWeek::from(date.weekday());
            let Some((start_t, end_t)) = weekly
                .iter()
                .find(|(day, _, _)| *day == weekday)
                .map(|(_, start, end)| (*start, *end))
            else {
                date += Duration::days(1);
                continue;
            };

            let mut window_start = local_to_utc(self.clinic_offset, date.and_time(start_t));
            let window_end = local_to_utc(self.clinic_offset, date.and_time(end_t));
            if date == today_local && now > window_start {
                window_start = truncate_to_minute(now);
            }

            if let Some(window) = Interval::new(window_start, window_end) {
                let mut busy: Vec<Interval> = buckets
                    .get(&date)
                    .map(|intervals| {
                        intervals
                            .iter()
                            .filter_map(|interval| interval.clip(&window))
                            .collect()
                    })
                    .unwrap_or_default();
                busy.sort_by_key(|interval| interval.start());

                let slots = self.walk_local(window_start, window_end, duration, &busy);
                if !slots.is_empty() {
                    days.push(DaySlots {
                        date,
                        availability: AvailabilityWindow {
                            start: encode_time(start_t),
                            end: encode_time(end_t),
                        },
                        slots,
                    });
                }
            }

            date += Duration::days(1);
        }

        debug!(
            "Generated slots for doctor {} across {} of {} requested days",
            doctor_id,
            days.len(),
            to.signed_duration_since(from).num_days() + 1
        );
        Ok(RangeSlotsOutcome {
            duration_minutes: duration,
            from,
            to,
            days,
        })
    }

    /// The shared catalog type must resolve for this doctor; an explicit
    /// `duration_minutes` in the query overrides the resolved value.
    async fn resolve_slot_duration(
        &self,
        doctor_id: i64,
        appointment_type_id: i64,
        requested: Option<i64>,
    ) -> Result<i64, SchedulingError> {
        let resolved = self
            .visit_types
            .resolve_duration(doctor_id, VisitTypeSelector::shared(appointment_type_id))
            .await?;
        match requested {
            Some(minutes) if minutes < 1 || minutes > MAX_APPOINTMENT_MINUTES => Err(
                SchedulingError::Validation("Invalid duration.".to_string()),
            ),
            Some(minutes) => Ok(minutes),
            None => Ok(resolved.duration_minutes),
        }
    }

    fn resolve_range(
        &self,
        query: &SlotRangeQuery,
        today: NaiveDate,
    ) -> Result<(NaiveDate, NaiveDate), SchedulingError> {
        match (query.days, query.from, query.to) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(SchedulingError::Validation(
                "Provide either days or from and to.".to_string(),
            )),
            (Some(days), None, None) => {
                if days < 1 {
                    return Err(SchedulingError::Validation("Invalid days.".to_string()));
                }
                if days > self.range_max_days {
                    return Err(SchedulingError::Validation(format!(
                        "Date range cannot exceed {} days.",
                        self.range_max_days
                    )));
                }
                Ok((today, today + Duration::days(days - 1)))
            }
            (None, Some(from), Some(to)) => {
                if from > to {
                    return Err(SchedulingError::Validation(
                        "from must be on or before to.".to_string(),
                    ));
                }
                let span = to.signed_duration_since(from).num_days() + 1;
                if span > self.range_max_days {
                    return Err(SchedulingError::Validation(format!(
                        "Date range cannot exceed {} days.",
                        self.range_max_days
                    )));
                }
                // Past days are never bookable; clamp rather than reject.
                Ok((from.max(today), to))
            }
            _ => Err(SchedulingError::Validation(
                "Provide either days or from and to.".to_string(),
            )),
        }
    }

    /// Appointments over a one-day lookback plus absences clipped to the
    /// window, sorted by start.
    async fn day_blocking_intervals(
        &self,
        doctor_id: i64,
        window_start: chrono::DateTime<Utc>,
        window_end: chrono::DateTime<Utc>,
        fallback_minutes: i64,
    ) -> Result<Vec<Interval>, SchedulingError> {
        let lookback = window_start - Duration::days(1);
        let mut busy = self
            .db
            .call(move |conn| {
                busy_intervals_for(conn, doctor_id, lookback, window_end, fallback_minutes)
            })
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        if let Some(window) = Interval::new(window_start, window_end) {
            for absence in self
                .absences
                .overlapping(doctor_id, window_start, window_end)
                .await?
            {
                if let Some(interval) = Interval::new(absence.start_time, absence.end_time)
                    .and_then(|interval| interval.clip(&window))
                {
                    busy.push(interval);
                }
            }
        }

        busy.sort_by_key(|interval| interval.start());
        Ok(busy)
    }

    fn walk_local(
        &self,
        window_start: chrono::DateTime<Utc>,
        window_end: chrono::DateTime<Utc>,
        duration: i64,
        busy: &[Interval],
    ) -> Vec<String> {
        walk_slots(window_start, window_end, Duration::minutes(duration), busy)
            .into_iter()
            .map(|slot| {
                slot.with_timezone(&self.clinic_offset)
                    .format("%H:%M")
                    .to_string()
            })
            .collect()
    }
}
