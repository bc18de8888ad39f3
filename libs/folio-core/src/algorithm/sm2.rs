//! SM-2 spaced repetition algorithm.
//!
//! Based on SuperMemo 2. Review dates land on local midnight so that "due"
//! is decided per calendar day rather than per time of day.

use chrono::{DateTime, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::SchedulingResult;
use crate::error::ScheduleError;
use crate::types::{Quality, VocabularyCard, MINIMUM_EASE};

/// Interval after the first successful recall.
const FIRST_INTERVAL: u32 = 1;
/// Interval after the second successful recall.
const SECOND_INTERVAL: u32 = 6;
/// Interval after a failed recall.
const RELEARN_INTERVAL: u32 = 1;

/// Absorbs float noise from stored ease factors sitting exactly on the floor.
const EASE_EPSILON: f64 = 1e-9;

/// Compute the next review state for a card.
///
/// `now` carries the reader's UTC offset; the returned review date is local
/// midnight `interval` days after `now`'s calendar date.
pub fn schedule<Tz: TimeZone>(
    quality: Quality,
    repetitions: u32,
    ease_factor: f64,
    interval: u32,
    now: &DateTime<Tz>,
) -> Result<SchedulingResult, ScheduleError> {
    if !ease_factor.is_finite() || ease_factor < MINIMUM_EASE - EASE_EPSILON {
        return Err(ScheduleError::InvalidEaseFactor(ease_factor));
    }

    let (new_interval, new_repetitions) = if quality.is_pass() {
        let next = match repetitions {
            0 => FIRST_INTERVAL,
            1 => SECOND_INTERVAL,
            _ => (f64::from(interval) * ease_factor).round() as u32,
        };
        (next, repetitions.saturating_add(1))
    } else {
        (RELEARN_INTERVAL, 0)
    };

    Ok(SchedulingResult {
        next_review_at: local_midnight_after(now, new_interval),
        interval: new_interval,
        ease_factor: next_ease(ease_factor, quality),
        repetitions: new_repetitions,
    })
}

/// Schedule a stored card.
pub fn schedule_card<Tz: TimeZone>(
    card: &VocabularyCard,
    quality: Quality,
    now: &DateTime<Tz>,
) -> Result<SchedulingResult, ScheduleError> {
    schedule(quality, card.repetitions, card.ease_factor, card.interval, now)
}

fn next_ease(ease_factor: f64, quality: Quality) -> f64 {
    let miss = f64::from(Quality::MAX - quality.value());
    let ease = (ease_factor + (0.1 - miss * (0.08 + miss * 0.02))).max(MINIMUM_EASE);
    (ease * 100.0).round() / 100.0
}

fn local_midnight_after<Tz: TimeZone>(now: &DateTime<Tz>, days: u32) -> DateTime<Utc> {
    let date = now
        .date_naive()
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX);
    let midnight = date.and_time(NaiveTime::MIN);
    let tz = now.timezone();

    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // Midnight skipped by a DST jump: take the first instant of the day.
        LocalResult::None => first_instant_after(&tz, midnight),
    }
}

fn first_instant_after<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    (1..=3)
        .find_map(|hours| tz.from_local_datetime(&(local + Duration::hours(hours))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use pretty_assertions::assert_eq;

    fn q(value: u8) -> Quality {
        Quality::new(value).unwrap()
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 10, 15, 42, 7)
            .unwrap()
    }

    #[test]
    fn first_success_schedules_one_day() {
        let result = schedule(q(4), 0, 2.5, 0, &now()).unwrap();
        assert_eq!(result.interval, 1);
        assert_eq!(result.repetitions, 1);
    }

    #[test]
    fn second_success_schedules_six_days_regardless_of_ease() {
        for ease in [1.3, 2.5, 3.7] {
            let first = schedule(q(4), 0, ease, 0, &now()).unwrap();
            let second =
                schedule(q(4), first.repetitions, first.ease_factor, first.interval, &now()).unwrap();
            assert_eq!(first.interval, 1);
            assert_eq!(second.interval, 6);
            assert_eq!(second.repetitions, 2);
        }
    }

    #[test]
    fn later_success_multiplies_by_incoming_ease() {
        let result = schedule(q(5), 2, 2.5, 6, &now()).unwrap();
        assert_eq!(result.interval, 15);
        assert_eq!(result.ease_factor, 2.6);
        assert_eq!(result.repetitions, 3);
    }

    #[test]
    fn interval_rounds_to_nearest_day() {
        // 7 * 1.5 = 10.5 rounds up
        assert_eq!(schedule(q(4), 3, 1.5, 7, &now()).unwrap().interval, 11);
        // 6 * 1.3 = 7.8
        assert_eq!(schedule(q(4), 3, 1.3, 6, &now()).unwrap().interval, 8);
    }

    #[test]
    fn failure_resets_repetitions_and_interval() {
        let result = schedule(q(2), 7, 2.5, 40, &now()).unwrap();
        assert_eq!(result.interval, 1);
        assert_eq!(result.repetitions, 0);
        assert_eq!(result.ease_factor, 2.18);
    }

    #[test]
    fn ease_floor_holds_on_blackout() {
        let result = schedule(q(0), 3, 1.3, 5, &now()).unwrap();
        assert_eq!(result.interval, 1);
        assert_eq!(result.repetitions, 0);
        assert_eq!(result.ease_factor, 1.3);
    }

    #[test]
    fn ease_never_below_floor_for_any_quality() {
        for value in 0..=5 {
            for ease in [1.3, 1.31, 1.5, 2.0, 2.5] {
                let result = schedule(q(value), 2, ease, 3, &now()).unwrap();
                assert!(result.ease_factor >= MINIMUM_EASE, "q={value} ease={ease}");
            }
        }
    }

    #[test]
    fn ease_adjustment_by_quality() {
        assert_eq!(schedule(q(5), 0, 2.5, 0, &now()).unwrap().ease_factor, 2.6);
        assert_eq!(schedule(q(4), 0, 2.5, 0, &now()).unwrap().ease_factor, 2.5);
        assert_eq!(schedule(q(3), 0, 2.5, 0, &now()).unwrap().ease_factor, 2.36);
    }

    #[test]
    fn interval_is_monotonic_in_ease() {
        for interval in 1..40u32 {
            let mut previous = 0;
            for step in 0..50 {
                let ease = 1.3 + f64::from(step) * 0.05;
                let result = schedule(q(4), 2, ease, interval, &now()).unwrap();
                assert!(result.interval >= previous);
                previous = result.interval;
            }
        }
    }

    #[test]
    fn next_review_lands_on_local_midnight() {
        let result = schedule(q(4), 1, 2.5, 1, &now()).unwrap();
        let local = result.next_review_at.with_timezone(&now().timezone());
        assert_eq!(
            local.naive_local(),
            NaiveDate::from_ymd_opt(2024, 3, 16).unwrap().and_time(NaiveTime::MIN)
        );
    }

    #[test]
    fn rejects_ease_below_floor() {
        assert_eq!(
            schedule(q(4), 2, 1.2, 3, &now()),
            Err(ScheduleError::InvalidEaseFactor(1.2))
        );
        assert!(schedule(q(4), 2, f64::NAN, 3, &now()).is_err());
    }

    #[test]
    fn schedules_from_card_fields() {
        let mut card = VocabularyCard::new("ephemeral", "short-lived", Utc::now());
        card.repetitions = 1;
        card.interval = 1;
        let result = schedule_card(&card, q(5), &now()).unwrap();
        assert_eq!(result.interval, 6);
    }
}
