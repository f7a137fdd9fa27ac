//! Timezone-aware digest scheduling.
//!
//! The dispatcher fires hourly; these helpers decide, per user, whether
//! their local "weekday + hour" matches their preference right now, and
//! which UTC week a send belongs to.
//!
//! Weekday convention: 0 = Monday … 6 = Sunday, matching the audit week
//! keyed on Mondays.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Whether `now_utc` falls in the user's preferred local send slot.
///
/// An unknown timezone never matches — a misconfigured row should not
/// spray emails at UTC-random hours.
pub fn should_send_now(
    timezone: &str,
    preferred_day: i16,
    preferred_hour: i16,
    now_utc: DateTime<Utc>,
) -> bool {
    let Ok(tz) = timezone.parse::<Tz>() else {
        warn!(
            subsystem = "digest",
            component = "schedule",
            timezone = %timezone,
            "Unknown timezone, skipping user"
        );
        return false;
    };

    let local = now_utc.with_timezone(&tz);
    let local_day = local.weekday().num_days_from_monday() as i16;
    let local_hour = local.hour() as i16;

    local_day == preferred_day && local_hour == preferred_hour
}

/// The Monday (UTC date) starting the week that contains `now_utc`.
pub fn week_start(now_utc: DateTime<Utc>) -> NaiveDate {
    let date = now_utc.date_naive();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// UTC window `[monday 00:00, next monday 00:00)` for the current week.
pub fn compute_window(now_utc: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_date = week_start(now_utc);
    let start = Utc
        .from_utc_datetime(&start_date.and_hms_opt(0, 0, 0).expect("midnight exists"));
    (start, start + Duration::days(7))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_tokyo_evening_slot_matches() {
        // 2025-09-10 is a Wednesday (day 2); 13:00 UTC = 22:00 in Tokyo.
        assert!(should_send_now("Asia/Tokyo", 2, 22, utc(2025, 9, 10, 13, 0)));
    }

    #[test]
    fn test_tokyo_one_hour_early_does_not_match() {
        // 12:00 UTC = 21:00 in Tokyo.
        assert!(!should_send_now("Asia/Tokyo", 2, 22, utc(2025, 9, 10, 12, 0)));
    }

    #[test]
    fn test_day_rollover_across_date_line() {
        // 23:00 UTC Tuesday = 08:00 Wednesday in Tokyo.
        assert!(should_send_now("Asia/Tokyo", 2, 8, utc(2025, 9, 9, 23, 0)));
        assert!(!should_send_now("Asia/Tokyo", 1, 8, utc(2025, 9, 9, 23, 0)));
    }

    #[test]
    fn test_negative_offset_zone() {
        // 03:00 UTC Saturday = 20:00 Friday in Los Angeles (UTC-7 in Sept).
        assert!(should_send_now(
            "America/Los_Angeles",
            4,
            20,
            utc(2025, 9, 6, 3, 0)
        ));
    }

    #[test]
    fn test_unknown_timezone_never_matches() {
        assert!(!should_send_now("Mars/Olympus_Mons", 2, 22, utc(2025, 9, 10, 13, 0)));
    }

    #[test]
    fn test_week_start_is_preceding_monday() {
        // Wednesday → that week's Monday
        assert_eq!(
            week_start(utc(2025, 9, 10, 13, 0)),
            NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
        );
    }

    #[test]
    fn test_week_start_on_monday_is_same_day() {
        assert_eq!(
            week_start(utc(2025, 9, 8, 0, 0)),
            NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
        );
    }

    #[test]
    fn test_week_start_on_sunday_is_previous_monday() {
        assert_eq!(
            week_start(utc(2025, 9, 14, 23, 59)),
            NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
        );
    }

    #[test]
    fn test_window_spans_seven_days() {
        let (start, end) = compute_window(utc(2025, 9, 10, 13, 0));
        assert_eq!(end - start, Duration::days(7));
        assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2025, 9, 8).unwrap());
        assert_eq!(start.hour(), 0);
    }
}
