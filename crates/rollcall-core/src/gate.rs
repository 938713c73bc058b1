//! Attendance gate — duplicate-event suppression.
//!
//! Pure admission check: all state (the identity's last recorded event
//! time) is supplied by the caller from the external attendance store.

use chrono::{DateTime, Duration, Utc};

/// Cooldown semantics. Both variants exist in the field: a rolling window
/// ("no second event within N hours") and a calendar-day reset ("one event
/// per local day, resetting at midnight"). The policy is injected
/// explicitly; nothing in the core hardcodes either interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownPolicy {
    Rolling(Duration),
    CalendarDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Admit,
    DenyAlreadyMarked,
}

/// Decide whether a new attendance event may be recorded for `identity_id`
/// at `now`, given the identity's last recorded event time.
pub fn admit(
    identity_id: &str,
    now: DateTime<Utc>,
    last_event_time: Option<DateTime<Utc>>,
    policy: &CooldownPolicy,
) -> AdmitDecision {
    let Some(last) = last_event_time else {
        return AdmitDecision::Admit;
    };

    let admitted = match policy {
        CooldownPolicy::Rolling(cooldown) => now.signed_duration_since(last) >= *cooldown,
        CooldownPolicy::CalendarDay => now.date_naive() > last.date_naive(),
    };

    if admitted {
        AdmitDecision::Admit
    } else {
        tracing::debug!(identity_id, %last, "attendance already marked within cooldown");
        AdmitDecision::DenyAlreadyMarked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_no_prior_event_admits() {
        let now = at("2025-09-28 10:00:00");
        assert_eq!(
            admit("s1", now, None, &CooldownPolicy::Rolling(Duration::hours(24))),
            AdmitDecision::Admit
        );
        assert_eq!(
            admit("s1", now, None, &CooldownPolicy::CalendarDay),
            AdmitDecision::Admit
        );
    }

    #[test]
    fn test_rolling_inside_window_denies() {
        let now = at("2025-09-28 10:00:00");
        let last = at("2025-09-28 09:59:00"); // one minute ago
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::Rolling(Duration::hours(24))),
            AdmitDecision::DenyAlreadyMarked
        );
    }

    #[test]
    fn test_rolling_just_inside_window_denies() {
        let now = at("2025-09-28 10:00:00");
        let last = now - Duration::hours(24) + Duration::seconds(1);
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::Rolling(Duration::hours(24))),
            AdmitDecision::DenyAlreadyMarked
        );
    }

    #[test]
    fn test_rolling_at_window_boundary_admits() {
        let now = at("2025-09-28 10:00:00");
        let last = now - Duration::hours(24);
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::Rolling(Duration::hours(24))),
            AdmitDecision::Admit
        );
    }

    #[test]
    fn test_rolling_past_window_admits() {
        let now = at("2025-09-28 10:00:00");
        let last = now - Duration::hours(25);
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::Rolling(Duration::hours(24))),
            AdmitDecision::Admit
        );
    }

    #[test]
    fn test_calendar_day_same_day_denies() {
        let now = at("2025-09-28 23:59:00");
        let last = at("2025-09-28 00:05:00");
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::CalendarDay),
            AdmitDecision::DenyAlreadyMarked
        );
    }

    #[test]
    fn test_calendar_day_midnight_boundary_admits() {
        // Minutes apart but across midnight: the day-keyed policy admits.
        let now = at("2025-09-29 00:01:00");
        let last = at("2025-09-28 23:59:00");
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::CalendarDay),
            AdmitDecision::Admit
        );
    }

    #[test]
    fn test_calendar_day_clock_skew_denies() {
        // A last event recorded "later today" than now (clock skew) must not
        // admit.
        let now = at("2025-09-28 10:00:00");
        let last = at("2025-09-28 11:00:00");
        assert_eq!(
            admit("s1", now, Some(last), &CooldownPolicy::CalendarDay),
            AdmitDecision::DenyAlreadyMarked
        );
    }
}
