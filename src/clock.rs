use chrono::{DateTime, Datelike, Local, Months, NaiveDate, TimeZone, Timelike, Utc};

/// Week cycle used for "now" resolution. Sessions are only ever scheduled
/// Mon..Sat, but the clock can land on Sunday and the teacher-dashboard
/// fallback steps through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weekday {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Weekday {
    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Sun => "Sun",
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
        }
    }

    pub fn parse(s: &str) -> Option<Weekday> {
        match s {
            "Sun" => Some(Weekday::Sun),
            "Mon" => Some(Weekday::Mon),
            "Tue" => Some(Weekday::Tue),
            "Wed" => Some(Weekday::Wed),
            "Thu" => Some(Weekday::Thu),
            "Fri" => Some(Weekday::Fri),
            "Sat" => Some(Weekday::Sat),
            _ => None,
        }
    }

    /// True for the days a session may be scheduled on.
    pub fn schedulable(self) -> bool {
        !matches!(self, Weekday::Sun)
    }

    /// The next calendar day, wrapping through Sunday.
    pub fn following(self) -> Weekday {
        match self {
            Weekday::Sun => Weekday::Mon,
            Weekday::Mon => Weekday::Tue,
            Weekday::Tue => Weekday::Wed,
            Weekday::Wed => Weekday::Thu,
            Weekday::Thu => Weekday::Fri,
            Weekday::Fri => Weekday::Sat,
            Weekday::Sat => Weekday::Sun,
        }
    }
}

/// Parses `"H:MM AM|PM"` into minutes since midnight.
///
/// Hour 12 normalizes to 0 before the PM offset is applied, so
/// `12:00 AM` -> 0 and `12:00 PM` -> 720. The AM/PM token is optional; a
/// bare `H:MM` gets no offset. Malformed, empty, or out-of-range input
/// yields 0 — callers treat 0 as the documented "no time set" fallback,
/// never as an error.
pub fn parse_time_12h(raw: &str) -> u32 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0;
    }
    let mut parts = trimmed.splitn(2, ' ');
    let hhmm = parts.next().unwrap_or("");
    let modifier = parts.next().map(str::trim);
    let Some((h, m)) = hhmm.split_once(':') else {
        return 0;
    };
    let Ok(mut hours) = h.trim().parse::<u32>() else {
        return 0;
    };
    let Ok(minutes) = m.trim().parse::<u32>() else {
        return 0;
    };
    if hours > 12 || minutes > 59 {
        return 0;
    }
    if hours == 12 {
        hours = 0;
    }
    if modifier == Some("PM") {
        hours += 12;
    }
    hours * 60 + minutes
}

/// Renders minutes since midnight back into the 12-hour wire form.
#[allow(dead_code)]
pub fn format_time_12h(minutes_since_midnight: u32) -> String {
    let total = minutes_since_midnight.min(1439);
    let hour24 = total / 60;
    let minute = total % 60;
    let (hour12, modifier) = match hour24 {
        0 => (12, "AM"),
        1..=11 => (hour24, "AM"),
        12 => (12, "PM"),
        _ => (hour24 - 12, "PM"),
    };
    format!("{}:{:02} {}", hour12, minute, modifier)
}

/// `DD-MM-YYYY`, the persisted date form.
pub fn parse_dmy(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d-%m-%Y").ok()
}

pub fn format_dmy(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// `YYYY-MM-DD`, the calendar-widget form.
pub fn parse_iso(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn format_iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn weekday_of(date: NaiveDate) -> Weekday {
    match date.weekday() {
        chrono::Weekday::Sun => Weekday::Sun,
        chrono::Weekday::Mon => Weekday::Mon,
        chrono::Weekday::Tue => Weekday::Tue,
        chrono::Weekday::Wed => Weekday::Wed,
        chrono::Weekday::Thu => Weekday::Thu,
        chrono::Weekday::Fri => Weekday::Fri,
        chrono::Weekday::Sat => Weekday::Sat,
    }
}

/// Wall-clock "now" as (weekday, minutes since midnight).
pub fn now_parts() -> (Weekday, u32) {
    let now = Local::now();
    let day = weekday_of(now.date_naive());
    (day, now.hour() * 60 + now.minute())
}

/// Issue instant plus six calendar months, the lending ledger's default
/// loan period.
pub fn default_due_date(issue: DateTime<Utc>) -> DateTime<Utc> {
    issue
        .checked_add_months(Months::new(6))
        .unwrap_or(issue)
}

/// Whole days a loan is past due, rounded up; 0 when not yet due.
pub fn days_late(due: DateTime<Utc>, today: DateTime<Utc>) -> i64 {
    if today <= due {
        return 0;
    }
    let seconds = (today - due).num_seconds();
    (seconds + 86_399) / 86_400
}

/// Accepts either an RFC 3339 instant or a bare `YYYY-MM-DD` (midnight
/// UTC) wherever callers hand us a timestamp.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = parse_iso(trimmed).or_else(|| parse_dmy(trimmed))?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn parse_time_handles_noon_and_midnight() {
        assert_eq!(parse_time_12h("12:00 AM"), 0);
        assert_eq!(parse_time_12h("12:00 PM"), 720);
        assert_eq!(parse_time_12h("1:30 PM"), 810);
        assert_eq!(parse_time_12h("11:59 PM"), 1439);
        assert_eq!(parse_time_12h("12:30 AM"), 30);
    }

    #[test]
    fn parse_time_falls_back_to_zero() {
        assert_eq!(parse_time_12h(""), 0);
        assert_eq!(parse_time_12h("noonish"), 0);
        assert_eq!(parse_time_12h("25:00 PM"), 0);
        assert_eq!(parse_time_12h("9:75 AM"), 0);
    }

    #[test]
    fn parse_time_without_modifier_gets_no_offset() {
        assert_eq!(parse_time_12h("9:15"), 555);
        assert_eq!(parse_time_12h("12:30"), 30);
    }

    #[test]
    fn format_time_round_trips_display_cases() {
        assert_eq!(format_time_12h(0), "12:00 AM");
        assert_eq!(format_time_12h(720), "12:00 PM");
        assert_eq!(format_time_12h(810), "1:30 PM");
        assert_eq!(parse_time_12h(&format_time_12h(1439)), 1439);
    }

    #[test]
    fn date_codec_converts_both_directions() {
        let date = parse_dmy("05-08-2026").expect("dmy parses");
        assert_eq!(format_iso(date), "2026-08-05");
        let back = parse_iso("2026-08-05").expect("iso parses");
        assert_eq!(format_dmy(back), "05-08-2026");
        assert_eq!(parse_dmy("2026-08-05"), None);
        assert_eq!(parse_iso("05-08-2026"), None);
    }

    #[test]
    fn weekday_cycle_steps_through_sunday() {
        assert_eq!(Weekday::Sat.following(), Weekday::Sun);
        assert_eq!(Weekday::Sun.following(), Weekday::Mon);
        assert!(!Weekday::Sun.schedulable());
        assert!(Weekday::Mon.schedulable());
    }

    #[test]
    fn days_late_rounds_up_and_clamps() {
        let due = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(days_late(due, due), 0);
        assert_eq!(days_late(due, due - Duration::days(2)), 0);
        assert_eq!(days_late(due, due + Duration::days(3)), 3);
        assert_eq!(days_late(due, due + Duration::hours(1)), 1);
        assert_eq!(
            days_late(due, due + Duration::days(2) + Duration::minutes(1)),
            3
        );
    }

    #[test]
    fn default_due_date_is_six_calendar_months_out() {
        let issue = Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap();
        let due = default_due_date(issue);
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 7, 15, 9, 30, 0).unwrap());
        // Month-end clamping: Aug 31 + 6 months lands on Feb 28.
        let issue = Utc.with_ymd_and_hms(2025, 8, 31, 0, 0, 0).unwrap();
        assert_eq!(
            default_due_date(issue),
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
    }
}
