use crate::clock::parse_time_12h;

/// One scheduled session as the resolver sees it. Handlers load these
/// fresh per call; there is no in-memory catalog.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    pub id: String,
    pub semester: String,
    pub start_time: String,
    pub end_time: String,
    pub subject: String,
    pub professor_id: String,
    pub professor_name: String,
    pub room: String,
    pub batch: Option<String>,
}

impl SessionSlot {
    pub fn start_minute(&self) -> u32 {
        parse_time_12h(&self.start_time)
    }

    pub fn end_minute(&self) -> u32 {
        parse_time_12h(&self.end_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassStatus {
    Live,
    Upcoming,
    Completed,
}

impl ClassStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassStatus::Live => "LIVE",
            ClassStatus::Upcoming => "UPCOMING",
            ClassStatus::Completed => "COMPLETED",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassStatus::Live => "HAPPENING NOW (Live)",
            ClassStatus::Upcoming => "UPCOMING CLASS",
            ClassStatus::Completed => "RECENT CLASS",
        }
    }
}

/// Chronological order for a day's sessions. Stable, so equal start
/// minutes keep their catalog order.
pub fn sort_by_start(slots: &mut [SessionSlot]) {
    slots.sort_by_key(|s| s.start_minute());
}

/// Every session gets exactly one partition for a given `now`; overlap
/// between sessions is allowed and classified independently.
pub fn classify(slot: &SessionSlot, now: u32) -> ClassStatus {
    let start = slot.start_minute();
    let end = slot.end_minute();
    if start <= now && now <= end {
        ClassStatus::Live
    } else if now < start {
        ClassStatus::Upcoming
    } else {
        ClassStatus::Completed
    }
}

/// The single next/active session: first in chronological order whose end
/// minute is still ahead of `now`. `None` means the viewer is free for the
/// day; there is no implicit fallback to tomorrow here.
pub fn next_remaining<'a>(sorted: &'a [SessionSlot], now: u32) -> Option<&'a SessionSlot> {
    sorted.iter().find(|s| s.end_minute() > now)
}

/// Progress fraction for a live session, clamped to [0, 1]; 0 for
/// anything not currently live.
pub fn progress(slot: &SessionSlot, now: u32) -> f64 {
    if classify(slot, now) != ClassStatus::Live {
        return 0.0;
    }
    let start = slot.start_minute();
    let end = slot.end_minute();
    if end <= start {
        return 0.0;
    }
    let fraction = f64::from(now - start) / f64::from(end - start);
    fraction.clamp(0.0, 1.0)
}

/// The active-class listing order: live sessions first, then future
/// sessions chronologically, then past sessions most-recent-first. This
/// ordering is a UX contract; keep it exact.
pub fn day_order(sorted: &[SessionSlot], now: u32) -> Vec<(&SessionSlot, ClassStatus)> {
    let mut active = Vec::new();
    let mut upcoming = Vec::new();
    let mut completed = Vec::new();
    for slot in sorted {
        match classify(slot, now) {
            ClassStatus::Live => active.push((slot, ClassStatus::Live)),
            ClassStatus::Upcoming => upcoming.push((slot, ClassStatus::Upcoming)),
            ClassStatus::Completed => completed.push((slot, ClassStatus::Completed)),
        }
    }
    completed.reverse();
    active.extend(upcoming);
    active.extend(completed);
    active
}

const HONORIFICS: [&str; 5] = ["dr.", "prof.", "mr.", "mrs.", "ms."];

/// Lowercases, strips the fixed honorific set, and removes whitespace.
pub fn normalize_teacher_name(name: &str) -> String {
    let mut cleaned = name.to_lowercase();
    for honorific in HONORIFICS {
        cleaned = cleaned.replace(honorific, "");
    }
    cleaned.split_whitespace().collect()
}

/// Substring match in either direction over normalized names. This is an
/// intentional fuzzy search, not an equality check: "sharma" finds
/// "Dr. A. Sharma" and the full form finds the short one.
pub fn teacher_name_matches(query: &str, stored: &str) -> bool {
    let clean_query = normalize_teacher_name(query);
    let clean_stored = normalize_teacher_name(stored);
    clean_stored.contains(&clean_query) || clean_query.contains(&clean_stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: &str, start: &str, end: &str) -> SessionSlot {
        SessionSlot {
            id: id.to_string(),
            semester: "3".to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            subject: format!("Subject {}", id),
            professor_id: "t1".to_string(),
            professor_name: "Dr. A. Sharma".to_string(),
            room: "101".to_string(),
            batch: None,
        }
    }

    #[test]
    fn classify_assigns_exactly_one_partition() {
        let s = slot("a", "10:00 AM", "11:00 AM");
        assert_eq!(classify(&s, 599), ClassStatus::Upcoming);
        assert_eq!(classify(&s, 600), ClassStatus::Live);
        assert_eq!(classify(&s, 660), ClassStatus::Live);
        assert_eq!(classify(&s, 661), ClassStatus::Completed);
    }

    #[test]
    fn next_remaining_prefers_chronological_first() {
        let mut slots = vec![
            slot("late", "2:00 PM", "3:00 PM"),
            slot("early", "10:00 AM", "11:00 AM"),
        ];
        sort_by_start(&mut slots);
        // Mid-morning: the early session is still running out its clock.
        let next = next_remaining(&slots, 630).expect("one remains");
        assert_eq!(next.id, "early");
        // Evening: nothing left, the viewer is free.
        assert!(next_remaining(&slots, 1000).is_none());
    }

    #[test]
    fn progress_is_zero_outside_live_and_clamped_inside() {
        let s = slot("a", "10:00 AM", "11:00 AM");
        assert_eq!(progress(&s, 599), 0.0);
        assert_eq!(progress(&s, 600), 0.0);
        assert!((progress(&s, 630) - 0.5).abs() < 1e-9);
        assert_eq!(progress(&s, 660), 1.0);
        assert_eq!(progress(&s, 700), 0.0);
    }

    #[test]
    fn day_order_is_live_then_upcoming_then_recent_first() {
        let mut slots = vec![
            slot("A", "8:00 AM", "9:00 AM"),
            slot("D", "9:00 AM", "10:00 AM"),
            slot("B", "10:30 AM", "11:30 AM"),
            slot("C", "1:00 PM", "2:00 PM"),
        ];
        sort_by_start(&mut slots);
        // 11:00 AM: A and D are done, B is live, C is ahead.
        let ordered: Vec<&str> = day_order(&slots, 660)
            .iter()
            .map(|(s, _)| s.id.as_str())
            .collect();
        assert_eq!(ordered, vec!["B", "C", "D", "A"]);
    }

    #[test]
    fn fuzzy_match_strips_honorifics_and_goes_both_ways() {
        assert!(teacher_name_matches("sharma", "Dr. A. Sharma"));
        assert!(teacher_name_matches("Dr. A. Sharma", "a.sharma"));
        assert!(teacher_name_matches("PROF. VERMA", "verma"));
        assert!(teacher_name_matches("Mrs. Kapoor", "kapoor"));
        assert!(!teacher_name_matches("gupta", "Dr. A. Sharma"));
    }

    #[test]
    fn normalize_removes_case_space_and_prefixes() {
        assert_eq!(normalize_teacher_name("Dr.  A. Sharma"), "a.sharma");
        assert_eq!(normalize_teacher_name("Prof. R K Verma"), "rkverma");
        assert_eq!(normalize_teacher_name(""), "");
    }
}
