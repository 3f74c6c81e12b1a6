use crate::clock::{now_parts, parse_time_12h, Weekday};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::resolve::{classify, day_order, next_remaining, progress, ClassStatus};
use crate::ipc::handlers::timetable::{slots_for_professor_day, slots_for_semester_day};
use rusqlite::Connection;
use serde_json::json;

/// "Now" for the resolver: explicit `day`/`time` params win so the
/// temporal views are testable; otherwise the wall clock.
fn resolve_now(params: &serde_json::Value) -> Result<(Weekday, u32), HandlerErr> {
    let day_param = get_optional_str(params, "day");
    let time_param = get_optional_str(params, "time");
    match (day_param, time_param) {
        (None, None) => Ok(now_parts()),
        (day, time) => {
            let (fallback_day, fallback_minutes) = now_parts();
            let day = match day {
                Some(raw) => Weekday::parse(&raw)
                    .ok_or_else(|| HandlerErr::bad_params(format!("unknown day: {}", raw)))?,
                None => fallback_day,
            };
            let minutes = match time {
                Some(raw) => parse_time_12h(&raw),
                None => fallback_minutes,
            };
            Ok((day, minutes))
        }
    }
}

fn dashboard_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester = get_required_str(params, "semester")?;
    let (day, now) = resolve_now(params)?;

    let slots = slots_for_semester_day(conn, &semester, day)?;
    let total_today = slots.len();
    let completed_today = slots
        .iter()
        .filter(|s| classify(s, now) == ClassStatus::Completed)
        .count();
    let stats = json!({
        "classesToday": total_today,
        "completed": completed_today,
        "remaining": total_today - completed_today
    });

    let Some(next) = next_remaining(&slots, now) else {
        return Ok(json!({
            "nextClass": null,
            "message": "You are free.",
            "subText": "No more classes for today.",
            "stats": stats
        }));
    };

    let live = classify(next, now) == ClassStatus::Live;
    Ok(json!({
        "nextClass": {
            "subject": next.subject,
            "code": format!("SEM-{}", next.semester),
            "time": format!("{} - {}", next.start_time, next.end_time),
            "location": format!("Room {}", next.room),
            "professor": next.professor_name,
            "statusText": if live { "Live Now" } else { "Up Next" },
            "subText": if live {
                "Class is in session".to_string()
            } else {
                format!("Starts at {}", next.start_time)
            },
            "progress": progress(next, now)
        },
        "stats": stats
    }))
}

fn dashboard_teacher(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let (day, now) = resolve_now(params)?;

    let todays = slots_for_professor_day(conn, &teacher_id, day)?;
    let mut is_tomorrow = false;
    let mut next = next_remaining(&todays, now).cloned();

    if next.is_none() {
        // Nothing left today: fall forward exactly one calendar day. A
        // Saturday viewer sees Sunday (empty) and gets the quiet message.
        let tomorrow = day.following();
        let tomorrows = slots_for_professor_day(conn, &teacher_id, tomorrow)?;
        if let Some(first) = tomorrows.into_iter().next() {
            next = Some(first);
            is_tomorrow = true;
        }
    }

    let Some(session) = next else {
        return Ok(json!({
            "nextSession": null,
            "message": "No upcoming sessions.",
            "subText": "No classes scheduled for today or tomorrow."
        }));
    };

    let live = !is_tomorrow && classify(&session, now) == ClassStatus::Live;
    let status_text = if live {
        "Session in Progress"
    } else if is_tomorrow {
        "Tomorrow's First Class"
    } else {
        "Upcoming Session"
    };
    let sub_text = if live {
        "Lecture is live".to_string()
    } else if is_tomorrow {
        format!("Scheduled for {}", day.following().as_str())
    } else {
        format!("Starts at {}", session.start_time)
    };

    Ok(json!({
        "nextSession": {
            "subject": session.subject,
            "class": format!("Semester {}", session.semester),
            "time": format!("{} - {}", session.start_time, session.end_time),
            "venue": format!("Room {}", session.room),
            "task": "Lecture Delivery",
            "statusText": status_text,
            "subText": sub_text,
            "progress": if live { progress(&session, now) } else { 0.0 },
            "isTomorrow": is_tomorrow
        }
    }))
}

fn active_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day_raw = get_required_str(params, "day")?;
    let time_raw = get_required_str(params, "time")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let day = Weekday::parse(&day_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown day: {}", day_raw)))?;
    let now = parse_time_12h(&time_raw);

    let slots = slots_for_professor_day(conn, &teacher_id, day)?;
    if slots.is_empty() {
        return Err(HandlerErr::not_found("No classes found for today."));
    }

    let classes: Vec<serde_json::Value> = day_order(&slots, now)
        .into_iter()
        .map(|(slot, status)| {
            json!({
                "subject": slot.subject,
                "sem": slot.semester,
                "batch": slot.batch.clone().unwrap_or_else(|| "Class".to_string()),
                "label": status.label(),
                "status": status.as_str(),
                "startTime": slot.start_time,
                "endTime": slot.end_time,
                "room": slot.room
            })
        })
        .collect();

    Ok(json!({ "classes": classes }))
}

fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.student" => Some(with_db(state, req, dashboard_student)),
        "dashboard.teacher" => Some(with_db(state, req, dashboard_teacher)),
        "teacher.activeClass" => Some(with_db(state, req, active_class)),
        _ => None,
    }
}
