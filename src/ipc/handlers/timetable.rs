use crate::clock::Weekday;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::resolve::{sort_by_start, teacher_name_matches, SessionSlot};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SLOT_SELECT: &str = "SELECT t.id, t.semester, t.day, t.start_time, t.end_time, t.subject,
            t.professor_id, p.name, p.department, t.room, t.batch
     FROM timetable_slots t
     JOIN teachers p ON p.id = t.professor_id";

struct SlotRow {
    slot: SessionSlot,
    day: String,
    department: String,
}

fn slot_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SlotRow> {
    Ok(SlotRow {
        slot: SessionSlot {
            id: r.get(0)?,
            semester: r.get(1)?,
            start_time: r.get(3)?,
            end_time: r.get(4)?,
            subject: r.get(5)?,
            professor_id: r.get(6)?,
            professor_name: r.get(7)?,
            room: r.get(9)?,
            batch: r.get(10)?,
        },
        day: r.get(2)?,
        department: r.get(8)?,
    })
}

fn slot_json(row: &SlotRow) -> serde_json::Value {
    json!({
        "id": row.slot.id,
        "semester": row.slot.semester,
        "day": row.day,
        "startTime": row.slot.start_time,
        "endTime": row.slot.end_time,
        "subject": row.slot.subject,
        "room": row.slot.room,
        "batch": row.slot.batch,
        "professor": {
            "id": row.slot.professor_id,
            "name": row.slot.professor_name,
            "department": row.department
        }
    })
}

fn query_rows(
    conn: &Connection,
    suffix: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<SlotRow>, HandlerErr> {
    let sql = format!("{} {}", SLOT_SELECT, suffix);
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    stmt.query_map(params, slot_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)
}

/// A professor's sessions for one weekday, chronological.
pub fn slots_for_professor_day(
    conn: &Connection,
    professor_id: &str,
    day: Weekday,
) -> Result<Vec<SessionSlot>, HandlerErr> {
    let rows = query_rows(
        conn,
        "WHERE t.professor_id = ? AND t.day = ?",
        &[&professor_id, &day.as_str()],
    )?;
    let mut slots: Vec<SessionSlot> = rows.into_iter().map(|r| r.slot).collect();
    sort_by_start(&mut slots);
    Ok(slots)
}

/// A semester's sessions for one weekday, chronological.
pub fn slots_for_semester_day(
    conn: &Connection,
    semester: &str,
    day: Weekday,
) -> Result<Vec<SessionSlot>, HandlerErr> {
    let rows = query_rows(
        conn,
        "WHERE t.semester = ? AND t.day = ?",
        &[&semester, &day.as_str()],
    )?;
    let mut slots: Vec<SessionSlot> = rows.into_iter().map(|r| r.slot).collect();
    sort_by_start(&mut slots);
    Ok(slots)
}

pub fn holiday_for(
    conn: &Connection,
    date: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT reason FROM holidays WHERE date = ?", [date], |r| {
        r.get::<_, String>(0)
    })
    .optional()
    .map_err(HandlerErr::db_query)
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn parse_day(raw: &str) -> Result<Weekday, HandlerErr> {
    let day = Weekday::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown day: {}", raw)))?;
    if !day.schedulable() {
        return Err(HandlerErr::bad_params("sessions run Mon through Sat"));
    }
    Ok(day)
}

fn timetable_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester = get_required_str(params, "semester")?;
    let day = parse_day(&get_required_str(params, "day")?)?;
    let start_time = get_required_str(params, "startTime")?;
    let end_time = get_required_str(params, "endTime")?;
    let subject = get_required_str(params, "subject")?;
    let professor_id = get_required_str(params, "professorId")?;
    let room = get_optional_str(params, "room").unwrap_or_else(|| "101".to_string());
    let batch = get_optional_str(params, "batch");

    if !teacher_exists(conn, &professor_id)? {
        return Err(HandlerErr::not_found("professor not found"));
    }

    let slot_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO timetable_slots(id, semester, day, start_time, end_time, subject,
                                     professor_id, room, batch)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            slot_id,
            semester,
            day.as_str(),
            start_time,
            end_time,
            subject,
            professor_id,
            room,
            batch
        ],
    )
    .map_err(|e| HandlerErr::db_insert(e, "timetable_slots"))?;
    Ok(json!({ "slotId": slot_id }))
}

fn timetable_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let existing = conn
        .query_row(
            "SELECT semester, day, start_time, end_time, subject, professor_id, room
             FROM timetable_slots WHERE id = ?",
            [&slot_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(existing) = existing else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let semester = get_optional_str(params, "semester").unwrap_or(existing.0);
    let day = match get_optional_str(params, "day") {
        Some(raw) => parse_day(&raw)?.as_str().to_string(),
        None => existing.1,
    };
    let start_time = get_optional_str(params, "startTime").unwrap_or(existing.2);
    let end_time = get_optional_str(params, "endTime").unwrap_or(existing.3);
    let subject = get_optional_str(params, "subject").unwrap_or(existing.4);
    let professor_id = get_optional_str(params, "professorId").unwrap_or(existing.5);
    let room = get_optional_str(params, "room").unwrap_or(existing.6);

    if !teacher_exists(conn, &professor_id)? {
        return Err(HandlerErr::not_found("professor not found"));
    }

    conn.execute(
        "UPDATE timetable_slots
         SET semester = ?, day = ?, start_time = ?, end_time = ?, subject = ?,
             professor_id = ?, room = ?
         WHERE id = ?",
        rusqlite::params![semester, day, start_time, end_time, subject, professor_id, room, slot_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "timetable_slots"))?;
    Ok(json!({ "ok": true }))
}

fn timetable_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let deleted = conn
        .execute("DELETE FROM timetable_slots WHERE id = ?", [&slot_id])
        .map_err(|e| HandlerErr::db_update(e, "timetable_slots"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Full timetable for a semester. When a date is supplied and that date is
/// marked as a holiday, resolution is suppressed for the whole day.
fn timetable_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester = get_required_str(params, "semester")?;
    if let Some(date) = get_optional_str(params, "date") {
        if let Some(reason) = holiday_for(conn, &date)? {
            return Ok(json!({
                "isHoliday": true,
                "reason": reason,
                "sessions": []
            }));
        }
    }
    let rows = query_rows(conn, "WHERE t.semester = ?", &[&semester])?;
    let sessions: Vec<serde_json::Value> = rows.iter().map(slot_json).collect();
    Ok(json!({ "isHoliday": false, "sessions": sessions }))
}

/// A day's sessions across semesters, optionally narrowed by the fuzzy
/// professor-name filter. Holiday-aware when a date is given.
fn schedule_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day_raw = get_required_str(params, "day")?;
    // Any weekday is queryable here; Sunday simply has nothing scheduled.
    let day = Weekday::parse(&day_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown day: {}", day_raw)))?;
    if let Some(date) = get_optional_str(params, "date") {
        if let Some(reason) = holiday_for(conn, &date)? {
            return Ok(json!({
                "isHoliday": true,
                "reason": reason,
                "sessions": []
            }));
        }
    }
    let mut rows = query_rows(conn, "WHERE t.day = ?", &[&day.as_str()])?;
    rows.sort_by_key(|r| r.slot.start_minute());

    if let Some(query_name) = get_optional_str(params, "teacherName") {
        rows.retain(|r| teacher_name_matches(&query_name, &r.slot.professor_name));
    }

    let sessions: Vec<serde_json::Value> = rows.iter().map(slot_json).collect();
    Ok(json!({ "isHoliday": false, "sessions": sessions }))
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
        "timetable.create" => Some(with_db(state, req, timetable_create)),
        "timetable.update" => Some(with_db(state, req, timetable_update)),
        "timetable.delete" => Some(with_db(state, req, timetable_delete)),
        "timetable.list" => Some(with_db(state, req, timetable_list)),
        "schedule.day" => Some(with_db(state, req, schedule_day)),
        _ => None,
    }
}
