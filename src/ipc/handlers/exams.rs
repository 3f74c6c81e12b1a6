use crate::clock::parse_dmy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, is_unique_violation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{dispatch, PushGateway};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn exam_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "subject": r.get::<_, String>(2)?,
        "date": r.get::<_, String>(3)?,
        "time": r.get::<_, String>(4)?,
        "duration": r.get::<_, String>(5)?,
        "venue": r.get::<_, String>(6)?,
        "semester": r.get::<_, String>(7)?,
        "batch": r.get::<_, String>(8)?,
        "professor": r.get::<_, String>(9)?,
        "teacherId": r.get::<_, String>(10)?
    }))
}

const EXAM_COLUMNS: &str =
    "id, title, subject, date, time, duration, venue, semester, batch, professor, teacher_id";

/// Push tokens of every student in the (semester, batch) target. Exam
/// semesters are labels; a non-numeric one simply has no student matches.
fn tokens_for_target(
    conn: &Connection,
    semester: &str,
    batch: &str,
) -> Result<Vec<Option<String>>, HandlerErr> {
    let Ok(semester_num) = semester.parse::<i64>() else {
        return Ok(Vec::new());
    };
    let mut stmt = conn
        .prepare("SELECT push_token FROM students WHERE semester = ? AND batch = ?")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map(rusqlite::params![semester_num, batch], |r| {
        r.get::<_, Option<String>>(0)
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn exams_assign(
    conn: &Connection,
    push: &dyn PushGateway,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let subject = get_required_str(params, "subject")?;
    let date = get_required_str(params, "date")?;
    let time = get_required_str(params, "time")?;
    let duration = get_required_str(params, "duration")?;
    let venue = get_required_str(params, "venue")?;
    let semester = get_required_str(params, "semester")?;
    let batch = get_required_str(params, "batch")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let professor = get_optional_str(params, "professorName").unwrap_or_default();
    if parse_dmy(&date).is_none() {
        return Err(HandlerErr::bad_params("date must be DD-MM-YYYY"));
    }

    let exam_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO exams(id, title, subject, date, time, duration, venue, semester,
                           batch, professor, teacher_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            exam_id,
            title,
            subject,
            date,
            time,
            duration,
            venue,
            semester,
            batch,
            professor,
            teacher_id,
            Utc::now().to_rfc3339()
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(HandlerErr::conflict(
                "An exam for this batch is already scheduled at this slot",
            ))
        }
        Err(e) => return Err(HandlerErr::db_insert(e, "exams")),
    }

    // The exam is persisted; fan-out is best-effort and one-way.
    let tokens = tokens_for_target(conn, &semester, &batch)?;
    dispatch(
        push,
        tokens,
        "New Exam Scheduled",
        format!(
            "{} ({}) is scheduled on {} at {}. Duration: {}.",
            subject, title, date, time, duration
        ),
        json!({ "screen": "Exams" }),
    );

    Ok(json!({ "examId": exam_id, "message": "Exam assigned and students notified" }))
}

/// Listing scope mirrors the callers: a teacher sees their own exams, a
/// student view needs semester+batch, anything else is empty.
fn exams_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_optional_str(params, "teacherId");
    let semester = get_optional_str(params, "semester");
    let batch = get_optional_str(params, "batch");

    let mut exams: Vec<(Option<chrono::NaiveDate>, serde_json::Value)> = match (teacher_id, semester, batch)
    {
        (Some(teacher_id), _, _) => {
            let sql = format!("SELECT {} FROM exams WHERE teacher_id = ?", EXAM_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
            stmt.query_map([&teacher_id], exam_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db_query)?
        }
        (None, Some(semester), Some(batch)) => {
            let sql = format!(
                "SELECT {} FROM exams WHERE semester = ? AND batch = ?",
                EXAM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
            stmt.query_map([&semester, &batch], exam_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db_query)?
        }
        _ => Vec::new(),
    }
    .into_iter()
    .map(|exam| {
        let date = exam
            .get("date")
            .and_then(|v| v.as_str())
            .and_then(parse_dmy);
        (date, exam)
    })
    .collect();

    // Chronological, not lexicographic: DD-MM-YYYY strings do not sort.
    exams.sort_by(|a, b| a.0.cmp(&b.0));
    let exams: Vec<serde_json::Value> = exams.into_iter().map(|(_, e)| e).collect();
    Ok(json!({ "exams": exams }))
}

fn exams_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let exists = conn
        .query_row("SELECT 1 FROM exams WHERE id = ?", [&exam_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("Exam not found"));
    }

    if let Some(date) = get_optional_str(params, "date") {
        if parse_dmy(&date).is_none() {
            return Err(HandlerErr::bad_params("date must be DD-MM-YYYY"));
        }
    }

    let updated = conn.execute(
        "UPDATE exams
         SET title = COALESCE(?, title),
             subject = COALESCE(?, subject),
             date = COALESCE(?, date),
             time = COALESCE(?, time),
             venue = COALESCE(?, venue),
             duration = COALESCE(?, duration)
         WHERE id = ?",
        rusqlite::params![
            get_optional_str(params, "title"),
            get_optional_str(params, "subject"),
            get_optional_str(params, "date"),
            get_optional_str(params, "time"),
            get_optional_str(params, "venue"),
            get_optional_str(params, "duration"),
            exam_id
        ],
    );
    match updated {
        Ok(_) => Ok(json!({ "message": "Exam updated successfully" })),
        Err(e) if is_unique_violation(&e) => Err(HandlerErr::conflict(
            "An exam for this batch is already scheduled at this slot",
        )),
        Err(e) => Err(HandlerErr::db_update(e, "exams")),
    }
}

fn exams_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let deleted = conn
        .execute("DELETE FROM exams WHERE id = ?", [&exam_id])
        .map_err(|e| HandlerErr::db_update(e, "exams"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("Exam not found"));
    }
    Ok(json!({ "message": "Exam deleted successfully" }))
}

fn with_state<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &dyn PushGateway, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, state.push.as_ref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.assign" => Some(with_state(state, req, exams_assign)),
        "exams.list" => Some(with_state(state, req, |c, _, p| exams_list(c, p))),
        "exams.update" => Some(with_state(state, req, |c, _, p| exams_update(c, p))),
        "exams.delete" => Some(with_state(state, req, |c, _, p| exams_delete(c, p))),
        _ => None,
    }
}
