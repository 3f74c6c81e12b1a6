use crate::clock::parse_dmy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Roster rows sort ascending by numeric roll number; non-numeric rolls
/// sort after every numeric one, tie-broken by the raw roll string so the
/// order is deterministic either way.
fn roll_sort_key(roll: &str) -> (u8, i64, String) {
    match roll.trim().parse::<i64>() {
        Ok(n) => (0, n, roll.to_string()),
        Err(_) => (1, 0, roll.to_string()),
    }
}

struct SheetRow {
    student_id: String,
    name: String,
    roll_number: String,
    present: bool,
}

fn sheet_row_json(row: &SheetRow) -> serde_json::Value {
    json!({
        "studentId": row.student_id,
        "name": row.name,
        "rollNumber": row.roll_number,
        "status": if row.present { "Present" } else { "Absent" }
    })
}

fn pick_roll(class_roll: String, university_roll: String) -> String {
    if class_roll.trim().is_empty() {
        university_roll
    } else {
        class_roll
    }
}

/// Replace-on-save keyed by (batch, date, subject). A second submission
/// for the same key replaces the prior record in full; teacherId is
/// provenance only.
fn attendance_save(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch = get_required_str(params, "batch")?;
    let date = get_required_str(params, "date")?;
    let subject = get_required_str(params, "subject")?;
    if parse_dmy(&date).is_none() {
        return Err(HandlerErr::bad_params("date must be DD-MM-YYYY"));
    }
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };
    let teacher_id = get_optional_str(params, "teacherId");

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute(
        "INSERT INTO attendance_records(id, batch, date, subject, teacher_id)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(batch, date, subject) DO UPDATE SET
           teacher_id = excluded.teacher_id",
        rusqlite::params![Uuid::new_v4().to_string(), batch, date, subject, teacher_id],
    )
    .map_err(|e| HandlerErr::db_insert(e, "attendance_records"))?;
    let record_id: String = tx
        .query_row(
            "SELECT id FROM attendance_records WHERE batch = ? AND date = ? AND subject = ?",
            [&batch, &date, &subject],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    tx.execute(
        "DELETE FROM attendance_entries WHERE record_id = ?",
        [&record_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "attendance_entries"))?;

    for record in records {
        let Some(student) = record.get("student").and_then(|v| v.as_str()) else {
            continue;
        };
        let is_present = record
            .get("isPresent")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        tx.execute(
            "INSERT INTO attendance_entries(record_id, student_id, is_present)
             VALUES(?, ?, ?)
             ON CONFLICT(record_id, student_id) DO UPDATE SET
               is_present = excluded.is_present",
            rusqlite::params![record_id, student, is_present as i64],
        )
        .map_err(|e| HandlerErr::db_insert(e, "attendance_entries"))?;
    }
    tx.commit().map_err(HandlerErr::db_tx)?;
    Ok(json!({ "ok": true, "message": "Attendance saved!" }))
}

/// Stored record reshaped for marking, or a fresh all-absent roster from
/// current batch membership when nothing was saved yet. Entries whose
/// student no longer resolves are dropped.
fn attendance_sheet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch = get_required_str(params, "batch")?;
    let date = get_required_str(params, "date")?;
    let subject = get_required_str(params, "subject")?;

    let record_id: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_records WHERE batch = ? AND date = ? AND subject = ?",
            [&batch, &date, &subject],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    let mut rows: Vec<SheetRow> = match &record_id {
        Some(record_id) => {
            let mut stmt = conn
                .prepare(
                    "SELECT s.id, s.name, s.class_roll_no, s.university_roll_no, e.is_present
                     FROM attendance_entries e
                     JOIN students s ON s.id = e.student_id
                     WHERE e.record_id = ?",
                )
                .map_err(HandlerErr::db_query)?;
            stmt.query_map([record_id], |r| {
                Ok(SheetRow {
                    student_id: r.get(0)?,
                    name: r.get(1)?,
                    roll_number: pick_roll(r.get(2)?, r.get(3)?),
                    present: r.get::<_, i64>(4)? != 0,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, class_roll_no, university_roll_no
                     FROM students WHERE batch = ?",
                )
                .map_err(HandlerErr::db_query)?;
            stmt.query_map([&batch], |r| {
                Ok(SheetRow {
                    student_id: r.get(0)?,
                    name: r.get(1)?,
                    roll_number: pick_roll(r.get(2)?, r.get(3)?),
                    present: false,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
        }
    };

    rows.sort_by(|a, b| {
        (roll_sort_key(&a.roll_number), &a.name).cmp(&(roll_sort_key(&b.roll_number), &b.name))
    });
    let students: Vec<serde_json::Value> = rows.iter().map(sheet_row_json).collect();
    Ok(json!({ "fresh": record_id.is_none(), "students": students }))
}

/// Per-subject rollup across every record of the student's batch: total
/// sessions, sessions attended, and the five most recent marks newest
/// first. A missing entry in a record counts as absent; a subject with no
/// records never appears.
fn attendance_student_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let batch: Option<String> = conn
        .query_row(
            "SELECT batch FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(batch) = batch else {
        return Err(HandlerErr::not_found("Student not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT r.date, r.subject, e.is_present
             FROM attendance_records r
             LEFT JOIN attendance_entries e
               ON e.record_id = r.id AND e.student_id = ?
             WHERE r.batch = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let mut sessions: Vec<(Option<NaiveDate>, String, bool)> = stmt
        .query_map([&student_id, &batch], |r| {
            let date: String = r.get(0)?;
            let subject: String = r.get(1)?;
            let present: Option<i64> = r.get(2)?;
            Ok((parse_dmy(&date), subject, present == Some(1)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    // Newest first; records with unparseable dates sink to the oldest end
    // but still count toward the totals.
    sessions.sort_by(|a, b| b.0.cmp(&a.0));

    let mut subjects: std::collections::BTreeMap<String, (i64, i64, Vec<&'static str>)> =
        std::collections::BTreeMap::new();
    for (_, subject, present) in &sessions {
        let entry = subjects.entry(subject.clone()).or_default();
        entry.0 += 1;
        if *present {
            entry.1 += 1;
        }
        if entry.2.len() < 5 {
            entry.2.push(if *present { "P" } else { "A" });
        }
    }

    let data: Vec<serde_json::Value> = subjects
        .into_iter()
        .map(|(subject, (total, attended, history))| {
            json!({
                "id": subject.clone(),
                "subject": subject,
                "total": total,
                "attended": attended,
                "history": history
            })
        })
        .collect();
    Ok(json!({ "subjects": data }))
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
        "attendance.save" => Some(with_db(state, req, attendance_save)),
        "attendance.sheet" => Some(with_db(state, req, attendance_sheet)),
        "attendance.studentSummary" => Some(with_db(state, req, attendance_student_summary)),
        _ => None,
    }
}
