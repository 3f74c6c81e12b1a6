use crate::db::{Role, TERMINAL_SEMESTER};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, is_unique_violation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Initial password handed to a freshly provisioned student: first three
/// characters of the name (padded with 'X'), '@', first two of the DOB.
/// Only the sha256 digest is stored.
fn derive_password(name: &str, dob: &str) -> String {
    let safe_name = name.trim();
    let safe_dob = dob.trim();
    let name_part: String = if safe_name.chars().count() >= 3 {
        safe_name.chars().take(3).collect()
    } else {
        let mut part: String = safe_name.chars().collect();
        while part.chars().count() < 3 {
            part.push('X');
        }
        part
    };
    let dob_part: String = if safe_dob.chars().count() >= 2 {
        safe_dob.chars().take(2).collect()
    } else {
        "01".to_string()
    };
    format!("{}@{}", name_part, dob_part)
}

fn digest(plain: &str) -> String {
    format!("{:x}", Sha256::digest(plain.as_bytes()))
}

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "enrollmentId": r.get::<_, String>(2)?,
        "universityRollNo": r.get::<_, String>(3)?,
        "classRollNo": r.get::<_, String>(4)?,
        "batch": r.get::<_, String>(5)?,
        "semester": r.get::<_, i64>(6)?,
        "mobile": r.get::<_, String>(7)?,
        "email": r.get::<_, String>(8)?,
        "dob": r.get::<_, String>(9)?,
        "role": r.get::<_, String>(10)?,
    }))
}

const STUDENT_COLUMNS: &str = "id, name, enrollment_id, university_roll_no, class_roll_no,
     batch, semester, mobile, email, dob, role";

fn students_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let university_roll_no = get_required_str(params, "universityRollNo")?;
    let batch = get_required_str(params, "batch")?;
    let dob = get_required_str(params, "dob")?;
    let class_roll_no = get_optional_str(params, "classRollNo").unwrap_or_default();
    let semester = params.get("semester").and_then(|v| v.as_i64()).unwrap_or(1);
    let mobile = get_optional_str(params, "mobile").unwrap_or_default();
    let email = get_optional_str(params, "email").unwrap_or_default();

    let plain_password = derive_password(&name, &dob);
    let student_id = Uuid::new_v4().to_string();

    let inserted = conn.execute(
        "INSERT INTO students(id, name, enrollment_id, university_roll_no, class_roll_no,
                              batch, semester, mobile, email, dob, password_digest, role)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student_id,
            name,
            enrollment_id,
            university_roll_no,
            class_roll_no,
            batch,
            semester,
            mobile,
            email,
            dob,
            digest(&plain_password),
            Role::Student.as_str(),
        ],
    );
    match inserted {
        Ok(_) => Ok(json!({
            "studentId": student_id,
            "name": name,
            // Returned exactly once; only the digest persists.
            "password": plain_password
        })),
        Err(e) if is_unique_violation(&e) => Err(HandlerErr::conflict(
            "Student with this Enrollment ID or University Roll No already exists.",
        )),
        Err(e) => Err(HandlerErr::db_insert(e, "students")),
    }
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch = get_optional_str(params, "batch");
    let sql = format!(
        "SELECT {} FROM students {} ORDER BY name",
        STUDENT_COLUMNS,
        if batch.is_some() { "WHERE batch = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let rows = match &batch {
        Some(b) => stmt.query_map([b], student_row_json),
        None => stmt.query_map([], student_row_json),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": rows }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let deleted = conn
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn students_search(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let query = get_required_str(params, "query")?;
    let sql = format!(
        "SELECT {} FROM students WHERE university_roll_no = ?",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&query], student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    if rows.is_empty() {
        return Err(HandlerErr::not_found("Student not found"));
    }
    Ok(json!({ "students": rows }))
}

fn students_set_push_token(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let token = get_required_str(params, "token")?;
    let role_raw = get_optional_str(params, "role").unwrap_or_else(|| "student".to_string());
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params(format!("unknown role: {}", role_raw)));
    };
    let table = match role {
        Role::Student | Role::Alumni => "students",
        Role::Teacher | Role::Admin => "teachers",
    };
    let sql = format!("UPDATE {} SET push_token = ? WHERE id = ?", table);
    let updated = conn
        .execute(&sql, [&token, &user_id])
        .map_err(|e| HandlerErr::db_update(e, table))?;
    if updated == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "ok": true }))
}

fn batches_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let batch_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO batches(id, name) VALUES(?, ?)",
        [&batch_id, &name],
    ) {
        Ok(_) => Ok(json!({ "batchId": batch_id, "name": name })),
        Err(e) if is_unique_violation(&e) => Err(HandlerErr::conflict("Batch already exists")),
        Err(e) => Err(HandlerErr::db_insert(e, "batches")),
    }
}

fn batches_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM batches ORDER BY name DESC")
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "batches": rows }))
}

fn batches_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    conn.execute("DELETE FROM batches WHERE id = ?", [&batch_id])
        .map_err(|e| HandlerErr::db_update(e, "batches"))?;
    Ok(json!({ "ok": true }))
}

fn teachers_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_optional_str(params, "email");
    let department = get_optional_str(params, "department").unwrap_or_else(|| "BCA".to_string());
    let designation =
        get_optional_str(params, "designation").unwrap_or_else(|| "Assistant Professor".to_string());
    let is_hod = get_optional_bool(params, "isHOD");
    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, email, department, designation, is_hod)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![teacher_id, name, email, department, designation, is_hod as i64],
    )
    .map_err(|e| HandlerErr::db_insert(e, "teachers"))?;
    Ok(json!({ "teacherId": teacher_id, "name": name }))
}

fn teachers_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, email, department, designation, is_hod
             FROM teachers
             ORDER BY is_hod DESC, name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, Option<String>>(2)?,
                "department": r.get::<_, String>(3)?,
                "designation": r.get::<_, String>(4)?,
                "isHOD": r.get::<_, i64>(5)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "teachers": rows }))
}

/// The semester rollover sweep. Invoked explicitly (an external scheduler
/// owns the calendar); both steps are single bulk updates so it composes
/// with interactive traffic the same way any other write does.
fn students_promote(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let graduated = tx
        .execute(
            "UPDATE students SET role = ?, semester = 0
             WHERE role = ? AND semester >= ?",
            rusqlite::params![Role::Alumni.as_str(), Role::Student.as_str(), TERMINAL_SEMESTER],
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    let promoted = tx
        .execute(
            "UPDATE students SET semester = semester + 1
             WHERE role = ? AND semester > 0 AND semester < ?",
            rusqlite::params![Role::Student.as_str(), TERMINAL_SEMESTER],
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    tx.commit().map_err(HandlerErr::db_tx)?;
    log::info!(
        "event=semester_promotion graduated={} promoted={}",
        graduated,
        promoted
    );
    Ok(json!({ "graduated": graduated, "promoted": promoted }))
}

pub fn lookup_student_by_roll(
    conn: &Connection,
    roll: &str,
) -> Result<Option<(String, String, Option<String>)>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, push_token FROM students WHERE university_roll_no = ?",
        [roll],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)
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
        "students.add" => Some(with_db(state, req, students_add)),
        "students.list" => Some(with_db(state, req, students_list)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.search" => Some(with_db(state, req, students_search)),
        "students.setPushToken" => Some(with_db(state, req, students_set_push_token)),
        "students.promote" => Some(with_db(state, req, |conn, _| students_promote(conn))),
        "batches.create" => Some(with_db(state, req, batches_create)),
        "batches.list" => Some(with_db(state, req, |conn, _| batches_list(conn))),
        "batches.delete" => Some(with_db(state, req, batches_delete)),
        "teachers.add" => Some(with_db(state, req, teachers_add)),
        "teachers.list" => Some(with_db(state, req, |conn, _| teachers_list(conn))),
        _ => None,
    }
}
