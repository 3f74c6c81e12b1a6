use crate::clock::{format_dmy, format_iso, parse_dmy, parse_iso};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify::{dispatch, PushGateway};
use chrono::Duration;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

fn all_student_tokens(conn: &Connection) -> Result<Vec<Option<String>>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT push_token FROM students")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([], |r| r.get::<_, Option<String>>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)
}

/// Marks or unmarks a date. Toggling twice returns session resolution to
/// its pre-holiday state exactly; both directions fan out a best-effort
/// push after the write lands.
fn holidays_toggle(
    conn: &Connection,
    push: &dyn PushGateway,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_str(params, "date")?;
    if parse_dmy(&date).is_none() {
        return Err(HandlerErr::bad_params("date must be DD-MM-YYYY"));
    }

    let existing: Option<String> = conn
        .query_row("SELECT reason FROM holidays WHERE date = ?", [&date], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;

    if existing.is_some() {
        conn.execute("DELETE FROM holidays WHERE date = ?", [&date])
            .map_err(|e| HandlerErr::db_update(e, "holidays"))?;
        let tokens = all_student_tokens(conn)?;
        dispatch(
            push,
            tokens,
            "Holiday Cancelled",
            format!(
                "Bad news! The holiday on {} has been cancelled. Classes are back on schedule.",
                date
            ),
            json!({ "screen": "TimeTable" }),
        );
        return Ok(json!({ "status": "removed" }));
    }

    let reason = get_optional_str(params, "reason").unwrap_or_else(|| "Holiday".to_string());
    let marked_by = get_optional_str(params, "markedBy");
    conn.execute(
        "INSERT INTO holidays(date, reason, marked_by) VALUES(?, ?, ?)",
        rusqlite::params![date, reason, marked_by],
    )
    .map_err(|e| HandlerErr::db_insert(e, "holidays"))?;
    let tokens = all_student_tokens(conn)?;
    dispatch(
        push,
        tokens,
        "Holiday Alert",
        format!("Pack your bags! {} declared for {}. Don't show up.", reason, date),
        json!({ "screen": "TimeTable" }),
    );
    Ok(json!({ "status": "added" }))
}

/// Expands an ISO start/end range, matches the persisted DD-MM-YYYY rows,
/// and hands the calendar widget back ISO dates.
fn holidays_range(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let start_raw = get_required_str(params, "start")?;
    let end_raw = get_required_str(params, "end")?;
    let Some(start) = parse_iso(&start_raw) else {
        return Err(HandlerErr::bad_params("start must be YYYY-MM-DD"));
    };
    let Some(end) = parse_iso(&end_raw) else {
        return Err(HandlerErr::bad_params("end must be YYYY-MM-DD"));
    };

    if (end - start).num_days() > 366 {
        return Err(HandlerErr::bad_params("range must not exceed a year"));
    }

    let mut target_dates = Vec::new();
    let mut current = start;
    while current <= end {
        target_dates.push(format_dmy(current));
        current = current + Duration::days(1);
    }
    if target_dates.is_empty() {
        return Ok(json!({ "dates": [] }));
    }

    let placeholders = vec!["?"; target_dates.len()].join(", ");
    let sql = format!("SELECT date FROM holidays WHERE date IN ({})", placeholders);
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let stored: Vec<String> = stmt
        .query_map(params_from_iter(target_dates.iter()), |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut dates: Vec<String> = stored
        .iter()
        .filter_map(|d| parse_dmy(d))
        .map(format_iso)
        .collect();
    dates.sort();
    Ok(json!({ "dates": dates }))
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
        "holidays.toggle" => Some(with_state(state, req, holidays_toggle)),
        "holidays.range" => Some(with_state(state, req, |c, _, p| holidays_range(c, p))),
        _ => None,
    }
}
