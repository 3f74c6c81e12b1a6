use crate::clock::{days_late, default_due_date, parse_instant};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::roster::lookup_student_by_roll;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, is_unique_violation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{dispatch, PushGateway};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const FINE_PER_DAY: i64 = 5;
const BOOK_LIMIT: i64 = 5;

const STATUS_ISSUED: &str = "ISSUED";
const STATUS_RETURNED: &str = "RETURNED";

/// Fine accrued by an open loan. Returned transactions never reach this:
/// fines are computed only against currently-open loans.
fn overdue_fine(due: DateTime<Utc>, today: DateTime<Utc>) -> i64 {
    days_late(due, today) * FINE_PER_DAY
}

fn book_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "isbn": r.get::<_, String>(1)?,
        "title": r.get::<_, String>(2)?,
        "author": r.get::<_, String>(3)?,
        "category": r.get::<_, String>(4)?,
        "totalQty": r.get::<_, i64>(5)?,
        "availableQty": r.get::<_, i64>(6)?
    }))
}

const BOOK_COLUMNS: &str = "id, isbn, title, author, category, total_qty, available_qty";

/// New stock for a new isbn; an existing isbn tops up both counters.
fn add_book(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let isbn = get_required_str(params, "isbn")?;
    let title = get_required_str(params, "title")?;
    let qty = params.get("qty").and_then(|v| v.as_i64()).unwrap_or(0);
    if qty < 1 {
        return Err(HandlerErr::bad_params("qty must be at least 1"));
    }
    let author = get_optional_str(params, "author").unwrap_or_default();
    let category = get_optional_str(params, "category").unwrap_or_else(|| "General".to_string());

    let topped_up = conn
        .execute(
            "UPDATE library_books
             SET total_qty = total_qty + ?, available_qty = available_qty + ?
             WHERE isbn = ?",
            rusqlite::params![qty, qty, isbn],
        )
        .map_err(|e| HandlerErr::db_update(e, "library_books"))?;

    if topped_up == 0 {
        conn.execute(
            "INSERT INTO library_books(id, isbn, title, author, category, total_qty, available_qty, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                isbn,
                title,
                author,
                category,
                qty,
                qty,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| HandlerErr::db_insert(e, "library_books"))?;
    }

    let sql = format!("SELECT {} FROM library_books WHERE isbn = ?", BOOK_COLUMNS);
    let book = conn
        .query_row(&sql, [&isbn], book_json)
        .map_err(HandlerErr::db_query)?;
    Ok(json!({
        "message": if topped_up > 0 { "Book quantity updated" } else { "New book added" },
        "book": book
    }))
}

/// Total-quantity edits shift availability by the same delta; the guard in
/// the UPDATE keeps stock from shrinking below the currently issued count.
fn edit_book(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let book_id = get_required_str(params, "bookId")?;
    let new_total = params.get("qty").and_then(|v| v.as_i64());
    let title = get_optional_str(params, "title");
    let author = get_optional_str(params, "author");
    let isbn = get_optional_str(params, "isbn");
    let category = get_optional_str(params, "category");

    let exists = conn
        .query_row("SELECT 1 FROM library_books WHERE id = ?", [&book_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("Book not found"));
    }

    if let Some(new_total) = new_total {
        if new_total < 0 {
            return Err(HandlerErr::bad_params("qty must not be negative"));
        }
        let adjusted = conn
            .execute(
                "UPDATE library_books
                 SET available_qty = available_qty + (? - total_qty), total_qty = ?
                 WHERE id = ? AND available_qty + (? - total_qty) >= 0",
                rusqlite::params![new_total, new_total, book_id, new_total],
            )
            .map_err(|e| HandlerErr::db_update(e, "library_books"))?;
        if adjusted == 0 {
            return Err(HandlerErr::conflict(
                "Cannot reduce stock below issued amount.",
            ));
        }
    }

    let updated = conn.execute(
        "UPDATE library_books
         SET title = COALESCE(?, title),
             author = COALESCE(?, author),
             isbn = COALESCE(?, isbn),
             category = COALESCE(?, category)
         WHERE id = ?",
        rusqlite::params![title, author, isbn, category, book_id],
    );
    match updated {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(HandlerErr::conflict("Another book already has this ISBN"))
        }
        Err(e) => return Err(HandlerErr::db_update(e, "library_books")),
    }

    let sql = format!("SELECT {} FROM library_books WHERE id = ?", BOOK_COLUMNS);
    let book = conn
        .query_row(&sql, [&book_id], book_json)
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "message": "Book updated", "book": book }))
}

enum IssueFail {
    NotFound,
    OutOfStock(String),
    AlreadyIssued(String),
    Db(rusqlite::Error),
}

fn issue_one(
    conn: &Connection,
    book_id: &str,
    student_id: &str,
    student_name: &str,
    student_roll: &str,
    issue_date: &str,
    due_date: &str,
) -> Result<String, IssueFail> {
    let book: Option<String> = conn
        .query_row(
            "SELECT title FROM library_books WHERE id = ?",
            [book_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(IssueFail::Db)?;
    let Some(title) = book else {
        return Err(IssueFail::NotFound);
    };

    // Availability check and decrement are one conditional update: two
    // racing issues of the last copy cannot both pass.
    let decremented = conn
        .execute(
            "UPDATE library_books SET available_qty = available_qty - 1
             WHERE id = ? AND available_qty > 0",
            [book_id],
        )
        .map_err(IssueFail::Db)?;
    if decremented == 0 {
        return Err(IssueFail::OutOfStock(title));
    }

    // The partial unique index on open (book, student) pairs is the
    // duplicate check; a bounce here rolls the decrement back with the
    // enclosing savepoint.
    let inserted = conn.execute(
        "INSERT INTO library_transactions(id, book_id, student_id, student_name, student_roll,
                                          book_title, issue_date, due_date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            book_id,
            student_id,
            student_name,
            student_roll,
            title,
            issue_date,
            due_date,
            STATUS_ISSUED
        ],
    );
    match inserted {
        Ok(_) => Ok(title),
        Err(e) if is_unique_violation(&e) => Err(IssueFail::AlreadyIssued(title)),
        Err(e) => Err(IssueFail::Db(e)),
    }
}

/// Batch issue with per-book outcomes. Every requested id is attempted;
/// the whole operation fails only when nothing succeeded.
fn issue_batch(
    conn: &Connection,
    push: &dyn PushGateway,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(book_ids) = params.get("bookIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing bookIds"));
    };
    let book_ids: Vec<String> = book_ids
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    if book_ids.is_empty() {
        return Err(HandlerErr::bad_params(
            "Valid list of Book IDs and Student Roll required",
        ));
    }
    let student_roll = get_required_str(params, "studentRoll")?;

    let Some((student_id, student_name, push_token)) =
        lookup_student_by_roll(conn, &student_roll)?
    else {
        return Err(HandlerErr::not_found("Student not found"));
    };

    let issue_instant = Utc::now();
    let due_instant = match get_optional_str(params, "dueDate") {
        Some(raw) => parse_instant(&raw)
            .ok_or_else(|| HandlerErr::bad_params("dueDate must be a date or RFC 3339 instant"))?,
        None => default_due_date(issue_instant),
    };
    let issue_date = issue_instant.to_rfc3339();
    let due_date = due_instant.to_rfc3339();

    let mut issued: Vec<String> = Vec::new();
    let mut failed: Vec<serde_json::Value> = Vec::new();

    let mut tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for book_id in &book_ids {
        let sp = tx.savepoint().map_err(HandlerErr::db_tx)?;
        match issue_one(
            &sp,
            book_id,
            &student_id,
            &student_name,
            &student_roll,
            &issue_date,
            &due_date,
        ) {
            Ok(title) => {
                sp.commit().map_err(HandlerErr::db_tx)?;
                issued.push(title);
            }
            Err(IssueFail::NotFound) => {
                failed.push(json!({ "id": book_id, "reason": "Not Found" }));
            }
            Err(IssueFail::OutOfStock(title)) => {
                failed.push(json!({ "title": title, "reason": "Out of Stock" }));
            }
            Err(IssueFail::AlreadyIssued(title)) => {
                failed.push(json!({ "title": title, "reason": "Already Issued" }));
            }
            Err(IssueFail::Db(e)) => return Err(HandlerErr::db_update(e, "library_transactions")),
        }
    }
    tx.commit().map_err(HandlerErr::db_tx)?;

    // Ledger state is committed; delivery is fire-and-forget.
    if !issued.is_empty() {
        let book_word = if issued.len() == 1 { "book" } else { "books" };
        dispatch(
            push,
            vec![push_token],
            "Library Update",
            format!(
                "You have borrowed {} {}. Please return by {}.",
                issued.len(),
                book_word,
                due_instant.format("%-d %b %Y")
            ),
            json!({ "screen": "Library" }),
        );
    }

    if issued.is_empty() && !failed.is_empty() {
        return Err(HandlerErr {
            code: "issue_failed",
            message: "Could not issue any books".to_string(),
            details: Some(json!({ "failed": failed })),
        });
    }
    Ok(json!({
        "message": format!("Successfully issued {} books", issued.len()),
        "issued": issued,
        "failed": failed
    }))
}

fn return_one(
    conn: &Connection,
    push: &dyn PushGateway,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let transaction_id = get_required_str(params, "transactionId")?;
    let row = conn
        .query_row(
            "SELECT book_id, student_id, book_title, status
             FROM library_transactions WHERE id = ?",
            [&transaction_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((book_id, student_id, book_title, status)) = row else {
        return Err(HandlerErr::not_found("Transaction not found"));
    };
    if status == STATUS_RETURNED {
        return Err(HandlerErr::conflict("Book already returned"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    // Terminal transition guarded in the UPDATE itself; a racing second
    // return affects zero rows and reports the conflict.
    let closed = tx
        .execute(
            "UPDATE library_transactions SET status = ?, return_date = ?
             WHERE id = ? AND status = ?",
            rusqlite::params![
                STATUS_RETURNED,
                Utc::now().to_rfc3339(),
                transaction_id,
                STATUS_ISSUED
            ],
        )
        .map_err(|e| HandlerErr::db_update(e, "library_transactions"))?;
    if closed == 0 {
        return Err(HandlerErr::conflict("Book already returned"));
    }
    tx.execute(
        "UPDATE library_books SET available_qty = MIN(total_qty, available_qty + 1)
         WHERE id = ?",
        [&book_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "library_books"))?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    let push_token: Option<String> = conn
        .query_row(
            "SELECT push_token FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .flatten();
    dispatch(
        push,
        vec![push_token],
        "Book Returned",
        format!("You have successfully returned \"{}\". Thank you!", book_title),
        json!({ "screen": "Library" }),
    );

    Ok(json!({ "message": "Book returned successfully" }))
}

fn library_dashboard(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM library_books ORDER BY created_at DESC",
        BOOK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let inventory = stmt
        .query_map([], book_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, book_title, student_name, student_roll, issue_date, due_date
             FROM library_transactions
             WHERE status = ?
             ORDER BY issue_date DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let active_issues = stmt
        .query_map([STATUS_ISSUED], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "studentRoll": r.get::<_, String>(3)?,
                "issueDate": r.get::<_, String>(4)?,
                "dueDate": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let total_books: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(total_qty), 0) FROM library_books",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let active_count = active_issues.len();
    Ok(json!({
        "inventory": inventory,
        "activeIssues": active_issues,
        "stats": {
            "totalBooks": total_books,
            "activeIssues": active_count
        }
    }))
}

/// Per-student lending view: open loans annotated with overdue state and
/// fines, closed loans as history. Accepts a `today` override so overdue
/// math is testable.
fn student_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let roll = get_required_str(params, "roll")?;
    let Some((student_id, _, _)) = lookup_student_by_roll(conn, &roll)? else {
        return Err(HandlerErr::not_found("Student not found"));
    };
    let today = match get_optional_str(params, "today") {
        Some(raw) => parse_instant(&raw)
            .ok_or_else(|| HandlerErr::bad_params("today must be a date or RFC 3339 instant"))?,
        None => Utc::now(),
    };

    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.book_title, b.author, t.issue_date, t.due_date, t.return_date, t.status
             FROM library_transactions t
             JOIN library_books b ON b.id = t.book_id
             WHERE t.student_id = ?
             ORDER BY t.issue_date DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<(String, String, String, String, String, Option<String>, String)> = stmt
        .query_map([&student_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut active_books = Vec::new();
    let mut history_books = Vec::new();
    let mut overdue_count = 0i64;
    let mut total_fine = 0i64;

    for (id, title, author, issue_date, due_date, return_date, status) in rows {
        if status == STATUS_ISSUED {
            let fine = parse_instant(&due_date)
                .map(|due| overdue_fine(due, today))
                .unwrap_or(0);
            let is_overdue = fine > 0;
            if is_overdue {
                overdue_count += 1;
                total_fine += fine;
            }
            active_books.push(json!({
                "id": id,
                "title": title,
                "author": if author.is_empty() { "Library Resource".to_string() } else { author },
                "issueDate": issue_date,
                "dueDate": due_date,
                "status": if is_overdue { "OVERDUE" } else { "ACTIVE" },
                "fine": fine
            }));
        } else {
            history_books.push(json!({
                "id": id,
                "title": title,
                "issueDate": issue_date,
                "returnDate": return_date,
                "status": STATUS_RETURNED
            }));
        }
    }

    Ok(json!({
        "stats": {
            "issued": active_books.len(),
            "limit": BOOK_LIMIT,
            "overdue": overdue_count,
            "fines": total_fine
        },
        "activeBooks": active_books,
        "historyBooks": history_books
    }))
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
        "library.addBook" => Some(with_state(state, req, |c, _, p| add_book(c, p))),
        "library.editBook" => Some(with_state(state, req, |c, _, p| edit_book(c, p))),
        "library.issue" => Some(with_state(state, req, issue_batch)),
        "library.return" => Some(with_state(state, req, return_one)),
        "library.dashboard" => Some(with_state(state, req, |c, _, _| library_dashboard(c))),
        "library.studentSummary" => Some(with_state(state, req, |c, _, p| student_summary(c, p))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::overdue_fine;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn fine_is_five_per_day_past_due() {
        let due = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(overdue_fine(due, due + Duration::days(3)), 15);
        assert_eq!(overdue_fine(due, due), 0);
        assert_eq!(overdue_fine(due, due - Duration::days(10)), 0);
    }
}
