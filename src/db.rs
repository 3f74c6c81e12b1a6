use rusqlite::Connection;
use std::path::Path;

/// Closed role vocabulary. Stored as lowercase text; anything else in the
/// column is a data error surfaced at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
    Admin,
    Alumni,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Alumni => "alumni",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            "alumni" => Some(Role::Alumni),
            _ => None,
        }
    }
}

/// Students graduate after this semester; the promotion sweep turns them
/// into alumni with semester reset to 0.
pub const TERMINAL_SEMESTER: i64 = 8;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            department TEXT NOT NULL DEFAULT 'BCA',
            designation TEXT NOT NULL DEFAULT 'Assistant Professor',
            is_hod INTEGER NOT NULL DEFAULT 0,
            push_token TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            enrollment_id TEXT NOT NULL UNIQUE,
            university_roll_no TEXT NOT NULL UNIQUE,
            class_roll_no TEXT NOT NULL DEFAULT '',
            batch TEXT NOT NULL,
            semester INTEGER NOT NULL DEFAULT 1,
            mobile TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            dob TEXT NOT NULL,
            push_token TEXT,
            password_digest TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'student'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_role_semester ON students(role, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_slots(
            id TEXT PRIMARY KEY,
            semester TEXT NOT NULL,
            day TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            subject TEXT NOT NULL,
            professor_id TEXT NOT NULL,
            room TEXT NOT NULL DEFAULT '101',
            batch TEXT,
            FOREIGN KEY(professor_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_semester_day ON timetable_slots(semester, day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_professor_day ON timetable_slots(professor_id, day)",
        [],
    )?;

    // Holiday presence suppresses session resolution for the whole date.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            reason TEXT NOT NULL DEFAULT 'Holiday',
            marked_by TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            batch TEXT NOT NULL,
            date TEXT NOT NULL,
            subject TEXT NOT NULL,
            teacher_id TEXT,
            UNIQUE(batch, date, subject)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_entries(
            record_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            PRIMARY KEY(record_id, student_id),
            FOREIGN KEY(record_id) REFERENCES attendance_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_batch ON attendance_records(batch)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_entries_student ON attendance_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS library_books(
            id TEXT PRIMARY KEY,
            isbn TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            author TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT 'General',
            total_qty INTEGER NOT NULL,
            available_qty INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS library_transactions(
            id TEXT PRIMARY KEY,
            book_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            student_roll TEXT NOT NULL,
            book_title TEXT NOT NULL,
            issue_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            return_date TEXT,
            status TEXT NOT NULL,
            FOREIGN KEY(book_id) REFERENCES library_books(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    // One open loan per (book, student); the insert itself is the duplicate
    // check, not an application-level scan.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_open_unique
         ON library_transactions(book_id, student_id) WHERE status = 'ISSUED'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_student ON library_transactions(student_id, status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_status_due ON library_transactions(status, due_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            duration TEXT NOT NULL,
            venue TEXT NOT NULL,
            semester TEXT NOT NULL,
            batch TEXT NOT NULL,
            professor TEXT NOT NULL DEFAULT '',
            teacher_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(batch, date, time)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_semester_batch ON exams(semester, batch)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_teacher ON exams(teacher_id)",
        [],
    )?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_and_rejects_unknown() {
        for role in [Role::Student, Role::Teacher, Role::Admin, Role::Alumni] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("hod"), None);
        assert_eq!(Role::parse("Student"), None);
    }
}
