use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn session_catalog_crud_and_validation() {
    let workspace = temp_dir("campus-timetable");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.add",
        json!({ "name": "Dr. A. Sharma", "department": "CS", "isHOD": true }),
    )["teacherId"]
        .as_str()
        .expect("teacherId")
        .to_string();

    // Sunday is not a schedulable day.
    let sunday = request(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.create",
        json!({
            "semester": "3",
            "day": "Sun",
            "startTime": "9:00 AM",
            "endTime": "10:00 AM",
            "subject": "Algorithms",
            "professorId": teacher_id
        }),
    );
    assert_eq!(sunday["error"]["code"].as_str(), Some("bad_params"));

    // An unknown professor is a lookup failure, not a dangling reference.
    let ghost = request(
        &mut stdin,
        &mut reader,
        "4",
        "timetable.create",
        json!({
            "semester": "3",
            "day": "Mon",
            "startTime": "9:00 AM",
            "endTime": "10:00 AM",
            "subject": "Algorithms",
            "professorId": "nobody"
        }),
    );
    assert_eq!(ghost["error"]["code"].as_str(), Some("not_found"));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.create",
        json!({
            "semester": "3",
            "day": "Mon",
            "startTime": "9:00 AM",
            "endTime": "10:00 AM",
            "subject": "Algorithms",
            "professorId": teacher_id
        }),
    );
    let slot_id = created["slotId"].as_str().expect("slotId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.update",
        json!({ "slotId": slot_id, "room": "310", "subject": "Advanced Algorithms" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "timetable.list",
        json!({ "semester": "3" }),
    );
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["subject"].as_str(), Some("Advanced Algorithms"));
    assert_eq!(sessions[0]["room"].as_str(), Some("310"));
    // Untouched fields survive a partial update.
    assert_eq!(sessions[0]["startTime"].as_str(), Some("9:00 AM"));
    assert_eq!(sessions[0]["professor"]["name"].as_str(), Some("Dr. A. Sharma"));
    assert_eq!(sessions[0]["professor"]["department"].as_str(), Some("CS"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.update",
        json!({ "slotId": "no-such-slot", "room": "1" }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.delete",
        json!({ "slotId": slot_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.delete",
        json!({ "slotId": slot_id }),
    );
    assert_eq!(gone["error"]["code"].as_str(), Some("not_found"));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "timetable.list",
        json!({ "semester": "3" }),
    );
    assert!(empty["sessions"].as_array().expect("sessions").is_empty());
}
