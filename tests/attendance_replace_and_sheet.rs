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

fn add_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    suffix: &str,
    class_roll: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "students.add",
        json!({
            "name": name,
            "enrollmentId": format!("EN-{}", suffix),
            "universityRollNo": format!("UR-{}", suffix),
            "classRollNo": class_roll,
            "batch": "BCA-2024",
            "semester": 3,
            "dob": "15-08-2005"
        }),
    );
    result["studentId"].as_str().expect("studentId").to_string()
}

fn sheet_rows(sheet: &serde_json::Value) -> Vec<(String, String)> {
    sheet["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|s| {
            (
                s["rollNumber"].as_str().expect("roll").to_string(),
                s["status"].as_str().expect("status").to_string(),
            )
        })
        .collect()
}

#[test]
fn sheet_synthesis_and_replace_on_save() {
    let workspace = temp_dir("campus-attendance");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let meera = add_student(&mut stdin, &mut reader, "2", "Meera Nair", "001", "10");
    let aarav = add_student(&mut stdin, &mut reader, "3", "Aarav Gupta", "002", "2");
    let zoya = add_student(&mut stdin, &mut reader, "4", "Zoya Khan", "003", "A-1");

    let key = json!({ "batch": "BCA-2024", "date": "03-08-2026", "subject": "Maths" });

    // No record yet: synthesized all-absent roster, numeric rolls first
    // ascending, non-numeric last.
    let fresh = request_ok(&mut stdin, &mut reader, "5", "attendance.sheet", key.clone());
    assert_eq!(fresh["fresh"].as_bool(), Some(true));
    assert_eq!(
        sheet_rows(&fresh),
        vec![
            ("2".to_string(), "Absent".to_string()),
            ("10".to_string(), "Absent".to_string()),
            ("A-1".to_string(), "Absent".to_string()),
        ]
    );

    let mut save = key.clone();
    save["teacherId"] = json!("t-prov");
    save["records"] = json!([
        { "student": aarav, "isPresent": true },
        { "student": meera, "isPresent": false },
        { "student": zoya, "isPresent": true },
    ]);
    let _ = request_ok(&mut stdin, &mut reader, "6", "attendance.save", save);

    let stored = request_ok(&mut stdin, &mut reader, "7", "attendance.sheet", key.clone());
    assert_eq!(stored["fresh"].as_bool(), Some(false));
    assert_eq!(
        sheet_rows(&stored),
        vec![
            ("2".to_string(), "Present".to_string()),
            ("10".to_string(), "Absent".to_string()),
            ("A-1".to_string(), "Present".to_string()),
        ]
    );

    // Second save for the same key replaces the record in full; nothing
    // from the first submission survives.
    let mut resave = key.clone();
    resave["records"] = json!([{ "student": meera, "isPresent": true }]);
    let _ = request_ok(&mut stdin, &mut reader, "8", "attendance.save", resave);

    let replaced = request_ok(&mut stdin, &mut reader, "9", "attendance.sheet", key.clone());
    assert_eq!(replaced["fresh"].as_bool(), Some(false));
    assert_eq!(
        sheet_rows(&replaced),
        vec![("10".to_string(), "Present".to_string())]
    );

    // Entries whose student no longer resolves are dropped on read.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.delete",
        json!({ "studentId": meera }),
    );
    let orphaned = request_ok(&mut stdin, &mut reader, "11", "attendance.sheet", key);
    assert_eq!(orphaned["fresh"].as_bool(), Some(false));
    assert!(sheet_rows(&orphaned).is_empty());

    // A malformed date never creates a record.
    let bad = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.save",
        json!({
            "batch": "BCA-2024",
            "date": "2026-08-03",
            "subject": "Maths",
            "records": []
        }),
    );
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_params"));
}
