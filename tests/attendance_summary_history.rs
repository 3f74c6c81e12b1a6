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
fn summary_rolls_up_per_subject_with_bounded_history() {
    let workspace = temp_dir("campus-summary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.add",
        json!({
            "name": "Ishaan Rao",
            "enrollmentId": "EN-100",
            "universityRollNo": "UR-100",
            "classRollNo": "7",
            "batch": "BCA-2023",
            "semester": 4,
            "dob": "02-03-2004"
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let classmate = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.add",
        json!({
            "name": "Kabir Shah",
            "enrollmentId": "EN-101",
            "universityRollNo": "UR-101",
            "classRollNo": "8",
            "batch": "BCA-2023",
            "semester": 4,
            "dob": "20-11-2004"
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    // Seven Maths sessions. The 16-02 record omits Ishaan entirely, which
    // counts as absent. Dates straddle a month boundary so a string sort
    // would order them wrongly.
    let maths_sessions = [
        ("05-01-2026", Some(true)),
        ("12-01-2026", Some(true)),
        ("19-01-2026", Some(false)),
        ("02-02-2026", Some(true)),
        ("09-02-2026", Some(true)),
        ("16-02-2026", None),
        ("23-02-2026", Some(true)),
    ];
    for (i, (date, present)) in maths_sessions.iter().enumerate() {
        let mut records = vec![json!({ "student": classmate, "isPresent": true })];
        if let Some(present) = present {
            records.push(json!({ "student": student, "isPresent": present }));
        }
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("maths-{}", i),
            "attendance.save",
            json!({
                "batch": "BCA-2023",
                "date": date,
                "subject": "Maths",
                "records": records
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.save",
        json!({
            "batch": "BCA-2023",
            "date": "10-01-2026",
            "subject": "Physics",
            "records": [{ "student": student, "isPresent": true }]
        }),
    );
    // Another batch's subject must never leak into this student's rollup.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.save",
        json!({
            "batch": "MCA-2023",
            "date": "10-01-2026",
            "subject": "Chemistry",
            "records": []
        }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.studentSummary",
        json!({ "studentId": student }),
    );
    let subjects = summary["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 2);

    let maths = &subjects[0];
    assert_eq!(maths["subject"].as_str(), Some("Maths"));
    assert_eq!(maths["total"].as_i64(), Some(7));
    assert_eq!(maths["attended"].as_i64(), Some(5));
    // Five most recent marks, newest first: 23-02 P, 16-02 A (omitted),
    // 09-02 P, 02-02 P, 19-01 A.
    let history: Vec<&str> = maths["history"]
        .as_array()
        .expect("history")
        .iter()
        .map(|h| h.as_str().expect("mark"))
        .collect();
    assert_eq!(history, vec!["P", "A", "P", "P", "A"]);

    let physics = &subjects[1];
    assert_eq!(physics["subject"].as_str(), Some("Physics"));
    assert_eq!(physics["total"].as_i64(), Some(1));
    assert_eq!(physics["attended"].as_i64(), Some(1));
    assert_eq!(physics["history"].as_array().map(|h| h.len()), Some(1));

    let missing = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.studentSummary",
        json!({ "studentId": "nobody" }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));
}
