use serde_json::json;
use std::collections::HashSet;
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
    let exe = env!("CARGO_BIN_EXE_colleged");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn colleged");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn repeated_mints_stay_distinct_and_well_formed() {
    let workspace = temp_dir("colleged-identity");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseShortName": "BCOM", "courseFullName": "Bachelor of Commerce" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "offerings.create",
        json!({
            "courseShortName": "BCOM",
            "courseFullName": "Bachelor of Commerce First Year",
            "yearSemester": "1st Year",
            "courseTuitionFee": 12000.0
        }),
    );

    let mut student_ids = HashSet::new();
    let mut internal_ids = Vec::new();
    for i in 0..5 {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("create{}", i),
            "students.create",
            json!({
                "firstName": format!("Student{}", i),
                "lastName": "Test",
                "gender": "Other",
                "currentCourse": "Bachelor of Commerce First Year",
                "admissionDate": "2025-07-01"
            }),
        );
        let uid = created
            .get("studentUniqueId")
            .and_then(|v| v.as_str())
            .unwrap()
            .to_string();
        assert_eq!(uid, format!("BCOM-25-{:03}", i + 1));
        assert!(student_ids.insert(uid), "duplicate student id");
        internal_ids.push(
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .unwrap()
                .to_string(),
        );
    }

    // Invoice numbers share one per-day sequence across students.
    let mut invoice_numbers = HashSet::new();
    for (i, sid) in internal_ids.iter().enumerate() {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("pay{}", i),
            "payments.record",
            json!({ "studentId": sid, "amount": 1000.0 }),
        );
        let number = result
            .get("invoice")
            .and_then(|inv| inv.get("invoiceNumber"))
            .and_then(|v| v.as_str())
            .unwrap()
            .to_string();
        assert_eq!(number.len(), 15);
        assert!(number.starts_with("INV"));
        assert!(number[3..].chars().all(|c| c.is_ascii_digit()));
        assert!(
            number.ends_with(&format!("{:04}", i + 1)),
            "unexpected sequence in {}",
            number
        );
        assert!(invoice_numbers.insert(number), "duplicate invoice number");
    }
}
