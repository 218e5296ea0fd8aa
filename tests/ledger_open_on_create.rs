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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn valid_student_id(id: &str) -> bool {
    let parts: Vec<&str> = id.split('-').collect();
    parts.len() == 3
        && !parts[0].is_empty()
        && parts[0].len() <= 10
        && parts[0].chars().all(|c| c.is_ascii_uppercase())
        && parts[1].len() == 2
        && parts[1].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() == 3
        && parts[2].chars().all(|c| c.is_ascii_digit())
}

#[test]
fn student_create_opens_ledger_row_with_copied_fees() {
    let workspace = temp_dir("colleged-ledger-open");
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
        json!({ "courseShortName": "BA", "courseFullName": "Bachelor of Arts", "durationYears": 3 }),
    );
    let offering = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "offerings.create",
        json!({
            "courseShortName": "BA",
            "courseFullName": "Bachelor of Arts First Year",
            "yearSemester": "1st Year",
            "courseTuitionFee": 15000.0,
            "miscCourseFees1": 1000.0,
            "miscCourseFees2": 500.0
        }),
    );
    assert_eq!(
        offering.get("totalCourseFees").and_then(|v| v.as_f64()),
        Some(16500.0)
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "firstName": "Zoya",
            "lastName": "Bishnoi",
            "gender": "Female",
            "currentCourse": "Bachelor of Arts First Year",
            "admissionDate": "2025-06-10",
            "street": "12 Temple Rd",
            "cityTehsil": "Raniwara",
            "state": "Rajasthan"
        }),
    );
    let unique_id = created
        .get("studentUniqueId")
        .and_then(|v| v.as_str())
        .expect("studentUniqueId");
    assert_eq!(unique_id, "BA-25-001");
    assert!(valid_student_id(unique_id), "bad id format: {}", unique_id);
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.get",
        json!({ "studentId": student_id }),
    );
    let fee = fee.get("fee").expect("fee");
    assert_eq!(fee.get("totalCourseFees").and_then(|v| v.as_f64()), Some(16500.0));
    assert_eq!(fee.get("totalFee").and_then(|v| v.as_f64()), Some(16500.0));
    assert_eq!(fee.get("totalFeesPaid").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(
        fee.get("totalAmountDue").and_then(|v| v.as_f64()),
        Some(16500.0)
    );
    assert_eq!(
        fee.get("paymentStatus").and_then(|v| v.as_str()),
        Some("Pending")
    );
    assert!(fee.get("coursedetailId").and_then(|v| v.as_str()).is_some());
    assert_eq!(
        fee.get("courseFullName").and_then(|v| v.as_str()),
        Some("Bachelor of Arts First Year")
    );

    // Address concatenation skips the empty parts.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        detail
            .get("student")
            .and_then(|s| s.get("concatenatedAddress"))
            .and_then(|v| v.as_str()),
        Some("12 Temple Rd, Raniwara, Rajasthan")
    );

    // The id series continues per course/year.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({
            "firstName": "Arjun",
            "lastName": "Mali",
            "gender": "Male",
            "currentCourse": "Bachelor of Arts First Year",
            "admissionDate": "2025-07-01"
        }),
    );
    assert_eq!(
        second.get("studentUniqueId").and_then(|v| v.as_str()),
        Some("BA-25-002")
    );

    // A course nothing resolves is rejected before any row is written.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({
            "firstName": "Nina",
            "lastName": "Rao",
            "gender": "Female",
            "currentCourse": "Doctorate of Nothing"
        }),
    );
    assert_eq!(code, "course_unresolved");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "course": "Bachelor of Arts First Year" }),
    );
    assert_eq!(listed.get("total").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn prefix_fallback_links_course_by_short_name_token() {
    let workspace = temp_dir("colleged-prefix-fallback");
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
        json!({ "courseShortName": "BSC", "courseFullName": "Bachelor of Science" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "offerings.create",
        json!({
            "courseShortName": "BSC",
            "courseFullName": "Bachelor of Science First Year",
            "yearSemester": "1st Year",
            "courseTuitionFee": 18000.0
        }),
    );

    // "BSC Part One" has no exact offering; the first token matches the
    // course short name and the fallback picks that course's offering.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "firstName": "Meera",
            "lastName": "Jain",
            "gender": "Female",
            "currentCourse": "BSC Part One",
            "admissionDate": "2025-06-15"
        }),
    );
    assert_eq!(
        created.get("studentUniqueId").and_then(|v| v.as_str()),
        Some("BSC-25-001")
    );

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.get",
        json!({ "studentId": created.get("studentId").and_then(|v| v.as_str()).unwrap() }),
    );
    assert_eq!(
        fee.get("fee")
            .and_then(|f| f.get("totalCourseFees"))
            .and_then(|v| v.as_f64()),
        Some(18000.0)
    );
}
