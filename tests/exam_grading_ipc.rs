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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
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

fn setup_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "s2",
        "courses.create",
        json!({ "courseShortName": "BA", "courseFullName": "Bachelor of Arts" }),
    );
    request_ok(
        stdin,
        reader,
        "s3",
        "offerings.create",
        json!({
            "courseShortName": "BA",
            "courseFullName": "Bachelor of Arts First Year",
            "yearSemester": "1st Year",
            "courseTuitionFee": 16500.0
        }),
    );
    let created = request_ok(
        stdin,
        reader,
        "s4",
        "students.create",
        json!({
            "firstName": "Zoya",
            "lastName": "Bishnoi",
            "gender": "Female",
            "currentCourse": "Bachelor of Arts First Year",
            "admissionDate": "2025-06-10"
        }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string()
}

#[test]
fn passing_exam_totals_percentage_and_grade() {
    let workspace = temp_dir("colleged-exam-pass");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.save",
        json!({
            "studentId": student_id,
            "examName": "First Semester",
            "semester": "1st Sem",
            "examDate": "2025-12-05",
            "subjects": [
                { "name": "Hindi Literature", "maxMarks": 100, "obtainedMarks": 85 },
                { "name": "Political Science", "maxMarks": 100, "obtainedMarks": 72 },
                { "name": "History", "maxMarks": 100, "obtainedMarks": 40 }
            ]
        }),
    );
    assert_eq!(saved.get("totalMaxMarks").and_then(|v| v.as_i64()), Some(300));
    assert_eq!(
        saved.get("totalObtainedMarks").and_then(|v| v.as_i64()),
        Some(197)
    );
    assert_eq!(saved.get("percentage").and_then(|v| v.as_f64()), Some(65.67));
    assert_eq!(saved.get("grade").and_then(|v| v.as_str()), Some("B"));
    assert_eq!(
        saved.get("overallStatus").and_then(|v| v.as_str()),
        Some("Pass")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.list",
        json!({ "studentId": student_id }),
    );
    let exams = listed.get("exams").and_then(|v| v.as_array()).unwrap();
    assert_eq!(exams.len(), 1);
    assert_eq!(
        exams[0].get("promotionProcessed").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        exams[0]
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|s| s.len()),
        Some(3)
    );
    assert_eq!(
        exams[0].get("courseFullName").and_then(|v| v.as_str()),
        Some("Bachelor of Arts First Year")
    );
}

#[test]
fn failing_exam_blocks_promotion() {
    let workspace = temp_dir("colleged-exam-fail");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.save",
        json!({
            "studentId": student_id,
            "examName": "First Semester",
            "subjects": [
                { "name": "Hindi Literature", "maxMarks": 100, "obtainedMarks": 20 },
                { "name": "Political Science", "maxMarks": 100, "obtainedMarks": 30 }
            ]
        }),
    );
    assert_eq!(saved.get("percentage").and_then(|v| v.as_f64()), Some(25.0));
    assert_eq!(saved.get("grade").and_then(|v| v.as_str()), Some("F"));
    assert_eq!(
        saved.get("overallStatus").and_then(|v| v.as_str()),
        Some("Fail")
    );

    // No unprocessed passing exam, so the precondition fails.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "promote",
        json!({ "studentId": student_id }),
    );
    assert_eq!(code, "not_implemented");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "students.promote",
        json!({ "studentId": student_id }),
    );
    assert_eq!(code, "invariant");
}

#[test]
fn exam_edit_recomputes_and_respects_preconditions() {
    let workspace = temp_dir("colleged-exam-edit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.save",
        json!({
            "studentId": student_id,
            "examName": "Unit Test",
            "subjects": [
                { "name": "Hindi Literature", "maxMarks": 50, "obtainedMarks": 10 }
            ]
        }),
    );
    let exam_id = saved
        .get("examId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    assert_eq!(saved.get("grade").and_then(|v| v.as_str()), Some("F"));

    // Re-grading the same row replaces the totals.
    let resaved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.save",
        json!({
            "studentId": student_id,
            "examId": exam_id,
            "examName": "Unit Test",
            "subjects": [
                { "name": "Hindi Literature", "maxMarks": 50, "obtainedMarks": 45 }
            ]
        }),
    );
    assert_eq!(resaved.get("percentage").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(resaved.get("grade").and_then(|v| v.as_str()), Some("A+"));
    assert_eq!(
        resaved.get("overallStatus").and_then(|v| v.as_str()),
        Some("Pass")
    );

    // More than six subjects is rejected outright.
    let subjects: Vec<serde_json::Value> = (0..7)
        .map(|i| json!({ "name": format!("S{}", i), "maxMarks": 100, "obtainedMarks": 50 }))
        .collect();
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "exams.save",
        json!({ "studentId": student_id, "examName": "Too Big", "subjects": subjects }),
    );
    assert_eq!(code, "bad_params");

    // Empty subject names are excluded from the totals.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "exams.save",
        json!({
            "studentId": student_id,
            "examName": "Sparse",
            "subjects": [
                { "name": "Hindi Literature", "maxMarks": 100, "obtainedMarks": 60 },
                { "name": "", "maxMarks": 100, "obtainedMarks": 99 }
            ]
        }),
    );
    assert_eq!(saved.get("totalMaxMarks").and_then(|v| v.as_i64()), Some(100));
    assert_eq!(
        saved.get("totalObtainedMarks").and_then(|v| v.as_i64()),
        Some(60)
    );
}
