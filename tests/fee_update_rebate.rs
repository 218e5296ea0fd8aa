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
) -> (String, String) {
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
    (
        created
            .get("studentId")
            .and_then(|v| v.as_str())
            .unwrap()
            .to_string(),
        created
            .get("feeId")
            .and_then(|v| v.as_str())
            .unwrap()
            .to_string(),
    )
}

#[test]
fn granted_rebate_lowers_amount_after_rebate_and_due() {
    let workspace = temp_dir("colleged-rebate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (student_id, fee_id) = setup_student(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "payments.record",
        json!({ "studentId": student_id, "amount": 5000.0 }),
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.update",
        json!({
            "feeId": fee_id,
            "patch": { "meeraRebateStatus": "Granted", "meeraRebateAmount": 2000.0 }
        }),
    );
    let fee = updated.get("fee").expect("fee");
    assert_eq!(fee.get("totalFee").and_then(|v| v.as_f64()), Some(16500.0));
    assert_eq!(
        fee.get("totalAmountAfterRebate").and_then(|v| v.as_f64()),
        Some(14500.0)
    );
    assert_eq!(
        fee.get("totalAmountDue").and_then(|v| v.as_f64()),
        Some(9500.0)
    );
    // Derived booleans stay monotone: granted implies approved and applied.
    assert_eq!(fee.get("meeraRebateGranted").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(fee.get("meeraRebateApproved").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(fee.get("meeraRebateApplied").and_then(|v| v.as_bool()), Some(true));

    // The student's scholarship enum follows the ledger.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        detail
            .get("student")
            .and_then(|s| s.get("rebateMeeraScholarshipStatus"))
            .and_then(|v| v.as_str()),
        Some("Granted")
    );

    // An applied-but-not-granted rebate does not discount anything.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.update",
        json!({
            "feeId": fee_id,
            "patch": { "meeraRebateStatus": "Applied" }
        }),
    );
    let fee = updated.get("fee").expect("fee");
    assert_eq!(
        fee.get("totalAmountAfterRebate").and_then(|v| v.as_f64()),
        Some(16500.0)
    );
    assert_eq!(
        fee.get("totalAmountDue").and_then(|v| v.as_f64()),
        Some(11500.0)
    );
    assert_eq!(fee.get("meeraRebateGranted").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(fee.get("meeraRebateApplied").and_then(|v| v.as_bool()), Some(true));

    // Rejection zeroes the amount.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.update",
        json!({
            "feeId": fee_id,
            "patch": { "scholarshipStatus": "Rejected", "governmentScholarshipAmount": 7000.0 }
        }),
    );
    let fee = updated.get("fee").expect("fee");
    assert_eq!(
        fee.get("governmentScholarshipAmount").and_then(|v| v.as_f64()),
        Some(0.0)
    );

    // Unknown status strings never reach the store.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "fees.update",
        json!({ "feeId": fee_id, "patch": { "meeraRebateStatus": "granted" } }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn component_updates_recompute_stored_totals() {
    let workspace = temp_dir("colleged-fee-components");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (_student_id, fee_id) = setup_student(&mut stdin, &mut reader, &workspace);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "fees.update",
        json!({
            "feeId": fee_id,
            "patch": {
                "enrollmentFee": 500.0,
                "eligibilityCertificateFee": 150.0,
                "universityAffiliationFee": 300.0,
                "universitySportsFee": 50.0,
                "universityDevelopmentFee": 200.0,
                "tcCcFee": 75.0,
                "miscellaneousFee1": 10.0,
                "miscellaneousFee2": 15.0,
                "miscellaneousFee3": 20.0
            }
        }),
    );
    let fee = updated.get("fee").expect("fee");
    // 16500 + 500 + 150 + 300 + 50 + 200 + 75 + 10 + 15 + 20
    assert_eq!(fee.get("totalFee").and_then(|v| v.as_f64()), Some(17820.0));
    assert_eq!(
        fee.get("totalAmountAfterRebate").and_then(|v| v.as_f64()),
        Some(17820.0)
    );
    assert_eq!(
        fee.get("totalAmountDue").and_then(|v| v.as_f64()),
        Some(17820.0)
    );

    // A partial patch leaves the other components alone.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.update",
        json!({ "feeId": fee_id, "patch": { "enrollmentFee": 0.0 } }),
    );
    let fee = updated.get("fee").expect("fee");
    assert_eq!(fee.get("totalFee").and_then(|v| v.as_f64()), Some(17320.0));
    assert_eq!(
        fee.get("eligibilityCertificateFee").and_then(|v| v.as_f64()),
        Some(150.0)
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "fees.update",
        json!({ "feeId": "no-such-row", "patch": { "enrollmentFee": 1.0 } }),
    );
    assert_eq!(code, "not_found");
}
