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

fn create_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    role: &str,
    username: &str,
) {
    request_ok(
        stdin,
        reader,
        id,
        "users.create",
        json!({
            "roleName": role,
            "firstName": username,
            "lastName": "User",
            "email": format!("{}@srbmc.example", username),
            "username": username,
            "password": "secret123"
        }),
    );
}

#[test]
fn module_gate_enforced_per_actor_role() {
    let workspace = temp_dir("colleged-access-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = request_ok(&mut stdin, &mut reader, "2", "admin.seedRoles", json!({}));
    assert_eq!(seeded.get("created").and_then(|v| v.as_i64()), Some(5));
    // Re-seeding is a no-op.
    let seeded = request_ok(&mut stdin, &mut reader, "3", "admin.seedRoles", json!({}));
    assert_eq!(seeded.get("created").and_then(|v| v.as_i64()), Some(0));

    create_user(&mut stdin, &mut reader, "4", "Administrator", "admin");
    create_user(&mut stdin, &mut reader, "5", "Accountant", "cashier");
    create_user(&mut stdin, &mut reader, "6", "Admission Officer", "front_desk");

    // A read-only clerk role can never edit, regardless of module.
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "roles.create",
        json!({
            "roleName": "Auditor",
            "accessType": "Read",
            "accessLevel": 4,
            "actor": "admin"
        }),
    );
    create_user(&mut stdin, &mut reader, "8", "Auditor", "auditor");

    for (module, username, expected) in [
        ("fees", "cashier", true),
        ("students", "cashier", false),
        ("students", "front_desk", true),
        ("courses", "front_desk", true),
        ("fees", "front_desk", false),
        ("admin", "cashier", false),
        ("admin", "admin", true),
        ("fees", "auditor", false),
        ("exams", "admin", true),
    ] {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("can-{}-{}", module, username),
            "access.canEdit",
            json!({ "username": username, "module": module }),
        );
        assert_eq!(
            result.get("canEdit").and_then(|v| v.as_bool()),
            Some(expected),
            "{} / {}",
            module,
            username
        );
    }

    // Gated write: the cashier cannot touch the courses module.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "9",
        "courses.create",
        json!({
            "courseShortName": "BA",
            "courseFullName": "Bachelor of Arts",
            "actor": "cashier"
        }),
    );
    assert_eq!(code, "permission_denied");

    // The admission officer can.
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "courses.create",
        json!({
            "courseShortName": "BA",
            "courseFullName": "Bachelor of Arts",
            "actor": "front_desk"
        }),
    );

    // Unknown actors are refused outright.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "11",
        "courses.create",
        json!({
            "courseShortName": "MA",
            "courseFullName": "Master of Arts",
            "actor": "ghost"
        }),
    );
    assert_eq!(code, "permission_denied");

    // Deactivated accounts lose their edit rights.
    let users = request_ok(&mut stdin, &mut reader, "12", "users.list", json!({}));
    let cashier_id = users
        .get("users")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .find(|u| u.get("username").and_then(|v| v.as_str()) == Some("cashier"))
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "users.update",
        json!({ "userId": cashier_id, "patch": { "status": "Inactive" } }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "14",
        "fees.syncTotals",
        json!({ "actor": "cashier" }),
    );
    assert_eq!(code, "permission_denied");
}

#[test]
fn authentication_and_duplicate_users() {
    let workspace = temp_dir("colleged-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "admin.seedRoles", json!({}));
    create_user(&mut stdin, &mut reader, "3", "Administrator", "admin");

    let authed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.authenticate",
        json!({ "username": "admin", "password": "secret123" }),
    );
    assert_eq!(
        authed.get("roleName").and_then(|v| v.as_str()),
        Some("Administrator")
    );
    assert_eq!(
        authed.get("accessType").and_then(|v| v.as_str()),
        Some("Edit")
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "users.authenticate",
        json!({ "username": "admin", "password": "wrong" }),
    );
    assert_eq!(code, "permission_denied");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "users.authenticate",
        json!({ "username": "nobody", "password": "secret123" }),
    );
    assert_eq!(code, "permission_denied");

    // Username and email are natural keys.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "users.create",
        json!({
            "roleName": "Administrator",
            "firstName": "Second",
            "lastName": "Admin",
            "email": "other@srbmc.example",
            "username": "admin",
            "password": "secret456"
        }),
    );
    assert_eq!(code, "duplicate");
}
