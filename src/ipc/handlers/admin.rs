use crate::access::{self, Module};
use crate::db;
use crate::ids;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{enforce_gate, opt_str, require_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}${}", salt, hex)
}

fn verify_password(stored: &str, password: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex == expected
}

fn handle_seed_roles(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Admin) {
        return err(&req.id, code, msg, None);
    }

    let mut created = 0usize;
    for &(name, description, level) in access::SEED_ROLES {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO user_roles(role_id, role_name, role_description, access_type, access_level)
             VALUES(?, ?, ?, 'Edit', ?)",
            (Uuid::new_v4().to_string(), name, description, level),
        );
        match inserted {
            Ok(n) => created += n,
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        }
    }

    ok(&req.id, json!({ "created": created }))
}

fn handle_roles_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Admin) {
        return err(&req.id, code, msg, None);
    }

    let role_name = match require_str(&req.params, "roleName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if role_name.is_empty() {
        return err(&req.id, "bad_params", "roleName must not be empty", None);
    }
    let access_type = opt_str(&req.params, "accessType").unwrap_or_else(|| "Edit".to_string());
    if access_type != "Edit" && access_type != "Read" {
        return err(&req.id, "bad_params", "accessType must be Edit or Read", None);
    }
    let access_level = req
        .params
        .get("accessLevel")
        .and_then(|v| v.as_i64())
        .unwrap_or(3);

    let role_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO user_roles(role_id, role_name, role_description, access_type, access_level)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            &role_id,
            &role_name,
            opt_str(&req.params, "roleDescription"),
            &access_type,
            access_level,
        ],
    );

    match inserted {
        Ok(_) => ok(&req.id, json!({ "roleId": role_id })),
        Err(e) if ids::is_unique_violation(&e) => err(
            &req.id,
            "duplicate",
            format!("role {} already exists", role_name),
            None,
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_roles_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "roles": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           r.role_id,
           r.role_name,
           r.role_description,
           r.access_type,
           r.access_level,
           (SELECT COUNT(*) FROM user_profiles u WHERE u.role_id = r.role_id) AS user_count
         FROM user_roles r
         ORDER BY r.access_level, r.role_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "roleId": row.get::<_, String>(0)?,
                "roleName": row.get::<_, String>(1)?,
                "roleDescription": row.get::<_, Option<String>>(2)?,
                "accessType": row.get::<_, String>(3)?,
                "accessLevel": row.get::<_, i64>(4)?,
                "userCount": row.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(roles) => ok(&req.id, json!({ "roles": roles })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.first_name, u.last_name, u.email, u.phone, u.username,
                u.status, r.role_name, u.created_at
         FROM user_profiles u
         JOIN user_roles r ON r.role_id = u.role_id
         ORDER BY u.last_name, u.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "email": row.get::<_, String>(3)?,
                "phone": row.get::<_, Option<String>>(4)?,
                "username": row.get::<_, String>(5)?,
                "status": row.get::<_, String>(6)?,
                "roleName": row.get::<_, String>(7)?,
                "createdAt": row.get::<_, Option<String>>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Admin) {
        return err(&req.id, code, msg, None);
    }

    let role_name = match require_str(&req.params, "roleName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let first_name = match require_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let last_name = match require_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let email = match require_str(&req.params, "email") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let username = match require_str(&req.params, "username") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let password = match require_str(&req.params, "password") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if username.is_empty() || password.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "username/password must not be empty",
            None,
        );
    }

    let role_id: Option<String> = match conn
        .query_row(
            "SELECT role_id FROM user_roles WHERE role_name = ?",
            [&role_name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(role_id) = role_id else {
        return err(&req.id, "not_found", "role not found", None);
    };

    let user_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO user_profiles(
            id, role_id, first_name, last_name, email, phone, gender, birthdate,
            street, area_village, city_tehsil, state, username, password_hash,
            status, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &user_id,
            &role_id,
            &first_name,
            &last_name,
            &email,
            opt_str(&req.params, "phone"),
            opt_str(&req.params, "gender"),
            opt_str(&req.params, "birthdate"),
            opt_str(&req.params, "street"),
            opt_str(&req.params, "areaVillage"),
            opt_str(&req.params, "cityTehsil"),
            opt_str(&req.params, "state"),
            &username,
            hash_password(&password),
            opt_str(&req.params, "status").unwrap_or_else(|| "Active".to_string()),
            db::now_utc(),
            db::now_utc(),
        ],
    );

    match inserted {
        Ok(_) => ok(&req.id, json!({ "userId": user_id })),
        Err(e) if ids::is_unique_violation(&e) => err(
            &req.id,
            "duplicate",
            "a user with that email or username already exists",
            None,
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Admin) {
        return err(&req.id, code, msg, None);
    }

    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM user_profiles WHERE id = ?", [&user_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();

    let text_fields = [
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("email", "email"),
        ("phone", "phone"),
        ("gender", "gender"),
        ("birthdate", "birthdate"),
        ("street", "street"),
        ("areaVillage", "area_village"),
        ("cityTehsil", "city_tehsil"),
        ("state", "state"),
        ("username", "username"),
    ];
    for (key, column) in text_fields {
        if let Some(v) = patch.get(key) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", key),
                    None,
                );
            };
            set_parts.push(format!("{} = ?", column));
            binds.push(rusqlite::types::Value::Text(s.trim().to_string()));
        }
    }

    if let Some(v) = patch.get("status") {
        let Some(s) = v.as_str().filter(|s| *s == "Active" || *s == "Inactive") else {
            return err(
                &req.id,
                "bad_params",
                "patch.status must be Active or Inactive",
                None,
            );
        };
        set_parts.push("status = ?".into());
        binds.push(rusqlite::types::Value::Text(s.to_string()));
    }

    if let Some(v) = patch.get("password") {
        let Some(s) = v.as_str().filter(|s| !s.trim().is_empty()) else {
            return err(&req.id, "bad_params", "patch.password must not be empty", None);
        };
        set_parts.push("password_hash = ?".into());
        binds.push(rusqlite::types::Value::Text(hash_password(s)));
    }

    if let Some(v) = patch.get("roleName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.roleName must be a string", None);
        };
        let role_id: Option<String> = match conn
            .query_row(
                "SELECT role_id FROM user_roles WHERE role_name = ?",
                [s],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some(role_id) = role_id else {
            return err(&req.id, "not_found", "role not found", None);
        };
        set_parts.push("role_id = ?".into());
        binds.push(rusqlite::types::Value::Text(role_id));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch contains no known fields", None);
    }

    set_parts.push("updated_at = ?".into());
    binds.push(rusqlite::types::Value::Text(db::now_utc()));
    binds.push(rusqlite::types::Value::Text(user_id.clone()));

    let sql = format!(
        "UPDATE user_profiles SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    match conn.execute(&sql, rusqlite::params_from_iter(binds)) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) if ids::is_unique_violation(&e) => err(
            &req.id,
            "duplicate",
            "a user with that email or username already exists",
            None,
        ),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Admin) {
        return err(&req.id, code, msg, None);
    }

    let user_id = match require_str(&req.params, "userId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match conn.execute("DELETE FROM user_profiles WHERE id = ?", [&user_id]) {
        Ok(0) => err(&req.id, "not_found", "user not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_users_authenticate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match require_str(&req.params, "username") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let password = match require_str(&req.params, "password") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let found = conn
        .query_row(
            "SELECT u.id, u.password_hash, u.status, u.first_name, u.last_name,
                    r.role_name, r.access_type
             FROM user_profiles u
             JOIN user_roles r ON r.role_id = u.role_id
             WHERE u.username = ?",
            [&username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional();

    let found = match found {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((user_id, stored_hash, status, first_name, last_name, role_name, access_type)) = found
    else {
        return err(&req.id, "permission_denied", "invalid username or password", None);
    };
    if !verify_password(&stored_hash, &password) {
        return err(&req.id, "permission_denied", "invalid username or password", None);
    }
    if status != "Active" {
        return err(&req.id, "permission_denied", "account is inactive", None);
    }

    ok(
        &req.id,
        json!({
            "userId": user_id,
            "username": username,
            "firstName": first_name,
            "lastName": last_name,
            "roleName": role_name,
            "accessType": access_type
        }),
    )
}

fn handle_access_can_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match require_str(&req.params, "username") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let module = match require_str(&req.params, "module") {
        Ok(v) => match Module::parse(&v) {
            Some(m) => m,
            None => return err(&req.id, "bad_params", format!("unknown module: {}", v), None),
        },
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let found = conn
        .query_row(
            "SELECT r.role_name, r.access_type, u.status
             FROM user_profiles u
             JOIN user_roles r ON r.role_id = u.role_id
             WHERE u.username = ?",
            [&username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional();

    match found {
        Ok(Some((role_name, access_type, status))) => {
            let allowed =
                status == "Active" && access::can_edit(&role_name, &access_type, module);
            ok(
                &req.id,
                json!({ "canEdit": allowed, "roleName": role_name }),
            )
        }
        Ok(None) => err(&req.id, "not_found", "user not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.seedRoles" => Some(handle_seed_roles(state, req)),
        "roles.create" => Some(handle_roles_create(state, req)),
        "roles.list" => Some(handle_roles_list(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        "users.authenticate" => Some(handle_users_authenticate(state, req)),
        "access.canEdit" => Some(handle_access_can_edit(state, req)),
        _ => None,
    }
}
