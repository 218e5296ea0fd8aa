use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::access::{self, Module};

/// Required string param; trimmed. Missing or non-string yields the
/// `bad_params` message for the caller to wrap.
pub fn require_str(params: &Value, key: &str) -> Result<String, String> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) => Ok(v.trim().to_string()),
        None => Err(format!("missing {}", key)),
    }
}

/// Optional string param; empty strings read as absent.
pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn opt_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

pub fn opt_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Module edit gate. Commands carry an optional `actor` username; when one
/// is named the gate is enforced against the actor's role. Actor-less calls
/// come from trusted adapters (bootstrap, migrations, scripted admin).
pub fn enforce_gate(
    conn: &Connection,
    params: &Value,
    module: Module,
) -> Result<(), (&'static str, String)> {
    let Some(actor) = opt_str(params, "actor") else {
        return Ok(());
    };

    let found = conn
        .query_row(
            "SELECT ur.role_name, ur.access_type, up.status
             FROM user_profiles up
             JOIN user_roles ur ON ur.role_id = up.role_id
             WHERE up.username = ?",
            [&actor],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| ("db_query_failed", e.to_string()))?;

    let Some((role_name, access_type, status)) = found else {
        return Err((
            "permission_denied",
            format!("unknown actor: {}", actor),
        ));
    };
    if status != "Active" {
        return Err((
            "permission_denied",
            format!("actor {} is inactive", actor),
        ));
    }
    if !access::can_edit(&role_name, &access_type, module) {
        return Err((
            "permission_denied",
            format!(
                "role {} may not edit the {} module",
                role_name,
                module.as_str()
            ),
        ));
    }
    Ok(())
}
