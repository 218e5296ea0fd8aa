use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_str;
use crate::ipc::types::{AppState, Request};
use crate::migrate;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_migrate_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match migrate::run_all(conn) {
        Ok(reports) => {
            let items: Vec<serde_json::Value> = reports
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "applied": r.applied,
                        "affected": r.affected
                    })
                })
                .collect();
            let applied = reports.iter().filter(|r| r.applied).count();
            ok(
                &req.id,
                json!({ "migrations": items, "appliedCount": applied }),
            )
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_dashboard_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let totals = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM students),
            (SELECT COUNT(*) FROM students WHERE student_status = 'Active'),
            (SELECT COALESCE(SUM(
                installment_1 + installment_2 + installment_3 +
                installment_4 + installment_5 + installment_6), 0)
             FROM college_fees),
            (SELECT COALESCE(SUM(MAX(total_fee - total_fees_paid, 0)), 0)
             FROM college_fees)",
        [],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
            ))
        },
    );

    match totals {
        Ok((total_students, active_students, collected, pending)) => ok(
            &req.id,
            json!({
                "totalStudents": total_students,
                "activeStudents": active_students,
                "totalCollectedFees": crate::calc::round2(collected),
                "pendingFees": crate::calc::round2(pending)
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match require_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:?}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match require_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    // Release the open connection before the file is swapped out, then
    // reopen whatever ends up on disk (the old database on a failed import).
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }

    match imported {
        Ok(summary) => ok(
            &req.id,
            json!({ "bundleFormatDetected": summary.bundle_format_detected }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "migrate.run" => Some(handle_migrate_run(state, req)),
        "dashboard.stats" => Some(handle_dashboard_stats(state, req)),
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
