use crate::access::Module;
use crate::calc;
use crate::ids;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{enforce_gate, opt_f64, opt_i64, opt_str, require_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Short names become the prefix of every student id in the course, so they
/// have to satisfy the id grammar up front.
fn valid_short_name(s: &str) -> bool {
    !s.is_empty() && s.len() <= 10 && s.chars().all(|c| c.is_ascii_uppercase())
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.course_id,
           c.course_short_name,
           c.course_full_name,
           c.course_category,
           c.duration_years,
           (SELECT COUNT(*) FROM course_details cd WHERE cd.course_short_name = c.course_short_name) AS offering_count,
           (SELECT COUNT(*) FROM subjects s WHERE s.course_short_name = c.course_short_name) AS subject_count
         FROM courses c
         ORDER BY c.course_short_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "courseId": row.get::<_, String>(0)?,
                "courseShortName": row.get::<_, String>(1)?,
                "courseFullName": row.get::<_, String>(2)?,
                "courseCategory": row.get::<_, Option<String>>(3)?,
                "durationYears": row.get::<_, Option<i64>>(4)?,
                "offeringCount": row.get::<_, i64>(5)?,
                "subjectCount": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let short_name = match require_str(&req.params, "courseShortName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if !valid_short_name(&short_name) {
        return err(
            &req.id,
            "bad_params",
            "courseShortName must be 1-10 uppercase letters",
            None,
        );
    }
    let full_name = match require_str(&req.params, "courseFullName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if full_name.is_empty() {
        return err(&req.id, "bad_params", "courseFullName must not be empty", None);
    }

    let course_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO courses(course_id, course_short_name, course_full_name, course_category, duration_years)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            &course_id,
            &short_name,
            &full_name,
            opt_str(&req.params, "courseCategory"),
            opt_i64(&req.params, "durationYears"),
        ],
    );

    match inserted {
        Ok(_) => ok(
            &req.id,
            json!({ "courseId": course_id, "courseShortName": short_name }),
        ),
        Err(e) if ids::is_unique_violation(&e) => err(
            &req.id,
            "duplicate",
            format!("course short name {} already exists", short_name),
            None,
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let course_id = match require_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };
    if patch.contains_key("courseShortName") {
        return err(
            &req.id,
            "bad_params",
            "courseShortName is a natural key and cannot be changed",
            None,
        );
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("courseFullName").and_then(|v| v.as_str()) {
        set_parts.push("course_full_name = ?".into());
        binds.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = patch.get("courseCategory").and_then(|v| v.as_str()) {
        set_parts.push("course_category = ?".into());
        binds.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = patch.get("durationYears").and_then(|v| v.as_i64()) {
        set_parts.push("duration_years = ?".into());
        binds.push(rusqlite::types::Value::Integer(v));
    }
    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch contains no known fields", None);
    }
    binds.push(rusqlite::types::Value::Text(course_id.clone()));

    let sql = format!("UPDATE courses SET {} WHERE course_id = ?", set_parts.join(", "));
    match conn.execute(&sql, rusqlite::params_from_iter(binds)) {
        Ok(0) => err(&req.id, "not_found", "course not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let course_id = match require_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let short_name: Option<String> = match conn
        .query_row(
            "SELECT course_short_name FROM courses WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(short_name) = short_name else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Ledger, invoice and exam rows keep their name snapshots; only the
    // foreign keys are detached before the course rows go away.
    let steps: &[(&str, &str)] = &[
        (
            "UPDATE college_fees SET coursedetail_id = NULL
             WHERE coursedetail_id IN (SELECT id FROM course_details WHERE course_short_name = ?1)",
            "college_fees",
        ),
        (
            "UPDATE exams SET coursedetail_id = NULL
             WHERE coursedetail_id IN (SELECT id FROM course_details WHERE course_short_name = ?1)",
            "exams",
        ),
        (
            "UPDATE college_fees SET course_id = NULL
             WHERE course_id = (SELECT course_id FROM courses WHERE course_short_name = ?1)",
            "college_fees",
        ),
        (
            "UPDATE exams SET course_id = NULL
             WHERE course_id = (SELECT course_id FROM courses WHERE course_short_name = ?1)",
            "exams",
        ),
        (
            "UPDATE invoices SET course_id = NULL
             WHERE course_id = (SELECT course_id FROM courses WHERE course_short_name = ?1)",
            "invoices",
        ),
        ("DELETE FROM subjects WHERE course_short_name = ?1", "subjects"),
        (
            "DELETE FROM course_details WHERE course_short_name = ?1",
            "course_details",
        ),
        (
            "DELETE FROM courses WHERE course_short_name = ?1",
            "courses",
        ),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&short_name]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn offering_fees_from_params(
    params: &serde_json::Value,
    defaults: [f64; 7],
) -> [f64; 7] {
    let keys = [
        "courseTuitionFee",
        "miscCourseFees1",
        "miscCourseFees2",
        "miscCourseFees3",
        "miscCourseFees4",
        "miscCourseFees5",
        "miscCourseFees6",
    ];
    let mut out = defaults;
    for (i, key) in keys.iter().enumerate() {
        if let Some(v) = opt_f64(params, key) {
            out[i] = calc::round2(v);
        }
    }
    out
}

fn handle_offerings_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "offerings": [] }));
    };

    let filter = opt_str(&req.params, "courseShortName");
    let sql = "SELECT id, course_full_name, course_short_name, year_semester,
                      course_tuition_fee, course_type,
                      misc_course_fees_1, misc_course_fees_2, misc_course_fees_3,
                      misc_course_fees_4, misc_course_fees_5, misc_course_fees_6,
                      total_course_fees
               FROM course_details
               WHERE (?1 IS NULL OR course_short_name = ?1)
               ORDER BY course_short_name, year_semester";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([filter], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "courseFullName": row.get::<_, String>(1)?,
                "courseShortName": row.get::<_, String>(2)?,
                "yearSemester": row.get::<_, String>(3)?,
                "courseTuitionFee": row.get::<_, f64>(4)?,
                "courseType": row.get::<_, Option<String>>(5)?,
                "miscCourseFees1": row.get::<_, f64>(6)?,
                "miscCourseFees2": row.get::<_, f64>(7)?,
                "miscCourseFees3": row.get::<_, f64>(8)?,
                "miscCourseFees4": row.get::<_, f64>(9)?,
                "miscCourseFees5": row.get::<_, f64>(10)?,
                "miscCourseFees6": row.get::<_, f64>(11)?,
                "totalCourseFees": row.get::<_, f64>(12)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(offerings) => ok(&req.id, json!({ "offerings": offerings })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_offerings_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let short_name = match require_str(&req.params, "courseShortName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let full_name = match require_str(&req.params, "courseFullName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let year_semester = match require_str(&req.params, "yearSemester") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let course_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM courses WHERE course_short_name = ?",
            [&short_name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let fees = offering_fees_from_params(&req.params, [0.0; 7]);
    let total = calc::round2(fees.iter().sum());

    let offering_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO course_details(
            id, course_full_name, course_short_name, year_semester,
            course_tuition_fee, course_type,
            misc_course_fees_1, misc_course_fees_2, misc_course_fees_3,
            misc_course_fees_4, misc_course_fees_5, misc_course_fees_6,
            total_course_fees
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &offering_id,
            &full_name,
            &short_name,
            &year_semester,
            fees[0],
            opt_str(&req.params, "courseType"),
            fees[1],
            fees[2],
            fees[3],
            fees[4],
            fees[5],
            fees[6],
            total,
        ],
    );

    match inserted {
        Ok(_) => ok(
            &req.id,
            json!({ "offeringId": offering_id, "totalCourseFees": total }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_offerings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let offering_id = match require_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let current = conn
        .query_row(
            "SELECT course_tuition_fee,
                    misc_course_fees_1, misc_course_fees_2, misc_course_fees_3,
                    misc_course_fees_4, misc_course_fees_5, misc_course_fees_6
             FROM course_details WHERE id = ?",
            [&offering_id],
            |r| {
                Ok([
                    r.get::<_, f64>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, f64>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, f64>(5)?,
                    r.get::<_, f64>(6)?,
                ])
            },
        )
        .optional();
    let current = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "course offering not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let fees = offering_fees_from_params(patch, current);
    let total = calc::round2(fees.iter().sum());

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let updated = tx.execute(
        "UPDATE course_details SET
            course_full_name = COALESCE(?, course_full_name),
            year_semester = COALESCE(?, year_semester),
            course_type = COALESCE(?, course_type),
            course_tuition_fee = ?,
            misc_course_fees_1 = ?, misc_course_fees_2 = ?, misc_course_fees_3 = ?,
            misc_course_fees_4 = ?, misc_course_fees_5 = ?, misc_course_fees_6 = ?,
            total_course_fees = ?
         WHERE id = ?",
        rusqlite::params![
            opt_str(patch, "courseFullName"),
            opt_str(patch, "yearSemester"),
            opt_str(patch, "courseType"),
            fees[0],
            fees[1],
            fees[2],
            fees[3],
            fees[4],
            fees[5],
            fees[6],
            total,
            &offering_id,
        ],
    );
    if let Err(e) = updated {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Fee plans cascade into every linked ledger row.
    let sync = match ledger::sync_total_course_fees(&tx) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, e.code, e.message, None);
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "totalCourseFees": total,
            "ledgerRowsUpdated": sync.updated
        }),
    )
}

fn handle_offerings_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let offering_id = match require_str(&req.params, "offeringId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "UPDATE college_fees SET coursedetail_id = NULL WHERE coursedetail_id = ?",
        "UPDATE exams SET coursedetail_id = NULL WHERE coursedetail_id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&offering_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    let deleted = match tx.execute("DELETE FROM course_details WHERE id = ?", [&offering_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "course offering not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let filter = opt_str(&req.params, "courseShortName");
    let mut stmt = match conn.prepare(
        "SELECT id, course_short_name, subject_name, subject_type
         FROM subjects
         WHERE (?1 IS NULL OR course_short_name = ?1)
         ORDER BY course_short_name, subject_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([filter], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "courseShortName": row.get::<_, String>(1)?,
                "subjectName": row.get::<_, String>(2)?,
                "subjectType": row.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let short_name = match require_str(&req.params, "courseShortName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let subject_name = match require_str(&req.params, "subjectName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let subject_type = match require_str(&req.params, "subjectType") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if subject_type != "Compulsory" && subject_type != "Elective" {
        return err(
            &req.id,
            "bad_params",
            "subjectType must be Compulsory or Elective",
            None,
        );
    }

    let course_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM courses WHERE course_short_name = ?",
            [&short_name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let subject_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO subjects(id, course_short_name, subject_name, subject_type)
         VALUES(?, ?, ?, ?)",
        (&subject_id, &short_name, &subject_name, &subject_type),
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "subjectId": subject_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let subject_id = match require_str(&req.params, "subjectId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };
    if let Some(t) = opt_str(patch, "subjectType") {
        if t != "Compulsory" && t != "Elective" {
            return err(
                &req.id,
                "bad_params",
                "subjectType must be Compulsory or Elective",
                None,
            );
        }
    }

    let updated = conn.execute(
        "UPDATE subjects SET
            subject_name = COALESCE(?, subject_name),
            subject_type = COALESCE(?, subject_type)
         WHERE id = ?",
        rusqlite::params![
            opt_str(patch, "subjectName"),
            opt_str(patch, "subjectType"),
            &subject_id,
        ],
    );
    match updated {
        Ok(0) => err(&req.id, "not_found", "subject not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Courses) {
        return err(&req.id, code, msg, None);
    }

    let subject_id = match require_str(&req.params, "subjectId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    match conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        Ok(0) => err(&req.id, "not_found", "subject not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "offerings.list" => Some(handle_offerings_list(state, req)),
        "offerings.create" => Some(handle_offerings_create(state, req)),
        "offerings.update" => Some(handle_offerings_update(state, req)),
        "offerings.delete" => Some(handle_offerings_delete(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
