use crate::access::Module;
use crate::calc::{self, ScholarshipStatus};
use crate::db;
use crate::ids;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::fees::fee_row_json;
use crate::ipc::helpers::{enforce_gate, opt_f64, opt_i64, opt_str, require_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [], "total": 0 }));
    };

    let mut where_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(course) = opt_str(&req.params, "course") {
        where_parts.push("current_course = ?");
        binds.push(rusqlite::types::Value::Text(course));
    }
    if let Some(gender) = opt_str(&req.params, "gender") {
        where_parts.push("gender = ?");
        binds.push(rusqlite::types::Value::Text(gender));
    }
    if let Some(category) = opt_str(&req.params, "category") {
        where_parts.push("category = ?");
        binds.push(rusqlite::types::Value::Text(category));
    }
    if let Some(status) = opt_str(&req.params, "status") {
        where_parts.push("student_status = ?");
        binds.push(rusqlite::types::Value::Text(status));
    }
    if let Some(q) = opt_str(&req.params, "search") {
        where_parts.push("(student_unique_id LIKE ? OR first_name LIKE ? OR last_name LIKE ?)");
        let pattern = format!("%{}%", q);
        for _ in 0..3 {
            binds.push(rusqlite::types::Value::Text(pattern.clone()));
        }
    }

    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_parts.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM students {}", where_sql);
    let total: i64 = match conn.query_row(
        &count_sql,
        rusqlite::params_from_iter(binds.clone()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let limit = opt_i64(&req.params, "limit").unwrap_or(50).clamp(1, 500);
    let offset = opt_i64(&req.params, "offset").unwrap_or(0).max(0);

    let list_sql = format!(
        "SELECT id, student_unique_id, first_name, last_name, gender, category,
                current_course, student_status, phone, admission_date, percentage
         FROM students {}
         ORDER BY student_unique_id
         LIMIT {} OFFSET {}",
        where_sql, limit, offset
    );
    let mut stmt = match conn.prepare(&list_sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentUniqueId": row.get::<_, String>(1)?,
                "firstName": row.get::<_, String>(2)?,
                "lastName": row.get::<_, String>(3)?,
                "gender": row.get::<_, String>(4)?,
                "category": row.get::<_, Option<String>>(5)?,
                "currentCourse": row.get::<_, Option<String>>(6)?,
                "studentStatus": row.get::<_, String>(7)?,
                "phone": row.get::<_, Option<String>>(8)?,
                "admissionDate": row.get::<_, Option<String>>(9)?,
                "percentage": row.get::<_, Option<f64>>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({ "students": students, "total": total }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn student_json(conn: &Connection, student_id: &str) -> Result<Option<serde_json::Value>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, student_unique_id, external_id, first_name, last_name,
                father_name, mother_name, gender, category, email, current_course,
                subject_1_name, subject_2_name, subject_3_name, percentage,
                street, area_village, city_tehsil, state, phone,
                aadhaar_card_number, apaar_id, school_name,
                scholarship_status, rebate_meera_scholarship_status,
                student_status, admission_date, concatenated_address, created_at
         FROM students WHERE id = ?",
        [student_id],
        |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentUniqueId": row.get::<_, String>(1)?,
                "externalId": row.get::<_, Option<String>>(2)?,
                "firstName": row.get::<_, String>(3)?,
                "lastName": row.get::<_, String>(4)?,
                "fatherName": row.get::<_, Option<String>>(5)?,
                "motherName": row.get::<_, Option<String>>(6)?,
                "gender": row.get::<_, String>(7)?,
                "category": row.get::<_, Option<String>>(8)?,
                "email": row.get::<_, Option<String>>(9)?,
                "currentCourse": row.get::<_, Option<String>>(10)?,
                "subject1Name": row.get::<_, Option<String>>(11)?,
                "subject2Name": row.get::<_, Option<String>>(12)?,
                "subject3Name": row.get::<_, Option<String>>(13)?,
                "percentage": row.get::<_, Option<f64>>(14)?,
                "street": row.get::<_, Option<String>>(15)?,
                "areaVillage": row.get::<_, Option<String>>(16)?,
                "cityTehsil": row.get::<_, Option<String>>(17)?,
                "state": row.get::<_, Option<String>>(18)?,
                "phone": row.get::<_, Option<String>>(19)?,
                "aadhaarCardNumber": row.get::<_, Option<String>>(20)?,
                "apaarId": row.get::<_, Option<String>>(21)?,
                "schoolName": row.get::<_, Option<String>>(22)?,
                "scholarshipStatus": row.get::<_, String>(23)?,
                "rebateMeeraScholarshipStatus": row.get::<_, String>(24)?,
                "studentStatus": row.get::<_, String>(25)?,
                "admissionDate": row.get::<_, Option<String>>(26)?,
                "concatenatedAddress": row.get::<_, Option<String>>(27)?,
                "createdAt": row.get::<_, Option<String>>(28)?
            }))
        },
    )
    .optional()
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match require_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let student = match student_json(conn, &student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let fee = match ledger::active_row(conn, &student_id) {
        Ok(row) => row.map(|r| fee_row_json(&r)),
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    ok(&req.id, json!({ "student": student, "fee": fee }))
}

fn scholarship_param(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<ScholarshipStatus>, String> {
    match opt_str(params, key) {
        None => Ok(None),
        Some(s) => ScholarshipStatus::parse(&s)
            .map(Some)
            .ok_or_else(|| format!("{} must be one of Not Applied/Applied/Approved/Rejected/Granted", key)),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Students) {
        return err(&req.id, code, msg, None);
    }

    let first_name = match require_str(&req.params, "firstName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let last_name = match require_str(&req.params, "lastName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if first_name.is_empty() || last_name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "firstName/lastName must not be empty",
            None,
        );
    }
    let gender = match require_str(&req.params, "gender") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let current_course = match require_str(&req.params, "currentCourse") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if current_course.is_empty() {
        return err(&req.id, "bad_params", "currentCourse must not be empty", None);
    }

    let scholarship = match scholarship_param(&req.params, "scholarshipStatus") {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let meera = match scholarship_param(&req.params, "rebateMeeraScholarshipStatus") {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let admission_date = opt_str(&req.params, "admissionDate").unwrap_or_else(db::today_utc);
    let admission_year: i32 = admission_date
        .get(..4)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(1970));

    // The id series is keyed on the offering's short name, so the course
    // must resolve before anything is written.
    let offering = match ledger::resolve_offering(conn, &current_course) {
        Ok(Some(o)) => o,
        Ok(None) => {
            return err(
                &req.id,
                "course_unresolved",
                format!("no course offering matches {}", current_course),
                None,
            )
        }
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    let street = opt_str(&req.params, "street");
    let area_village = opt_str(&req.params, "areaVillage");
    let city_tehsil = opt_str(&req.params, "cityTehsil");
    let state_part = opt_str(&req.params, "state");
    let concatenated = calc::concatenate_address(
        street.as_deref(),
        area_village.as_deref(),
        city_tehsil.as_deref(),
        state_part.as_deref(),
    );

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    let mut unique_id = String::new();
    let mut inserted = false;
    for offset in 0..ids::MINT_RETRY_LIMIT {
        unique_id = match ids::mint_student_id(
            &tx,
            &offering.course_short_name,
            admission_year,
            offset,
        ) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        let res = tx.execute(
            "INSERT INTO students(
                id, student_unique_id, external_id, first_name, last_name,
                father_name, mother_name, gender, category, email, current_course,
                subject_1_name, subject_2_name, subject_3_name, percentage,
                street, area_village, city_tehsil, state, phone,
                aadhaar_card_number, apaar_id, school_name,
                scholarship_status, rebate_meera_scholarship_status,
                student_status, admission_date, concatenated_address, created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                      ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &student_id,
                &unique_id,
                opt_str(&req.params, "externalId"),
                &first_name,
                &last_name,
                opt_str(&req.params, "fatherName"),
                opt_str(&req.params, "motherName"),
                &gender,
                opt_str(&req.params, "category"),
                opt_str(&req.params, "email"),
                &current_course,
                opt_str(&req.params, "subject1Name"),
                opt_str(&req.params, "subject2Name"),
                opt_str(&req.params, "subject3Name"),
                opt_f64(&req.params, "percentage"),
                street,
                area_village,
                city_tehsil,
                state_part,
                opt_str(&req.params, "phone"),
                opt_str(&req.params, "aadhaarCardNumber"),
                opt_str(&req.params, "apaarId"),
                opt_str(&req.params, "schoolName"),
                scholarship.as_str(),
                meera.as_str(),
                "Active",
                &admission_date,
                &concatenated,
                db::now_utc(),
            ],
        );
        match res {
            Ok(_) => {
                inserted = true;
                break;
            }
            Err(e) if ids::is_unique_violation(&e) => continue,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
        }
    }
    if !inserted {
        let _ = tx.rollback();
        return err(
            &req.id,
            "id_collision",
            "could not mint a unique student id",
            None,
        );
    }

    // One ledger row per student from day one, even when every fee is zero.
    let fee_id = match ledger::open_for_student(&tx, &student_id, true) {
        Ok(v) => v,
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
            "studentId": student_id,
            "studentUniqueId": unique_id,
            "feeId": fee_id
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Students) {
        return err(&req.id, code, msg, None);
    }

    let student_id = match require_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let old_course: Option<String> = match conn
        .query_row(
            "SELECT current_course FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let text_fields = [
        ("externalId", "external_id"),
        ("firstName", "first_name"),
        ("lastName", "last_name"),
        ("fatherName", "father_name"),
        ("motherName", "mother_name"),
        ("gender", "gender"),
        ("category", "category"),
        ("email", "email"),
        ("currentCourse", "current_course"),
        ("subject1Name", "subject_1_name"),
        ("subject2Name", "subject_2_name"),
        ("subject3Name", "subject_3_name"),
        ("street", "street"),
        ("areaVillage", "area_village"),
        ("cityTehsil", "city_tehsil"),
        ("state", "state"),
        ("phone", "phone"),
        ("aadhaarCardNumber", "aadhaar_card_number"),
        ("apaarId", "apaar_id"),
        ("schoolName", "school_name"),
        ("admissionDate", "admission_date"),
    ];

    let mut set_parts: Vec<String> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    let mut address_changed = false;
    let mut course_changed = false;

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
            let s = s.trim().to_string();
            if key == "currentCourse" {
                if s.is_empty() {
                    return err(&req.id, "bad_params", "currentCourse must not be empty", None);
                }
                course_changed = old_course.as_deref() != Some(s.as_str());
            }
            if matches!(key, "street" | "areaVillage" | "cityTehsil" | "state") {
                address_changed = true;
            }
            set_parts.push(format!("{} = ?", column));
            binds.push(rusqlite::types::Value::Text(s));
        }
    }

    if let Some(v) = patch.get("percentage") {
        let Some(n) = v.as_f64() else {
            return err(&req.id, "bad_params", "patch.percentage must be a number", None);
        };
        set_parts.push("percentage = ?".into());
        binds.push(rusqlite::types::Value::Real(n));
    }

    for (key, column) in [
        ("scholarshipStatus", "scholarship_status"),
        ("rebateMeeraScholarshipStatus", "rebate_meera_scholarship_status"),
    ] {
        if patch.contains_key(key) {
            let parsed = match scholarship_param(&serde_json::Value::Object(patch.clone()), key) {
                Ok(Some(v)) => v,
                Ok(None) | Err(_) => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("patch.{} must be a scholarship status", key),
                        None,
                    )
                }
            };
            set_parts.push(format!("{} = ?", column));
            binds.push(rusqlite::types::Value::Text(parsed.as_str().to_string()));
        }
    }

    if let Some(v) = patch.get("studentStatus") {
        let Some(s) = v
            .as_str()
            .filter(|s| matches!(*s, "Active" | "Dropout" | "Graduated"))
        else {
            return err(
                &req.id,
                "bad_params",
                "patch.studentStatus must be Active, Dropout or Graduated",
                None,
            );
        };
        set_parts.push("student_status = ?".into());
        binds.push(rusqlite::types::Value::Text(s.to_string()));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch contains no known fields", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    binds.push(rusqlite::types::Value::Text(student_id.clone()));
    let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
    if let Err(e) = tx.execute(&sql, rusqlite::params_from_iter(binds)) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if address_changed {
        let recomputed = tx
            .query_row(
                "SELECT street, area_village, city_tehsil, state FROM students WHERE id = ?",
                [&student_id],
                |r| {
                    Ok(calc::concatenate_address(
                        r.get::<_, Option<String>>(0)?.as_deref(),
                        r.get::<_, Option<String>>(1)?.as_deref(),
                        r.get::<_, Option<String>>(2)?.as_deref(),
                        r.get::<_, Option<String>>(3)?.as_deref(),
                    ))
                },
            )
            .and_then(|addr| {
                tx.execute(
                    "UPDATE students SET concatenated_address = ? WHERE id = ?",
                    (&addr, &student_id),
                )
            });
        if let Err(e) = recomputed {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    let mut linkage_updated = 0usize;
    if course_changed {
        match ledger::sync_course_linkage(&tx, Some(&student_id)) {
            Ok(r) => linkage_updated = r.updated,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, e.code, e.message, None);
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "ok": true, "ledgerRowsRelinked": linkage_updated }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Students) {
        return err(&req.id, code, msg, None);
    }

    let student_id = match require_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit delete in dependency order (no ON DELETE CASCADE).
    for (sql, table) in [
        ("DELETE FROM invoices WHERE student_id = ?", "invoices"),
        ("DELETE FROM exams WHERE student_id = ?", "exams"),
        ("DELETE FROM college_fees WHERE student_id = ?", "college_fees"),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        if let Err(e) = tx.execute(sql, [&student_id]) {
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

/// Ordered course names forming the progression the student's current
/// course belongs to. Offerings sharing the base name (the part before
/// " - ", or the whole name) are sorted by their year/semester ordinal.
fn course_progression(
    conn: &Connection,
    course_full_name: &str,
) -> Result<Vec<String>, rusqlite::Error> {
    let base_name = match course_full_name.split_once(" - ") {
        Some((base, _)) => base,
        None => course_full_name,
    };

    let mut stmt = conn.prepare(
        "SELECT course_full_name, year_semester FROM course_details
         WHERE course_full_name LIKE ? ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([format!("{}%", base_name)], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut progression: Vec<(i64, String)> = rows
        .into_iter()
        .filter_map(|(name, ys)| calc::year_semester_order(&ys).map(|ord| (ord, name)))
        .collect();
    progression.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(progression.into_iter().map(|(_, name)| name).collect())
}

fn handle_students_promote(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Students) {
        return err(&req.id, code, msg, None);
    }

    let student_id = match require_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let student = conn
        .query_row(
            "SELECT student_status, current_course FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
        )
        .optional();
    let (status, current_course) = match student {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if status == "Graduated" || status == "Dropout" {
        return err(
            &req.id,
            "invariant",
            format!("cannot promote student with status {}", status),
            None,
        );
    }
    let Some(current_course) = current_course.filter(|c| !c.trim().is_empty()) else {
        return err(&req.id, "invariant", "student has no current course", None);
    };

    // A specific exam can be named; otherwise the newest unprocessed pass.
    let exam_filter = opt_str(&req.params, "examId");
    let exam_id: Option<String> = match exam_filter {
        Some(eid) => conn
            .query_row(
                "SELECT id FROM exams
                 WHERE id = ? AND student_id = ? AND overall_status = 'Pass'
                   AND promotion_processed = 0",
                [&eid, &student_id],
                |r| r.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id FROM exams
                 WHERE student_id = ? AND overall_status = 'Pass'
                   AND promotion_processed = 0
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [&student_id],
                |r| r.get(0),
            )
            .optional(),
    }
    .unwrap_or(None);
    let Some(exam_id) = exam_id else {
        return err(
            &req.id,
            "invariant",
            "student needs an unprocessed passing exam before promotion",
            None,
        );
    };

    let progression = match course_progression(conn, &current_course) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(current_index) = progression.iter().position(|c| *c == current_course) else {
        return err(
            &req.id,
            "course_unresolved",
            "current course not found in its progression",
            None,
        );
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE exams SET promotion_processed = 1 WHERE id = ?",
        [&exam_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if current_index >= progression.len() - 1 {
        // Final level: graduation, no further ledger row.
        if let Err(e) = tx.execute(
            "UPDATE students SET student_status = 'Graduated' WHERE id = ?",
            [&student_id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
        if let Err(e) = tx.commit() {
            return err(&req.id, "db_commit_failed", e.to_string(), None);
        }
        return ok(
            &req.id,
            json!({
                "action": "graduated",
                "currentCourse": current_course,
                "studentStatus": "Graduated"
            }),
        );
    }

    let next_course = progression[current_index + 1].clone();
    if let Err(e) = tx.execute(
        "UPDATE students SET current_course = ? WHERE id = ?",
        (&next_course, &student_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // The next offering gets its own ledger row.
    let fee_id = match ledger::open_for_student(&tx, &student_id, false) {
        Ok(v) => v,
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
            "action": "promoted",
            "previousCourse": current_course,
            "currentCourse": next_course,
            "feeId": fee_id
        }),
    )
}

fn handle_students_reset_promotion(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Admin) {
        return err(&req.id, code, msg, None);
    }

    let reset = match opt_str(&req.params, "studentId") {
        Some(student_id) => conn.execute(
            "UPDATE exams SET promotion_processed = 0
             WHERE promotion_processed = 1 AND student_id = ?",
            [&student_id],
        ),
        None => conn.execute(
            "UPDATE exams SET promotion_processed = 0 WHERE promotion_processed = 1",
            [],
        ),
    };

    match reset {
        Ok(n) => ok(&req.id, json!({ "reset": n })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.promote" => Some(handle_students_promote(state, req)),
        "students.resetPromotion" => Some(handle_students_reset_promotion(state, req)),
        _ => None,
    }
}
