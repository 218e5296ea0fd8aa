use crate::access::Module;
use crate::calc::{self, SubjectMarks};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{enforce_gate, opt_str, require_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn subjects_from_params(params: &serde_json::Value) -> Result<Vec<SubjectMarks>, String> {
    let Some(list) = params.get("subjects").and_then(|v| v.as_array()) else {
        return Err("missing subjects array".to_string());
    };
    if list.len() > 6 {
        return Err("at most six subjects per exam".to_string());
    }

    let mut out = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let max_marks = entry.get("maxMarks").and_then(|v| v.as_i64()).unwrap_or(0);
        let obtained_marks = entry
            .get("obtainedMarks")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if max_marks < 0 || obtained_marks < 0 {
            return Err(format!("subjects[{}] marks must not be negative", i));
        }
        out.push(SubjectMarks {
            name,
            max_marks,
            obtained_marks,
        });
    }
    Ok(out)
}

fn exam_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let mut subjects = Vec::with_capacity(6);
    for i in 0..6 {
        let name: Option<String> = row.get(7 + i * 3)?;
        let max: i64 = row.get(8 + i * 3)?;
        let obtained: i64 = row.get(9 + i * 3)?;
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            subjects.push(json!({
                "name": name,
                "maxMarks": max,
                "obtainedMarks": obtained
            }));
        }
    }

    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "courseId": row.get::<_, Option<String>>(2)?,
        "coursedetailId": row.get::<_, Option<String>>(3)?,
        "courseFullName": row.get::<_, Option<String>>(4)?,
        "semester": row.get::<_, Option<String>>(5)?,
        "examName": row.get::<_, String>(6)?,
        "subjects": subjects,
        "totalMaxMarks": row.get::<_, i64>(25)?,
        "totalObtainedMarks": row.get::<_, i64>(26)?,
        "percentage": row.get::<_, f64>(27)?,
        "grade": row.get::<_, Option<String>>(28)?,
        "overallStatus": row.get::<_, Option<String>>(29)?,
        "examDate": row.get::<_, Option<String>>(30)?,
        "promotionProcessed": row.get::<_, i64>(31)? != 0,
        "createdAt": row.get::<_, Option<String>>(32)?
    }))
}

const EXAM_COLUMNS: &str = "e.id, e.student_id, e.course_id, e.coursedetail_id, e.course_full_name,
    e.semester, e.exam_name,
    e.subject1_name, e.subject1_max_marks, e.subject1_obtained_marks,
    e.subject2_name, e.subject2_max_marks, e.subject2_obtained_marks,
    e.subject3_name, e.subject3_max_marks, e.subject3_obtained_marks,
    e.subject4_name, e.subject4_max_marks, e.subject4_obtained_marks,
    e.subject5_name, e.subject5_max_marks, e.subject5_obtained_marks,
    e.subject6_name, e.subject6_max_marks, e.subject6_obtained_marks,
    e.total_max_marks, e.total_obtained_marks, e.percentage, e.grade,
    e.overall_status, e.exam_date, e.promotion_processed, e.created_at";

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "exams": [] }));
    };

    let student_filter = opt_str(&req.params, "studentId");
    let sql = format!(
        "SELECT {}, s.student_unique_id, s.first_name, s.last_name
         FROM exams e JOIN students s ON s.id = e.student_id
         WHERE (?1 IS NULL OR e.student_id = ?1)
         ORDER BY e.created_at DESC, e.rowid DESC",
        EXAM_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([student_filter], |row| {
            let mut exam = exam_json(row)?;
            exam["studentUniqueId"] = json!(row.get::<_, String>(33)?);
            exam["firstName"] = json!(row.get::<_, String>(34)?);
            exam["lastName"] = json!(row.get::<_, String>(35)?);
            Ok(exam)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_exams_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Exams) {
        return err(&req.id, code, msg, None);
    }

    let student_id = match require_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let exam_name = match require_str(&req.params, "examName") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if exam_name.is_empty() {
        return err(&req.id, "bad_params", "examName must not be empty", None);
    }
    let subjects = match subjects_from_params(&req.params) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let current_course = conn
        .query_row(
            "SELECT current_course FROM students WHERE id = ?",
            [&student_id],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional();
    let current_course = match current_course {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Course snapshot follows the student's current offering at save time.
    let offering = match current_course.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(course) => match ledger::resolve_offering(conn, course) {
            Ok(v) => v,
            Err(e) => return err(&req.id, e.code, e.message, None),
        },
        None => None,
    };

    let summary = calc::score_exam(&subjects);
    let mut padded = subjects;
    padded.resize_with(6, SubjectMarks::default);

    let exam_id = opt_str(&req.params, "examId");
    if let Some(exam_id) = exam_id {
        // Graded rows stay editable until a promotion consumes them.
        let processed: Option<i64> = match conn
            .query_row(
                "SELECT promotion_processed FROM exams WHERE id = ? AND student_id = ?",
                [&exam_id, &student_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match processed {
            None => return err(&req.id, "not_found", "exam not found", None),
            Some(p) if p != 0 => {
                return err(
                    &req.id,
                    "invariant",
                    "exam already consumed by a promotion",
                    None,
                )
            }
            Some(_) => {}
        }

        let updated = conn.execute(
            "UPDATE exams SET
                exam_name = ?, semester = ?, exam_date = ?,
                course_id = ?, coursedetail_id = ?, course_full_name = ?,
                subject1_name = ?, subject1_max_marks = ?, subject1_obtained_marks = ?,
                subject2_name = ?, subject2_max_marks = ?, subject2_obtained_marks = ?,
                subject3_name = ?, subject3_max_marks = ?, subject3_obtained_marks = ?,
                subject4_name = ?, subject4_max_marks = ?, subject4_obtained_marks = ?,
                subject5_name = ?, subject5_max_marks = ?, subject5_obtained_marks = ?,
                subject6_name = ?, subject6_max_marks = ?, subject6_obtained_marks = ?,
                total_max_marks = ?, total_obtained_marks = ?, percentage = ?,
                grade = ?, overall_status = ?
             WHERE id = ?",
            rusqlite::params![
                &exam_name,
                opt_str(&req.params, "semester"),
                opt_str(&req.params, "examDate"),
                offering.as_ref().and_then(|o| o.course_id.clone()),
                offering.as_ref().map(|o| o.coursedetail_id.clone()),
                offering
                    .as_ref()
                    .map(|o| o.course_full_name.clone())
                    .or(current_course),
                &padded[0].name,
                padded[0].max_marks,
                padded[0].obtained_marks,
                &padded[1].name,
                padded[1].max_marks,
                padded[1].obtained_marks,
                &padded[2].name,
                padded[2].max_marks,
                padded[2].obtained_marks,
                &padded[3].name,
                padded[3].max_marks,
                padded[3].obtained_marks,
                &padded[4].name,
                padded[4].max_marks,
                padded[4].obtained_marks,
                &padded[5].name,
                padded[5].max_marks,
                padded[5].obtained_marks,
                summary.total_max_marks,
                summary.total_obtained_marks,
                summary.percentage,
                summary.grade,
                summary.overall_status,
                &exam_id,
            ],
        );
        return match updated {
            Ok(_) => ok(
                &req.id,
                json!({
                    "examId": exam_id,
                    "totalMaxMarks": summary.total_max_marks,
                    "totalObtainedMarks": summary.total_obtained_marks,
                    "percentage": summary.percentage,
                    "grade": summary.grade,
                    "overallStatus": summary.overall_status
                }),
            ),
            Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
        };
    }

    let exam_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO exams(
            id, student_id, course_id, coursedetail_id, course_full_name,
            semester, exam_name,
            subject1_name, subject1_max_marks, subject1_obtained_marks,
            subject2_name, subject2_max_marks, subject2_obtained_marks,
            subject3_name, subject3_max_marks, subject3_obtained_marks,
            subject4_name, subject4_max_marks, subject4_obtained_marks,
            subject5_name, subject5_max_marks, subject5_obtained_marks,
            subject6_name, subject6_max_marks, subject6_obtained_marks,
            total_max_marks, total_obtained_marks, percentage, grade,
            overall_status, exam_date, promotion_processed, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                  ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        rusqlite::params![
            &exam_id,
            &student_id,
            offering.as_ref().and_then(|o| o.course_id.clone()),
            offering.as_ref().map(|o| o.coursedetail_id.clone()),
            offering
                .as_ref()
                .map(|o| o.course_full_name.clone())
                .or(current_course),
            opt_str(&req.params, "semester"),
            &exam_name,
            &padded[0].name,
            padded[0].max_marks,
            padded[0].obtained_marks,
            &padded[1].name,
            padded[1].max_marks,
            padded[1].obtained_marks,
            &padded[2].name,
            padded[2].max_marks,
            padded[2].obtained_marks,
            &padded[3].name,
            padded[3].max_marks,
            padded[3].obtained_marks,
            &padded[4].name,
            padded[4].max_marks,
            padded[4].obtained_marks,
            &padded[5].name,
            padded[5].max_marks,
            padded[5].obtained_marks,
            summary.total_max_marks,
            summary.total_obtained_marks,
            summary.percentage,
            summary.grade,
            summary.overall_status,
            opt_str(&req.params, "examDate"),
            db::now_utc(),
        ],
    );

    match inserted {
        Ok(_) => ok(
            &req.id,
            json!({
                "examId": exam_id,
                "totalMaxMarks": summary.total_max_marks,
                "totalObtainedMarks": summary.total_obtained_marks,
                "percentage": summary.percentage,
                "grade": summary.grade,
                "overallStatus": summary.overall_status
            }),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Exams) {
        return err(&req.id, code, msg, None);
    }

    let exam_id = match require_str(&req.params, "examId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let processed: Option<i64> = match conn
        .query_row(
            "SELECT promotion_processed FROM exams WHERE id = ?",
            [&exam_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match processed {
        None => return err(&req.id, "not_found", "exam not found", None),
        Some(p) if p != 0 => {
            return err(
                &req.id,
                "invariant",
                "exam already consumed by a promotion",
                None,
            )
        }
        Some(_) => {}
    }

    match conn.execute("DELETE FROM exams WHERE id = ?", [&exam_id]) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.save" => Some(handle_exams_save(state, req)),
        "exams.delete" => Some(handle_exams_delete(state, req)),
        _ => None,
    }
}
