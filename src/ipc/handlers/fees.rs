use crate::access::Module;
use crate::calc::ScholarshipStatus;
use crate::db;
use crate::ids;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{enforce_gate, opt_bool, opt_f64, opt_i64, opt_str, require_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, FeePatch, FeeRow};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Wire projection of a ledger row. The three monotone booleans per
/// scholarship track are derived from the stored status so they can never
/// disagree with it.
pub fn fee_row_json(row: &FeeRow) -> serde_json::Value {
    let installments: Vec<serde_json::Value> = (0..6)
        .map(|i| {
            json!({
                "slot": i + 1,
                "amount": row.installments[i],
                "invoiceNumber": row.invoice_numbers[i]
            })
        })
        .collect();

    json!({
        "id": row.id,
        "studentId": row.student_id,
        "courseId": row.course_id,
        "coursedetailId": row.coursedetail_id,
        "courseFullName": row.course_full_name,
        "totalCourseFees": row.components.total_course_fees,
        "enrollmentFee": row.components.enrollment_fee,
        "eligibilityCertificateFee": row.components.eligibility_certificate_fee,
        "universityAffiliationFee": row.components.university_affiliation_fee,
        "universitySportsFee": row.components.university_sports_fee,
        "universityDevelopmentFee": row.components.university_development_fee,
        "tcCcFee": row.components.tc_cc_fee,
        "miscellaneousFee1": row.components.miscellaneous_fee_1,
        "miscellaneousFee2": row.components.miscellaneous_fee_2,
        "miscellaneousFee3": row.components.miscellaneous_fee_3,
        "totalFee": row.total_fee,
        "paymentMode": row.payment_mode,
        "installments": installments,
        "totalFeesPaid": row.total_fees_paid,
        "meeraRebateStatus": row.meera_rebate_status.as_str(),
        "meeraRebateApplied": row.meera_rebate_status.applied(),
        "meeraRebateApproved": row.meera_rebate_status.approved(),
        "meeraRebateGranted": row.meera_rebate_status.granted(),
        "meeraRebateAmount": row.meera_rebate_amount,
        "scholarshipStatus": row.scholarship_status.as_str(),
        "scholarshipApplied": row.scholarship_status.applied(),
        "scholarshipApproved": row.scholarship_status.approved(),
        "scholarshipGranted": row.scholarship_status.granted(),
        "governmentScholarshipAmount": row.government_scholarship_amount,
        "totalAmountAfterRebate": row.total_amount_after_rebate,
        "totalAmountDue": row.total_amount_due,
        "pendingDuesForLibraries": row.pending_dues_for_libraries,
        "pendingDuesForHostel": row.pending_dues_for_hostel,
        "examAdmitCardIssued": row.exam_admit_card_issued,
        "paymentStatus": row.payment_status().as_str(),
        "createdAt": row.created_at
    })
}

fn handle_fees_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "fees": [], "total": 0 }));
    };

    let student_filter = opt_str(&req.params, "studentId");
    let search = opt_str(&req.params, "search").map(|q| format!("%{}%", q));
    let limit = opt_i64(&req.params, "limit").unwrap_or(50).clamp(1, 500);
    let offset = opt_i64(&req.params, "offset").unwrap_or(0).max(0);

    let where_sql = "WHERE (?1 IS NULL OR cf.student_id = ?1)
           AND (?2 IS NULL OR s.student_unique_id LIKE ?2
                OR s.first_name LIKE ?2 OR s.last_name LIKE ?2)";

    let total: i64 = match conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM college_fees cf JOIN students s ON s.id = cf.student_id {}",
            where_sql
        ),
        rusqlite::params![student_filter, search],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let sql = format!(
        "SELECT cf.id, cf.student_id, s.student_unique_id, s.first_name, s.last_name,
                cf.course_full_name, cf.total_fee, cf.total_fees_paid,
                cf.total_amount_after_rebate, cf.total_amount_due, cf.created_at
         FROM college_fees cf JOIN students s ON s.id = cf.student_id
         {}
         ORDER BY s.student_unique_id, cf.created_at
         LIMIT {} OFFSET {}",
        where_sql, limit, offset
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(rusqlite::params![student_filter, search], |row| {
            let total_fee: f64 = row.get(6)?;
            let paid: f64 = row.get(7)?;
            let due: f64 = row.get(9)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "studentUniqueId": row.get::<_, String>(2)?,
                "firstName": row.get::<_, String>(3)?,
                "lastName": row.get::<_, String>(4)?,
                "courseFullName": row.get::<_, Option<String>>(5)?,
                "totalFee": total_fee,
                "totalFeesPaid": paid,
                "totalAmountAfterRebate": row.get::<_, f64>(8)?,
                "totalAmountDue": due,
                "paymentStatus": crate::calc::payment_status(total_fee, paid, due).as_str(),
                "createdAt": row.get::<_, Option<String>>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(fees) => ok(&req.id, json!({ "fees": fees, "total": total })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_fees_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let row = match opt_str(&req.params, "feeId") {
        Some(fee_id) => ledger::load_row(conn, &fee_id),
        None => match require_str(&req.params, "studentId") {
            Ok(student_id) => ledger::active_row(conn, &student_id),
            Err(_) => {
                return err(&req.id, "bad_params", "missing feeId or studentId", None)
            }
        },
    };

    match row {
        Ok(Some(row)) => ok(&req.id, json!({ "fee": fee_row_json(&row) })),
        Ok(None) => err(&req.id, "not_found", "fee record not found", None),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn parse_fee_patch(patch: &serde_json::Value) -> Result<FeePatch, String> {
    let mut out = FeePatch {
        total_course_fees: opt_f64(patch, "totalCourseFees"),
        enrollment_fee: opt_f64(patch, "enrollmentFee"),
        eligibility_certificate_fee: opt_f64(patch, "eligibilityCertificateFee"),
        university_affiliation_fee: opt_f64(patch, "universityAffiliationFee"),
        university_sports_fee: opt_f64(patch, "universitySportsFee"),
        university_development_fee: opt_f64(patch, "universityDevelopmentFee"),
        tc_cc_fee: opt_f64(patch, "tcCcFee"),
        miscellaneous_fee_1: opt_f64(patch, "miscellaneousFee1"),
        miscellaneous_fee_2: opt_f64(patch, "miscellaneousFee2"),
        miscellaneous_fee_3: opt_f64(patch, "miscellaneousFee3"),
        payment_mode: opt_str(patch, "paymentMode"),
        meera_rebate_status: None,
        meera_rebate_amount: opt_f64(patch, "meeraRebateAmount"),
        scholarship_status: None,
        government_scholarship_amount: opt_f64(patch, "governmentScholarshipAmount"),
        pending_dues_for_libraries: opt_bool(patch, "pendingDuesForLibraries"),
        pending_dues_for_hostel: opt_bool(patch, "pendingDuesForHostel"),
        exam_admit_card_issued: opt_bool(patch, "examAdmitCardIssued"),
    };

    if let Some(s) = opt_str(patch, "meeraRebateStatus") {
        out.meera_rebate_status = Some(
            ScholarshipStatus::parse(&s)
                .ok_or_else(|| format!("invalid meeraRebateStatus: {}", s))?,
        );
    }
    if let Some(s) = opt_str(patch, "scholarshipStatus") {
        out.scholarship_status = Some(
            ScholarshipStatus::parse(&s)
                .ok_or_else(|| format!("invalid scholarshipStatus: {}", s))?,
        );
    }

    Ok(out)
}

fn handle_fees_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Fees) {
        return err(&req.id, code, msg, None);
    }

    let fee_id = match require_str(&req.params, "feeId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(patch_value) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };
    let patch = match parse_fee_patch(patch_value) {
        Ok(p) => p,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match ledger::update_fees(conn, &fee_id, &patch) {
        Ok(row) => ok(&req.id, json!({ "fee": fee_row_json(&row) })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn sync_report_json(r: &ledger::SyncReport) -> serde_json::Value {
    json!({
        "processed": r.processed,
        "updated": r.updated,
        "skipped": r.skipped,
        "errored": r.errored
    })
}

fn handle_fees_ensure_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Fees) {
        return err(&req.id, code, msg, None);
    }

    match ledger::ensure_all_students_have_row(conn) {
        Ok(r) => ok(
            &req.id,
            json!({
                "processed": r.processed,
                "created": r.updated,
                "skipped": r.skipped,
                "errored": r.errored
            }),
        ),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_fees_sync_linkage(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Fees) {
        return err(&req.id, code, msg, None);
    }

    let student_id = opt_str(&req.params, "studentId");
    match ledger::sync_course_linkage(conn, student_id.as_deref()) {
        Ok(r) => ok(&req.id, sync_report_json(&r)),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_fees_sync_totals(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Fees) {
        return err(&req.id, code, msg, None);
    }

    match ledger::sync_total_course_fees(conn) {
        Ok(r) => ok(&req.id, sync_report_json(&r)),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_payments_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Fees) {
        return err(&req.id, code, msg, None);
    }

    let student_id = match require_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(amount) = opt_f64(&req.params, "amount") else {
        return err(&req.id, "bad_params", "missing amount", None);
    };
    if amount <= 0.0 {
        return err(&req.id, "invalid_amount", "amount must be positive", None);
    }

    let student = conn
        .query_row(
            "SELECT current_course FROM students WHERE id = ?",
            [&student_id],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional();
    let current_course = match student {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let fee_row = match ledger::active_row(&tx, &student_id) {
        Ok(Some(row)) => row,
        Ok(None) => {
            let _ = tx.rollback();
            return err(&req.id, "no_ledger", "no fee record for this student", None);
        }
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, e.code, e.message, None);
        }
    };

    // Refresh the course snapshot on the row before the payment lands.
    if let Some(course) = current_course.filter(|c| !c.trim().is_empty()) {
        match ledger::resolve_offering(&tx, &course) {
            Ok(Some(offering)) => {
                if let Err(e) = tx.execute(
                    "UPDATE college_fees
                     SET course_full_name = ?, coursedetail_id = ?, course_id = ?
                     WHERE id = ?",
                    (
                        &offering.course_full_name,
                        &offering.coursedetail_id,
                        offering.course_id.as_deref(),
                        &fee_row.id,
                    ),
                ) {
                    let _ = tx.rollback();
                    return err(&req.id, "db_update_failed", e.to_string(), None);
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, e.code, e.message, None);
            }
        }
    }

    let Some(slot) = ledger::next_empty_slot(&fee_row) else {
        let _ = tx.rollback();
        return err(
            &req.id,
            "all_slots_filled",
            "all six installment slots are filled for this student",
            None,
        );
    };

    let today = chrono::Utc::now().date_naive();
    let invoice_id = Uuid::new_v4().to_string();
    let mut invoice_number = String::new();
    let mut inserted = false;
    for offset in 0..ids::MINT_RETRY_LIMIT {
        invoice_number = match ids::mint_invoice_number(&tx, today, offset) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };
        let res = tx.execute(
            "INSERT INTO invoices(
                id, student_id, course_id, invoice_number, date_time,
                invoice_amount, original_invoice_printed, installment_number
             ) VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
            rusqlite::params![
                &invoice_id,
                &student_id,
                fee_row.course_id.as_deref(),
                &invoice_number,
                db::now_utc(),
                crate::calc::round2(amount),
                slot as i64,
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
            "could not mint a unique invoice number",
            None,
        );
    }

    if let Some(mode) = opt_str(&req.params, "paymentMode") {
        if let Err(e) = tx.execute(
            "UPDATE college_fees SET payment_mode = ? WHERE id = ?",
            (&mode, &fee_row.id),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    let updated = match ledger::record_installment(&tx, &fee_row.id, slot, amount, &invoice_number)
    {
        Ok(row) => row,
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
            "invoice": {
                "id": invoice_id,
                "invoiceNumber": invoice_number,
                "invoiceAmount": crate::calc::round2(amount),
                "installmentNumber": slot,
                "originalInvoicePrinted": false
            },
            "fee": fee_row_json(&updated)
        }),
    )
}

fn handle_invoices_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "invoices": [] }));
    };

    let date_from = opt_str(&req.params, "dateFrom");
    let date_to = opt_str(&req.params, "dateTo");
    let search = opt_str(&req.params, "search").map(|q| format!("%{}%", q));

    let mut stmt = match conn.prepare(
        "SELECT i.id, i.invoice_number, i.date_time, i.invoice_amount,
                i.original_invoice_printed, i.installment_number,
                i.student_id, s.student_unique_id, s.first_name, s.last_name
         FROM invoices i JOIN students s ON s.id = i.student_id
         WHERE (?1 IS NULL OR date(i.date_time) >= ?1)
           AND (?2 IS NULL OR date(i.date_time) <= ?2)
           AND (?3 IS NULL OR i.invoice_number LIKE ?3
                OR s.student_unique_id LIKE ?3
                OR s.first_name LIKE ?3 OR s.last_name LIKE ?3)
         ORDER BY i.date_time DESC, i.rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(rusqlite::params![date_from, date_to, search], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "invoiceNumber": row.get::<_, String>(1)?,
                "dateTime": row.get::<_, String>(2)?,
                "invoiceAmount": row.get::<_, f64>(3)?,
                "originalInvoicePrinted": row.get::<_, i64>(4)? != 0,
                "installmentNumber": row.get::<_, Option<i64>>(5)?,
                "studentId": row.get::<_, String>(6)?,
                "studentUniqueId": row.get::<_, String>(7)?,
                "firstName": row.get::<_, String>(8)?,
                "lastName": row.get::<_, String>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(invoices) => ok(&req.id, json!({ "invoices": invoices })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_invoices_mark_printed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err((code, msg)) = enforce_gate(conn, &req.params, Module::Fees) {
        return err(&req.id, code, msg, None);
    }

    let invoice_number = match require_str(&req.params, "invoiceNumber") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    // Monotone: printing is never undone.
    match conn.execute(
        "UPDATE invoices SET original_invoice_printed = 1 WHERE invoice_number = ?",
        [&invoice_number],
    ) {
        Ok(0) => err(&req.id, "not_found", "invoice not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(handle_fees_list(state, req)),
        "fees.get" => Some(handle_fees_get(state, req)),
        "fees.update" => Some(handle_fees_update(state, req)),
        "fees.ensureRows" => Some(handle_fees_ensure_rows(state, req)),
        "fees.syncCourseLinkage" => Some(handle_fees_sync_linkage(state, req)),
        "fees.syncTotals" => Some(handle_fees_sync_totals(state, req)),
        "payments.record" => Some(handle_payments_record(state, req)),
        "invoices.list" => Some(handle_invoices_list(state, req)),
        "invoices.markPrinted" => Some(handle_invoices_mark_printed(state, req)),
        _ => None,
    }
}
