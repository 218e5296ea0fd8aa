//! The fee ledger: one `college_fees` row per student per course offering.
//! Every mutation here finishes by recomputing the stored derived totals
//! (`total_fee`, `total_fees_paid`, `total_amount_after_rebate`,
//! `total_amount_due`) from the primitive columns, so the arithmetic
//! invariants hold after any committed write. Compound operations expect to
//! run inside the caller's transaction unless they open their own.

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::calc::{self, FeeComponents, ScholarshipStatus};
use crate::db;

/// Typed operation failure carried up to the IPC boundary. `code` is the
/// wire error code; store-level failures convert with a transient code.
#[derive(Debug)]
pub struct OpError {
    pub code: &'static str,
    pub message: String,
}

impl OpError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for OpError {
    fn from(e: rusqlite::Error) -> Self {
        OpError::new("db_query_failed", e.to_string())
    }
}

pub type OpResult<T> = Result<T, OpError>;

#[derive(Debug, Clone)]
pub struct FeeRow {
    pub id: String,
    pub student_id: String,
    pub course_id: Option<String>,
    pub coursedetail_id: Option<String>,
    pub course_full_name: Option<String>,
    pub components: FeeComponents,
    pub payment_mode: Option<String>,
    pub installments: [f64; 6],
    pub invoice_numbers: [Option<String>; 6],
    pub total_fee: f64,
    pub total_fees_paid: f64,
    pub meera_rebate_status: ScholarshipStatus,
    pub meera_rebate_amount: f64,
    pub scholarship_status: ScholarshipStatus,
    pub government_scholarship_amount: f64,
    pub total_amount_after_rebate: f64,
    pub total_amount_due: f64,
    pub pending_dues_for_libraries: bool,
    pub pending_dues_for_hostel: bool,
    pub exam_admit_card_issued: bool,
    pub created_at: Option<String>,
}

impl FeeRow {
    pub fn payment_status(&self) -> calc::PaymentStatus {
        calc::payment_status(self.total_fee, self.total_fees_paid, self.total_amount_due)
    }
}

/// A resolved course offering: the linkage target for a ledger row.
#[derive(Debug, Clone)]
pub struct Offering {
    pub coursedetail_id: String,
    pub course_id: Option<String>,
    pub course_short_name: String,
    pub course_full_name: String,
    pub total_course_fees: f64,
}

const FEE_COLUMNS: &str = "id, student_id, course_id, coursedetail_id, course_full_name,
    total_course_fees, enrollment_fee, eligibility_certificate_fee,
    university_affiliation_fee, university_sports_fee, university_development_fee,
    tc_cc_fee, miscellaneous_fee_1, miscellaneous_fee_2, miscellaneous_fee_3,
    total_fee, payment_mode,
    installment_1, invoice1_number, installment_2, invoice2_number,
    installment_3, invoice3_number, installment_4, invoice4_number,
    installment_5, invoice5_number, installment_6, invoice6_number,
    total_fees_paid, meera_rebate_status, meera_rebate_amount,
    scholarship_status, government_scholarship_amount,
    total_amount_after_rebate, total_amount_due,
    pending_dues_for_libraries, pending_dues_for_hostel, exam_admit_card_issued,
    created_at";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeeRow> {
    let meera: String = row.get(30)?;
    let scholarship: String = row.get(32)?;
    Ok(FeeRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        course_id: row.get(2)?,
        coursedetail_id: row.get(3)?,
        course_full_name: row.get(4)?,
        components: FeeComponents {
            total_course_fees: row.get(5)?,
            enrollment_fee: row.get(6)?,
            eligibility_certificate_fee: row.get(7)?,
            university_affiliation_fee: row.get(8)?,
            university_sports_fee: row.get(9)?,
            university_development_fee: row.get(10)?,
            tc_cc_fee: row.get(11)?,
            miscellaneous_fee_1: row.get(12)?,
            miscellaneous_fee_2: row.get(13)?,
            miscellaneous_fee_3: row.get(14)?,
        },
        total_fee: row.get(15)?,
        payment_mode: row.get(16)?,
        installments: [
            row.get(17)?,
            row.get(19)?,
            row.get(21)?,
            row.get(23)?,
            row.get(25)?,
            row.get(27)?,
        ],
        invoice_numbers: [
            row.get(18)?,
            row.get(20)?,
            row.get(22)?,
            row.get(24)?,
            row.get(26)?,
            row.get(28)?,
        ],
        total_fees_paid: row.get(29)?,
        meera_rebate_status: ScholarshipStatus::parse(&meera).unwrap_or_default(),
        meera_rebate_amount: row.get(31)?,
        scholarship_status: ScholarshipStatus::parse(&scholarship).unwrap_or_default(),
        government_scholarship_amount: row.get(33)?,
        total_amount_after_rebate: row.get(34)?,
        total_amount_due: row.get(35)?,
        pending_dues_for_libraries: row.get::<_, i64>(36)? != 0,
        pending_dues_for_hostel: row.get::<_, i64>(37)? != 0,
        exam_admit_card_issued: row.get::<_, i64>(38)? != 0,
        created_at: row.get(39)?,
    })
}

pub fn load_row(conn: &Connection, fee_id: &str) -> OpResult<Option<FeeRow>> {
    let sql = format!("SELECT {} FROM college_fees WHERE id = ?", FEE_COLUMNS);
    Ok(conn
        .query_row(&sql, [fee_id], row_from_sql)
        .optional()?)
}

/// The student's active ledger row: the newest one. Promotion appends a row
/// per offering; payments and fee detail always target the latest.
pub fn active_row(conn: &Connection, student_id: &str) -> OpResult<Option<FeeRow>> {
    let sql = format!(
        "SELECT {} FROM college_fees WHERE student_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
        FEE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [student_id], row_from_sql)
        .optional()?)
}

/// Smallest empty installment slot (1-based), or None when all six hold a
/// payment. Slots are append-only; a written slot is never reused.
pub fn next_empty_slot(row: &FeeRow) -> Option<usize> {
    row.installments.iter().position(|v| *v == 0.0).map(|i| i + 1)
}

/// Resolve a course offering from a student's course name: exact match on
/// `course_full_name` first, then a prefix fallback keyed on the first
/// whitespace-delimited token (treated as a course short name).
pub fn resolve_offering(conn: &Connection, course_name: &str) -> OpResult<Option<Offering>> {
    let exact = conn
        .query_row(
            "SELECT id, course_short_name, course_full_name, total_course_fees
             FROM course_details WHERE course_full_name = ?
             ORDER BY rowid LIMIT 1",
            [course_name],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, f64>(3)?,
                ))
            },
        )
        .optional()?;

    let found = match exact {
        Some(v) => Some(v),
        None => {
            let Some(token) = course_name.split_whitespace().next() else {
                return Ok(None);
            };
            conn.query_row(
                "SELECT id, course_short_name, course_full_name, total_course_fees
                 FROM course_details WHERE course_short_name = ?
                 ORDER BY rowid LIMIT 1",
                [token],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?
        }
    };

    let Some((detail_id, short, full, fees)) = found else {
        return Ok(None);
    };

    let course_id: Option<String> = conn
        .query_row(
            "SELECT course_id FROM courses WHERE course_short_name = ?",
            [&short],
            |r| r.get(0),
        )
        .optional()?;

    Ok(Some(Offering {
        coursedetail_id: detail_id,
        course_id,
        course_short_name: short,
        course_full_name: full,
        total_course_fees: fees,
    }))
}

/// Recompute and store the four derived totals from the primitive columns.
pub fn apply_derived(conn: &Connection, fee_id: &str) -> OpResult<FeeRow> {
    let Some(row) = load_row(conn, fee_id)? else {
        return Err(OpError::new("not_found", "fee record not found"));
    };

    let total_fee = calc::total_fee(&row.components);
    let total_paid = calc::total_paid(&row.installments);
    let after_rebate = calc::after_rebate(
        total_fee,
        row.meera_rebate_amount,
        row.meera_rebate_status.granted(),
    );
    let due = calc::amount_due(after_rebate, total_paid);

    conn.execute(
        "UPDATE college_fees
         SET total_fee = ?, total_fees_paid = ?, total_amount_after_rebate = ?, total_amount_due = ?
         WHERE id = ?",
        (total_fee, total_paid, after_rebate, due, fee_id),
    )
    .map_err(|e| OpError::new("db_update_failed", e.to_string()))?;

    load_row(conn, fee_id)?.ok_or_else(|| OpError::new("not_found", "fee record not found"))
}

/// Open a ledger row for a student: resolve the offering from the student's
/// current course, copy `total_course_fees`, mirror the student's
/// scholarship enums, zero the installments and compute the derived totals.
/// With `require_linkage` an unresolvable course fails `course_unresolved`;
/// otherwise an unlinked row with zero course fees is persisted.
pub fn open_for_student(
    conn: &Connection,
    student_id: &str,
    require_linkage: bool,
) -> OpResult<String> {
    let student = conn
        .query_row(
            "SELECT current_course, scholarship_status, rebate_meera_scholarship_status
             FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((current_course, scholarship, meera)) = student else {
        return Err(OpError::new("not_found", "student not found"));
    };

    let offering = match current_course.as_deref() {
        Some(name) if !name.trim().is_empty() => resolve_offering(conn, name)?,
        _ => None,
    };
    if offering.is_none() && require_linkage {
        return Err(OpError::new(
            "course_unresolved",
            "no course offering matches the student's current course",
        ));
    }

    let scholarship = ScholarshipStatus::parse(&scholarship).unwrap_or_default();
    let meera = ScholarshipStatus::parse(&meera).unwrap_or_default();

    let fee_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO college_fees(
            id, student_id, course_id, coursedetail_id, course_full_name,
            total_course_fees, scholarship_status, meera_rebate_status, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &fee_id,
            student_id,
            offering.as_ref().and_then(|o| o.course_id.clone()),
            offering.as_ref().map(|o| o.coursedetail_id.clone()),
            offering
                .as_ref()
                .map(|o| o.course_full_name.clone())
                .or(current_course),
            offering.as_ref().map(|o| o.total_course_fees).unwrap_or(0.0),
            scholarship.as_str(),
            meera.as_str(),
            db::now_utc(),
        ),
    )
    .map_err(|e| OpError::new("db_insert_failed", e.to_string()))?;

    apply_derived(conn, &fee_id)?;
    Ok(fee_id)
}

/// Structural-partial update of fee components, scholarship state and the
/// administrative flags. Absent fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct FeePatch {
    pub total_course_fees: Option<f64>,
    pub enrollment_fee: Option<f64>,
    pub eligibility_certificate_fee: Option<f64>,
    pub university_affiliation_fee: Option<f64>,
    pub university_sports_fee: Option<f64>,
    pub university_development_fee: Option<f64>,
    pub tc_cc_fee: Option<f64>,
    pub miscellaneous_fee_1: Option<f64>,
    pub miscellaneous_fee_2: Option<f64>,
    pub miscellaneous_fee_3: Option<f64>,
    pub payment_mode: Option<String>,
    pub meera_rebate_status: Option<ScholarshipStatus>,
    pub meera_rebate_amount: Option<f64>,
    pub scholarship_status: Option<ScholarshipStatus>,
    pub government_scholarship_amount: Option<f64>,
    pub pending_dues_for_libraries: Option<bool>,
    pub pending_dues_for_hostel: Option<bool>,
    pub exam_admit_card_issued: Option<bool>,
}

/// Apply a patch and recompute the derived totals in one transaction. The
/// student's scholarship enums are kept in step with the ledger state.
pub fn update_fees(conn: &Connection, fee_id: &str, patch: &FeePatch) -> OpResult<FeeRow> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| OpError::new("db_tx_failed", e.to_string()))?;

    let Some(row) = load_row(&tx, fee_id)? else {
        return Err(OpError::new("not_found", "fee record not found"));
    };

    let mut c = row.components;
    if let Some(v) = patch.total_course_fees {
        c.total_course_fees = calc::round2(v);
    }
    if let Some(v) = patch.enrollment_fee {
        c.enrollment_fee = calc::round2(v);
    }
    if let Some(v) = patch.eligibility_certificate_fee {
        c.eligibility_certificate_fee = calc::round2(v);
    }
    if let Some(v) = patch.university_affiliation_fee {
        c.university_affiliation_fee = calc::round2(v);
    }
    if let Some(v) = patch.university_sports_fee {
        c.university_sports_fee = calc::round2(v);
    }
    if let Some(v) = patch.university_development_fee {
        c.university_development_fee = calc::round2(v);
    }
    if let Some(v) = patch.tc_cc_fee {
        c.tc_cc_fee = calc::round2(v);
    }
    if let Some(v) = patch.miscellaneous_fee_1 {
        c.miscellaneous_fee_1 = calc::round2(v);
    }
    if let Some(v) = patch.miscellaneous_fee_2 {
        c.miscellaneous_fee_2 = calc::round2(v);
    }
    if let Some(v) = patch.miscellaneous_fee_3 {
        c.miscellaneous_fee_3 = calc::round2(v);
    }

    let meera_status = patch.meera_rebate_status.unwrap_or(row.meera_rebate_status);
    let scholarship_status = patch.scholarship_status.unwrap_or(row.scholarship_status);
    // A rejected track keeps no amount.
    let meera_amount = if meera_status == ScholarshipStatus::Rejected {
        0.0
    } else {
        calc::round2(patch.meera_rebate_amount.unwrap_or(row.meera_rebate_amount))
    };
    let scholarship_amount = if scholarship_status == ScholarshipStatus::Rejected {
        0.0
    } else {
        calc::round2(
            patch
                .government_scholarship_amount
                .unwrap_or(row.government_scholarship_amount),
        )
    };

    tx.execute(
        "UPDATE college_fees SET
            total_course_fees = ?, enrollment_fee = ?, eligibility_certificate_fee = ?,
            university_affiliation_fee = ?, university_sports_fee = ?,
            university_development_fee = ?, tc_cc_fee = ?,
            miscellaneous_fee_1 = ?, miscellaneous_fee_2 = ?, miscellaneous_fee_3 = ?,
            payment_mode = COALESCE(?, payment_mode),
            meera_rebate_status = ?, meera_rebate_amount = ?,
            scholarship_status = ?, government_scholarship_amount = ?,
            pending_dues_for_libraries = ?, pending_dues_for_hostel = ?,
            exam_admit_card_issued = ?
         WHERE id = ?",
        rusqlite::params![
            c.total_course_fees,
            c.enrollment_fee,
            c.eligibility_certificate_fee,
            c.university_affiliation_fee,
            c.university_sports_fee,
            c.university_development_fee,
            c.tc_cc_fee,
            c.miscellaneous_fee_1,
            c.miscellaneous_fee_2,
            c.miscellaneous_fee_3,
            patch.payment_mode.as_deref(),
            meera_status.as_str(),
            meera_amount,
            scholarship_status.as_str(),
            scholarship_amount,
            patch
                .pending_dues_for_libraries
                .unwrap_or(row.pending_dues_for_libraries) as i64,
            patch
                .pending_dues_for_hostel
                .unwrap_or(row.pending_dues_for_hostel) as i64,
            patch
                .exam_admit_card_issued
                .unwrap_or(row.exam_admit_card_issued) as i64,
            fee_id,
        ],
    )
    .map_err(|e| OpError::new("db_update_failed", e.to_string()))?;

    // Cascade the scholarship state back onto the student record.
    tx.execute(
        "UPDATE students SET scholarship_status = ?, rebate_meera_scholarship_status = ?
         WHERE id = ?",
        (
            scholarship_status.as_str(),
            meera_status.as_str(),
            &row.student_id,
        ),
    )
    .map_err(|e| OpError::new("db_update_failed", e.to_string()))?;

    let updated = apply_derived(&tx, fee_id)?;
    tx.commit()
        .map_err(|e| OpError::new("db_commit_failed", e.to_string()))?;
    Ok(updated)
}

/// Write one installment slot and its invoice number. Runs on the caller's
/// connection so the invoice insert and this write share a transaction.
pub fn record_installment(
    conn: &Connection,
    fee_id: &str,
    slot: usize,
    amount: f64,
    invoice_number: &str,
) -> OpResult<FeeRow> {
    if !(1..=6).contains(&slot) {
        return Err(OpError::new("bad_params", "installment slot must be 1..6"));
    }
    if amount <= 0.0 {
        return Err(OpError::new(
            "invalid_amount",
            "installment amount must be positive",
        ));
    }

    let Some(row) = load_row(conn, fee_id)? else {
        return Err(OpError::new("not_found", "fee record not found"));
    };
    if row.installments[slot - 1] != 0.0 {
        return Err(OpError::new(
            "slot_occupied",
            format!("installment slot {} already holds a payment", slot),
        ));
    }

    let sql = format!(
        "UPDATE college_fees SET installment_{slot} = ?, invoice{slot}_number = ? WHERE id = ?",
        slot = slot
    );
    conn.execute(&sql, (calc::round2(amount), invoice_number, fee_id))
        .map_err(|e| OpError::new("db_update_failed", e.to_string()))?;

    apply_derived(conn, fee_id)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Re-point every ledger row at the offering matching its student's current
/// course, refreshing the name snapshot. Idempotent: a second run reports
/// zero updates.
pub fn sync_course_linkage(conn: &Connection, student_id: Option<&str>) -> OpResult<SyncReport> {
    let mut report = SyncReport::default();

    let sql = match student_id {
        Some(_) => {
            "SELECT cf.id, s.current_course, cf.course_id, cf.coursedetail_id, cf.course_full_name
             FROM college_fees cf JOIN students s ON s.id = cf.student_id
             WHERE cf.student_id = ? ORDER BY cf.rowid"
        }
        None => {
            "SELECT cf.id, s.current_course, cf.course_id, cf.coursedetail_id, cf.course_full_name
             FROM college_fees cf JOIN students s ON s.id = cf.student_id ORDER BY cf.rowid"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, Option<String>>(3)?,
            r.get::<_, Option<String>>(4)?,
        ))
    };
    let rows = match student_id {
        Some(sid) => stmt.query_map([sid], map_row)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };

    for (fee_id, current_course, course_id, detail_id, name_snapshot) in rows {
        report.processed += 1;
        let Some(course) = current_course.filter(|c| !c.trim().is_empty()) else {
            report.skipped += 1;
            continue;
        };
        match resolve_offering(conn, &course) {
            Ok(Some(offering)) => {
                let changed = detail_id.as_deref() != Some(offering.coursedetail_id.as_str())
                    || course_id != offering.course_id
                    || name_snapshot.as_deref() != Some(offering.course_full_name.as_str());
                if !changed {
                    report.skipped += 1;
                    continue;
                }
                let res = conn.execute(
                    "UPDATE college_fees
                     SET coursedetail_id = ?, course_id = ?, course_full_name = ?
                     WHERE id = ?",
                    (
                        &offering.coursedetail_id,
                        offering.course_id.as_deref(),
                        &offering.course_full_name,
                        &fee_id,
                    ),
                );
                match res {
                    Ok(_) => report.updated += 1,
                    Err(_) => report.errored += 1,
                }
            }
            Ok(None) => report.skipped += 1,
            Err(_) => report.errored += 1,
        }
    }

    Ok(report)
}

/// Copy `total_course_fees` from each row's linked offering and recompute
/// the derived totals where it changed. Idempotent.
pub fn sync_total_course_fees(conn: &Connection) -> OpResult<SyncReport> {
    let mut report = SyncReport::default();

    let mut stmt = conn.prepare(
        "SELECT cf.id, cf.total_course_fees, cd.total_course_fees
         FROM college_fees cf JOIN course_details cd ON cd.id = cf.coursedetail_id
         ORDER BY cf.rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (fee_id, current, target) in rows {
        report.processed += 1;
        if current == target {
            report.skipped += 1;
            continue;
        }
        let applied = conn
            .execute(
                "UPDATE college_fees SET total_course_fees = ? WHERE id = ?",
                (target, &fee_id),
            )
            .map_err(OpError::from)
            .and_then(|_| apply_derived(conn, &fee_id));
        match applied {
            Ok(_) => report.updated += 1,
            Err(_) => report.errored += 1,
        }
    }

    Ok(report)
}

/// Open a ledger row for every student that has none. Idempotent.
pub fn ensure_all_students_have_row(conn: &Connection) -> OpResult<SyncReport> {
    let mut report = SyncReport::default();

    let mut stmt = conn.prepare(
        "SELECT s.id FROM students s
         WHERE NOT EXISTS (SELECT 1 FROM college_fees cf WHERE cf.student_id = s.id)
         ORDER BY s.rowid",
    )?;
    let missing = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
    report.processed = total as usize;
    report.skipped = report.processed - missing.len();

    for student_id in missing {
        match open_for_student(conn, &student_id, false) {
            Ok(_) => report.updated += 1,
            Err(_) => report.errored += 1,
        }
    }

    Ok(report)
}
