//! Workspace migrations. Each migration is a `(probe, apply)` pair: the
//! probe answers whether the target state already holds, apply moves the
//! database there and returns how many rows it touched. `run_all` walks the
//! ordered list and records an applied-version marker per migration.
//! Probes guard every apply, so re-running is safe and a database migrated
//! halfway by an older build converges too.

use rusqlite::Connection;

use crate::calc::concatenate_address;
use crate::db::{self, table_has_column};
use crate::ledger;

pub struct Migration {
    pub id: &'static str,
    pub probe: fn(&Connection) -> anyhow::Result<bool>,
    pub apply: fn(&Connection) -> anyhow::Result<usize>,
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub id: &'static str,
    pub applied: bool,
    pub affected: usize,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "students_add_apaar_id",
        probe: |conn| table_has_column(conn, "students", "apaar_id"),
        apply: |conn| {
            conn.execute("ALTER TABLE students ADD COLUMN apaar_id TEXT", [])?;
            Ok(0)
        },
    },
    Migration {
        id: "students_add_concatenated_address",
        probe: |conn| table_has_column(conn, "students", "concatenated_address"),
        apply: |conn| {
            conn.execute(
                "ALTER TABLE students ADD COLUMN concatenated_address TEXT",
                [],
            )?;
            Ok(backfill_concatenated_address(conn)?)
        },
    },
    Migration {
        id: "students_backfill_concatenated_address",
        probe: |conn| Ok(pending_address_count(conn)? == 0),
        apply: |conn| Ok(backfill_concatenated_address(conn)?),
    },
    Migration {
        id: "students_rename_dropout_status",
        probe: |conn| {
            Ok(table_has_column(conn, "students", "student_status")?
                && !table_has_column(conn, "students", "dropout_status")?)
        },
        apply: |conn| {
            if !table_has_column(conn, "students", "student_status")? {
                conn.execute(
                    "ALTER TABLE students RENAME COLUMN dropout_status TO student_status",
                    [],
                )?;
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
                return Ok(count as usize);
            }
            // Both columns present: student_status is canonical, the legacy
            // column only fills gaps before being dropped.
            let copied = conn.execute(
                "UPDATE students SET student_status = dropout_status
                 WHERE COALESCE(student_status, '') = '' AND COALESCE(dropout_status, '') <> ''",
                [],
            )?;
            conn.execute("ALTER TABLE students DROP COLUMN dropout_status", [])?;
            Ok(copied)
        },
    },
    Migration {
        id: "course_details_rename_tuition_fee",
        probe: |conn| table_has_column(conn, "course_details", "course_tuition_fee"),
        apply: |conn| {
            conn.execute(
                "ALTER TABLE course_details RENAME COLUMN course_fees TO course_tuition_fee",
                [],
            )?;
            Ok(0)
        },
    },
    Migration {
        id: "exams_add_promotion_processed",
        probe: |conn| table_has_column(conn, "exams", "promotion_processed"),
        apply: |conn| {
            conn.execute(
                "ALTER TABLE exams ADD COLUMN promotion_processed INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
            Ok(0)
        },
    },
    Migration {
        id: "fees_scholarship_status_from_flags",
        probe: |conn| {
            Ok(table_has_column(conn, "college_fees", "meera_rebate_status")?
                && table_has_column(conn, "college_fees", "scholarship_status")?)
        },
        apply: |conn| Ok(convert_scholarship_flags(conn)?),
    },
    Migration {
        id: "fees_backfill_course_linkage",
        probe: |conn| {
            let pending: i64 = conn.query_row(
                "SELECT COUNT(*) FROM college_fees cf
                 JOIN students s ON s.id = cf.student_id
                 WHERE cf.coursedetail_id IS NULL
                   AND COALESCE(s.current_course, '') <> ''",
                [],
                |r| r.get(0),
            )?;
            Ok(pending == 0)
        },
        apply: |conn| {
            let report = ledger::sync_course_linkage(conn, None)
                .map_err(|e| anyhow::anyhow!("{}: {}", e.code, e.message))?;
            Ok(report.updated)
        },
    },
    Migration {
        id: "fees_backfill_derived_totals",
        probe: |conn| Ok(mismatched_totals(conn)?.is_empty()),
        apply: |conn| {
            let stale = mismatched_totals(conn)?;
            let affected = stale.len();
            for fee_id in stale {
                ledger::apply_derived(conn, &fee_id)
                    .map_err(|e| anyhow::anyhow!("{}: {}", e.code, e.message))?;
            }
            Ok(affected)
        },
    },
    Migration {
        id: "fees_create_missing_rows",
        probe: |conn| {
            let missing: i64 = conn.query_row(
                "SELECT COUNT(*) FROM students s
                 WHERE NOT EXISTS (SELECT 1 FROM college_fees cf WHERE cf.student_id = s.id)",
                [],
                |r| r.get(0),
            )?;
            Ok(missing == 0)
        },
        apply: |conn| {
            let report = ledger::ensure_all_students_have_row(conn)
                .map_err(|e| anyhow::anyhow!("{}: {}", e.code, e.message))?;
            Ok(report.updated)
        },
    },
];

pub fn run_all(conn: &Connection) -> anyhow::Result<Vec<MigrationReport>> {
    let mut reports = Vec::with_capacity(MIGRATIONS.len());
    for m in MIGRATIONS {
        let satisfied = (m.probe)(conn)?;
        let (applied, affected) = if satisfied {
            (false, 0)
        } else {
            (true, (m.apply)(conn)?)
        };
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(id, applied_at) VALUES(?, ?)",
            (m.id, db::now_utc()),
        )?;
        reports.push(MigrationReport {
            id: m.id,
            applied,
            affected,
        });
    }
    Ok(reports)
}

fn pending_address_count(conn: &Connection) -> rusqlite::Result<i64> {
    let mut stmt = conn.prepare(
        "SELECT street, area_village, city_tehsil, state, concatenated_address FROM students",
    )?;
    let mut pending = 0i64;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let expected = concatenate_address(
            row.get::<_, Option<String>>(0)?.as_deref(),
            row.get::<_, Option<String>>(1)?.as_deref(),
            row.get::<_, Option<String>>(2)?.as_deref(),
            row.get::<_, Option<String>>(3)?.as_deref(),
        );
        let stored: Option<String> = row.get(4)?;
        if stored.as_deref().unwrap_or("") != expected {
            pending += 1;
        }
    }
    Ok(pending)
}

fn backfill_concatenated_address(conn: &Connection) -> rusqlite::Result<usize> {
    let mut stmt =
        conn.prepare("SELECT id, street, area_village, city_tehsil, state, concatenated_address FROM students")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut updated = 0;
    for (id, street, area, city, state, stored) in rows {
        let expected = concatenate_address(
            street.as_deref(),
            area.as_deref(),
            city.as_deref(),
            state.as_deref(),
        );
        if stored.as_deref().unwrap_or("") != expected {
            conn.execute(
                "UPDATE students SET concatenated_address = ? WHERE id = ?",
                (&expected, &id),
            )?;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Legacy workspaces carried three monotone booleans per scholarship track.
/// Collapse them into the status columns, then drop the flags.
fn convert_scholarship_flags(conn: &Connection) -> anyhow::Result<usize> {
    let mut affected = 0usize;

    if !table_has_column(conn, "college_fees", "meera_rebate_status")? {
        conn.execute(
            "ALTER TABLE college_fees
             ADD COLUMN meera_rebate_status TEXT NOT NULL DEFAULT 'Not Applied'",
            [],
        )?;
        if table_has_column(conn, "college_fees", "meera_rebate_applied")? {
            affected += conn.execute(
                "UPDATE college_fees SET meera_rebate_status = CASE
                    WHEN meera_rebate_granted <> 0 THEN 'Granted'
                    WHEN meera_rebate_approved <> 0 THEN 'Approved'
                    WHEN meera_rebate_applied <> 0 THEN 'Applied'
                    ELSE 'Not Applied' END",
                [],
            )?;
            for col in [
                "meera_rebate_applied",
                "meera_rebate_approved",
                "meera_rebate_granted",
            ] {
                conn.execute(&format!("ALTER TABLE college_fees DROP COLUMN {}", col), [])?;
            }
        }
    }

    if !table_has_column(conn, "college_fees", "scholarship_status")? {
        conn.execute(
            "ALTER TABLE college_fees
             ADD COLUMN scholarship_status TEXT NOT NULL DEFAULT 'Not Applied'",
            [],
        )?;
        if table_has_column(conn, "college_fees", "scholarship_applied")? {
            affected += conn.execute(
                "UPDATE college_fees SET scholarship_status = CASE
                    WHEN scholarship_granted <> 0 THEN 'Granted'
                    WHEN scholarship_approved <> 0 THEN 'Approved'
                    WHEN scholarship_applied <> 0 THEN 'Applied'
                    ELSE 'Not Applied' END",
                [],
            )?;
            for col in [
                "scholarship_applied",
                "scholarship_approved",
                "scholarship_granted",
            ] {
                conn.execute(&format!("ALTER TABLE college_fees DROP COLUMN {}", col), [])?;
            }
        }
    }

    Ok(affected)
}

/// Ledger rows whose stored derived totals disagree with the primitives.
fn mismatched_totals(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM college_fees WHERE
            ROUND(total_fee, 2) <> ROUND(
                total_course_fees + enrollment_fee + eligibility_certificate_fee +
                university_affiliation_fee + university_sports_fee +
                university_development_fee + tc_cc_fee +
                miscellaneous_fee_1 + miscellaneous_fee_2 + miscellaneous_fee_3, 2)
         OR ROUND(total_fees_paid, 2) <> ROUND(
                installment_1 + installment_2 + installment_3 +
                installment_4 + installment_5 + installment_6, 2)
         OR ROUND(total_amount_after_rebate, 2) <> ROUND(
                total_fee - CASE WHEN meera_rebate_status = 'Granted'
                                 THEN meera_rebate_amount ELSE 0 END, 2)
         OR ROUND(total_amount_due, 2) <> ROUND(
                total_amount_after_rebate - total_fees_paid, 2)
         ORDER BY rowid",
    )?;
    let out = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>();
    out
}

