//! Natural-key minting: student unique ids (`BA-25-001`) and invoice
//! numbers (`INV202507150001`). Minting is a scan, not a counter table;
//! the UNIQUE constraint on the target column is the source of truth and
//! callers retry with a higher offset when an insert collides.

use chrono::NaiveDate;
use rusqlite::Connection;

/// Upper bound on mint-insert retries before reporting a collision.
pub const MINT_RETRY_LIMIT: i64 = 25;

/// Next student id for a course/year series, `offset` slots past the
/// current maximum (offset 0 is max+1, the first candidate).
pub fn mint_student_id(
    conn: &Connection,
    course_short: &str,
    year: i32,
    offset: i64,
) -> anyhow::Result<String> {
    let yy = format!("{:02}", year.rem_euclid(100));
    let prefix = format!("{}-{}-", course_short, yy);
    let pattern = format!("{}%", prefix);

    let mut stmt =
        conn.prepare("SELECT student_unique_id FROM students WHERE student_unique_id LIKE ?")?;
    let ids = stmt
        .query_map([&pattern], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut max_number: i64 = 0;
    for id in ids {
        // "BA-25-007" -> 7; malformed ids in the series are skipped.
        if let Some(n) = id.split('-').nth(2).and_then(|s| s.parse::<i64>().ok()) {
            max_number = max_number.max(n);
        }
    }

    Ok(format!("{}{:03}", prefix, max_number + 1 + offset))
}

/// Next invoice number for the given date, `offset` slots past the current
/// per-day count.
pub fn mint_invoice_number(
    conn: &Connection,
    date: NaiveDate,
    offset: i64,
) -> anyhow::Result<String> {
    let date_str = date.format("%Y%m%d").to_string();
    let pattern = format!("INV{}%", date_str);

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE invoice_number LIKE ?",
        [&pattern],
        |r| r.get(0),
    )?;

    Ok(format!("INV{}{:04}", date_str, count + 1 + offset))
}

/// True when an insert failed on a UNIQUE constraint, i.e. a mint lost the
/// race and the caller should retry with the next offset.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
