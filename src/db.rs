use rusqlite::Connection;
use std::path::Path;

use crate::migrate;

pub const DB_FILE: &str = "college.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    create_schema(&conn)?;

    // Older workspaces may predate some columns and backfills; the
    // migration list probes for each target state before touching anything.
    migrate::run_all(&conn)?;

    // This column only exists once the dropout_status rename has run.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(student_status)",
        [],
    )?;

    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_roles(
            role_id TEXT PRIMARY KEY,
            role_name TEXT NOT NULL UNIQUE,
            role_description TEXT,
            access_type TEXT NOT NULL,
            access_level INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_profiles(
            id TEXT PRIMARY KEY,
            role_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            gender TEXT,
            birthdate TEXT,
            street TEXT,
            area_village TEXT,
            city_tehsil TEXT,
            state TEXT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Active',
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(role_id) REFERENCES user_roles(role_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_profiles_role ON user_profiles(role_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            course_id TEXT PRIMARY KEY,
            course_short_name TEXT NOT NULL UNIQUE,
            course_full_name TEXT NOT NULL,
            course_category TEXT,
            duration_years INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_details(
            id TEXT PRIMARY KEY,
            course_full_name TEXT NOT NULL,
            course_short_name TEXT NOT NULL,
            year_semester TEXT NOT NULL,
            course_tuition_fee REAL NOT NULL DEFAULT 0,
            course_type TEXT,
            misc_course_fees_1 REAL NOT NULL DEFAULT 0,
            misc_course_fees_2 REAL NOT NULL DEFAULT 0,
            misc_course_fees_3 REAL NOT NULL DEFAULT 0,
            misc_course_fees_4 REAL NOT NULL DEFAULT 0,
            misc_course_fees_5 REAL NOT NULL DEFAULT 0,
            misc_course_fees_6 REAL NOT NULL DEFAULT 0,
            total_course_fees REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(course_short_name) REFERENCES courses(course_short_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_details_short ON course_details(course_short_name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_details_full_name ON course_details(course_full_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            course_short_name TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            subject_type TEXT NOT NULL,
            FOREIGN KEY(course_short_name) REFERENCES courses(course_short_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_course ON subjects(course_short_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_unique_id TEXT NOT NULL UNIQUE,
            external_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            father_name TEXT,
            mother_name TEXT,
            gender TEXT NOT NULL,
            category TEXT,
            email TEXT,
            current_course TEXT,
            subject_1_name TEXT,
            subject_2_name TEXT,
            subject_3_name TEXT,
            percentage REAL,
            street TEXT,
            area_village TEXT,
            city_tehsil TEXT,
            state TEXT,
            phone TEXT,
            aadhaar_card_number TEXT,
            apaar_id TEXT,
            school_name TEXT,
            scholarship_status TEXT NOT NULL DEFAULT 'Not Applied',
            rebate_meera_scholarship_status TEXT NOT NULL DEFAULT 'Not Applied',
            student_status TEXT NOT NULL DEFAULT 'Active',
            admission_date TEXT,
            concatenated_address TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(current_course)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS college_fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT,
            coursedetail_id TEXT,
            course_full_name TEXT,
            total_course_fees REAL NOT NULL DEFAULT 0,
            enrollment_fee REAL NOT NULL DEFAULT 0,
            eligibility_certificate_fee REAL NOT NULL DEFAULT 0,
            university_affiliation_fee REAL NOT NULL DEFAULT 0,
            university_sports_fee REAL NOT NULL DEFAULT 0,
            university_development_fee REAL NOT NULL DEFAULT 0,
            tc_cc_fee REAL NOT NULL DEFAULT 0,
            miscellaneous_fee_1 REAL NOT NULL DEFAULT 0,
            miscellaneous_fee_2 REAL NOT NULL DEFAULT 0,
            miscellaneous_fee_3 REAL NOT NULL DEFAULT 0,
            total_fee REAL NOT NULL DEFAULT 0,
            payment_mode TEXT,
            installment_1 REAL NOT NULL DEFAULT 0,
            invoice1_number TEXT,
            installment_2 REAL NOT NULL DEFAULT 0,
            invoice2_number TEXT,
            installment_3 REAL NOT NULL DEFAULT 0,
            invoice3_number TEXT,
            installment_4 REAL NOT NULL DEFAULT 0,
            invoice4_number TEXT,
            installment_5 REAL NOT NULL DEFAULT 0,
            invoice5_number TEXT,
            installment_6 REAL NOT NULL DEFAULT 0,
            invoice6_number TEXT,
            total_fees_paid REAL NOT NULL DEFAULT 0,
            meera_rebate_status TEXT NOT NULL DEFAULT 'Not Applied',
            meera_rebate_amount REAL NOT NULL DEFAULT 0,
            scholarship_status TEXT NOT NULL DEFAULT 'Not Applied',
            government_scholarship_amount REAL NOT NULL DEFAULT 0,
            total_amount_after_rebate REAL NOT NULL DEFAULT 0,
            total_amount_due REAL NOT NULL DEFAULT 0,
            pending_dues_for_libraries INTEGER NOT NULL DEFAULT 0,
            pending_dues_for_hostel INTEGER NOT NULL DEFAULT 0,
            exam_admit_card_issued INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(course_id),
            FOREIGN KEY(coursedetail_id) REFERENCES course_details(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_college_fees_student ON college_fees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_college_fees_coursedetail ON college_fees(coursedetail_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT,
            invoice_number TEXT NOT NULL UNIQUE,
            date_time TEXT NOT NULL,
            invoice_amount REAL NOT NULL,
            original_invoice_printed INTEGER NOT NULL DEFAULT 0,
            installment_number INTEGER,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_student ON invoices(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_date_time ON invoices(date_time)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT,
            coursedetail_id TEXT,
            course_full_name TEXT,
            semester TEXT,
            exam_name TEXT NOT NULL,
            subject1_name TEXT,
            subject1_max_marks INTEGER NOT NULL DEFAULT 0,
            subject1_obtained_marks INTEGER NOT NULL DEFAULT 0,
            subject2_name TEXT,
            subject2_max_marks INTEGER NOT NULL DEFAULT 0,
            subject2_obtained_marks INTEGER NOT NULL DEFAULT 0,
            subject3_name TEXT,
            subject3_max_marks INTEGER NOT NULL DEFAULT 0,
            subject3_obtained_marks INTEGER NOT NULL DEFAULT 0,
            subject4_name TEXT,
            subject4_max_marks INTEGER NOT NULL DEFAULT 0,
            subject4_obtained_marks INTEGER NOT NULL DEFAULT 0,
            subject5_name TEXT,
            subject5_max_marks INTEGER NOT NULL DEFAULT 0,
            subject5_obtained_marks INTEGER NOT NULL DEFAULT 0,
            subject6_name TEXT,
            subject6_max_marks INTEGER NOT NULL DEFAULT 0,
            subject6_obtained_marks INTEGER NOT NULL DEFAULT 0,
            total_max_marks INTEGER NOT NULL DEFAULT 0,
            total_obtained_marks INTEGER NOT NULL DEFAULT 0,
            percentage REAL NOT NULL DEFAULT 0,
            grade TEXT,
            overall_status TEXT,
            exam_date TEXT,
            promotion_processed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(course_id),
            FOREIGN KEY(coursedetail_id) REFERENCES course_details(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_student ON exams(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations(
            id TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// RFC 3339 UTC timestamp for created_at/updated_at columns.
pub fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn today_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
