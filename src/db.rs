use crate::calc::{AssessmentOverrides, ClampPolicy};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradesheet.sqlite3";

pub const CLAMP_POLICY_KEY: &str = "calc.clampPolicy";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            school_code TEXT NOT NULL,
            student_code TEXT NOT NULL,
            first_name TEXT NOT NULL,
            family_name TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(school_code, student_code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            school_code TEXT NOT NULL,
            class_code TEXT NOT NULL,
            class_name TEXT NOT NULL,
            PRIMARY KEY(school_code, class_code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_classes(
            school_code TEXT NOT NULL,
            student_code TEXT NOT NULL,
            class_code TEXT NOT NULL,
            PRIMARY KEY(school_code, student_code, class_code),
            FOREIGN KEY(school_code, student_code) REFERENCES students(school_code, student_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_classes_class ON student_classes(school_code, class_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            school_code TEXT NOT NULL,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL,
            credit_units REAL,
            PRIMARY KEY(school_code, course_code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_teachers(
            school_code TEXT NOT NULL,
            class_code TEXT NOT NULL,
            teacher_code TEXT NOT NULL,
            course_code TEXT NOT NULL,
            PRIMARY KEY(school_code, class_code, teacher_code, course_code),
            FOREIGN KEY(school_code, class_code) REFERENCES classes(school_code, class_code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classsheet(
            id TEXT PRIMARY KEY,
            school_code TEXT NOT NULL,
            student_code TEXT NOT NULL,
            class_code TEXT NOT NULL,
            course_code TEXT NOT NULL,
            teacher_code TEXT NOT NULL,
            date TEXT,
            grades_json TEXT NOT NULL DEFAULT '[]',
            assessments_json TEXT NOT NULL DEFAULT '[]',
            note TEXT,
            descriptive_status TEXT,
            presence_status TEXT,
            time_slot TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classsheet_student ON classsheet(school_code, student_code)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classsheet_class_course ON classsheet(school_code, class_code, course_code)",
        [],
    )?;

    // teacher_code '' marks a school-wide value.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_values(
            school_code TEXT NOT NULL,
            teacher_code TEXT NOT NULL DEFAULT '',
            label TEXT NOT NULL,
            weight REAL NOT NULL,
            is_global INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(school_code, teacher_code, label)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Falls back to the default policy when the setting is missing or unreadable.
pub fn clamp_policy(conn: &Connection) -> ClampPolicy {
    match settings_get_json(conn, CLAMP_POLICY_KEY) {
        Ok(Some(v)) => v
            .as_str()
            .and_then(ClampPolicy::parse)
            .unwrap_or_default(),
        Ok(None) => ClampPolicy::default(),
        Err(e) => {
            tracing::warn!(error = %e, "unreadable clamp policy setting, using default");
            ClampPolicy::default()
        }
    }
}

/// School-wide label weights: rows without a teacher, plus teacher rows
/// flagged global. Plain school rows win over global teacher rows.
pub fn school_assessment_overrides(
    conn: &Connection,
    school_code: &str,
) -> rusqlite::Result<AssessmentOverrides> {
    let mut stmt = conn.prepare(
        "SELECT label, weight
         FROM assessment_values
         WHERE school_code = ? AND (teacher_code = '' OR is_global = 1)
         ORDER BY CASE WHEN teacher_code = '' THEN 1 ELSE 0 END, teacher_code",
    )?;
    let rows = stmt
        .query_map([school_code], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().collect())
}

/// School-wide weights with one teacher's own values layered on top.
pub fn teacher_assessment_overrides(
    conn: &Connection,
    school_code: &str,
    teacher_code: &str,
) -> rusqlite::Result<AssessmentOverrides> {
    let mut overrides = school_assessment_overrides(conn, school_code)?;
    let mut stmt = conn.prepare(
        "SELECT label, weight
         FROM assessment_values
         WHERE school_code = ? AND teacher_code = ? AND teacher_code <> ''",
    )?;
    let rows = stmt
        .query_map((school_code, teacher_code), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    overrides.extend(rows);
    Ok(overrides)
}
