use crate::calc::{AssessmentEntry, GradeEntry};
use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn db(code: &'static str, e: rusqlite::Error) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_list<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<T>, HandlerErr> {
    match params.get(key) {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("invalid {}: {}", key, e),
            details: None,
        }),
    }
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn students_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_code = get_required_str(params, "schoolCode")?;
    let student_code = get_required_str(params, "studentCode")?;
    let first_name = get_optional_str(params, "firstName").unwrap_or_default();
    let family_name = get_optional_str(params, "familyName").unwrap_or_default();
    let class_codes: Vec<String> = parse_list(params, "classCodes")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO students(school_code, student_code, first_name, family_name, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(school_code, student_code) DO UPDATE SET
           first_name = excluded.first_name,
           family_name = excluded.family_name,
           updated_at = excluded.updated_at",
        (&school_code, &student_code, &first_name, &family_name, now_stamp()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    // Membership is replaced wholesale when classCodes is sent.
    if params.get("classCodes").is_some() {
        tx.execute(
            "DELETE FROM student_classes WHERE school_code = ? AND student_code = ?",
            (&school_code, &student_code),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        for class_code in &class_codes {
            let class_code = class_code.trim();
            if class_code.is_empty() {
                continue;
            }
            tx.execute(
                "INSERT OR IGNORE INTO student_classes(school_code, student_code, class_code)
                 VALUES(?, ?, ?)",
                (&school_code, &student_code, class_code),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({
        "studentCode": student_code,
        "classCodes": class_codes,
    }))
}

fn courses_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_code = get_required_str(params, "schoolCode")?;
    let course_code = get_required_str(params, "courseCode")?;
    let course_name = get_optional_str(params, "courseName").unwrap_or_else(|| course_code.clone());
    let credit_units = match params.get("creditUnits") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(n) = v.as_f64() else {
                return Err(HandlerErr::bad_params("creditUnits must be a number"));
            };
            if n <= 0.0 {
                return Err(HandlerErr::bad_params("creditUnits must be positive"));
            }
            Some(n)
        }
    };

    conn.execute(
        "INSERT INTO courses(school_code, course_code, course_name, credit_units)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(school_code, course_code) DO UPDATE SET
           course_name = excluded.course_name,
           credit_units = excluded.credit_units",
        (&school_code, &course_code, &course_name, credit_units),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({ "courseCode": course_code, "courseName": course_name }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherAssignment {
    teacher_code: String,
    course_code: String,
}

fn classes_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_code = get_required_str(params, "schoolCode")?;
    let class_code = get_required_str(params, "classCode")?;
    let class_name = get_optional_str(params, "className").unwrap_or_else(|| class_code.clone());
    let teachers: Vec<TeacherAssignment> = parse_list(params, "teachers")?;
    if teachers
        .iter()
        .any(|t| t.teacher_code.trim().is_empty() || t.course_code.trim().is_empty())
    {
        return Err(HandlerErr::bad_params(
            "teachers entries need teacherCode and courseCode",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO classes(school_code, class_code, class_name)
         VALUES(?, ?, ?)
         ON CONFLICT(school_code, class_code) DO UPDATE SET class_name = excluded.class_name",
        (&school_code, &class_code, &class_name),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    if params.get("teachers").is_some() {
        tx.execute(
            "DELETE FROM class_teachers WHERE school_code = ? AND class_code = ?",
            (&school_code, &class_code),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
        for t in &teachers {
            tx.execute(
                "INSERT OR IGNORE INTO class_teachers(school_code, class_code, teacher_code, course_code)
                 VALUES(?, ?, ?, ?)",
                (
                    &school_code,
                    &class_code,
                    t.teacher_code.trim(),
                    t.course_code.trim(),
                ),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        }
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "classCode": class_code, "teacherCount": teachers.len() }))
}

fn cells_add(
    conn: &Connection,
    params: &serde_json::Value,
    utc_offset_minutes: i32,
) -> Result<serde_json::Value, HandlerErr> {
    let school_code = get_required_str(params, "schoolCode")?;
    let student_code = get_required_str(params, "studentCode")?;
    let class_code = get_required_str(params, "classCode")?;
    let course_code = get_required_str(params, "courseCode")?;
    let teacher_code = get_required_str(params, "teacherCode")?;
    let date = get_required_str(params, "date")?;

    // Stored verbatim; reports re-read it. Reject what they could never bucket.
    if let Err(e) = calendar::parse_record_date(&date, utc_offset_minutes) {
        return Err(HandlerErr {
            code: "bad_params",
            message: e.to_string(),
            details: Some(json!({ "date": date })),
        });
    }

    let grades: Vec<GradeEntry> = parse_list(params, "grades")?;
    if let Some(g) = grades.iter().find(|g| matches!(g.total_points, Some(p) if p <= 0.0)) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "grade totalPoints must be positive".to_string(),
            details: Some(json!({ "description": g.description })),
        });
    }
    let assessments: Vec<AssessmentEntry> = parse_list(params, "assessments")?;

    let grades_json = serde_json::to_string(&grades).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let assessments_json =
        serde_json::to_string(&assessments).map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let record_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classsheet(
            id, school_code, student_code, class_code, course_code, teacher_code, date,
            grades_json, assessments_json, note, descriptive_status, presence_status, time_slot,
            created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            record_id,
            school_code,
            student_code,
            class_code,
            course_code,
            teacher_code,
            date,
            grades_json,
            assessments_json,
            get_optional_str(params, "note"),
            get_optional_str(params, "descriptiveStatus"),
            get_optional_str(params, "presenceStatus"),
            get_optional_str(params, "timeSlot"),
            now_stamp(),
        ],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    Ok(json!({
        "recordId": record_id,
        "gradeCount": grades.len(),
        "assessmentCount": assessments.len(),
    }))
}

fn cells_delete_grade(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_code = get_required_str(params, "schoolCode")?;
    let record_id = get_required_str(params, "recordId")?;
    let teacher_code = get_optional_str(params, "teacherCode");
    let Some(raw_grade) = params.get("grade").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing grade"));
    };
    let target: GradeEntry = serde_json::from_value(raw_grade.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid grade: {}", e)))?;

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT teacher_code, grades_json FROM classsheet WHERE id = ? AND school_code = ?",
            (&record_id, &school_code),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((owner, grades_json)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "record not found".to_string(),
            details: Some(json!({ "recordId": record_id })),
        });
    };
    if let Some(teacher) = teacher_code.as_deref() {
        if teacher != owner {
            return Err(HandlerErr {
                code: "not_found",
                message: "record not found".to_string(),
                details: Some(json!({ "recordId": record_id })),
            });
        }
    }

    let grades: Vec<GradeEntry> = serde_json::from_str(&grades_json).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: format!("stored grades unreadable: {}", e),
        details: None,
    })?;
    let before = grades.len();
    let kept: Vec<GradeEntry> = grades.into_iter().filter(|g| !g.same_grade(&target)).collect();
    let removed = before - kept.len();
    if removed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "grade not found on record".to_string(),
            details: Some(json!({ "recordId": record_id })),
        });
    }

    let kept_json = serde_json::to_string(&kept).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    conn.execute(
        "UPDATE classsheet SET grades_json = ? WHERE id = ?",
        (&kept_json, &record_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(record_id = %record_id, removed, "deleted grades from record");

    Ok(json!({ "recordId": record_id, "removed": removed, "remaining": kept.len() }))
}

fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value, i32) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params, state.utc_offset_minutes) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.upsert" => Some(with_conn(state, req, |c, p, _| students_upsert(c, p))),
        "courses.upsert" => Some(with_conn(state, req, |c, p, _| courses_upsert(c, p))),
        "classes.upsert" => Some(with_conn(state, req, |c, p, _| classes_upsert(c, p))),
        "cells.add" => Some(with_conn(state, req, cells_add)),
        "cells.deleteGrade" => Some(with_conn(state, req, |c, p, _| cells_delete_grade(c, p))),
        _ => None,
    }
}
