mod test_support;

use serde_json::json;
use test_support::{approx, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn delete_grade_matches_on_value_description_date_and_points() {
    let workspace = temp_dir("gradesheet-delete-grade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.upsert",
        json!({
            "schoolCode": "s1",
            "classCode": "7a",
            "teachers": [{ "teacherCode": "t1", "courseCode": "fa" }]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.upsert",
        json!({ "schoolCode": "s1", "studentCode": "S", "classCodes": ["7a"] }),
    );
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "cells.add",
        json!({
            "schoolCode": "s1",
            "studentCode": "S",
            "classCode": "7a",
            "courseCode": "fa",
            "teacherCode": "t1",
            "date": "2024-10-01T08:30:00Z",
            "grades": [
                { "value": 15, "description": "dictation", "date": "1403/07/10" },
                { "value": 15, "totalPoints": 20, "description": "dictation", "date": "1403/07/10" },
                { "value": 15, "totalPoints": 10, "description": "dictation", "date": "1403/07/10" },
                { "value": 12, "description": "reading", "date": "1403/07/10" }
            ]
        }),
    );
    assert_eq!(added["gradeCount"].as_u64(), Some(4));
    let record_id = added["recordId"].as_str().expect("recordId").to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "cells.deleteGrade",
        json!({
            "schoolCode": "s1",
            "recordId": record_id,
            "teacherCode": "t2",
            "grade": { "value": 15, "description": "dictation", "date": "1403/07/10" }
        }),
    );
    assert_eq!(code, "not_found");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "cells.deleteGrade",
        json!({
            "schoolCode": "s1",
            "recordId": record_id,
            "teacherCode": "t1",
            "grade": { "value": 15, "description": "dictation", "date": "1403/07/10" }
        }),
    );
    assert_eq!(deleted["removed"].as_u64(), Some(2));
    assert_eq!(deleted["remaining"].as_u64(), Some(2));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "cells.deleteGrade",
        json!({
            "schoolCode": "s1",
            "recordId": record_id,
            "grade": { "value": 15, "description": "dictation", "date": "1403/07/10" }
        }),
    );
    assert_eq!(code, "not_found");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.student",
        json!({ "schoolCode": "s1", "studentCode": "S", "referenceDate": "2024-10-20" }),
    );
    let mehr = &report["courseGrades"][0]["monthlyGrades"]["7"];
    let grades = mehr["grades"].as_array().expect("grades");
    assert_eq!(grades.len(), 2);
    // 15/10 and 12/20 pooled: 27 of 30 points.
    approx(mehr["baseGrade"].as_f64(), 18.0);
    approx(grades[0]["normalizedValue"].as_f64(), 30.0);
    // Grade-only month is not clamped by default.
    approx(mehr["finalScore"].as_f64(), 18.0);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "cells.deleteGrade",
        json!({ "schoolCode": "s1", "recordId": "missing", "grade": { "value": 1 } }),
    );
    assert_eq!(code, "not_found");
}
