use crate::calendar;
use crate::db;
use crate::ipc::error::{err, model_response, ok};
use crate::ipc::helpers::{
    db_conn, optional_i64, optional_str, reference_date, required_str, school_year_param,
};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportContext};
use serde_json::json;

fn context<'a>(
    state: &'a AppState,
    req: &Request,
    school_code: &'a str,
) -> Result<ReportContext<'a>, serde_json::Value> {
    let conn = db_conn(state, req)?;
    Ok(ReportContext {
        conn,
        school_code,
        reference_date: reference_date(state, req)?,
        utc_offset_minutes: state.utc_offset_minutes,
        clamp_policy: db::clamp_policy(conn),
    })
}

fn handle_grades_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school_code = match required_str(req, "schoolCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_year = match school_year_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = match context(state, req, &school_code) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let result = report::compute_student_report(&ctx, &student_code, school_year);
    model_response(&req.id, result)
}

fn handle_grades_class_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school_code = match required_str(req, "schoolCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_code = match required_str(req, "classCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_code = match required_str(req, "courseCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_code = match optional_str(req, "teacherCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_year = match school_year_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = match context(state, req, &school_code) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let result = report::compute_course_sheet(
        &ctx,
        &class_code,
        &course_code,
        teacher_code.as_deref(),
        school_year,
    );
    model_response(&req.id, result)
}

fn handle_grades_class_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school_code = match required_str(req, "schoolCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_code = match required_str(req, "classCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let month = match optional_i64(req, "month") {
        Ok(None) => None,
        Ok(Some(m)) => match u32::try_from(m) {
            Ok(m) => Some(m),
            Err(_) => return err(&req.id, "bad_params", "month must be between 1 and 12", None),
        },
        Err(e) => return e,
    };
    let school_year = match school_year_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = match context(state, req, &school_code) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let result = report::compute_class_overview(&ctx, &class_code, month, school_year);
    model_response(&req.id, result)
}

fn handle_calendar_convert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match calendar::parse_record_date(&raw, state.utc_offset_minutes) {
        Ok(d) => d,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                e.to_string(),
                Some(json!({ "date": raw })),
            )
        }
    };
    let jalali = calendar::to_civil(date);

    ok(
        &req.id,
        json!({
            "gregorian": date.format("%Y-%m-%d").to_string(),
            "jalali": jalali,
            "schoolYear": calendar::school_year_of(jalali),
            "monthName": calendar::month_name(jalali.month)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.student" => Some(handle_grades_student(state, req)),
        "grades.classCourse" => Some(handle_grades_class_course(state, req)),
        "grades.classOverview" => Some(handle_grades_class_overview(state, req)),
        "calendar.convert" => Some(handle_calendar_convert(state, req)),
        _ => None,
    }
}
