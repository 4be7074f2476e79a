use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string", key),
                None,
            )),
        },
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                None,
            )
        }),
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// `referenceDate` (YYYY-MM-DD) when given, otherwise today at the school's offset.
pub fn reference_date(state: &AppState, req: &Request) -> Result<NaiveDate, serde_json::Value> {
    if let Some(raw) = optional_str(req, "referenceDate")? {
        return NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
            err(
                &req.id,
                "bad_params",
                "referenceDate must be YYYY-MM-DD",
                Some(serde_json::json!({ "referenceDate": raw })),
            )
        });
    }
    let local = Utc::now().naive_utc() + Duration::minutes(i64::from(state.utc_offset_minutes));
    Ok(local.date())
}

pub fn school_year_param(req: &Request) -> Result<Option<i32>, serde_json::Value> {
    match optional_i64(req, "schoolYear")? {
        None => Ok(None),
        Some(y) => i32::try_from(y).map(Some).map_err(|_| {
            err(&req.id, "bad_params", "schoolYear out of range", None)
        }),
    }
}
