use crate::calc::{self, ClampPolicy};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_assessment_values_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_code = match required_str(req, "schoolCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let label = match required_str(req, "label") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_code = match optional_str(req, "teacherCode") {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return e,
    };
    let Some(weight) = req.params.get("weight").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "weight must be a number", None);
    };
    if !weight.is_finite() {
        return err(&req.id, "bad_params", "weight must be finite", None);
    }
    let is_global = req
        .params
        .get("isGlobal")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if let Err(e) = conn.execute(
        "INSERT INTO assessment_values(school_code, teacher_code, label, weight, is_global)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(school_code, teacher_code, label) DO UPDATE SET
           weight = excluded.weight,
           is_global = excluded.is_global",
        (
            &school_code,
            &teacher_code,
            &label,
            weight,
            if is_global { 1 } else { 0 },
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "label": label,
            "teacherCode": teacher_code,
            "weight": weight,
            "isGlobal": is_global
        }),
    )
}

fn handle_assessment_values_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_code = match required_str(req, "schoolCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_code = match optional_str(req, "teacherCode") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let effective = match teacher_code.as_deref() {
        Some(t) => db::teacher_assessment_overrides(conn, &school_code, t),
        None => db::school_assessment_overrides(conn, &school_code),
    };
    let effective = match effective {
        Ok(m) => m,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut custom: Vec<_> = effective
        .into_iter()
        .map(|(label, weight)| json!({ "label": label, "weight": weight }))
        .collect();
    custom.sort_by(|a, b| {
        a["label"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["label"].as_str().unwrap_or_default())
    });

    let defaults: Vec<_> = calc::DEFAULT_ASSESSMENT_WEIGHTS
        .iter()
        .map(|(label, weight)| json!({ "label": label, "weight": weight }))
        .collect();

    ok(
        &req.id,
        json!({
            "teacherCode": teacher_code,
            "custom": custom,
            "defaults": defaults
        }),
    )
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({
            "clampPolicy": db::clamp_policy(conn).as_str(),
            "utcOffsetMinutes": state.utc_offset_minutes
        }),
    )
}

fn handle_settings_set_clamp_policy(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let raw = match required_str(req, "policy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(policy) = ClampPolicy::parse(&raw) else {
        return err(
            &req.id,
            "bad_params",
            "policy must be combinedOnly or always",
            Some(json!({ "policy": raw })),
        );
    };

    if let Err(e) = db::settings_set_json(conn, db::CLAMP_POLICY_KEY, &json!(policy.as_str())) {
        return err(&req.id, "db_update_failed", format!("{e:?}"), None);
    }
    tracing::info!(policy = policy.as_str(), "clamp policy updated");
    ok(&req.id, json!({ "clampPolicy": policy.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessmentValues.set" => Some(handle_assessment_values_set(state, req)),
        "assessmentValues.list" => Some(handle_assessment_values_list(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.setClampPolicy" => Some(handle_settings_set_clamp_policy(state, req)),
        _ => None,
    }
}
