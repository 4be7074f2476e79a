use crate::calc::CalcError;
use serde::Serialize;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn calc_err(id: &str, e: CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

/// Envelope for a report builder result. A model that cannot be serialized
/// is reported as `server_error`.
pub fn model_response<T: Serialize>(id: &str, result: Result<T, CalcError>) -> serde_json::Value {
    match result {
        Ok(model) => match serde_json::to_value(model) {
            Ok(v) => ok(id, v),
            Err(e) => err(id, "server_error", e.to_string(), None),
        },
        Err(e) => calc_err(id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn calc_errors_keep_code_and_details() {
        let resp = model_response::<u32>(
            "7",
            Err(CalcError::new("forbidden", "nope").with_details(json!({ "teacherCode": "t9" }))),
        );
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("forbidden"));
        assert_eq!(resp["error"]["details"]["teacherCode"], json!("t9"));
    }

    #[test]
    fn unserializable_model_is_a_server_error() {
        let mut bad: HashMap<(u32, u32), u32> = HashMap::new();
        bad.insert((1, 2), 3);
        let resp = model_response("8", Ok(bad));
        assert_eq!(resp["id"], json!("8"));
        assert_eq!(resp["error"]["code"], json!("server_error"));

        let good = model_response("9", Ok(vec![1, 2]));
        assert_eq!(good["result"], json!([1, 2]));
    }
}
