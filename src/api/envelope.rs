//! Uniform result envelope returned by every operation.
//!
//! ```json
//! {"result":"OK","cid":"…","payload":{"id":1,"name":"gnupg"}}
//! {"result":"ERROR","cid":"…","error":{"kind":"not_found","message":"…"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{EgressError, ErrorKind, FieldViolation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<FieldViolation>,
}

impl From<&EgressError> for ErrorBody {
    fn from(err: &EgressError) -> Self {
        let message = match err {
            // Storage internals stay in the logs.
            EgressError::Database { context, .. } => context.clone(),
            EgressError::Internal { .. } => "internal error".to_string(),
            other => other.to_string(),
        };
        Self { kind: err.kind(), message, violations: err.violations().to_vec() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub result: ResultCode,
    /// Correlation id, also recorded on the request span
    pub cid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn ok(cid: Uuid, payload: Value) -> Self {
        Self { result: ResultCode::Ok, cid, payload: Some(payload), error: None }
    }

    pub fn error(cid: Uuid, err: &EgressError) -> Self {
        Self { result: ResultCode::Error, cid, payload: None, error: Some(ErrorBody::from(err)) }
    }

    pub fn is_ok(&self) -> bool {
        self.result == ResultCode::Ok
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_shape() {
        let cid = Uuid::new_v4();
        let json = Envelope::ok(cid, json!({"id": 1, "name": "gnupg"})).to_json();
        assert_eq!(json["result"], "OK");
        assert_eq!(json["cid"], cid.to_string());
        assert_eq!(json["payload"]["id"], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_envelope_lists_violations() {
        let err = EgressError::validation_violations(vec![FieldViolation::new(
            "password2",
            "must_match",
            "password1 and password2 must be equal",
        )]);
        let json = Envelope::error(Uuid::new_v4(), &err).to_json();
        assert_eq!(json["result"], "ERROR");
        assert_eq!(json["error"]["kind"], "validation");
        assert_eq!(json["error"]["violations"][0]["field"], "password2");
        assert_eq!(json["error"]["violations"][0]["rule"], "must_match");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn internal_details_are_not_returned() {
        let err = EgressError::internal("row 7 has invalid kind");
        let envelope = Envelope::error(Uuid::new_v4(), &err);
        assert_eq!(envelope.error_kind(), Some(ErrorKind::Internal));
        assert_eq!(envelope.error.unwrap().message, "internal error");
    }
}
