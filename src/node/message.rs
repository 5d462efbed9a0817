//! Wire envelopes for the node protocol
//!
//! One JSON object per line: `{"src": .., "dest": .., "body": {..}}`. The body
//! always carries a `type`; requests carry `msg_id` and replies carry
//! `in_reply_to`. Everything else is operation-specific.

use crate::common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reply type used for failures
pub const ERROR_TYPE: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub src: String,
    pub dest: String,
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,

    /// Operation-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Body carrying the fields of a serializable payload
    pub fn with_payload<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self> {
        let fields = match serde_json::to_value(payload)? {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Internal(format!(
                    "payload must serialize to an object, got {}",
                    other
                )))
            }
        };
        Ok(Self {
            kind: kind.into(),
            fields,
            ..Default::default()
        })
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Decode the operation fields into a typed payload.
    ///
    /// Missing or mistyped fields surface as `Error::MalformedRequest`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| Error::MalformedRequest(format!("{}: {}", self.kind, e)))
    }

    pub fn error(code: u64, text: impl Into<String>) -> Self {
        Self::new(ERROR_TYPE)
            .with_field("code", code)
            .with_field("text", text.into())
    }

    pub fn from_error(err: &Error) -> Self {
        Self::error(err.to_rpc_code(), err.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.kind == ERROR_TYPE
    }

    /// Turn an error reply into an `Error::Rpc`
    pub fn to_error(&self) -> Error {
        let code = self
            .field("code")
            .and_then(Value::as_u64)
            .unwrap_or(crate::common::codes::CRASH);
        let text = self
            .field("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Error::from_rpc(code, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_line() {
        let line = r#"{"id":4,"src":"c1","dest":"n1","body":{"type":"send","msg_id":7,"key":"k1","msg":42}}"#;
        let msg: Message = serde_json::from_str(line).unwrap();

        assert_eq!(msg.src, "c1");
        assert_eq!(msg.body.kind, "send");
        assert_eq!(msg.body.msg_id, Some(7));
        assert_eq!(msg.body.in_reply_to, None);
        assert_eq!(msg.body.field("key"), Some(&json!("k1")));
        assert!(!msg.body.fields.contains_key("type"));
    }

    #[test]
    fn test_serialize_reply_flattens_fields() {
        let body = Body::new("send_ok").with_field("offset", 3);
        let msg = Message {
            id: None,
            src: "n1".into(),
            dest: "c1".into(),
            body: Body {
                in_reply_to: Some(7),
                ..body
            },
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"src": "n1", "dest": "c1", "body": {"type": "send_ok", "in_reply_to": 7, "offset": 3}})
        );
    }

    #[test]
    fn test_decode_reports_malformed() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Payload {
            key: String,
        }

        let body = Body::new("send").with_field("key", 5);
        assert!(matches!(
            body.decode::<Payload>(),
            Err(Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_error_body_roundtrip() {
        let body = Body::error(22, "current value [1] is not [2]");
        assert!(body.is_error());
        match body.to_error() {
            Error::Rpc { code, text } => {
                assert_eq!(code, 22);
                assert!(text.contains("is not"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
