//! Wire envelope codec.
//!
//! Every message on the shared transport is UTF-8 JSON of the exact shape
//! `{"type": <string>, "payload": {"data": <any>}}`. The `type` field names
//! the logical event; `data` is opaque and only forwarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type for an ordinary message delivery.
pub const MESSAGE: &str = "message";

/// Event type for a forced disconnect request.
pub const DISCONNECT: &str = "disconnect";

/// Errors produced by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Inbound bytes did not parse as `{type, payload: {data}}`.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A decoded transport message.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Envelope {
    /// Logical event name (`"message"`, `"disconnect"`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload wrapper.
    pub payload: Payload,
}

/// The `payload` object of an [`Envelope`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Payload {
    /// Opaque application data. Absent keys decode as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Borrow the opaque data.
    pub fn data(&self) -> &Value {
        &self.payload.data
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: PayloadRef<'a>,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    data: &'a Value,
}

/// Serialize `data` under event type `kind`.
pub fn encode(kind: &str, data: &Value) -> Result<Vec<u8>, EnvelopeError> {
    serde_json::to_vec(&EnvelopeRef {
        kind,
        payload: PayloadRef { data },
    })
    .map_err(EnvelopeError::Encode)
}

/// Parse an inbound transport message.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_exact() {
        let bytes = encode(MESSAGE, &json!({"text": "hi"})).unwrap();
        let wire = String::from_utf8(bytes).unwrap();
        insta::assert_snapshot!(wire, @r#"{"type":"message","payload":{"data":{"text":"hi"}}}"#);
    }

    #[test]
    fn null_data_is_written_explicitly() {
        let wire = String::from_utf8(encode(DISCONNECT, &Value::Null).unwrap()).unwrap();
        insta::assert_snapshot!(wire, @r#"{"type":"disconnect","payload":{"data":null}}"#);
    }

    #[test]
    fn decode_reads_type_and_data() {
        let env = decode(br#"{"type":"message","payload":{"data":[1,2,3]}}"#).unwrap();
        assert_eq!(env.kind, "message");
        assert_eq!(env.data(), &json!([1, 2, 3]));
    }

    #[test]
    fn missing_data_decodes_as_null() {
        let env = decode(br#"{"type":"disconnect","payload":{}}"#).unwrap();
        assert_eq!(env.kind, DISCONNECT);
        assert!(env.data().is_null());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let env = decode(br#"{"type":"x","payload":{"data":1,"extra":true},"v":2}"#).unwrap();
        assert_eq!(env.kind, "x");
        assert_eq!(env.data(), &json!(1));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        for bad in [
            &b"not json"[..],
            br#"{"payload":{"data":1}}"#,
            br#"{"type":"message"}"#,
            br#"{"type":7,"payload":{"data":1}}"#,
            br#"{"type":"message","payload":"oops"}"#,
            br"",
        ] {
            assert_matches!(decode(bad), Err(EnvelopeError::Malformed(_)));
        }
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "\\PC{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(kind in "[a-z]{1,12}", data in json_value()) {
            let env = decode(&encode(&kind, &data).unwrap()).unwrap();
            prop_assert_eq!(env.kind, kind);
            prop_assert_eq!(env.payload.data, data);
        }
    }
}
