//! Frame encoding and decoding.
//!
//! [`decode`] accepts a single JSON object, a JSON array (batch, flattened
//! into the returned list), or multiple JSON objects separated by any number
//! of newlines; blank lines are dropped. Parse failures return
//! [`Error::Parse`]; nothing panics on malformed input.

use serde_json::Value;

use crate::MAX_MESSAGE_SIZE;
use crate::error::{Error, Result};
use crate::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};

/// Encode any message as a single UTF-8 JSON frame.
pub fn encode(message: &JsonRpcMessage) -> Result<String> {
    serde_json::to_string(message).map_err(|e| Error::Internal(e.to_string()))
}

/// Encode a request frame.
pub fn encode_request(method: &str, params: Option<Value>, id: RequestId) -> Result<String> {
    encode(&JsonRpcRequest::new(method, params, id).into())
}

/// Encode a notification frame.
pub fn encode_notification(method: &str, params: Option<Value>) -> Result<String> {
    encode(&JsonRpcNotification::new(method, params).into())
}

/// Encode a successful response frame.
pub fn encode_response(result: Value, id: RequestId) -> Result<String> {
    encode(&JsonRpcResponse::success(result, id).into())
}

/// Encode an error response frame.
pub fn encode_error(code: i32, message: &str, data: Option<Value>, id: RequestId) -> Result<String> {
    let error = JsonRpcError {
        code,
        message: message.to_string(),
        data,
    };
    encode(&JsonRpcResponse::error(error, id).into())
}

/// Encode a batch of messages as one JSON array frame.
pub fn encode_batch(messages: &[JsonRpcMessage]) -> Result<String> {
    serde_json::to_string(messages).map_err(|e| Error::Internal(e.to_string()))
}

/// Decode one read's worth of bytes into a flat message list.
pub fn decode(bytes: &[u8]) -> Result<Vec<JsonRpcMessage>> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(Error::Parse(format!(
            "frame of {} bytes exceeds maximum of {MAX_MESSAGE_SIZE}",
            bytes.len()
        )));
    }
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Parse(e.to_string()))?;
    decode_str(text)
}

/// Decode a string frame into a flat message list.
pub fn decode_str(text: &str) -> Result<Vec<JsonRpcMessage>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    // A whole-input parse covers single objects (possibly pretty-printed
    // across lines) and batch arrays. Only when that fails do we fall back to
    // newline-delimited parsing.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return flatten(value);
    }

    let mut messages = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| Error::Parse(e.to_string()))?;
        messages.extend(flatten(value)?);
    }
    Ok(messages)
}

fn flatten(value: Value) -> Result<Vec<JsonRpcMessage>> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(classify(item)?);
            }
            Ok(out)
        }
        other => Ok(vec![classify(other)?]),
    }
}

/// Classify a JSON value using the JSON-RPC 2.0 predicates and convert it to
/// the corresponding message struct.
pub fn classify(value: Value) -> Result<JsonRpcMessage> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Parse("expected a JSON object".to_string()))?;

    let has_method = obj.contains_key("method");
    let has_id = obj.get("id").is_some_and(|id| !id.is_null());
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    let message = if has_method && has_id {
        JsonRpcMessage::Request(from_value(value)?)
    } else if has_method {
        JsonRpcMessage::Notification(from_value(value)?)
    } else if has_result || has_error {
        JsonRpcMessage::Response(from_value(value)?)
    } else {
        return Err(Error::Parse(
            "object is neither a request, response, nor notification".to_string(),
        ));
    };
    Ok(message)
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn req(id: i64) -> JsonRpcMessage {
        JsonRpcRequest::new("tools/list", Some(json!({"cursor": null})), RequestId::Number(id))
            .into()
    }

    #[test]
    fn round_trip_single() {
        let m = req(7);
        let encoded = encode(&m).unwrap();
        assert_eq!(decode_str(&encoded).unwrap(), vec![m]);
    }

    #[test]
    fn round_trip_batch() {
        let batch = vec![req(1), req(2), req(3)];
        let encoded = encode_batch(&batch).unwrap();
        assert_eq!(decode_str(&encoded).unwrap(), batch);
    }

    #[test]
    fn multi_message_with_blank_lines() {
        let a = encode(&req(1)).unwrap();
        let b = encode(&req(2)).unwrap();
        let framed = format!("{a}\n\n\n{b}\n");
        assert_eq!(decode_str(&framed).unwrap(), vec![req(1), req(2)]);
    }

    #[test]
    fn pretty_printed_single_object() {
        let text = "{\n  \"jsonrpc\": \"2.0\",\n  \"id\": 1,\n  \"method\": \"ping\"\n}";
        let messages = decode_str(text).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_request());
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(decode_str("").unwrap().is_empty());
        assert!(decode_str("\n\n").unwrap().is_empty());
    }

    #[test]
    fn parse_failure_is_structured() {
        let err = decode_str("{not json").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(err.code(), Some(-32700));
    }

    #[test]
    fn null_id_frame_is_a_notification_when_method_present() {
        let messages =
            decode_str(r#"{"jsonrpc":"2.0","method":"notifications/progress","id":null}"#);
        // `id: null` counts as absent per classification rules.
        assert!(messages.unwrap()[0].is_notification());
    }

    #[test]
    fn id_type_preserved_through_codec() {
        let encoded = encode_response(json!({}), RequestId::String("abc-1".into())).unwrap();
        assert!(encoded.contains("\"abc-1\""));
        let encoded = encode_response(json!({}), RequestId::Number(9)).unwrap();
        assert!(encoded.contains("\"id\":9"));
    }

    #[test]
    fn error_frame_classifies_as_response() {
        let text = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"no"}}"#;
        let messages = decode_str(text).unwrap();
        assert!(messages[0].is_error());
    }
}
