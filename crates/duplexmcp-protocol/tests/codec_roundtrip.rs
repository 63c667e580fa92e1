//! Codec round-trip properties over generated JSON-RPC messages.

use duplexmcp_protocol::codec::{decode_str, encode, encode_batch};
use duplexmcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use proptest::prelude::*;
use serde_json::{Value, json};

fn arb_request_id() -> impl Strategy<Value = RequestId> {
    prop_oneof![
        "[a-z0-9-]{1,24}".prop_map(RequestId::String),
        any::<i64>().prop_map(RequestId::Number),
    ]
}

fn arb_params() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        Just(None),
        Just(Some(json!({}))),
        ("[a-z]{1,8}", any::<i64>())
            .prop_map(|(k, v)| Some(json!({ k: v, "nested": {"flag": true} }))),
    ]
}

fn arb_method() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("ping".to_string()),
        Just("tools/list".to_string()),
        Just("tools/call".to_string()),
        Just("notifications/progress".to_string()),
        "[a-z]{1,12}(/[a-z]{1,12})?",
    ]
}

fn arb_message() -> impl Strategy<Value = JsonRpcMessage> {
    prop_oneof![
        (arb_method(), arb_params(), arb_request_id())
            .prop_map(|(m, p, id)| JsonRpcRequest::new(m, p, id).into()),
        (arb_method(), arb_params())
            .prop_map(|(m, p)| JsonRpcNotification::new(m, p).into()),
        (arb_params(), arb_request_id())
            .prop_map(|(p, id)| JsonRpcResponse::success(p.unwrap_or(json!({})), id).into()),
        ("[ -~]{0,40}", -32768i32..=-32000, arb_request_id()).prop_map(|(msg, code, id)| {
            JsonRpcResponse::error(JsonRpcError::new(code, msg), id).into()
        }),
    ]
}

proptest! {
    #[test]
    fn encode_decode_round_trips(message in arb_message()) {
        let encoded = encode(&message).unwrap();
        let decoded = decode_str(&encoded).unwrap();
        prop_assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn batch_round_trips(messages in proptest::collection::vec(arb_message(), 1..6)) {
        let encoded = encode_batch(&messages).unwrap();
        let decoded = decode_str(&encoded).unwrap();
        prop_assert_eq!(decoded, messages);
    }

    #[test]
    fn newline_concatenation_round_trips(
        a in arb_message(),
        b in arb_message(),
        gap in 1usize..4,
    ) {
        let framed = format!(
            "{}{}{}",
            encode(&a).unwrap(),
            "\n".repeat(gap),
            encode(&b).unwrap(),
        );
        let decoded = decode_str(&framed).unwrap();
        prop_assert_eq!(decoded, vec![a, b]);
    }
}
