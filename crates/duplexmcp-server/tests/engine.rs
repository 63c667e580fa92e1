//! End-to-end tests of the server protocol engine, driven through the
//! `McpService` surface the transports use.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use duplexmcp_protocol::jsonrpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};
use duplexmcp_protocol::schema::{FieldSpec, Schema};
use duplexmcp_protocol::service::{McpService, SessionRejection};
use duplexmcp_protocol::types::{LogLevel, Resource, ResourceTemplate, Tool};
use duplexmcp_protocol::version::SUPPORTED_PROTOCOL_VERSIONS;
use duplexmcp_server::handlers::{resource_fn, tool_fn};
use duplexmcp_server::{InMemorySessionStore, McpServer, ServerError};
use duplexmcp_protocol::types::{CallToolResult, ReadResourceResult, ResourceContents};

fn tool(name: &str, output_schema: Option<Value>) -> Tool {
    Tool {
        name: name.to_string(),
        title: None,
        description: None,
        input_schema: json!({}),
        output_schema,
        annotations: None,
    }
}

fn weather_output_schema() -> Value {
    json!({
        "type": "object",
        "required": ["temperature", "conditions"],
        "properties": {
            "temperature": {"type": "number"},
            "conditions": {"type": "string"},
        },
    })
}

fn weather_server() -> McpServer {
    McpServer::builder("weather", "1.0.0")
        .tool(
            tool("get_weather", Some(weather_output_schema())),
            Schema::new().field("location", FieldSpec::string().required()),
            tool_fn(|_args, _ctx| async move {
                Ok(CallToolResult::structured(
                    json!({"temperature": 72.5, "conditions": "sunny"}),
                ))
            }),
        )
        .tool(
            tool("bad_weather", Some(weather_output_schema())),
            Schema::new().field("location", FieldSpec::string().required()),
            tool_fn(|_args, _ctx| async move {
                Ok(CallToolResult::structured(
                    json!({"temperature": "hot", "conditions": "sunny"}),
                ))
            }),
        )
        .tool(
            tool("slow", None),
            Schema::new(),
            tool_fn(|_args, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CallToolResult::text("done"))
            }),
        )
        .resource_template(
            ResourceTemplate {
                uri_template: "file:///{path}".to_string(),
                name: "files".to_string(),
                title: None,
                description: None,
                mime_type: None,
            },
            resource_fn(|uri, _ctx| async move {
                Err::<ReadResourceResult, _>(ServerError::resource_not_found(uri))
            }),
        )
        .resource_template(
            ResourceTemplate {
                uri_template: "db:///{table}/{id}".to_string(),
                name: "rows".to_string(),
                title: None,
                description: None,
                mime_type: None,
            },
            resource_fn(|uri, _ctx| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(uri, "application/json", "{\"id\":42}")],
                })
            }),
        )
        .resource(
            Resource {
                uri: "config://app".to_string(),
                name: "config".to_string(),
                title: None,
                description: None,
                mime_type: Some("text/plain".to_string()),
            },
            resource_fn(|uri, _ctx| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(uri, "text/plain", "cfg")],
                })
            }),
        )
        .build()
        .unwrap()
}

async fn open_session(server: &McpServer) -> String {
    server
        .resolve_session(None, SUPPORTED_PROTOCOL_VERSIONS)
        .await
        .unwrap()
}

async fn request(
    server: &McpServer,
    session: &str,
    id: i64,
    method: &str,
    params: Option<Value>,
) -> JsonRpcMessage {
    server
        .handle_message(
            session,
            JsonRpcRequest::new(method, params, RequestId::Number(id)).into(),
        )
        .await
        .expect("request produces a response")
}

async fn notify(server: &McpServer, session: &str, method: &str, params: Option<Value>) {
    let out = server
        .handle_message(session, JsonRpcNotification::new(method, params).into())
        .await;
    assert!(out.is_none(), "notifications never produce responses");
}

fn result_of(message: JsonRpcMessage) -> Value {
    let JsonRpcMessage::Response(response) = message else {
        panic!("expected response, got {message:?}");
    };
    response
        .result()
        .unwrap_or_else(|| panic!("expected success, got {:?}", response.error_object()))
        .clone()
}

fn error_of(message: JsonRpcMessage) -> duplexmcp_protocol::JsonRpcError {
    let JsonRpcMessage::Response(response) = message else {
        panic!("expected response, got {message:?}");
    };
    response.error_object().expect("expected error").clone()
}

async fn handshake(server: &McpServer, session: &str) {
    let reply = request(
        server,
        session,
        1,
        "initialize",
        Some(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "X", "version": "1"},
        })),
    )
    .await;
    let result = result_of(reply);
    assert_eq!(result["protocolVersion"], "2025-03-26");
    assert!(result["serverInfo"]["name"].is_string());
    assert!(result["capabilities"].is_object());

    notify(server, session, "notifications/initialized", None).await;
}

#[tokio::test]
async fn scenario_a_handshake_then_ping() {
    let server = weather_server();
    let session = open_session(&server).await;

    handshake(&server, &session).await;

    let reply = request(&server, &session, 2, "ping", None).await;
    assert_eq!(result_of(reply), json!({}));
}

#[tokio::test]
async fn initialization_gate_rejects_early_requests() {
    let server = weather_server();
    let session = open_session(&server).await;

    // Before the handshake even starts.
    let reply = request(&server, &session, 1, "tools/list", None).await;
    assert_eq!(error_of(reply).code, -32600);

    // ping is exempt.
    let reply = request(&server, &session, 2, "ping", None).await;
    assert_eq!(result_of(reply), json!({}));

    // After initialize but before notifications/initialized: still gated.
    let reply = request(
        &server,
        &session,
        3,
        "initialize",
        Some(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "X", "version": "1"},
        })),
    )
    .await;
    assert!(result_of(reply).is_object());
    let reply = request(&server, &session, 4, "tools/list", None).await;
    assert_eq!(error_of(reply).code, -32600);

    notify(&server, &session, "notifications/initialized", None).await;
    let reply = request(&server, &session, 5, "tools/list", None).await;
    assert!(result_of(reply)["tools"].is_array());
}

#[tokio::test]
async fn initialize_is_only_accepted_once() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let reply = request(
        &server,
        &session,
        9,
        "initialize",
        Some(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "X", "version": "1"},
        })),
    )
    .await;
    assert_eq!(error_of(reply).code, -32600);
}

#[tokio::test]
async fn capability_gate_returns_method_not_found() {
    // A server with no prompts and no completion handler.
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    for method in ["prompts/list", "prompts/get", "completion/complete"] {
        let reply = request(&server, &session, 7, method, Some(json!({}))).await;
        assert_eq!(error_of(reply).code, -32601, "{method}");
    }

    // Suppressed logging capability gates logging/setLevel the same way.
    let quiet = McpServer::builder("quiet", "1.0").logging(false).build().unwrap();
    let session = open_session(&quiet).await;
    handshake(&quiet, &session).await;
    let reply = request(
        &quiet,
        &session,
        8,
        "logging/setLevel",
        Some(json!({"level": "debug"})),
    )
    .await;
    assert_eq!(error_of(reply).code, -32601);
}

#[tokio::test]
async fn scenario_b_tool_call_with_valid_structured_output() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let reply = request(
        &server,
        &session,
        2,
        "tools/call",
        Some(json!({"name": "get_weather", "arguments": {"location": "NYC"}})),
    )
    .await;
    let result = result_of(reply);
    assert_eq!(
        result["structuredContent"],
        json!({"temperature": 72.5, "conditions": "sunny"})
    );
    // And a JSON text fallback rides in content.
    assert_eq!(result["content"][0]["type"], "text");
    assert!(result["content"][0]["text"].as_str().unwrap().contains("72.5"));
}

#[tokio::test]
async fn scenario_c_invalid_output_yields_domain_error() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let reply = request(
        &server,
        &session,
        2,
        "tools/call",
        Some(json!({"name": "bad_weather", "arguments": {"location": "NYC"}})),
    )
    .await;
    let error = error_of(reply);
    assert_eq!(error.code, -32000);
    let errors = error.data.unwrap()["errors"].clone();
    assert_eq!(errors[0]["path"], "temperature");
}

#[tokio::test]
async fn tool_input_validation_reports_paths() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let reply = request(
        &server,
        &session,
        2,
        "tools/call",
        Some(json!({"name": "get_weather", "arguments": {}})),
    )
    .await;
    let error = error_of(reply);
    assert_eq!(error.code, -32602);
    assert!(
        error.data.unwrap()["message"]
            .as_str()
            .unwrap()
            .contains("location")
    );
}

#[tokio::test]
async fn scenario_d_template_miss_then_hit() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    // The db URI matches only the second template.
    let reply = request(
        &server,
        &session,
        2,
        "resources/read",
        Some(json!({"uri": "db:///users/42"})),
    )
    .await;
    let result = result_of(reply);
    assert_eq!(result["contents"][0]["uri"], "db:///users/42");

    // No template matches a gopher URI.
    let reply = request(
        &server,
        &session,
        3,
        "resources/read",
        Some(json!({"uri": "gopher:///x"})),
    )
    .await;
    assert_eq!(error_of(reply).code, -32002);

    // Static resources resolve before templates.
    let reply = request(
        &server,
        &session,
        4,
        "resources/read",
        Some(json!({"uri": "config://app"})),
    )
    .await;
    assert_eq!(result_of(reply)["contents"][0]["text"], "cfg");
}

#[tokio::test]
async fn template_fallthrough_only_on_resource_not_found() {
    // First template errors with something other than resource_not_found:
    // dispatch short-circuits.
    let server = McpServer::builder("files", "1.0")
        .resource_template(
            ResourceTemplate {
                uri_template: "file:///{path}".to_string(),
                name: "broken".to_string(),
                title: None,
                description: None,
                mime_type: None,
            },
            resource_fn(|_, _| async move {
                Err::<ReadResourceResult, _>(ServerError::handler("disk on fire"))
            }),
        )
        .resource_template(
            ResourceTemplate {
                uri_template: "file:///{rest}".to_string(),
                name: "fallback".to_string(),
                title: None,
                description: None,
                mime_type: None,
            },
            resource_fn(|uri, _| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(uri, "text/plain", "never")],
                })
            }),
        )
        .build()
        .unwrap();

    let session = open_session(&server).await;
    handshake(&server, &session).await;
    let reply = request(
        &server,
        &session,
        2,
        "resources/read",
        Some(json!({"uri": "file:///x"})),
    )
    .await;
    assert_eq!(error_of(reply).code, -32603);
}

#[tokio::test]
async fn scenario_e_cancellation_suppresses_response() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let slow_call = {
        let server = server.clone();
        let session = session.clone();
        tokio::spawn(async move {
            server
                .handle_message(
                    &session,
                    JsonRpcRequest::new(
                        "tools/call",
                        Some(json!({"name": "slow", "arguments": {}})),
                        RequestId::Number(99),
                    )
                    .into(),
                )
                .await
        })
    };

    // Give the call a moment to start, then cancel it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    notify(
        &server,
        &session,
        "notifications/cancelled",
        Some(json!({"requestId": 99, "reason": "user abort"})),
    )
    .await;

    let outcome = tokio::time::timeout(Duration::from_secs(2), slow_call)
        .await
        .expect("cancel must unblock the request task")
        .unwrap();
    assert!(outcome.is_none(), "cancelled requests get no response");

    let live = server.session(&session).unwrap().pending().await;
    assert!(live.is_empty(), "pending tracking is cleaned up");
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let reply = request(&server, &session, 2, "tools/destroy", None).await;
    assert_eq!(error_of(reply).code, -32601);
}

#[tokio::test]
async fn set_level_filters_log_stream() {
    let server = weather_server();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.attach_outbound(&session, tx);

    // Default level is info: debug records are filtered.
    server.log(LogLevel::Debug, json!("noise"), None).await;
    assert!(rx.try_recv().is_err());

    server.log(LogLevel::Error, json!("boom"), Some("core".into())).await;
    let JsonRpcMessage::Notification(n) = rx.try_recv().unwrap() else {
        panic!("expected log notification");
    };
    assert_eq!(n.method, "notifications/message");
    assert_eq!(n.params.unwrap()["logger"], "core");

    // Lower the session's level and debug flows.
    let reply = request(
        &server,
        &session,
        5,
        "logging/setLevel",
        Some(json!({"level": "debug"})),
    )
    .await;
    assert_eq!(result_of(reply), json!({}));
    server.log(LogLevel::Debug, json!("noise"), None).await;
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn sessions_survive_restart_through_store() {
    let store = Arc::new(InMemorySessionStore::new());
    let server = McpServer::builder("a", "1.0")
        .session_store(store.clone())
        .build()
        .unwrap();
    let session = open_session(&server).await;
    handshake(&server, &session).await;

    // A second server over the same store restores the session.
    let restarted = McpServer::builder("a", "1.0")
        .session_store(store)
        .build()
        .unwrap();
    let resolved = restarted
        .resolve_session(Some(&session), SUPPORTED_PROTOCOL_VERSIONS)
        .await
        .unwrap();
    assert_eq!(resolved, session);

    // The restored session is already initialized: ping and list work.
    let reply = request(&restarted, &session, 2, "ping", None).await;
    assert_eq!(result_of(reply), json!({}));
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let server = weather_server();
    let rejection = server
        .resolve_session(Some("no-such-session"), SUPPORTED_PROTOCOL_VERSIONS)
        .await
        .unwrap_err();
    assert_eq!(rejection, SessionRejection::Unknown);
}

#[tokio::test]
async fn terminate_session_forgets_it() {
    let server = weather_server();
    let session = open_session(&server).await;
    assert!(server.terminate_session(&session).await);
    assert!(!server.terminate_session(&session).await);
    assert!(
        server
            .resolve_session(Some(&session), SUPPORTED_PROTOCOL_VERSIONS)
            .await
            .is_err()
    );
}
