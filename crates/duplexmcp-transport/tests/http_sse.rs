//! Legacy HTTP+SSE transport tests: endpoint bootstrap and a full client
//! session.

use std::sync::Arc;

use serde_json::json;

use duplexmcp_client::Client;
use duplexmcp_protocol::schema::{FieldSpec, Schema};
use duplexmcp_protocol::types::{CallToolResult, Tool};
use duplexmcp_server::McpServer;
use duplexmcp_server::handlers::tool_fn;
use duplexmcp_transport::http_sse::{HttpSseServer, HttpSseServerConfig};
use duplexmcp_transport::http_sse_client::HttpSseTransport;
use duplexmcp_transport::{Transport, TransportKind};

fn demo_server() -> McpServer {
    // RUST_LOG-driven logging for failing test runs.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    McpServer::builder("sse-demo", "1.0.0")
        .tool(
            Tool {
                name: "echo".to_string(),
                title: None,
                description: None,
                input_schema: json!({}),
                output_schema: None,
                annotations: None,
            },
            Schema::new().field("text", FieldSpec::string().required()),
            tool_fn(|args, _ctx| async move {
                Ok(CallToolResult::text(
                    args["text"].as_str().unwrap_or_default().to_string(),
                ))
            }),
        )
        .build()
        .unwrap()
}

async fn serve(server: McpServer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sse = HttpSseServer::new(HttpSseServerConfig::default(), Arc::new(server));
    let app = sse.router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/sse")
}

#[tokio::test]
async fn endpoint_bootstrap_resolves_post_url() {
    let url = serve(demo_server()).await;

    let mut transport = HttpSseTransport::new(&url).unwrap();
    assert_eq!(transport.kind(), TransportKind::HttpSse);
    assert_eq!(transport.supported_protocol_versions(), &["2024-11-05"]);
    assert!(transport.endpoint().is_none());

    transport.start().await.unwrap();
    let endpoint = transport.endpoint().unwrap();
    assert_eq!(endpoint.path(), "/messages");
    assert!(endpoint.query().unwrap().starts_with("sessionId="));
}

#[tokio::test]
async fn full_client_session_over_legacy_sse() {
    let url = serve(demo_server()).await;

    let client = Client::connect(HttpSseTransport::new(&url).unwrap())
        .await
        .unwrap();
    let init = client.initialize().await.unwrap();
    // The legacy binding only speaks 2024-11-05.
    assert_eq!(init.protocol_version, "2024-11-05");

    client.ping().await.unwrap();

    let result = client
        .call_tool("echo", Some(json!({"text": "legacy"})))
        .await
        .unwrap();
    let duplexmcp_protocol::types::ContentBlock::Text { text } = &result.content[0] else {
        panic!("expected text content");
    };
    assert_eq!(text, "legacy");
}
