// src/web.rs
// HTTP surface: JSON-RPC 2.0 at /mcp, health probe, manual reflection
// trigger, CORS. Bearer auth on everything except /health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::mcp::{DispatchError, EngramServer, tool_definitions};

/// JSON-RPC error codes used on this surface.
const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const AUTH_ERROR: i64 = -32001;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<EngramServer>,
    pub auth_token: Arc<String>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

/// Create the web server router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(mcp))
        .route("/reflect", post(reflect))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Compare the presented token against the configured secret without
/// leaking timing. Fixed-size digests make the comparison
/// length-independent.
fn token_matches(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn check_auth(headers: &HeaderMap, expected: &str) -> Result<(), &'static str> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err("Missing Authorization header");
    };
    let Ok(value) = value.to_str() else {
        return Err("Invalid Authorization header");
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err("Invalid authorization format");
    };
    if !token_matches(token, expected) {
        return Err("Invalid token");
    }
    Ok(())
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(rpc_error(Value::Null, AUTH_ERROR, reason)),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn mcp(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    if let Err(reason) = check_auth(&headers, &state.auth_token) {
        return unauthorized(reason);
    }

    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => return Json(rpc_error(Value::Null, PARSE_ERROR, "Parse error")).into_response(),
    };
    let request: JsonRpcRequest = match serde_json::from_value(parsed) {
        Ok(request) => request,
        Err(e) => {
            return Json(rpc_error(
                Value::Null,
                INVALID_PARAMS,
                format!("Invalid request: {e}"),
            ))
            .into_response();
        }
    };

    let response = match request.method.as_str() {
        "tools/list" => rpc_result(request.id, json!({ "tools": tool_definitions() })),
        "tools/call" => {
            let params: ToolCallParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => {
                    return Json(rpc_error(
                        request.id,
                        INVALID_PARAMS,
                        format!("Invalid params: {e}"),
                    ))
                    .into_response();
                }
            };
            match state.server.call_tool(&params.name, params.arguments).await {
                Ok(tool_response) => {
                    let text = serde_json::to_string(&tool_response.value)
                        .unwrap_or_else(|_| "{}".to_string());
                    let mut result = json!({
                        "content": [{ "type": "text", "text": text }]
                    });
                    if tool_response.is_error {
                        result["isError"] = Value::Bool(true);
                    }
                    rpc_result(request.id, result)
                }
                Err(DispatchError::InvalidParams(message)) => {
                    rpc_error(request.id, INVALID_PARAMS, message)
                }
            }
        }
        other => rpc_error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };

    Json(response).into_response()
}

async fn reflect(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(reason) = check_auth(&headers, &state.auth_token) {
        return unauthorized(reason);
    }

    let Some(controller) = state.server.reflection.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "reflection is not configured (no LLM endpoint)" })),
        )
            .into_response();
    };

    info!("manual reflection triggered");
    let result = controller.run().await;
    Json(json!(result)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationIndexer;
    use crate::db::DatabasePool;
    use crate::embeddings::EmbeddingClient;
    use crate::index::IndexService;
    use crate::reflection::ReflectionStaging;
    use crate::reminders::ReminderScheduler;
    use crate::sandbox::Sandbox;
    use crate::store::{MemoryObjectStore, ObjectStore};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const TOKEN: &str = "test-secret";

    async fn app() -> Router {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let pool = Arc::new(DatabasePool::open_in_memory().await.expect("pool"));
        let embedder = Arc::new(EmbeddingClient::hashed(64));
        let index = Arc::new(IndexService::open(pool, embedder).await.expect("index"));
        let server = EngramServer {
            store: store.clone(),
            index: index.clone(),
            reminders: Arc::new(ReminderScheduler::new(store.clone())),
            conversations: Arc::new(ConversationIndexer::new(store.clone(), index.clone())),
            sandbox: Arc::new(Sandbox::new(store.clone())),
            staging: Arc::new(ReflectionStaging::new(store.clone(), index.clone())),
            reflection: None,
        };
        create_router(AppState {
            server: Arc::new(server),
            auth_token: Arc::new(TOKEN.to_string()),
        })
    }

    async fn rpc(app: &Router, auth: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(token) = auth {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health_requires_no_auth() {
        let app = app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_missing_auth_is_401() {
        let app = app().await;
        let (status, body) = rpc(&app, None, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], AUTH_ERROR);
        assert_eq!(body["jsonrpc"], "2.0");
    }

    #[tokio::test]
    async fn test_wrong_token_is_401() {
        let app = app().await;
        let (status, body) =
            rpc(&app, Some("wrong"), r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "Invalid token");
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let app = app().await;
        let (status, body) = rpc(&app, Some(TOKEN), "{not json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let app = app().await;
        let (_, body) = rpc(
            &app,
            Some(TOKEN),
            r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#,
        )
        .await;
        assert_eq!(body["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let app = app().await;
        let (_, body) = rpc(&app, Some(TOKEN), r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        let tools = body["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 18);
        assert!(tools.iter().any(|t| t["name"] == "search"));
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let app = app().await;
        let write = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": "write",
                "arguments": {"path": "memory/a.md", "content": "Workers have a 128MB limit."}
            }
        });
        let (_, body) = rpc(&app, Some(TOKEN), &write.to_string()).await;
        assert!(body["error"].is_null());
        let content = &body["result"]["content"][0];
        assert_eq!(content["type"], "text");
        assert!(body["result"]["isError"].is_null());

        let search = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "search",
                "arguments": {"query": "Workers have a 128MB limit.", "limit": 1}
            }
        });
        let (_, body) = rpc(&app, Some(TOKEN), &search.to_string()).await;
        let text = body["result"]["content"][0]["text"].as_str().unwrap();
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["results"][0]["path"], "memory/a.md");
    }

    #[tokio::test]
    async fn test_tool_error_sets_is_error() {
        let app = app().await;
        let read = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "read", "arguments": {"path": "memory/nope.md"}}
        });
        let (_, body) = rpc(&app, Some(TOKEN), &read.to_string()).await;
        assert_eq!(body["result"]["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let app = app().await;
        let call = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "drop_tables", "arguments": {}}
        });
        let (_, body) = rpc(&app, Some(TOKEN), &call.to_string()).await;
        assert_eq!(body["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let app = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/mcp")
                    .header("origin", "https://assistant.example")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "authorization, content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let allow_methods = response
            .headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(allow_methods.contains("POST"));
        assert!(allow_methods.contains("OPTIONS"));
    }

    #[tokio::test]
    async fn test_reflect_without_llm_is_unavailable() {
        let app = app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/reflect")
                    .header("authorization", format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_token_compare() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secrets"));
        assert!(!token_matches("", "secret"));
    }
}
