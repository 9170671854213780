//! JSON-RPC 2.0 envelope for the stdio tool surface.

use super::tools::ToolsHandler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

fn error_response(id: Value, code: i32, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: None,
        }),
    }
}

pub struct ProtocolHandler {
    tools_handler: Arc<ToolsHandler>,
}

impl ProtocolHandler {
    pub fn new(tools_handler: Arc<ToolsHandler>) -> Self {
        Self { tools_handler }
    }

    /// Handle one incoming message. Notifications produce no reply.
    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match msg {
            JsonRpcMessage::Request(req) => {
                Some(JsonRpcMessage::Response(self.handle_request(req).await))
            }
            JsonRpcMessage::Notification(notif) => {
                debug!("notification '{}' acknowledged", notif.method);
                None
            }
            JsonRpcMessage::Response(_) => {
                warn!("ignoring unexpected response message from client");
                None
            }
        }
    }

    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        debug!("handling request: {}", req.method);

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "tools/list" => response(
                req.id,
                serde_json::json!({ "tools": ToolsHandler::list_tools() }),
            ),
            "tools/call" => self.handle_tools_call(req).await,
            _ => error_response(
                req.id,
                -32601,
                format!("Method not found: {}", req.method),
            ),
        }
    }

    fn handle_initialize(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        response(
            req.id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {},
                },
                "serverInfo": {
                    "name": "debugpy_mcp",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    async fn handle_tools_call(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = req.params else {
            return error_response(req.id, -32602, "Missing params".to_string());
        };

        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        match self.tools_handler.handle_tool(name, arguments).await {
            Ok(result) => response(
                req.id,
                serde_json::json!({
                    "content": [{
                        "type": "text",
                        "text": serde_json::to_string_pretty(&result)
                            .unwrap_or_else(|_| "{}".to_string()),
                    }]
                }),
            ),
            Err(e) => error_response(req.id, e.error_code(), e.to_string()),
        }
    }
}
