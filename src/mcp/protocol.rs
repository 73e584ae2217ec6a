// ABOUTME: MCP JSON-RPC protocol types used by the stdio client and the tool adapter.
// ABOUTME: Covers requests, notifications, responses, tool listings, and tool call results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision sent in the `initialize` handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: RequestId::Number(id),
        }
    }
}

/// A request that expects no response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: RequestId,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

pub const METHOD_NOT_FOUND: i32 = -32601;

/// One line from the server, classified by shape.
#[derive(Clone, Debug)]
pub enum IncomingMessage {
    /// A reply to one of our requests.
    Response(JsonRpcResponse),
    /// The server asking us something, e.g. `ping`.
    Request { id: RequestId, method: String },
    Notification { method: String },
}

impl IncomingMessage {
    /// A line carrying `method` is a request or notification, never a response.
    /// Responses must carry `result` or `error`. Anything else is `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        if let Some(method) = value.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            return Some(match value.get("id") {
                Some(id) if !id.is_null() => IncomingMessage::Request {
                    id: serde_json::from_value(id.clone()).ok()?,
                    method,
                },
                _ => IncomingMessage::Notification { method },
            });
        }
        if value.get("result").is_none() && value.get("error").is_none() {
            return None;
        }
        serde_json::from_value(value).ok().map(IncomingMessage::Response)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A tool advertised by a server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "inputSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDefinition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpToolCallResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// All text parts joined by newlines; other content kinds are skipped.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Serialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Value,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_numeric_id() {
        let request = JsonRpcRequest::new("tools/list", None, 7);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "tools/list", "id": 7}));
    }

    #[test]
    fn notification_has_no_id() {
        let value = serde_json::to_value(JsonRpcNotification::new("notifications/initialized"))
            .unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn server_request_is_not_mistaken_for_a_response() {
        let ping = IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert!(matches!(
            ping,
            Some(IncomingMessage::Request { id: RequestId::Number(1), ref method }) if method == "ping"
        ));

        let note = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        );
        assert!(matches!(note, Some(IncomingMessage::Notification { .. })));

        let reply = IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert!(matches!(reply, Some(IncomingMessage::Response(r)) if r.result == Some(json!({}))));

        let failed = IncomingMessage::parse(
            r#"{"jsonrpc":"2.0","id":"a","error":{"code":-32000,"message":"boom"}}"#,
        );
        assert!(matches!(failed, Some(IncomingMessage::Response(r)) if r.error.is_some()));
    }

    #[test]
    fn bare_id_or_garbage_is_ignored() {
        assert!(IncomingMessage::parse(r#"{"jsonrpc":"2.0","id":1}"#).is_none());
        assert!(IncomingMessage::parse("starting server...").is_none());
    }

    #[test]
    fn tool_definition_tolerates_missing_fields() {
        let def: McpToolDefinition = serde_json::from_str(r#"{"name":"search"}"#).unwrap();
        assert_eq!(def.description, None);
        assert_eq!(def.input_schema, None);
    }

    #[test]
    fn call_result_joins_text_and_skips_other_kinds() {
        let result: McpToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "resource", "resource": {"uri": "file:///x"}},
                {"type": "text", "text": "line two"}
            ],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.joined_text(), "line one\nline two");
    }
}
