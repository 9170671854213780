use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP Protocol Message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "request")]
    Request(Request),
    #[serde(rename = "response")]
    Response(Response),
    #[serde(rename = "event")]
    Event(Event),
}

/// DAP Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: i32,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// DAP Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub seq: i32,
    pub request_seq: i32,
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP Event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i32,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Initialize Request Arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestArguments {
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub locale: Option<String>,
    pub lines_start_at_1: Option<bool>,
    pub columns_start_at_1: Option<bool>,
    pub path_format: Option<String>,
    pub supports_variable_type: Option<bool>,
    pub supports_variable_paging: Option<bool>,
}

/// Capabilities returned by initialize
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: Option<bool>,
    pub supports_function_breakpoints: Option<bool>,
    pub supports_conditional_breakpoints: Option<bool>,
    pub supports_evaluate_for_hovers: Option<bool>,
    pub supports_set_variable: Option<bool>,
    pub supports_terminate_request: Option<bool>,
}

/// One localRoot/remoteRoot pair for the attach request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    pub local_root: String,
    pub remote_root: String,
}

/// Attach Request Arguments (debugpy shape: path mappings plus justMyCode)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequestArguments {
    pub path_mappings: Vec<PathMapping>,
    pub just_my_code: bool,
}

/// SetBreakpoints Request Arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    pub breakpoints: Vec<SourceBreakpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<bool>,
}

/// Source reference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Source breakpoint sent to the adapter (line only; conditions are out of scope)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: i32,
}

/// Breakpoint as verified by the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: Option<i32>,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i32>,
}

/// StackTrace Request Arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<i32>,
}

/// Stack Frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i32,
    pub name: String,
    pub source: Option<Source>,
    pub line: i32,
    #[serde(default)]
    pub column: i32,
}

/// Thread info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i32,
    pub name: String,
}

/// Scopes Request Arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i32,
}

/// Scope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i32,
    #[serde(default)]
    pub expensive: bool,
}

/// Variables Request Arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i32,
}

/// Variable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub variables_reference: i32,
}

/// Evaluate Request Arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Evaluate response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

/// Continue / step family arguments: all carry just the thread id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = Request {
            seq: 1,
            command: "initialize".to_string(),
            arguments: Some(json!({"clientID": "test"})),
        };

        let serialized = serde_json::to_string(&req).unwrap();
        assert!(serialized.contains("initialize"));
        assert!(serialized.contains("\"seq\":1"));
    }

    #[test]
    fn test_message_tagging_round_trip() {
        let msg = Message::Event(Event {
            seq: 3,
            event: "stopped".to_string(),
            body: Some(json!({"reason": "breakpoint", "threadId": 1})),
        });

        let serialized = serde_json::to_string(&msg).unwrap();
        assert!(serialized.contains("\"type\":\"event\""));

        let parsed: Message = serde_json::from_str(&serialized).unwrap();
        match parsed {
            Message::Event(evt) => assert_eq!(evt.event, "stopped"),
            _ => panic!("Expected Event"),
        }
    }

    #[test]
    fn test_attach_arguments_shape() {
        let args = AttachRequestArguments {
            path_mappings: vec![PathMapping {
                local_root: "/work".to_string(),
                remote_root: "/work".to_string(),
            }],
            just_my_code: false,
        };

        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["justMyCode"], false);
        assert_eq!(value["pathMappings"][0]["localRoot"], "/work");
        assert_eq!(value["pathMappings"][0]["remoteRoot"], "/work");
    }

    #[test]
    fn test_breakpoint_with_omitted_id_parses() {
        let bp: Breakpoint = serde_json::from_value(json!({"verified": false})).unwrap();
        assert_eq!(bp.id, None);
        assert!(!bp.verified);
    }

    #[test]
    fn test_stack_frame_without_column_defaults() {
        let frame: StackFrame = serde_json::from_value(json!({
            "id": 10,
            "name": "f",
            "source": {"path": "/t/a.py"},
            "line": 25,
        }))
        .unwrap();

        assert_eq!(frame.line, 25);
        assert_eq!(frame.column, 0);
        assert_eq!(frame.source.unwrap().path.unwrap(), "/t/a.py");
    }

    #[test]
    fn test_variable_type_field_rename() {
        let var: Variable = serde_json::from_value(json!({
            "name": "x",
            "value": "42",
            "type": "int",
            "variablesReference": 0,
        }))
        .unwrap();

        assert_eq!(var.type_.as_deref(), Some("int"));
    }
}
