//! Core data models for the banking assistant

use serde::{Deserialize, Serialize};
use serde_json::Value;

//
// ================= Channels =================
//

/// Channel a session originates from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Web,
    Ivr,
    Sms,
    Terminal,
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Web
    }
}

//
// ================= Accounts =================
//

/// A caller's account as returned by the account directory.
/// The masked form is the only representation safe to show to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub account_number: String,
    pub masked_account: String,
}

/// Full account record from the core banking middleware
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub acc_no: String,
    pub acc_name: String,
    pub acc_status: String,
    pub currency_code: String,
    /// Balance as reported upstream; may carry trailing whitespace.
    pub current_balance: String,
    pub available_balance: String,
    pub last_txn_date: String,
    pub acc_open_date: String,
    pub product_type: String,
    pub product_name: String,
    pub branch_code: String,
    pub int_rate: String,
    pub mobile: String,
}

/// Result of an account-directory lookup by mobile number.
/// An empty result is a status, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryLookup {
    pub found: bool,
    pub message: String,
    pub accounts: Vec<AccountSummary>,
}

/// Result of a PIN verification call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinVerification {
    pub valid: bool,
    pub reason: String,
}

//
// ================= Conversation Turns =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single turn in a conversation, shaped for the chat-completions wire
/// format: assistant turns may carry tool calls with no content, tool turns
/// correlate back via `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn carrying exactly one tool call and no content
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![call]),
            tool_call_id: None,
        }
    }

    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

//
// ================= Tool Calls =================
//

/// A function call proposed by the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as delivered on the wire
    pub arguments: String,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Parse the JSON-encoded arguments into a value
    pub fn parsed_arguments(&self) -> crate::Result<Value> {
        Ok(serde_json::from_str(&self.function.arguments)?)
    }
}

//
// ================= Tool Schemas =================
//

/// Tool schema advertised to the LLM for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

//
// ================= LLM Replies =================
//

/// Response from a single LLM generation call
#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl LlmReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_serialization() {
        let turn = ChatTurn::user("What is my balance?");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_tool_call_turn_has_null_content() {
        let call = ToolCall::function("call_1", "validate_account", &json!({"account_number": "1311002345678"}));
        let turn = ChatTurn::tool_call(call);
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"content\":null"));
        assert!(json.contains("\"type\":\"function\""));
        assert!(json.contains("validate_account"));
    }

    #[test]
    fn test_parsed_arguments_round_trip() {
        let call = ToolCall::function("call_2", "validate_pin", &json!({"pin": "****"}));
        let args = call.parsed_arguments().unwrap();
        assert_eq!(args["pin"], "****");
    }
}
