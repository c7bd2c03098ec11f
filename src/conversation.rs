//! Conversation history storage
//!
//! Holds the ordered turn list sent to the LLM for each session. The first
//! turn is always the composed system prompt; histories are created lazily
//! and destroyed with their session.

use crate::models::{ChatTurn, ToolCall};
use dashmap::DashMap;
use tracing::{debug, info};

/// Manages chat conversation state and history
pub struct ConversationManager {
    system_prompt: String,
    conversations: DashMap<String, Vec<ChatTurn>>,
}

impl ConversationManager {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        info!("Conversation manager initialized");
        Self {
            system_prompt: system_prompt.into(),
            conversations: DashMap::new(),
        }
    }

    fn initial_turns(&self) -> Vec<ChatTurn> {
        vec![ChatTurn::system(self.system_prompt.clone())]
    }

    /// The turn list for a session, materializing the system prompt if absent
    pub fn conversation(&self, session_id: &str) -> Vec<ChatTurn> {
        self.conversations
            .entry(session_id.to_string())
            .or_insert_with(|| self.initial_turns())
            .clone()
    }

    pub fn add_user_message(&self, session_id: &str, message: impl Into<String>) {
        self.append(session_id, ChatTurn::user(message));
        debug!(session_id, "Added user message");
    }

    pub fn add_assistant_message(&self, session_id: &str, message: impl Into<String>) {
        self.append(session_id, ChatTurn::assistant(message));
        debug!(session_id, "Added assistant message");
    }

    pub fn add_system_message(&self, session_id: &str, message: impl Into<String>) {
        self.append(session_id, ChatTurn::system(message));
        debug!(session_id, "Added system message");
    }

    /// Append an assistant turn carrying a single tool call. When the LLM
    /// proposes several calls in one turn, each is logged as its own turn in
    /// call order.
    pub fn add_tool_call(&self, session_id: &str, call: ToolCall) {
        self.append(session_id, ChatTurn::tool_call(call));
        debug!(session_id, "Added tool call");
    }

    pub fn add_tool_response(
        &self,
        session_id: &str,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.append(session_id, ChatTurn::tool_response(tool_call_id, content));
        debug!(session_id, "Added tool response");
    }

    fn append(&self, session_id: &str, turn: ChatTurn) {
        self.conversations
            .entry(session_id.to_string())
            .or_insert_with(|| self.initial_turns())
            .push(turn);
    }

    pub fn end_conversation(&self, session_id: &str) -> bool {
        let removed = self.conversations.remove(session_id).is_some();
        if removed {
            info!(session_id, "Ended conversation");
        }
        removed
    }

    pub fn clear_expired_conversations(&self, expired_sessions: &[String]) {
        for session_id in expired_sessions {
            if self.conversations.remove(session_id).is_some() {
                info!(
                    session_id = session_id.as_str(),
                    "Cleared expired conversation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use serde_json::json;

    #[test]
    fn test_conversation_materializes_system_prompt() {
        let manager = ConversationManager::new("You are a banking assistant.");
        let turns = manager.conversation("s1");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(
            turns[0].content.as_deref(),
            Some("You are a banking assistant.")
        );
    }

    #[test]
    fn test_append_auto_initializes() {
        let manager = ConversationManager::new("prompt");
        manager.add_user_message("s1", "hello");
        let turns = manager.conversation("s1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::User);
    }

    #[test]
    fn test_tool_call_turn_shape() {
        let manager = ConversationManager::new("prompt");
        let call = ToolCall::function("call_1", "validate_pin", &json!({"pin": "****"}));
        manager.add_tool_call("s1", call);
        manager.add_tool_response("s1", "call_1", "{\"valid\":true}");

        let turns = manager.conversation("s1");
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(turns[1].content.is_none());
        assert_eq!(turns[1].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(turns[2].role, Role::Tool);
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_end_conversation_resets_history() {
        let manager = ConversationManager::new("prompt");
        manager.add_user_message("s1", "hello");
        assert!(manager.end_conversation("s1"));
        assert!(!manager.end_conversation("s1"));
        assert_eq!(manager.conversation("s1").len(), 1);
    }
}
