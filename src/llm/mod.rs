//! LLM provider boundary
//!
//! The orchestrator drives any model through `LlmProvider`: a stateless
//! generate call over the conversation turns, optionally advertising a tool
//! schema list for function calling.

mod openai;

pub use openai::OpenAiProvider;

use crate::models::{ChatTurn, LlmReply, ToolDefinition};
use crate::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatTurn],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmReply>;
}

/// Scripted provider for tests and offline runs: replies are served in
/// order from a queue, and calls are counted.
pub struct ScriptedLlmProvider {
    replies: Mutex<VecDeque<LlmReply>>,
    calls: AtomicUsize,
}

impl ScriptedLlmProvider {
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlmProvider {
    async fn generate(
        &self,
        _messages: &[ChatTurn],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .expect("scripted replies lock")
            .pop_front()
            .unwrap_or_else(|| LlmReply::text("How can I help you with your account?"));
        Ok(reply)
    }
}
