//! Banking chatbot orchestrator
//!
//! The conversation controller: composes the session stores and the flow
//! engine, implements the authentication funnel (mobile → last-4-digits →
//! PIN → authenticated), the restricted-topic filter, and the LLM
//! tool-calling loop. Every message is evaluated against the funnel states
//! in priority order; anything unhandled falls through to the LLM.

use crate::auth::AuthenticationManager;
use crate::classifier::{classify_field_query, QueryField};
use crate::conversation::ConversationManager;
use crate::extraction::{extract_last_4_digits, extract_pin, KeywordMatcher};
use crate::flow::{FlowContext, FlowManager};
use crate::llm::LlmProvider;
use crate::models::{AccountSummary, Channel, ToolCall};
use crate::prompts::PromptManager;
use crate::services::ServiceRegistry;
use crate::session::{ContextPatch, SessionContextManager};
use crate::Result;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Products the assistant must refuse to discuss
const RESTRICTED_KEYWORDS: &[&str] = &[
    "credit card",
    "loan",
    "investment",
    "mortgage",
    "insurance",
    "wealth management",
    "stock",
    "trading",
    "mutual fund",
    "bond",
];

const RESTRICTED_TOPIC_REPLY: &str = "I'm sorry, but I can only provide account balance information for standard deposit accounts. For inquiries regarding other products like loans, credit cards, or investments, please contact our customer support team.";

const RESTRICTED_RESPONSE_OVERRIDE: &str = "I'm sorry, but I can only provide account balance information for standard deposit accounts. For inquiries regarding other products, please contact our customer support team.";

const GENERIC_APOLOGY: &str = "I'm sorry, but I'm having trouble processing your request right now. Please try again later.";

const EMPTY_REPLY_APOLOGY: &str =
    "I apologize, but I'm having trouble generating a response. Please try again.";

/// The banking assistant conversation controller
pub struct BankingChatbot {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ServiceRegistry>,
    flow_manager: FlowManager,
    conversations: ConversationManager,
    auth: AuthenticationManager,
    sessions: SessionContextManager,
    restricted: KeywordMatcher,
    active_domains: Vec<String>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BankingChatbot {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: Arc<ServiceRegistry>,
        prompt_manager: &PromptManager,
        active_domains: Option<Vec<String>>,
    ) -> Self {
        let active_domains = active_domains.unwrap_or_else(|| {
            registry.domains().iter().map(|d| d.to_string()).collect()
        });
        info!(domains = ?active_domains, "Active domains");

        let system_prompt = prompt_manager.compose_prompt(&active_domains);
        debug!(prompt_len = system_prompt.len(), "Loaded system prompt");

        let chatbot = Self {
            llm,
            registry: registry.clone(),
            flow_manager: FlowManager::new(registry),
            conversations: ConversationManager::new(system_prompt),
            auth: AuthenticationManager::new(),
            sessions: SessionContextManager::new(),
            restricted: KeywordMatcher::new(RESTRICTED_KEYWORDS.iter().copied()),
            active_domains,
            session_locks: DashMap::new(),
        };
        info!("Banking chatbot initialized with authentication flow");
        chatbot
    }

    /// Override the authentication TTL, used by tests
    pub fn with_auth_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.auth = AuthenticationManager::with_ttl(ttl);
        self
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process a user message and produce a reply. Never fails: any internal
    /// error is logged in full and replaced with a generic apology. Messages
    /// racing on the same session id are serialized.
    pub async fn process_message(
        &self,
        session_id: &str,
        message: &str,
        caller_id: Option<&str>,
        channel: Channel,
    ) -> String {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        match self
            .handle_message(session_id, message, caller_id, channel)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(session_id, error = %e, "Error processing message");
                GENERIC_APOLOGY.to_string()
            }
        }
    }

    async fn handle_message(
        &self,
        session_id: &str,
        message: &str,
        caller_id: Option<&str>,
        channel: Channel,
    ) -> Result<String> {
        info!(session_id, "Processing message");

        if let Some(caller) = caller_id {
            if self.sessions.caller_id(session_id).is_none() {
                self.sessions
                    .initialize_session(session_id, Some(caller.to_string()), channel);
            } else {
                self.sessions.update_context(
                    session_id,
                    ContextPatch {
                        caller_id: Some(caller.to_string()),
                        channel: Some(channel),
                    },
                );
            }
        }

        // Pull-based expiry: sweep once per message and clear all three
        // stores for the same ids.
        let expired = self.auth.cleanup_expired_sessions();
        if !expired.is_empty() {
            self.conversations.clear_expired_conversations(&expired);
            self.sessions.clear_expired_sessions(&expired);
        }

        self.auth.update_activity(session_id);

        // State 1: restricted topic, never reaches the LLM
        if self.restricted.contains_any(message) {
            info!(session_id, "Message contains restricted keywords");
            return Ok(RESTRICTED_TOPIC_REPLY.to_string());
        }

        // State 2: authenticated field query
        if self.auth.is_authenticated(session_id) {
            if let Some(account_number) = self.auth.authenticated_account(session_id) {
                info!(session_id, "User is already authenticated");
                if let Some(reply) = self
                    .handle_field_query(session_id, &account_number, message)
                    .await
                {
                    return Ok(reply);
                }
            }
        }

        // States 3 and 4: PIN entry, then account-digit confirmation
        if let Some(reply) = self.process_authentication_state(session_id, message).await? {
            return Ok(reply);
        }

        // Balance intent without digits: ask for the last 4 directly
        if !self.auth.is_authenticated(session_id) && message.to_lowercase().contains("balance") {
            let reply = "To assist you with your account balance, I'll need to verify your account. Please provide the last 4 digits of your account number.";
            self.conversations.add_assistant_message(session_id, reply);
            return Ok(reply.to_string());
        }

        // State 5: generic tool-calling turn
        self.conversations.add_user_message(session_id, message);
        self.add_contextual_guidance(session_id);

        let conversation = self.conversations.conversation(session_id);
        let tools = self.registry.tools_for_domains(&self.active_domains);
        let mut reply = self
            .llm
            .generate(&conversation, Some(tools.as_slice()))
            .await?;

        if reply.has_tool_calls() {
            info!(
                session_id,
                count = reply.tool_calls.len(),
                "LLM returned tool calls"
            );
            let calls = reply.tool_calls.clone();
            if let Some(direct) = self.process_tool_calls(session_id, &calls).await? {
                return Ok(direct);
            }

            self.add_security_guidance(session_id);
            let updated = self.conversations.conversation(session_id);
            reply = self.llm.generate(&updated, None).await?;
        }

        let mut content = reply
            .content
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| EMPTY_REPLY_APOLOGY.to_string());

        // Defense in depth: re-screen the model's reply
        if self.restricted.contains_any(&content) {
            info!(session_id, "Response contains restricted keywords, overriding");
            content = RESTRICTED_RESPONSE_OVERRIDE.to_string();
        }

        self.conversations.add_assistant_message(session_id, content.as_str());
        Ok(content)
    }

    // =============================
    // Authentication funnel states
    // =============================

    async fn process_authentication_state(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<Option<String>> {
        // Awaiting-PIN has priority so the PIN is never re-interpreted as
        // account digits.
        if self.sessions.is_account_selected(session_id)
            && self.sessions.is_awaiting_pin(session_id)
            && !self.auth.is_authenticated(session_id)
        {
            let trimmed = message.trim();
            let pin = if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
                Some(trimmed.to_string())
            } else {
                extract_pin(message)
            };

            let Some(pin) = pin else {
                let reply =
                    "I need your 4-digit PIN to authenticate your account. Please enter only your PIN.";
                self.conversations.add_assistant_message(session_id, reply);
                return Ok(Some(reply.to_string()));
            };

            let Some(account_number) = self.sessions.selected_account(session_id) else {
                error!(session_id, "No account selected but awaiting PIN");
                let reply =
                    "There was an error with your session. Please start over with your account number.";
                self.conversations.add_assistant_message(session_id, reply);
                return Ok(Some(reply.to_string()));
            };

            if let Some(reply) = self
                .handle_pin_validation(session_id, &account_number, &pin)
                .await?
            {
                return Ok(Some(reply));
            }

            // Validation failed: re-prompt, keeping the selected account so
            // the user can retry without re-selecting.
            warn!(session_id, "PIN validation failed");
            let reply =
                "The PIN you entered is incorrect. Please try again with the correct 4-digit PIN.";
            self.conversations.add_assistant_message(session_id, reply);
            return Ok(Some(reply.to_string()));
        }

        // Not awaiting a PIN: look for a last-4-digits confirmation
        let Some(last_digits) = extract_last_4_digits(message) else {
            return Ok(None);
        };
        info!(session_id, digits = last_digits.as_str(), "Detected last 4 digits");

        let Some(caller_id) = self.sessions.caller_id(session_id) else {
            warn!(session_id, "No caller ID available for account lookup");
            let reply = "I need your mobile number to proceed. Please contact customer support.";
            self.conversations.add_assistant_message(session_id, reply);
            return Ok(Some(reply.to_string()));
        };

        let accounts = match self.caller_accounts(session_id, &caller_id).await {
            Ok(Some(accounts)) => accounts,
            Ok(None) => {
                let reply =
                    "I'm sorry, but I couldn't find any accounts associated with your phone number.";
                self.conversations.add_assistant_message(session_id, reply);
                return Ok(Some(reply.to_string()));
            }
            Err(crate::error::AssistantError::NotFound(reason)) => {
                error!(session_id, reason = reason.as_str(), "Account lookup service missing");
                let reply = "Sorry, the account verification service is currently unavailable.";
                self.conversations.add_assistant_message(session_id, reply);
                return Ok(Some(reply.to_string()));
            }
            Err(e) => {
                error!(session_id, error = %e, "Error during account lookup");
                let reply =
                    "Sorry, I'm having trouble retrieving your account information. Please try again later.";
                self.conversations.add_assistant_message(session_id, reply);
                return Ok(Some(reply.to_string()));
            }
        };

        let matched = accounts
            .iter()
            .find(|account| account.account_number.ends_with(&last_digits));

        match matched {
            Some(account) => {
                info!(
                    session_id,
                    masked = account.masked_account.as_str(),
                    "Matched account by last 4 digits"
                );

                if self
                    .sessions
                    .set_selected_account(session_id, &account.account_number)
                    .is_err()
                {
                    let reply = "I'm sorry, but there was an issue with your account identification. Please try again by providing the last 4 digits of your account.";
                    self.conversations.add_assistant_message(session_id, reply);
                    return Ok(Some(reply.to_string()));
                }

                self.conversations.add_system_message(
                    session_id,
                    format!(
                        "User confirmed account {}. Now ask for 4-digit PIN to authenticate.",
                        account.masked_account
                    ),
                );

                let reply = format!(
                    "Thank you for confirming your account {}. For security, please provide your 4-digit PIN.",
                    account.masked_account
                );
                self.conversations.add_assistant_message(session_id, reply.as_str());
                Ok(Some(reply))
            }
            None => {
                warn!(session_id, digits = last_digits.as_str(), "No account with these digits");
                let reply = format!(
                    "I'm sorry, but I couldn't find an account ending with {} for this phone number. Please check and try again.",
                    last_digits
                );
                self.conversations.add_assistant_message(session_id, reply.as_str());
                Ok(Some(reply))
            }
        }
    }

    /// The caller's accounts: the session cache when present, otherwise a
    /// fresh directory lookup (which also refreshes the cache).
    /// `Ok(None)` means the directory has no accounts for this caller.
    async fn caller_accounts(
        &self,
        session_id: &str,
        caller_id: &str,
    ) -> Result<Option<Vec<AccountSummary>>> {
        let cached = self.sessions.retrieved_accounts(session_id);
        if !cached.is_empty() {
            return Ok(Some(cached));
        }

        let service = self
            .registry
            .get_service("mobile_auth")
            .ok_or_else(|| crate::error::AssistantError::NotFound(
                "Mobile auth service not available".to_string(),
            ))?;

        let result = service
            .execute_tool(
                "get_accounts_by_mobile",
                &json!({
                    "mobile_number": caller_id,
                    "call_id": self.sessions.call_id(session_id),
                }),
            )
            .await?;

        if result["status"] != "success" {
            return Ok(None);
        }

        let accounts: Vec<AccountSummary> =
            serde_json::from_value(result["accounts"].clone()).unwrap_or_default();
        if accounts.is_empty() {
            return Ok(None);
        }

        self.sessions
            .set_retrieved_accounts(session_id, accounts.clone());
        Ok(Some(accounts))
    }

    /// Validate a PIN against the selected account. On success the session
    /// is authenticated and the account details are fetched and rendered.
    /// Returns `None` when the PIN is wrong so the caller can re-prompt.
    async fn handle_pin_validation(
        &self,
        session_id: &str,
        account_number: &str,
        pin: &str,
    ) -> Result<Option<String>> {
        if account_number.len() < 10 {
            error!(session_id, "Invalid account number format for PIN validation");
            self.sessions.clear_selected_account(session_id);
            let reply = "I'm sorry, but there was an issue with your account identification. Please try again by providing the last 4 digits of your account.";
            self.conversations.add_assistant_message(session_id, reply);
            return Ok(Some(reply.to_string()));
        }

        let caller_id = self.sessions.caller_id(session_id);
        let Some(auth_service) = self.registry.get_service("authentication") else {
            error!("Authentication service not found");
            return Ok(None);
        };

        let mut args = json!({
            "account_number": account_number,
            "pin": pin,
        });
        if let Some(caller) = &caller_id {
            args["mobile_number"] = json!(caller);
        }

        info!(session_id, "Validating PIN for selected account");
        let pin_result = match auth_service.execute_tool("validate_pin", &args).await {
            Ok(result) => result,
            Err(e) => {
                error!(session_id, error = %e, "Error during PIN validation");
                return Ok(None);
            }
        };
        let is_valid = pin_result["valid"] == true;

        // Only the masked form of the PIN ever enters conversation history
        let mut masked_args = args.clone();
        masked_args["pin"] = json!("****");
        self.conversations.add_tool_call(
            session_id,
            ToolCall::function("pin_validation_call", "validate_pin", &masked_args),
        );
        self.conversations.add_tool_response(
            session_id,
            "pin_validation_call",
            json!({
                "valid": is_valid,
                "message": pin_result["message"],
            })
            .to_string(),
        );

        if !is_valid {
            return Ok(None);
        }

        self.auth.authenticate(session_id, account_number);

        let Some(account_service) = self.registry.get_service("account") else {
            error!("Account service not found");
            return Ok(None);
        };

        let details_result = match account_service.execute_tool("get_account_details", &args).await
        {
            Ok(result) => result,
            Err(e) => {
                error!(session_id, error = %e, "Error fetching account details");
                return Ok(Some(
                    "Thank you, your PIN is verified, but I'm having trouble retrieving your account details right now. Please try again."
                        .to_string(),
                ));
            }
        };

        self.conversations.add_tool_call(
            session_id,
            ToolCall::function("get_account_details_call", "get_account_details", &masked_args),
        );
        self.conversations.add_tool_response(
            session_id,
            "get_account_details_call",
            details_result.to_string(),
        );

        if details_result["status"] != "success" {
            return Ok(Some(
                "Thank you, your PIN is verified, but I'm having trouble retrieving your account details right now. Please try again."
                    .to_string(),
            ));
        }

        let data = &details_result["data"];
        let reply = format!(
            "Thank you for providing your PIN. Here are your account details:\n\n\
             - **Current Balance:** {}\n\
             - **Currency:** {}\n\
             - **Account Status:** {}\n\
             - **Last Transaction Date:** {}",
            data["formatted_balance"].as_str().unwrap_or(""),
            data["currency"].as_str().unwrap_or(""),
            data["account_status"].as_str().unwrap_or(""),
            data["last_transaction"].as_str().unwrap_or(""),
        );
        self.conversations.add_assistant_message(session_id, reply.as_str());
        Ok(Some(reply))
    }

    // =============================
    // Field queries (authenticated)
    // =============================

    async fn handle_field_query(
        &self,
        session_id: &str,
        account_number: &str,
        message: &str,
    ) -> Option<String> {
        let field = classify_field_query(message)?;

        let context = FlowContext::new()
            .with("account_number", json!(account_number))
            .with("field_name", json!(field.field_name()));

        let outcome = match self.flow_manager.execute_flow("account_query", context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id, error = %e, "Error handling field query");
                return None;
            }
        };

        if !outcome.executed("get_account_field") {
            return None;
        }
        let field_result = outcome.step_result("get_account_field")?;
        if field_result["status"] != "success" {
            return None;
        }
        let value = field_result["value"].as_str().unwrap_or_default().to_string();

        let reply = match field {
            QueryField::Balance => format!("Your current balance is {}.", value),
            QueryField::LastTransaction => format!("Your last transaction was on {}.", value),
            QueryField::AccountStatus => format!("Your account status is '{}'.", value),
            QueryField::Currency => {
                if outcome.executed("get_currency_details") {
                    let name = outcome
                        .step_result("get_currency_details")
                        .and_then(|r| r["name"].as_str())
                        .unwrap_or(&value);
                    format!("Your account is denominated in {} ({}).", name, value)
                } else {
                    format!("Your account currency is {}.", value)
                }
            }
            QueryField::AccountType => {
                if outcome.executed("get_account_type_details") {
                    let name = outcome
                        .step_result("get_account_type_details")
                        .and_then(|r| r["name"].as_str())
                        .unwrap_or(&value)
                        .to_string();
                    format!("You have a {} ({}).", name, value)
                } else {
                    format!("Your account type is {}.", value)
                }
            }
        };
        Some(reply)
    }

    // =============================
    // Tool-call batch execution
    // =============================

    /// Execute a batch of tool calls from one LLM turn. `validate_account`
    /// runs first regardless of declaration order; when it fails for a
    /// last-4 fragment the rest of the batch is abandoned and the returned
    /// reply is sent to the user directly.
    async fn process_tool_calls(
        &self,
        session_id: &str,
        tool_calls: &[ToolCall],
    ) -> Result<Option<String>> {
        info!(session_id, count = tool_calls.len(), "Processing tool calls");
        let caller_id = self.sessions.caller_id(session_id);
        let call_id = self.sessions.call_id(session_id);

        let mut account_validation_failed = false;
        let mut handled_validation_id: Option<String> = None;

        if let Some(call) = tool_calls
            .iter()
            .find(|call| call.function.name == "validate_account")
        {
            let mut args = parsed_object_args(call);
            if let Some(caller) = &caller_id {
                args["mobile_number"] = json!(caller);
            }

            info!(session_id, "Executing account validation first");
            match self.registry.execute_tool("validate_account", &args).await {
                Ok(result) => {
                    self.conversations.add_tool_call(
                        session_id,
                        ToolCall::function(call.id.as_str(), "validate_account", &args),
                    );
                    self.conversations
                        .add_tool_response(session_id, call.id.as_str(), result.to_string());

                    if result["valid"] == true {
                        self.apply_account_validation(session_id, &args).await;
                    } else {
                        warn!(session_id, "Account validation failed");
                        account_validation_failed = true;

                        let fragment = args["account_number"].as_str().unwrap_or_default();
                        if fragment.len() <= 4 {
                            let reply = format!(
                                "I'm sorry, but I couldn't find an account ending with {} associated with your phone number. Please check the last 4 digits of your account number and try again.",
                                fragment
                            );
                            self.conversations.add_assistant_message(session_id, reply.as_str());
                            return Ok(Some(reply));
                        }
                    }
                }
                Err(e) => {
                    error!(session_id, error = %e, "Error during account validation");
                    account_validation_failed = true;
                    self.conversations.add_tool_response(
                        session_id,
                        call.id.as_str(),
                        json!({"error": e.to_string(), "valid": false}).to_string(),
                    );
                }
            }
            handled_validation_id = Some(call.id.clone());
        }

        for call in tool_calls {
            let name = call.function.name.as_str();
            if name == "validate_account" && Some(&call.id) == handled_validation_id.as_ref() {
                continue;
            }
            if name == "validate_pin" && account_validation_failed {
                info!(session_id, "Skipping PIN validation because account validation failed");
                continue;
            }

            let mut args = parsed_object_args(call);
            if name == "get_accounts_by_mobile" && args.get("call_id").is_none() {
                args["call_id"] = json!(call_id);
                args["session_id"] = json!(session_id);
            }
            if let Some(caller) = &caller_id {
                if matches!(name, "validate_account" | "validate_pin" | "get_account_details") {
                    args["mobile_number"] = json!(caller);
                }
            }

            let mut sanitized = args.clone();
            if sanitized.get("pin").is_some() {
                sanitized["pin"] = json!("****");
            }

            info!(session_id, tool = name, "Executing tool");
            match self.registry.execute_tool(name, &args).await {
                Ok(result) => {
                    self.conversations.add_tool_call(
                        session_id,
                        ToolCall::function(call.id.as_str(), name, &sanitized),
                    );
                    self.process_tool_result(session_id, name, &args, &result, &call.id)
                        .await;
                }
                Err(e) => {
                    error!(session_id, tool = name, error = %e, "Error executing tool");
                    self.conversations.add_tool_call(
                        session_id,
                        ToolCall::function(call.id.as_str(), name, &sanitized),
                    );
                    self.conversations.add_tool_response(
                        session_id,
                        call.id.as_str(),
                        json!({"error": e.to_string()}).to_string(),
                    );
                }
            }
        }

        Ok(None)
    }

    /// Fold a tool result into conversation history and session state.
    /// Account lists are never written verbatim for the LLM to see: only a
    /// count and an accounts-found flag.
    async fn process_tool_result(
        &self,
        session_id: &str,
        tool_name: &str,
        args: &Value,
        result: &Value,
        tool_call_id: &str,
    ) {
        if tool_name == "get_accounts_by_mobile" {
            let accounts: Vec<AccountSummary> =
                serde_json::from_value(result["accounts"].clone()).unwrap_or_default();
            let sanitized = json!({
                "status": result["status"],
                "message": result["message"],
                "accounts_found": !accounts.is_empty(),
            });
            self.conversations
                .add_tool_response(session_id, tool_call_id, sanitized.to_string());

            if result["status"] == "success" && !accounts.is_empty() {
                let count = accounts.len();
                info!(session_id, count, "Storing accounts from directory lookup");
                self.sessions.set_retrieved_accounts(session_id, accounts);
                self.conversations.add_system_message(
                    session_id,
                    format!(
                        "The system has found {} account(s) associated with the caller's phone number. \
                         Ask the user to provide the last 4 digits of their account number to confirm \
                         which account they want to access. IMPORTANT: Do not list or reveal any \
                         account numbers to the user. This is a security measure.",
                        count
                    ),
                );
            }
            return;
        }

        self.conversations
            .add_tool_response(session_id, tool_call_id, result.to_string());

        if tool_name == "validate_account" && result["valid"] == true {
            self.apply_account_validation(session_id, args).await;
        } else if tool_name == "validate_pin" && result["valid"] == true {
            let argument_account = args["account_number"].as_str().unwrap_or_default();
            if let Some(account_number) = self
                .resolve_full_account(session_id, argument_account)
                .await
            {
                info!(session_id, "PIN validated, marking session as authenticated");
                self.auth.authenticate(session_id, &account_number);
            } else {
                warn!(session_id, "Could not resolve full account for PIN validation result");
            }
        } else if tool_name == "get_account_details" && result["status"] == "success" {
            if let Some(account_number) = args["account_number"].as_str() {
                info!(session_id, "Account details retrieved, marking session as authenticated");
                self.auth.authenticate(session_id, account_number);
            }
        }
    }

    /// A validated account becomes the session's selected account, after
    /// resolving a last-4 fragment to the full number.
    async fn apply_account_validation(&self, session_id: &str, args: &Value) {
        let argument_account = args["account_number"].as_str().unwrap_or_default();
        let Some(account_number) = self.resolve_full_account(session_id, argument_account).await
        else {
            warn!(
                session_id,
                "Could not find full account number for validated fragment"
            );
            return;
        };

        info!(session_id, "Account validated, marking as selected and awaiting PIN");
        if let Err(e) = self.sessions.set_selected_account(session_id, &account_number) {
            error!(session_id, error = %e, "Error setting selected account");
            self.conversations.add_system_message(
                session_id,
                "There was an error with the account number validation. Ask the user to try again with the correct account number.",
            );
        }
    }

    /// Resolve a possibly-short account argument to a full account number:
    /// the already-selected account, then the session cache, then a fresh
    /// directory lookup.
    async fn resolve_full_account(
        &self,
        session_id: &str,
        account_number: &str,
    ) -> Option<String> {
        if account_number.len() > 4 {
            return Some(account_number.to_string());
        }

        if let Some(selected) = self.sessions.selected_account(session_id) {
            if selected.ends_with(account_number) {
                return Some(selected);
            }
        }

        let cached = self.sessions.retrieved_accounts(session_id);
        if let Some(hit) = cached
            .iter()
            .find(|account| account.account_number.ends_with(account_number))
        {
            return Some(hit.account_number.clone());
        }

        let mobile = self.sessions.caller_id(session_id)?;
        let service = self.registry.get_service("mobile_auth")?;
        let result = service
            .execute_tool("get_accounts_by_mobile", &json!({"mobile_number": mobile}))
            .await
            .ok()?;
        if result["status"] != "success" {
            return None;
        }
        let accounts: Vec<AccountSummary> =
            serde_json::from_value(result["accounts"].clone()).unwrap_or_default();
        accounts
            .into_iter()
            .find(|account| account.account_number.ends_with(account_number))
            .map(|account| account.account_number)
    }

    // =============================
    // Guidance injection
    // =============================

    fn add_contextual_guidance(&self, session_id: &str) {
        if self.sessions.has_accounts(session_id) && !self.sessions.is_account_selected(session_id)
        {
            self.conversations.add_system_message(
                session_id,
                "The user has accounts associated with their phone number. \
                 Ask them to provide the last 4 digits of their account number to proceed. \
                 IMPORTANT: DO NOT list or reveal any account numbers or account masks.",
            );
        }
    }

    fn add_security_guidance(&self, session_id: &str) {
        if self.auth.is_authenticated(session_id) {
            self.conversations.add_system_message(
                session_id,
                "Remember to include ALL available account information in your response, \
                 including balance, currency, account status, and last transaction date if available.",
            );
        } else if self.sessions.has_accounts(session_id) {
            if self.sessions.is_account_selected(session_id) {
                self.conversations.add_system_message(
                    session_id,
                    "The user has selected an account. Ask for their 4-digit PIN to authenticate.",
                );
            } else {
                self.conversations.add_system_message(
                    session_id,
                    "The user has accounts, but hasn't selected one yet. Ask them to provide the \
                     last 4 digits of their account number. DO NOT list or reveal any account numbers.",
                );
            }
        }
    }

    // =============================
    // Session lifecycle
    // =============================

    /// Inject a custom system prompt into a live session
    pub async fn inject_prompt(&self, session_id: &str, prompt: &str) -> bool {
        self.conversations.add_system_message(session_id, prompt);
        info!(session_id, "Injected new prompt into session");
        true
    }

    /// End a session, removing conversation, authentication and context
    /// atomically with respect to the session id.
    pub async fn end_session(&self, session_id: &str) -> bool {
        let lock = self.session_lock(session_id);
        let removed = {
            let _guard = lock.lock().await;
            info!(session_id, "Ending session");
            let conversation_ended = self.conversations.end_conversation(session_id);
            let auth_ended = self.auth.end_session(session_id);
            let context_ended = self.sessions.end_session(session_id);
            conversation_ended || auth_ended || context_ended
        };
        self.session_locks.remove(session_id);
        removed
    }
}

/// Parse a tool call's JSON arguments, treating anything malformed or
/// non-object as an empty object.
fn parsed_object_args(call: &ToolCall) -> Value {
    match call.parsed_arguments() {
        Ok(value) if value.is_object() => value,
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BankingApi, MockBankingApi};
    use crate::llm::ScriptedLlmProvider;
    use crate::models::LlmReply;
    use crate::services::create_default_registry;
    use std::time::Duration;

    const CALLER: &str = "01712345678";

    fn chatbot_with(
        replies: Vec<LlmReply>,
    ) -> (BankingChatbot, Arc<ScriptedLlmProvider>, Arc<MockBankingApi>) {
        let api = Arc::new(MockBankingApi::new());
        let api_dyn: Arc<dyn BankingApi> = api.clone();
        let registry = Arc::new(create_default_registry(api_dyn));
        let llm = Arc::new(ScriptedLlmProvider::new(replies));
        let prompt_manager = PromptManager::new("/nonexistent");
        let chatbot = BankingChatbot::new(llm.clone(), registry, &prompt_manager, None);
        (chatbot, llm, api)
    }

    #[tokio::test]
    async fn test_scenario_last_four_digits_selects_account() {
        let (chatbot, llm, _api) = chatbot_with(vec![]);

        let reply = chatbot
            .process_message("s1", "last four digits 5678", Some(CALLER), Channel::Web)
            .await;

        assert!(reply.contains("131100***5678"));
        assert!(reply.contains("PIN"));
        assert!(chatbot.sessions.is_awaiting_pin("s1"));
        assert_eq!(
            chatbot.sessions.selected_account("s1"),
            Some("1311002345678".to_string())
        );
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_scenario_pin_authenticates_and_renders_details() {
        let (chatbot, llm, _api) = chatbot_with(vec![]);

        chatbot
            .process_message("s1", "last four digits 5678", Some(CALLER), Channel::Web)
            .await;
        let reply = chatbot.process_message("s1", "1234", None, Channel::Web).await;

        assert!(chatbot.auth.is_authenticated("s1"));
        assert_eq!(
            chatbot.auth.authenticated_account("s1"),
            Some("1311002345678".to_string())
        );
        assert!(reply.contains("1,250.75"));
        assert!(reply.contains("BDT"));
        assert!(reply.contains("OPERATIVE"));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_scenario_no_suffix_match_reveals_nothing() {
        let (chatbot, _llm, _api) = chatbot_with(vec![]);

        let reply = chatbot
            .process_message("s1", "ending in 0000", Some(CALLER), Channel::Web)
            .await;

        assert!(reply.contains("0000"));
        for account_number in ["1311002345678", "1308001234567", "1311003456789"] {
            assert!(!reply.contains(account_number));
        }
        assert!(!reply.contains("131100***5678"));
        assert!(!chatbot.sessions.is_account_selected("s1"));
    }

    #[tokio::test]
    async fn test_scenario_authenticated_field_query_skips_llm() {
        let (chatbot, llm, _api) = chatbot_with(vec![]);

        chatbot
            .process_message("s1", "last four digits 5678", Some(CALLER), Channel::Web)
            .await;
        chatbot.process_message("s1", "1234", None, Channel::Web).await;

        let reply = chatbot
            .process_message("s1", "what's my balance", None, Channel::Web)
            .await;

        assert_eq!(reply, "Your current balance is ৳1,250.75.");
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_scenario_restricted_topic_short_circuits() {
        let (chatbot, llm, api) = chatbot_with(vec![]);

        let reply = chatbot
            .process_message("s1", "I want a loan", Some(CALLER), Channel::Web)
            .await;

        assert_eq!(reply, RESTRICTED_TOPIC_REPLY);
        assert_eq!(llm.calls(), 0);
        assert_eq!(api.directory_lookups(), 0);
    }

    #[tokio::test]
    async fn test_wrong_pin_keeps_selection_for_retry() {
        let (chatbot, _llm, _api) = chatbot_with(vec![]);

        chatbot
            .process_message("s1", "last four digits 5678", Some(CALLER), Channel::Web)
            .await;
        let reply = chatbot.process_message("s1", "9999", None, Channel::Web).await;

        assert!(reply.contains("incorrect"));
        assert!(!chatbot.auth.is_authenticated("s1"));
        assert!(chatbot.sessions.is_awaiting_pin("s1"));

        let reply = chatbot.process_message("s1", "1234", None, Channel::Web).await;
        assert!(chatbot.auth.is_authenticated("s1"));
        assert!(reply.contains("1,250.75"));
    }

    #[tokio::test]
    async fn test_pin_is_masked_in_conversation_history() {
        let (chatbot, _llm, _api) = chatbot_with(vec![]);

        chatbot
            .process_message("s1", "last four digits 5678", Some(CALLER), Channel::Web)
            .await;
        chatbot.process_message("s1", "1234", None, Channel::Web).await;

        let serialized =
            serde_json::to_string(&chatbot.conversations.conversation("s1")).unwrap();
        assert!(serialized.contains(r#"\"pin\":\"****\""#));
        assert!(!serialized.contains(r#"\"pin\":\"1234\""#));
    }

    #[tokio::test]
    async fn test_tool_batch_runs_account_validation_first() {
        // The PIN call is declared first, the invalid account validation
        // second; the PIN tool must never be invoked.
        let batch = LlmReply {
            content: None,
            tool_calls: vec![
                ToolCall::function(
                    "call_pin",
                    "validate_pin",
                    &json!({"account_number": "0000", "pin": "1234"}),
                ),
                ToolCall::function(
                    "call_acct",
                    "validate_account",
                    &json!({"account_number": "0000"}),
                ),
            ],
        };
        let (chatbot, llm, api) = chatbot_with(vec![batch]);

        let reply = chatbot
            .process_message("s1", "please check my account", Some(CALLER), Channel::Web)
            .await;

        assert!(reply.contains("0000"));
        assert_eq!(api.pin_attempts(), 0);
        // The batch was abandoned: no second LLM round-trip
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_directory_lookup_result_is_sanitized_for_llm() {
        let batch = LlmReply {
            content: None,
            tool_calls: vec![ToolCall::function(
                "call_1",
                "get_accounts_by_mobile",
                &json!({"mobile_number": CALLER}),
            )],
        };
        let (chatbot, llm, _api) = chatbot_with(vec![
            batch,
            LlmReply::text("I found your accounts. Please share the last 4 digits."),
        ]);

        let reply = chatbot
            .process_message("s1", "can you look up my accounts", Some(CALLER), Channel::Web)
            .await;

        assert_eq!(reply, "I found your accounts. Please share the last 4 digits.");
        assert_eq!(llm.calls(), 2);
        assert!(chatbot.sessions.has_accounts("s1"));

        let serialized =
            serde_json::to_string(&chatbot.conversations.conversation("s1")).unwrap();
        assert!(serialized.contains("accounts_found"));
        for account_number in ["1311002345678", "1308001234567", "1311003456789"] {
            assert!(!serialized.contains(account_number), "{} leaked", account_number);
        }
    }

    #[tokio::test]
    async fn test_model_reply_is_rescreened_for_restricted_products() {
        let (chatbot, _llm, _api) = chatbot_with(vec![LlmReply::text(
            "You could consider a personal loan for that.",
        )]);

        let reply = chatbot
            .process_message("s1", "what should I do with my savings", Some(CALLER), Channel::Web)
            .await;

        assert_eq!(reply, RESTRICTED_RESPONSE_OVERRIDE);
    }

    #[tokio::test]
    async fn test_balance_intent_without_digits_prompts_for_last_four() {
        let (chatbot, llm, _api) = chatbot_with(vec![]);

        let reply = chatbot
            .process_message("s1", "what is my account balance", Some(CALLER), Channel::Web)
            .await;

        assert!(reply.contains("last 4 digits"));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_digits_without_caller_id_ask_for_support() {
        let (chatbot, _llm, _api) = chatbot_with(vec![]);

        let reply = chatbot
            .process_message("s1", "ending in 5678", None, Channel::Web)
            .await;

        assert!(reply.contains("customer support"));
        assert!(!chatbot.sessions.is_account_selected("s1"));
    }

    #[tokio::test]
    async fn test_expired_sessions_are_cleared_in_lockstep() {
        let api = Arc::new(MockBankingApi::new());
        let api_dyn: Arc<dyn BankingApi> = api.clone();
        let registry = Arc::new(create_default_registry(api_dyn));
        let llm = Arc::new(ScriptedLlmProvider::new(vec![LlmReply::text("Hello!")]));
        let prompt_manager = PromptManager::new("/nonexistent");
        let chatbot = BankingChatbot::new(llm, registry, &prompt_manager, None)
            .with_auth_ttl(Duration::ZERO);

        chatbot.auth.authenticate("stale", "1311002345678");
        chatbot.sessions.initialize_session("stale", Some(CALLER.into()), Channel::Web);
        chatbot.conversations.add_user_message("stale", "old turn");
        std::thread::sleep(Duration::from_millis(5));

        // The sweep runs at the start of any message on any session
        chatbot.process_message("fresh", "hi", None, Channel::Web).await;

        assert!(!chatbot.auth.is_authenticated("stale"));
        assert_eq!(chatbot.sessions.caller_id("stale"), None);
        // Conversation was dropped with the session; reading re-materializes
        // just the system prompt
        assert_eq!(chatbot.conversations.conversation("stale").len(), 1);
    }

    #[tokio::test]
    async fn test_end_session_clears_all_stores() {
        let (chatbot, _llm, _api) = chatbot_with(vec![]);

        chatbot
            .process_message("s1", "last four digits 5678", Some(CALLER), Channel::Web)
            .await;
        chatbot.process_message("s1", "1234", None, Channel::Web).await;
        assert!(chatbot.auth.is_authenticated("s1"));

        assert!(chatbot.end_session("s1").await);
        assert!(!chatbot.auth.is_authenticated("s1"));
        assert_eq!(chatbot.sessions.caller_id("s1"), None);
        assert_eq!(chatbot.conversations.conversation("s1").len(), 1);
        assert!(!chatbot.end_session("s1").await);
    }

    #[tokio::test]
    async fn test_inject_prompt_appends_system_turn() {
        let (chatbot, _llm, _api) = chatbot_with(vec![]);

        assert!(chatbot.inject_prompt("s1", "Speak formally.").await);
        let turns = chatbot.conversations.conversation("s1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content.as_deref(), Some("Speak formally."));
    }
}
