//! Per-session transient context
//!
//! Tracks caller identity, discovered accounts, and the account-selection
//! lifecycle for each session. Stored in a sharded map so sessions never
//! contend with each other.

use crate::models::{AccountSummary, Channel};
use crate::error::AssistantError;
use crate::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

/// Minimum length of a full account number. Anything shorter is a fragment
/// (e.g. a last-4-digits confirmation) and must never be persisted as the
/// selected account.
const MIN_ACCOUNT_NUMBER_LEN: usize = 10;

/// Transient state for one session
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub caller_id: Option<String>,
    pub channel: Channel,
    pub retrieved_accounts: Vec<AccountSummary>,
    pub account_retrieved: bool,
    pub selected_account: Option<String>,
    pub account_selected: bool,
    pub awaiting_pin: bool,
    pub call_id: String,
}

impl SessionContext {
    fn new(session_id: &str, caller_id: Option<String>, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_activity: now,
            caller_id,
            channel,
            retrieved_accounts: Vec::new(),
            account_retrieved: false,
            selected_account: None,
            account_selected: false,
            awaiting_pin: false,
            call_id: generate_call_id(session_id, now),
        }
    }
}

/// Correlation id for backend calls, generated once at session init
fn generate_call_id(session_id: &str, now: DateTime<Utc>) -> String {
    let tail: String = session_id
        .chars()
        .rev()
        .take(10)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}{}", now.timestamp(), tail)
}

/// Fields that can be merged into an existing session context
#[derive(Debug, Default, Clone)]
pub struct ContextPatch {
    pub caller_id: Option<String>,
    pub channel: Option<Channel>,
}

/// Manages session-level context data including caller information
pub struct SessionContextManager {
    sessions: DashMap<String, SessionContext>,
}

impl SessionContextManager {
    pub fn new() -> Self {
        info!("Session context manager initialized");
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn initialize_session(
        &self,
        session_id: &str,
        caller_id: Option<String>,
        channel: Channel,
    ) {
        info!(session_id, ?caller_id, "Initializing session context");
        self.sessions.insert(
            session_id.to_string(),
            SessionContext::new(session_id, caller_id, channel),
        );
    }

    /// Merge the patch into the session context, bumping the activity
    /// timestamp. Auto-initializes a missing session.
    pub fn update_context(&self, session_id: &str, patch: ContextPatch) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, None, Channel::default()));
        if let Some(caller_id) = patch.caller_id {
            entry.caller_id = Some(caller_id);
        }
        if let Some(channel) = patch.channel {
            entry.channel = channel;
        }
        entry.last_activity = Utc::now();
        debug!(session_id, "Updated session context");
    }

    /// Snapshot of the full context, auto-initializing a missing session
    pub fn context(&self, session_id: &str) -> SessionContext {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, None, Channel::default()))
            .clone()
    }

    /// Persist the confirmed account for the session.
    /// Fails when the value is a fragment rather than a full account number;
    /// on success the session is marked as awaiting its PIN.
    pub fn set_selected_account(&self, session_id: &str, account_number: &str) -> Result<()> {
        if account_number.len() < MIN_ACCOUNT_NUMBER_LEN {
            error!(
                session_id,
                len = account_number.len(),
                "Attempted to store incomplete account number"
            );
            return Err(AssistantError::Validation(format!(
                "Invalid account number format: expected at least {} characters",
                MIN_ACCOUNT_NUMBER_LEN
            )));
        }

        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, None, Channel::default()));
        entry.selected_account = Some(account_number.to_string());
        entry.account_selected = true;
        entry.awaiting_pin = true;
        entry.last_activity = Utc::now();
        info!(session_id, "Account selected, now awaiting PIN");
        Ok(())
    }

    /// The selected account, re-validated on read: a stored fragment is
    /// treated as absent.
    pub fn selected_account(&self, session_id: &str) -> Option<String> {
        let entry = self.sessions.get(session_id)?;
        match &entry.selected_account {
            Some(account) if account.len() >= MIN_ACCOUNT_NUMBER_LEN => Some(account.clone()),
            Some(account) => {
                warn!(
                    session_id,
                    len = account.len(),
                    "Stored selected account failed integrity check"
                );
                None
            }
            None => None,
        }
    }

    /// Reset the selection lifecycle without touching the retrieved accounts
    pub fn clear_selected_account(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.selected_account = None;
            entry.account_selected = false;
            entry.awaiting_pin = false;
            entry.last_activity = Utc::now();
            debug!(session_id, "Cleared selected account");
        }
    }

    /// Replace the discovered account list. A fresh list always invalidates
    /// any prior selection.
    pub fn set_retrieved_accounts(&self, session_id: &str, accounts: Vec<AccountSummary>) {
        info!(
            session_id,
            count = accounts.len(),
            "Setting retrieved accounts"
        );
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, None, Channel::default()));
        entry.retrieved_accounts = accounts;
        entry.account_retrieved = true;
        entry.selected_account = None;
        entry.account_selected = false;
        entry.awaiting_pin = false;
        entry.last_activity = Utc::now();
    }

    pub fn retrieved_accounts(&self, session_id: &str) -> Vec<AccountSummary> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.retrieved_accounts.clone())
            .unwrap_or_default()
    }

    pub fn has_accounts(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|entry| entry.account_retrieved)
            .unwrap_or(false)
    }

    pub fn is_account_selected(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|entry| entry.account_selected)
            .unwrap_or(false)
    }

    pub fn is_awaiting_pin(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|entry| entry.awaiting_pin)
            .unwrap_or(false)
    }

    pub fn caller_id(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .and_then(|entry| entry.caller_id.clone())
    }

    pub fn call_id(&self, session_id: &str) -> String {
        self.context(session_id).call_id
    }

    pub fn clear_expired_sessions(&self, expired_session_ids: &[String]) {
        for session_id in expired_session_ids {
            if self.sessions.remove(session_id).is_some() {
                info!(session_id = session_id.as_str(), "Cleared expired session context");
            }
        }
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            info!(session_id, "Ended session context");
        }
        removed
    }
}

impl Default for SessionContextManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(number: &str, masked: &str) -> AccountSummary {
        AccountSummary {
            account_number: number.to_string(),
            masked_account: masked.to_string(),
        }
    }

    #[test]
    fn test_rejects_short_account_number() {
        let manager = SessionContextManager::new();
        manager.initialize_session("s1", Some("01712345678".into()), Channel::Web);

        let result = manager.set_selected_account("s1", "5678");
        assert!(matches!(result, Err(AssistantError::Validation(_))));
        assert!(!manager.is_account_selected("s1"));
        assert!(!manager.is_awaiting_pin("s1"));
    }

    #[test]
    fn test_selection_sets_awaiting_pin() {
        let manager = SessionContextManager::new();
        manager
            .set_selected_account("s1", "1311002345678")
            .unwrap();
        assert!(manager.is_account_selected("s1"));
        assert!(manager.is_awaiting_pin("s1"));
        assert_eq!(
            manager.selected_account("s1"),
            Some("1311002345678".to_string())
        );
    }

    #[test]
    fn test_fresh_account_list_invalidates_selection() {
        let manager = SessionContextManager::new();
        manager
            .set_selected_account("s1", "1311002345678")
            .unwrap();
        manager.set_retrieved_accounts(
            "s1",
            vec![account("1308001234567", "130800***4567")],
        );

        assert!(manager.has_accounts("s1"));
        assert!(!manager.is_account_selected("s1"));
        assert!(!manager.is_awaiting_pin("s1"));
        assert_eq!(manager.selected_account("s1"), None);
    }

    #[test]
    fn test_update_context_merges_and_auto_initializes() {
        let manager = SessionContextManager::new();
        manager.update_context(
            "s2",
            ContextPatch {
                caller_id: Some("01712345678".into()),
                channel: Some(Channel::Ivr),
            },
        );
        assert_eq!(manager.caller_id("s2"), Some("01712345678".to_string()));
        assert_eq!(manager.context("s2").channel, Channel::Ivr);
    }

    #[test]
    fn test_call_id_is_stable_per_session() {
        let manager = SessionContextManager::new();
        let first = manager.call_id("session-abcdef1234");
        let second = manager.call_id("session-abcdef1234");
        assert_eq!(first, second);
        assert!(first.ends_with("cdef1234"));
    }

    #[test]
    fn test_end_session_removes_context() {
        let manager = SessionContextManager::new();
        manager.initialize_session("s3", None, Channel::Web);
        assert!(manager.end_session("s3"));
        assert!(!manager.end_session("s3"));
    }
}
