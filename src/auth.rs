//! Authenticated-session tracking
//!
//! Maps session ids to the account they are authenticated for, with lazy
//! TTL-based expiry. Reads never mutate; expired records are removed by the
//! sweep so dependent stores can be cleared in lockstep.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Session timeout (15 minutes)
const SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct AuthRecord {
    account_number: String,
    last_activity: Instant,
}

/// Manages authentication state and session expiry
pub struct AuthenticationManager {
    sessions: DashMap<String, AuthRecord>,
    ttl: Duration,
}

impl AuthenticationManager {
    pub fn new() -> Self {
        info!("Authentication manager initialized");
        Self {
            sessions: DashMap::new(),
            ttl: SESSION_TIMEOUT,
        }
    }

    /// Custom timeout, used by tests
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Mark a session as authenticated for an account, overwriting any
    /// prior record.
    pub fn authenticate(&self, session_id: &str, account_number: &str) {
        self.sessions.insert(
            session_id.to_string(),
            AuthRecord {
                account_number: account_number.to_string(),
                last_activity: Instant::now(),
            },
        );
        info!(session_id, "Session authenticated");
    }

    /// The account a session is authenticated for, regardless of freshness
    pub fn authenticated_account(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .map(|record| record.account_number.clone())
    }

    /// True iff a record exists and is within the TTL. Pure read; expiry is
    /// swept separately.
    pub fn is_authenticated(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|record| record.last_activity.elapsed() <= self.ttl)
            .unwrap_or(false)
    }

    /// Refresh the activity timestamp if a record exists; no-op otherwise
    pub fn update_activity(&self, session_id: &str) {
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            record.last_activity = Instant::now();
        }
    }

    /// Remove all records beyond the TTL and return the removed session ids
    /// so dependent stores can be cleared in lockstep.
    pub fn cleanup_expired_sessions(&self) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.last_activity.elapsed() > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for session_id in &expired {
            if self.sessions.remove(session_id).is_some() {
                info!(session_id = session_id.as_str(), "Removing expired session");
            }
        }
        expired
    }

    /// Explicit immediate removal, independent of the TTL
    pub fn end_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            info!(session_id, "Session ended");
        }
        removed
    }
}

impl Default for AuthenticationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_authenticated_is_false() {
        let manager = AuthenticationManager::new();
        assert!(!manager.is_authenticated("unknown"));
        assert_eq!(manager.authenticated_account("unknown"), None);
    }

    #[test]
    fn test_authenticate_and_read_back() {
        let manager = AuthenticationManager::new();
        manager.authenticate("s1", "1311002345678");
        assert!(manager.is_authenticated("s1"));
        assert_eq!(
            manager.authenticated_account("s1"),
            Some("1311002345678".to_string())
        );
    }

    #[test]
    fn test_expiry_after_ttl() {
        let manager = AuthenticationManager::with_ttl(Duration::ZERO);
        manager.authenticate("s1", "1311002345678");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!manager.is_authenticated("s1"));
    }

    #[test]
    fn test_cleanup_returns_removed_ids_and_is_idempotent() {
        let manager = AuthenticationManager::with_ttl(Duration::ZERO);
        manager.authenticate("s1", "1311002345678");
        manager.authenticate("s2", "1308001234567");
        std::thread::sleep(Duration::from_millis(5));

        let mut removed = manager.cleanup_expired_sessions();
        removed.sort();
        assert_eq!(removed, vec!["s1".to_string(), "s2".to_string()]);

        // Second sweep with no elapsed records removes nothing
        assert!(manager.cleanup_expired_sessions().is_empty());
    }

    #[test]
    fn test_update_activity_keeps_session_fresh() {
        let manager = AuthenticationManager::with_ttl(Duration::from_millis(400));
        manager.authenticate("s1", "1311002345678");
        std::thread::sleep(Duration::from_millis(250));
        manager.update_activity("s1");
        std::thread::sleep(Duration::from_millis(250));
        assert!(manager.is_authenticated("s1"));
    }

    #[test]
    fn test_end_session_is_immediate() {
        let manager = AuthenticationManager::new();
        manager.authenticate("s1", "1311002345678");
        assert!(manager.end_session("s1"));
        assert!(!manager.is_authenticated("s1"));
        assert!(!manager.end_session("s1"));
    }
}
