//! Core banking middleware boundary
//!
//! The assistant talks to account data through the `BankingApi` capability:
//! an account directory keyed by mobile number, PIN verification, and
//! account-detail retrieval. Two implementations exist: an in-process mock
//! with sample data and an HTTP client for the real middleware.

mod http;
mod mock;

pub use http::HttpBankingApi;
pub use mock::MockBankingApi;

use crate::models::{AccountRecord, DirectoryLookup, PinVerification};
use crate::Result;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Capability consumed by the service layer
#[async_trait::async_trait]
pub trait BankingApi: Send + Sync {
    /// Accounts associated with a mobile number. An empty result is a
    /// status, never an error.
    async fn accounts_by_mobile(
        &self,
        mobile_number: &str,
        call_id: Option<&str>,
    ) -> Result<DirectoryLookup>;

    /// Verify the PIN for an account
    async fn verify_pin(
        &self,
        account_number: &str,
        pin: &str,
        mobile_number: Option<&str>,
        call_id: Option<&str>,
    ) -> Result<PinVerification>;

    /// Full account record, `None` when the account does not exist
    async fn account_details(
        &self,
        account_number: &str,
        mobile_number: Option<&str>,
        call_id: Option<&str>,
    ) -> Result<Option<AccountRecord>>;
}

/// Normalize a mobile number for consistent lookup: digits only, the
/// Bangladesh country prefix stripped, leading zero restored for 10-digit
/// numbers.
pub fn normalize_mobile_number(mobile_number: &str) -> String {
    let mut digits: String = mobile_number.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.starts_with("880") {
        digits = digits[3..].to_string();
    }

    if !digits.starts_with('0') && digits.len() == 10 {
        digits.insert(0, '0');
    }

    digits
}

/// Create a banking API client based on environment configuration.
/// `USE_REAL_API` selects the HTTP client; everything else gets the mock.
pub fn create_client(use_real_api: bool) -> Arc<dyn BankingApi> {
    let use_real_api = use_real_api
        || matches!(
            env::var("USE_REAL_API").unwrap_or_default().to_lowercase().as_str(),
            "true" | "1" | "yes"
        );

    if use_real_api {
        let base_url =
            env::var("API_BASE_URL").unwrap_or_else(|_| "http://10.45.14.24/ccmwmtb".to_string());
        let api_secret = env::var("API_SECRET").unwrap_or_default();
        let timeout_secs = env::var("API_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        info!(base_url = base_url.as_str(), "Creating real banking API client");
        Arc::new(HttpBankingApi::new(base_url, api_secret, timeout_secs))
    } else {
        info!("Creating mock banking API client");
        Arc::new(MockBankingApi::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_country_code() {
        assert_eq!(normalize_mobile_number("+8801712345678"), "01712345678");
        assert_eq!(normalize_mobile_number("8801712345678"), "01712345678");
    }

    #[test]
    fn test_normalize_restores_leading_zero() {
        assert_eq!(normalize_mobile_number("1712345678"), "01712345678");
    }

    #[test]
    fn test_normalize_keeps_canonical_form() {
        assert_eq!(normalize_mobile_number("01712345678"), "01712345678");
        assert_eq!(normalize_mobile_number("017-1234-5678"), "01712345678");
    }
}
