//! Shared account and PIN validation helpers
//!
//! Both the account and authentication services validate through these.
//! A short account-number argument (a last-4-digits fragment) is never sent
//! upstream: it is resolved to the caller's full account number first, and
//! the operation fails as "not found" when no suffix match exists.

use crate::backend::BankingApi;
use crate::Result;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Arguments of this length or shorter are treated as a last-4 fragment
pub const SHORT_ACCOUNT_LEN: usize = 4;

enum Resolution {
    Full(String),
    NoMatch(String),
    NoAccounts,
}

async fn resolve_short_account(
    api: &dyn BankingApi,
    account_number: &str,
    mobile_number: &str,
) -> Result<Resolution> {
    warn!(
        fragment = account_number,
        "Short account number detected, attempting to find full account"
    );

    let lookup = api.accounts_by_mobile(mobile_number, None).await?;
    if !lookup.found {
        return Ok(Resolution::NoAccounts);
    }

    for account in &lookup.accounts {
        if account.account_number.ends_with(account_number) {
            info!(
                account_number = account.account_number.as_str(),
                "Resolved full account for fragment"
            );
            return Ok(Resolution::Full(account.account_number.clone()));
        }
    }

    Ok(Resolution::NoMatch(account_number.to_string()))
}

/// Validate that an account exists, resolving a fragment first when a
/// mobile number is known.
pub async fn validate_account(
    api: &dyn BankingApi,
    account_number: &str,
    mobile_number: Option<&str>,
) -> Result<Value> {
    let mut account_number = account_number.to_string();

    if let Some(mobile) = mobile_number {
        if account_number.len() <= SHORT_ACCOUNT_LEN {
            match resolve_short_account(api, &account_number, mobile).await? {
                Resolution::Full(full) => account_number = full,
                Resolution::NoMatch(fragment) => {
                    return Ok(json!({
                        "valid": false,
                        "message": format!(
                            "No account ending with {} found for this mobile number",
                            fragment
                        ),
                        "account_status": Value::Null,
                    }));
                }
                Resolution::NoAccounts => {
                    return Ok(json!({
                        "valid": false,
                        "message": "No accounts found for this mobile number",
                        "account_status": Value::Null,
                    }));
                }
            }
        }
    }

    info!(account_number = account_number.as_str(), "Validating account number");
    let record = api
        .account_details(&account_number, mobile_number, None)
        .await?;

    match record {
        Some(record) => Ok(json!({
            "valid": true,
            "message": "Account found",
            "account_status": record.acc_status,
        })),
        None => Ok(json!({
            "valid": false,
            "message": "Account not found",
            "account_status": Value::Null,
        })),
    }
}

/// Validate an account PIN, resolving a fragment first when a mobile number
/// is known.
pub async fn validate_pin(
    api: &dyn BankingApi,
    account_number: &str,
    pin: &str,
    mobile_number: Option<&str>,
) -> Result<Value> {
    let mut account_number = account_number.to_string();

    if let Some(mobile) = mobile_number {
        if account_number.len() <= SHORT_ACCOUNT_LEN {
            match resolve_short_account(api, &account_number, mobile).await? {
                Resolution::Full(full) => account_number = full,
                Resolution::NoMatch(fragment) => {
                    return Ok(json!({
                        "valid": false,
                        "message": format!(
                            "No account ending with {} found for this mobile number",
                            fragment
                        ),
                    }));
                }
                Resolution::NoAccounts => {
                    return Ok(json!({
                        "valid": false,
                        "message": "No accounts found for this mobile number",
                    }));
                }
            }
        }
    }

    info!(account_number = account_number.as_str(), "Validating PIN");
    let verification = api
        .verify_pin(&account_number, pin, mobile_number, None)
        .await?;

    Ok(json!({
        "valid": verification.valid,
        "message": if verification.valid { "PIN validated" } else { "Invalid PIN" },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBankingApi;

    #[tokio::test]
    async fn test_short_account_resolved_before_validation() {
        let api = MockBankingApi::new();
        let result = validate_account(&api, "5678", Some("01712345678"))
            .await
            .unwrap();
        assert_eq!(result["valid"], true);
        assert_eq!(result["account_status"], "OPERATIVE");
    }

    #[tokio::test]
    async fn test_short_account_without_match_fails_closed() {
        let api = MockBankingApi::new();
        let result = validate_account(&api, "0000", Some("01712345678"))
            .await
            .unwrap();
        assert_eq!(result["valid"], false);
        let message = result["message"].as_str().unwrap();
        assert!(message.contains("0000"));
        // The fragment must not be forwarded upstream as an account number
        assert!(!message.contains("1311002345678"));
    }

    #[tokio::test]
    async fn test_pin_validation_with_fragment() {
        let api = MockBankingApi::new();
        let result = validate_pin(&api, "5678", "1234", Some("01712345678"))
            .await
            .unwrap();
        assert_eq!(result["valid"], true);

        let result = validate_pin(&api, "5678", "9999", Some("01712345678"))
            .await
            .unwrap();
        assert_eq!(result["valid"], false);
    }
}
