//! Mock banking backend with sample account data
//!
//! Serves the same sample customer as the real middleware's test
//! environment: three BDT savings accounts behind one mobile number.
//! Call counters let tests assert which backend operations ran.

use super::{normalize_mobile_number, BankingApi};
use crate::models::{AccountRecord, AccountSummary, DirectoryLookup, PinVerification};
use crate::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

struct SampleAccount {
    summary: AccountSummary,
    pin: &'static str,
    mobile: &'static str,
    record: AccountRecord,
}

fn sample_record(
    acc_no: &str,
    balance: &str,
    product_name: &str,
    branch_code: &str,
    int_rate: &str,
    open_date: &str,
    txn_days_ago: i64,
) -> AccountRecord {
    let last_txn = (Utc::now() - Duration::days(txn_days_ago))
        .format("%Y-%m-%d")
        .to_string();
    AccountRecord {
        acc_no: acc_no.to_string(),
        acc_name: "AHMED RAHMAN".to_string(),
        acc_status: "OPERATIVE".to_string(),
        currency_code: "BDT".to_string(),
        // Upstream reports balances with a trailing space
        current_balance: format!("{} ", balance),
        available_balance: format!("{} ", balance),
        last_txn_date: last_txn,
        acc_open_date: open_date.to_string(),
        product_type: "SB".to_string(),
        product_name: product_name.to_string(),
        branch_code: branch_code.to_string(),
        int_rate: int_rate.to_string(),
        mobile: "01712345678".to_string(),
    }
}

/// Mock implementation of the banking API using sample data
pub struct MockBankingApi {
    accounts: Vec<SampleAccount>,
    by_number: HashMap<String, usize>,
    pin_attempts: AtomicU64,
    directory_lookups: AtomicU64,
}

impl MockBankingApi {
    pub fn new() -> Self {
        let accounts = vec![
            SampleAccount {
                summary: AccountSummary {
                    account_number: "1311002345678".to_string(),
                    masked_account: "131100***5678".to_string(),
                },
                pin: "1234",
                mobile: "01712345678",
                record: sample_record(
                    "1311002345678",
                    "1250.75",
                    "MTB REGULARSAVINGSSTAFF",
                    "00057",
                    "2.0000",
                    "2023-06-12",
                    15,
                ),
            },
            SampleAccount {
                summary: AccountSummary {
                    account_number: "1308001234567".to_string(),
                    masked_account: "130800***4567".to_string(),
                },
                pin: "5678",
                mobile: "01712345678",
                record: sample_record(
                    "1308001234567",
                    "8540.25",
                    "MTB REGULAR SAVINGS",
                    "00012",
                    "3.5000",
                    "2023-08-23",
                    10,
                ),
            },
            SampleAccount {
                summary: AccountSummary {
                    account_number: "1311003456789".to_string(),
                    masked_account: "131100***6789".to_string(),
                },
                pin: "9012",
                mobile: "01712345678",
                record: sample_record(
                    "1311003456789",
                    "25480.50",
                    "MTB REGULAR SAVINGS",
                    "00034",
                    "3.5000",
                    "2023-01-05",
                    5,
                ),
            },
        ];

        let by_number = accounts
            .iter()
            .enumerate()
            .map(|(i, account)| (account.summary.account_number.clone(), i))
            .collect();

        info!(count = accounts.len(), "Initialized mock banking API");
        Self {
            accounts,
            by_number,
            pin_attempts: AtomicU64::new(0),
            directory_lookups: AtomicU64::new(0),
        }
    }

    /// Number of PIN verification calls made so far
    pub fn pin_attempts(&self) -> u64 {
        self.pin_attempts.load(Ordering::SeqCst)
    }

    /// Number of directory lookups made so far
    pub fn directory_lookups(&self) -> u64 {
        self.directory_lookups.load(Ordering::SeqCst)
    }
}

impl Default for MockBankingApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BankingApi for MockBankingApi {
    async fn accounts_by_mobile(
        &self,
        mobile_number: &str,
        _call_id: Option<&str>,
    ) -> Result<DirectoryLookup> {
        self.directory_lookups.fetch_add(1, Ordering::SeqCst);
        let mobile = normalize_mobile_number(mobile_number);
        debug!(mobile = mobile.as_str(), "Looking up accounts for mobile number");

        let accounts: Vec<AccountSummary> = self
            .accounts
            .iter()
            .filter(|account| account.mobile == mobile)
            .map(|account| account.summary.clone())
            .collect();

        if accounts.is_empty() {
            Ok(DirectoryLookup {
                found: false,
                message: "No accounts found for this mobile number".to_string(),
                accounts,
            })
        } else {
            Ok(DirectoryLookup {
                found: true,
                message: format!("Found {} accounts", accounts.len()),
                accounts,
            })
        }
    }

    async fn verify_pin(
        &self,
        account_number: &str,
        pin: &str,
        _mobile_number: Option<&str>,
        _call_id: Option<&str>,
    ) -> Result<PinVerification> {
        self.pin_attempts.fetch_add(1, Ordering::SeqCst);
        debug!(account_number, "Verifying PIN");

        let valid = self
            .by_number
            .get(account_number)
            .map(|&i| self.accounts[i].pin == pin)
            .unwrap_or(false);

        Ok(PinVerification {
            valid,
            reason: if valid { "NA".to_string() } else { "Invalid PIN".to_string() },
        })
    }

    async fn account_details(
        &self,
        account_number: &str,
        _mobile_number: Option<&str>,
        _call_id: Option<&str>,
    ) -> Result<Option<AccountRecord>> {
        debug!(account_number, "Fetching account details");
        Ok(self
            .by_number
            .get(account_number)
            .map(|&i| self.accounts[i].record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_lookup_finds_sample_accounts() {
        let api = MockBankingApi::new();
        let lookup = api.accounts_by_mobile("01712345678", None).await.unwrap();
        assert!(lookup.found);
        assert_eq!(lookup.accounts.len(), 3);
        assert_eq!(lookup.accounts[0].masked_account, "131100***5678");
    }

    #[tokio::test]
    async fn test_directory_lookup_empty_is_a_status() {
        let api = MockBankingApi::new();
        let lookup = api.accounts_by_mobile("01900000000", None).await.unwrap();
        assert!(!lookup.found);
        assert!(lookup.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_pin_verification() {
        let api = MockBankingApi::new();
        assert!(api.verify_pin("1311002345678", "1234", None, None).await.unwrap().valid);
        assert!(!api.verify_pin("1311002345678", "0000", None, None).await.unwrap().valid);
        assert_eq!(api.pin_attempts(), 2);
    }

    #[tokio::test]
    async fn test_account_details_not_found_is_none() {
        let api = MockBankingApi::new();
        assert!(api.account_details("9999999999999", None, None).await.unwrap().is_none());
        let record = api.account_details("1311002345678", None, None).await.unwrap().unwrap();
        assert_eq!(record.currency_code, "BDT");
        assert_eq!(record.current_balance.trim(), "1250.75");
    }
}
