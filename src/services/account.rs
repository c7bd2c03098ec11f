//! Account service: details, field lookups, currency and type metadata
//!
//! The currency and account-type accessors are table lookups, not remote
//! calls, and pass unrecognized codes through as "unknown".

use super::{definitions, optional_str_arg, require_str_arg, validation, Service};
use crate::backend::BankingApi;
use crate::error::AssistantError;
use crate::models::ToolDefinition;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Group the integer digits of an amount with thousands separators
fn format_amount(value: f64) -> String {
    let formatted = format!("{:.2}", value);
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}.{}", sign, grouped, frac_part)
}

fn format_balance(symbol: &str, raw_balance: &str) -> String {
    match raw_balance.trim().parse::<f64>() {
        Ok(value) => format!("{}{}", symbol, format_amount(value)),
        Err(_) => format!("{}{}", symbol, raw_balance.trim()),
    }
}

/// Service for account-related operations
pub struct AccountService {
    api: Arc<dyn BankingApi>,
    tools: Vec<ToolDefinition>,
}

impl AccountService {
    pub fn new(api: Arc<dyn BankingApi>) -> Self {
        info!("Account service initialized");
        Self {
            api,
            tools: definitions::account_tools(),
        }
    }

    /// Currency metadata; unrecognized codes pass through
    pub fn currency_details(currency_code: &str) -> Value {
        match currency_code {
            "BDT" => json!({
                "status": "success",
                "name": "Bangladeshi Taka",
                "symbol": "৳",
                "code": "BDT"
            }),
            "USD" => json!({
                "status": "success",
                "name": "US Dollar",
                "symbol": "$",
                "code": "USD"
            }),
            "EUR" => json!({
                "status": "success",
                "name": "Euro",
                "symbol": "€",
                "code": "EUR"
            }),
            other => json!({
                "status": "success",
                "name": other,
                "symbol": other,
                "code": other
            }),
        }
    }

    /// Account-type metadata; unrecognized types pass through as unknown
    pub fn account_type_details(account_type: &str) -> Value {
        match account_type {
            "SB" => json!({
                "status": "success",
                "name": "Savings Account",
                "daily_withdrawal_limit": 50000,
                "monthly_fee": 0.00,
                "interest_rate": 3.5,
                "features": ["Debit Card", "Online Banking", "Mobile Banking"]
            }),
            "CA" => json!({
                "status": "success",
                "name": "Current Account",
                "daily_withdrawal_limit": 100000,
                "monthly_fee": 10.00,
                "interest_rate": 0.0,
                "features": ["Checkbook", "Overdraft", "Online Banking"]
            }),
            "TD" => json!({
                "status": "success",
                "name": "Time Deposit",
                "daily_withdrawal_limit": 0,
                "monthly_fee": 0.00,
                "interest_rate": 6.5,
                "features": ["Fixed Tenure", "Higher Interest"]
            }),
            other => json!({
                "status": "success",
                "name": format!("Unknown Account Type ({})", other),
                "daily_withdrawal_limit": 0,
                "monthly_fee": 0.00,
                "interest_rate": 0.0,
                "features": []
            }),
        }
    }

    async fn get_account_details(
        &self,
        account_number: &str,
        pin: &str,
        mobile_number: Option<&str>,
    ) -> Result<Value> {
        let pin_result = validation::validate_pin(&*self.api, account_number, pin, mobile_number).await?;
        if pin_result["valid"] != true {
            warn!(account_number, "Invalid credentials for account");
            return Ok(json!({"status": "error", "message": "Invalid credentials"}));
        }

        let record = self
            .api
            .account_details(account_number, mobile_number, None)
            .await?;
        let record = match record {
            Some(record) => record,
            None => {
                warn!(account_number, "Account not found");
                return Ok(json!({"status": "error", "message": "Account not found"}));
            }
        };

        let currency_details = Self::currency_details(&record.currency_code);
        let symbol = currency_details["symbol"]
            .as_str()
            .unwrap_or(&record.currency_code)
            .to_string();
        let formatted_balance = format_balance(&symbol, &record.current_balance);
        let balance: f64 = record.current_balance.trim().parse().unwrap_or(0.0);
        let account_features = Self::account_type_details(&record.product_type);

        info!(
            account_number,
            balance = formatted_balance.as_str(),
            "Account details retrieved"
        );

        Ok(json!({
            "status": "success",
            "data": {
                "balance": balance,
                "formatted_balance": formatted_balance,
                "currency": record.currency_code,
                "account_type": record.product_type,
                "account_holder": record.acc_name,
                "account_status": record.acc_status,
                "last_transaction": record.last_txn_date,
                "account_features": account_features,
                "currency_details": currency_details,
            }
        }))
    }

    async fn get_account_field(&self, account_number: &str, field_name: &str) -> Result<Value> {
        let record = self.api.account_details(account_number, None, None).await?;
        let record = match record {
            Some(record) => record,
            None => return Ok(json!({"status": "error", "message": "Account not found"})),
        };

        let value = match field_name {
            "balance" => {
                let currency = Self::currency_details(&record.currency_code);
                let symbol = currency["symbol"]
                    .as_str()
                    .unwrap_or(&record.currency_code)
                    .to_string();
                format_balance(&symbol, &record.current_balance)
            }
            "account_status" => record.acc_status.clone(),
            "currency" => record.currency_code.clone(),
            "account_type" => record.product_type.clone(),
            "last_transaction" => record.last_txn_date.clone(),
            other => {
                return Ok(json!({
                    "status": "error",
                    "message": format!("Field '{}' not found", other)
                }))
            }
        };

        Ok(json!({"status": "success", "value": value}))
    }
}

#[async_trait::async_trait]
impl Service for AccountService {
    fn domain(&self) -> &'static str {
        "account"
    }

    fn supported_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    async fn execute_tool(&self, tool_name: &str, args: &Value) -> Result<Value> {
        match tool_name {
            "get_account_details" => {
                let account_number = require_str_arg(args, "account_number")?;
                let pin = require_str_arg(args, "pin")?;
                let mobile = optional_str_arg(args, "mobile_number");
                self.get_account_details(account_number, pin, mobile).await
            }
            "get_account_field" => {
                let account_number = require_str_arg(args, "account_number")?;
                let field_name = require_str_arg(args, "field_name")?;
                self.get_account_field(account_number, field_name).await
            }
            "get_currency_details" => {
                let currency_code = require_str_arg(args, "currency_code")?;
                Ok(Self::currency_details(currency_code))
            }
            "get_account_type_details" => {
                let account_type = require_str_arg(args, "account_type")?;
                Ok(Self::account_type_details(account_type))
            }
            other => Err(AssistantError::NotFound(format!(
                "Unknown account tool: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBankingApi;

    fn service() -> AccountService {
        AccountService::new(Arc::new(MockBankingApi::new()))
    }

    #[test]
    fn test_format_amount_groups_thousands() {
        assert_eq!(format_amount(1250.75), "1,250.75");
        assert_eq!(format_amount(8540.25), "8,540.25");
        assert_eq!(format_amount(999.5), "999.50");
        assert_eq!(format_amount(1234567.0), "1,234,567.00");
    }

    #[tokio::test]
    async fn test_details_require_valid_pin() {
        let service = service();
        let result = service
            .get_account_details("1311002345678", "0000", None)
            .await
            .unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_details_include_all_fields() {
        let service = service();
        let result = service
            .get_account_details("1311002345678", "1234", None)
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
        let data = &result["data"];
        assert_eq!(data["currency"], "BDT");
        assert_eq!(data["account_status"], "OPERATIVE");
        assert_eq!(data["formatted_balance"], "৳1,250.75");
        assert_eq!(data["account_holder"], "AHMED RAHMAN");
        assert_eq!(data["currency_details"]["name"], "Bangladeshi Taka");
    }

    #[tokio::test]
    async fn test_field_lookup_and_unknown_field() {
        let service = service();
        let result = service
            .get_account_field("1311002345678", "currency")
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["value"], "BDT");

        let result = service
            .get_account_field("1311002345678", "favorite_color")
            .await
            .unwrap();
        assert_eq!(result["status"], "error");
    }

    #[test]
    fn test_unknown_currency_passes_through() {
        let details = AccountService::currency_details("JPY");
        assert_eq!(details["name"], "JPY");
        assert_eq!(details["symbol"], "JPY");
    }

    #[test]
    fn test_unknown_account_type_passes_through() {
        let details = AccountService::account_type_details("XX");
        assert_eq!(details["name"], "Unknown Account Type (XX)");
    }
}
