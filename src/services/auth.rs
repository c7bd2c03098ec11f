//! Authentication service: account and PIN validation tools

use super::{definitions, optional_str_arg, require_str_arg, validation, Service};
use crate::backend::BankingApi;
use crate::error::AssistantError;
use crate::models::ToolDefinition;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Service for authentication operations
pub struct AuthenticationService {
    api: Arc<dyn BankingApi>,
    tools: Vec<ToolDefinition>,
}

impl AuthenticationService {
    pub fn new(api: Arc<dyn BankingApi>) -> Self {
        info!("Authentication service initialized");
        Self {
            api,
            tools: definitions::auth_tools(),
        }
    }
}

#[async_trait::async_trait]
impl Service for AuthenticationService {
    fn domain(&self) -> &'static str {
        "authentication"
    }

    fn supported_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    async fn execute_tool(&self, tool_name: &str, args: &Value) -> Result<Value> {
        match tool_name {
            "validate_account" => {
                let account_number = require_str_arg(args, "account_number")?;
                let mobile = optional_str_arg(args, "mobile_number");
                validation::validate_account(&*self.api, account_number, mobile).await
            }
            "validate_pin" => {
                let account_number = require_str_arg(args, "account_number")?;
                let pin = require_str_arg(args, "pin")?;
                let mobile = optional_str_arg(args, "mobile_number");
                validation::validate_pin(&*self.api, account_number, pin, mobile).await
            }
            other => Err(AssistantError::NotFound(format!(
                "Unknown authentication tool: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBankingApi;
    use serde_json::json;

    #[tokio::test]
    async fn test_validate_account_reports_status() {
        let service = AuthenticationService::new(Arc::new(MockBankingApi::new()));
        let result = service
            .execute_tool(
                "validate_account",
                &json!({"account_number": "1311002345678"}),
            )
            .await
            .unwrap();
        assert_eq!(result["valid"], true);
        assert_eq!(result["account_status"], "OPERATIVE");
    }

    #[tokio::test]
    async fn test_missing_argument_is_invalid_input() {
        let service = AuthenticationService::new(Arc::new(MockBankingApi::new()));
        let result = service
            .execute_tool("validate_pin", &json!({"account_number": "1311002345678"}))
            .await;
        assert!(matches!(result, Err(AssistantError::InvalidToolInput(_))));
    }
}
