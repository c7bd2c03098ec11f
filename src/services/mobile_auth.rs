//! Mobile-auth service: the account directory keyed by mobile number

use super::{definitions, optional_str_arg, require_str_arg, Service};
use crate::backend::BankingApi;
use crate::error::AssistantError;
use crate::models::ToolDefinition;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Service for mobile-based authentication operations
pub struct MobileAuthService {
    api: Arc<dyn BankingApi>,
    tools: Vec<ToolDefinition>,
}

impl MobileAuthService {
    pub fn new(api: Arc<dyn BankingApi>) -> Self {
        info!("Mobile authentication service initialized");
        Self {
            api,
            tools: definitions::mobile_auth_tools(),
        }
    }

    pub async fn get_accounts_by_mobile(
        &self,
        mobile_number: &str,
        call_id: Option<&str>,
    ) -> Result<Value> {
        info!(mobile_number, ?call_id, "Looking up accounts for mobile");
        let lookup = self.api.accounts_by_mobile(mobile_number, call_id).await?;

        if lookup.found {
            info!(count = lookup.accounts.len(), "Found accounts for mobile");
            Ok(json!({
                "status": "success",
                "message": format!("Found {} accounts", lookup.accounts.len()),
                "accounts": lookup.accounts,
            }))
        } else {
            warn!(mobile_number, "No accounts found for mobile");
            Ok(json!({
                "status": "error",
                "message": lookup.message,
                "accounts": [],
            }))
        }
    }
}

#[async_trait::async_trait]
impl Service for MobileAuthService {
    fn domain(&self) -> &'static str {
        "mobile_auth"
    }

    fn supported_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    async fn execute_tool(&self, tool_name: &str, args: &Value) -> Result<Value> {
        match tool_name {
            "get_accounts_by_mobile" => {
                let mobile_number = require_str_arg(args, "mobile_number")?;
                let call_id = optional_str_arg(args, "call_id");
                self.get_accounts_by_mobile(mobile_number, call_id).await
            }
            other => Err(AssistantError::NotFound(format!(
                "Unknown mobile auth tool: {}",
                other
            ))),
        }
    }
}
