//! Service layer and tool dispatch
//!
//! Each backend domain (account, authentication, mobile-auth) is a `Service`
//! exposing named tools. The registry resolves a tool name to the owning
//! service and dispatches the call.

pub mod account;
pub mod auth;
pub mod definitions;
pub mod mobile_auth;
mod validation;

pub use account::AccountService;
pub use auth::AuthenticationService;
pub use mobile_auth::MobileAuthService;

use crate::error::AssistantError;
use crate::models::ToolDefinition;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// A backend service exposing a set of callable tools
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    fn domain(&self) -> &'static str;
    fn supported_tools(&self) -> &[ToolDefinition];
    async fn execute_tool(&self, tool_name: &str, args: &Value) -> Result<Value>;
}

/// Registry for all service implementations in the system.
/// Built once at startup; read-only afterwards.
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    pub fn register_service(&mut self, service: Arc<dyn Service>) {
        info!(domain = service.domain(), "Registered service");
        self.services.push(service);
    }

    pub fn get_service(&self, domain: &str) -> Option<Arc<dyn Service>> {
        self.services
            .iter()
            .find(|service| service.domain() == domain)
            .cloned()
    }

    pub fn domains(&self) -> Vec<&'static str> {
        self.services.iter().map(|service| service.domain()).collect()
    }

    /// All tool definitions across every registered service
    pub fn all_tools(&self) -> Vec<ToolDefinition> {
        self.services
            .iter()
            .flat_map(|service| service.supported_tools().iter().cloned())
            .collect()
    }

    /// Tool definitions for a subset of domains, in registration order
    pub fn tools_for_domains(&self, domains: &[String]) -> Vec<ToolDefinition> {
        self.services
            .iter()
            .filter(|service| domains.iter().any(|d| d == service.domain()))
            .flat_map(|service| service.supported_tools().iter().cloned())
            .collect()
    }

    /// Execute a tool by name across all services.
    /// Fails with `NotFound` when no service supports the name.
    pub async fn execute_tool(&self, tool_name: &str, args: &Value) -> Result<Value> {
        for service in &self.services {
            if service
                .supported_tools()
                .iter()
                .any(|tool| tool.name() == tool_name)
            {
                info!(tool_name, domain = service.domain(), "Executing tool");
                return service.execute_tool(tool_name, args).await;
            }
        }

        error!(tool_name, "No service found with tool");
        Err(AssistantError::NotFound(format!(
            "Tool not found: {}",
            tool_name
        )))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the standard registry over a banking API client
pub fn create_default_registry(api: Arc<dyn crate::backend::BankingApi>) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register_service(Arc::new(AccountService::new(api.clone())));
    registry.register_service(Arc::new(AuthenticationService::new(api.clone())));
    registry.register_service(Arc::new(MobileAuthService::new(api)));
    registry
}

/// Pull a required string argument out of a tool-args object
pub(crate) fn require_str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name).and_then(Value::as_str).ok_or_else(|| {
        AssistantError::InvalidToolInput(format!("Expected '{}' in tool arguments", name))
    })
}

pub(crate) fn optional_str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBankingApi;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = create_default_registry(Arc::new(MockBankingApi::new()));
        let result = registry.execute_tool("transfer_funds", &json!({})).await;
        assert!(matches!(result, Err(AssistantError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_owning_service() {
        let registry = create_default_registry(Arc::new(MockBankingApi::new()));
        let result = registry
            .execute_tool(
                "get_accounts_by_mobile",
                &json!({"mobile_number": "01712345678"}),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
    }

    #[test]
    fn test_all_tools_covers_every_domain() {
        let registry = create_default_registry(Arc::new(MockBankingApi::new()));
        let names: Vec<String> = registry
            .all_tools()
            .iter()
            .map(|tool| tool.name().to_string())
            .collect();
        for expected in [
            "validate_account",
            "validate_pin",
            "get_account_details",
            "get_account_field",
            "get_currency_details",
            "get_account_type_details",
            "get_accounts_by_mobile",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }
}
