//! Declarative service flows
//!
//! A flow is an immutable ordered list of steps executed against the service
//! registry. A step whose precondition fails is skipped and the flow
//! continues; a step whose postcondition fails, or whose tool call errors,
//! halts the flow. Flows are process-wide configuration, not session state.

use crate::error::AssistantError;
use crate::services::ServiceRegistry;
use crate::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

type Precondition = dyn Fn(&FlowContext) -> bool + Send + Sync;
type Postcondition = dyn Fn(&Value, &Value) -> bool + Send + Sync;
type ResultExtractor = dyn Fn(&Value, &Value) -> Vec<(String, Value)> + Send + Sync;

/// Mergeable key-value bag threaded through a flow
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    values: HashMap<String, Value>,
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn has_nonempty_str(&self, key: &str) -> bool {
        self.get_str(key).map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn merge(&mut self, extracted: Vec<(String, Value)>) {
        for (key, value) in extracted {
            self.values.insert(key, value);
        }
    }
}

/// Outcome status of a single flow step
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    ValidationFailed,
    Error,
}

/// Record of one step's execution
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final state of a flow execution: the merged context, the ordered list of
/// executed steps, and a per-step record map.
pub struct FlowOutcome {
    pub context: FlowContext,
    pub executed_steps: Vec<String>,
    pub results: HashMap<String, StepRecord>,
}

impl FlowOutcome {
    pub fn executed(&self, step_name: &str) -> bool {
        self.executed_steps.iter().any(|name| name == step_name)
    }

    pub fn step_result(&self, step_name: &str) -> Option<&Value> {
        self.results
            .get(step_name)
            .and_then(|record| record.result.as_ref())
    }
}

/// A single step in a service flow
pub struct FlowStep {
    name: String,
    tool_name: String,
    required_args: Vec<String>,
    optional_args: Vec<String>,
    precondition: Option<Box<Precondition>>,
    postcondition: Option<Box<Postcondition>>,
    extractor: Option<Box<ResultExtractor>>,
}

impl FlowStep {
    pub fn new(name: &str, tool_name: &str, required_args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tool_name: tool_name.to_string(),
            required_args: required_args.iter().map(|s| s.to_string()).collect(),
            optional_args: Vec::new(),
            precondition: None,
            postcondition: None,
            extractor: None,
        }
    }

    pub fn optional_args(mut self, args: &[&str]) -> Self {
        self.optional_args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn precondition<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.precondition = Some(Box::new(f));
        self
    }

    pub fn postcondition<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.postcondition = Some(Box::new(f));
        self
    }

    pub fn extract<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        self.extractor = Some(Box::new(f));
        self
    }

    /// True iff every required arg is present and the precondition holds
    pub fn can_execute(&self, context: &FlowContext) -> bool {
        if !self.required_args.iter().all(|arg| context.contains(arg)) {
            return false;
        }
        match &self.precondition {
            Some(precondition) => precondition(context),
            None => true,
        }
    }

    /// Copy required args verbatim and optional args when present; missing
    /// optional args are omitted, never defaulted.
    pub fn build_args(&self, context: &FlowContext) -> Value {
        let mut args = Map::new();
        for arg in &self.required_args {
            if let Some(value) = context.get(arg) {
                args.insert(arg.clone(), value.clone());
            }
        }
        for arg in &self.optional_args {
            if let Some(value) = context.get(arg) {
                args.insert(arg.clone(), value.clone());
            }
        }
        Value::Object(args)
    }

    fn validate_result(&self, args: &Value, result: &Value) -> bool {
        match &self.postcondition {
            Some(postcondition) => postcondition(args, result),
            None => true,
        }
    }

    fn process_result(&self, args: &Value, result: &Value) -> Vec<(String, Value)> {
        match &self.extractor {
            Some(extractor) => extractor(args, result),
            None => Vec::new(),
        }
    }
}

/// An ordered sequence of steps with skip/halt semantics
pub struct ServiceFlow {
    pub name: String,
    pub description: String,
    steps: Vec<FlowStep>,
}

impl ServiceFlow {
    pub fn new(name: &str, description: &str, steps: Vec<FlowStep>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            steps,
        }
    }

    pub async fn execute(
        &self,
        registry: &ServiceRegistry,
        initial_context: FlowContext,
    ) -> FlowOutcome {
        let mut context = initial_context;
        let mut executed_steps = Vec::new();
        let mut results = HashMap::new();

        info!(flow = self.name.as_str(), "Starting flow execution");

        for step in &self.steps {
            if !step.can_execute(&context) {
                info!(flow = self.name.as_str(), step = step.name.as_str(), "Skipping step");
                continue;
            }

            info!(flow = self.name.as_str(), step = step.name.as_str(), "Executing step");
            let args = step.build_args(&context);

            match registry.execute_tool(&step.tool_name, &args).await {
                Ok(result) => {
                    if !step.validate_result(&args, &result) {
                        warn!(
                            flow = self.name.as_str(),
                            step = step.name.as_str(),
                            "Step failed validation, stopping flow"
                        );
                        results.insert(
                            step.name.clone(),
                            StepRecord {
                                status: StepStatus::ValidationFailed,
                                result: Some(result),
                                error: None,
                            },
                        );
                        break;
                    }

                    let extracted = step.process_result(&args, &result);
                    results.insert(
                        step.name.clone(),
                        StepRecord {
                            status: StepStatus::Success,
                            result: Some(result),
                            error: None,
                        },
                    );
                    context.merge(extracted);
                    executed_steps.push(step.name.clone());
                }
                Err(e) => {
                    error!(
                        flow = self.name.as_str(),
                        step = step.name.as_str(),
                        error = %e,
                        "Error executing step"
                    );
                    results.insert(
                        step.name.clone(),
                        StepRecord {
                            status: StepStatus::Error,
                            result: None,
                            error: Some(e.to_string()),
                        },
                    );
                    break;
                }
            }
        }

        info!(
            flow = self.name.as_str(),
            steps = executed_steps.len(),
            "Flow completed"
        );

        FlowOutcome {
            context,
            executed_steps,
            results,
        }
    }
}

/// Manages and executes registered service flows
pub struct FlowManager {
    registry: Arc<ServiceRegistry>,
    flows: HashMap<String, ServiceFlow>,
}

impl FlowManager {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        let mut manager = Self {
            registry,
            flows: HashMap::new(),
        };
        manager.register_standard_flows();
        manager
    }

    pub fn register_flow(&mut self, flow: ServiceFlow) {
        info!(flow = flow.name.as_str(), "Registered flow");
        self.flows.insert(flow.name.clone(), flow);
    }

    pub async fn execute_flow(&self, flow_name: &str, context: FlowContext) -> Result<FlowOutcome> {
        let flow = self.flows.get(flow_name).ok_or_else(|| {
            error!(flow = flow_name, "Flow not found");
            AssistantError::NotFound(format!("Flow not found: {}", flow_name))
        })?;
        Ok(flow.execute(&self.registry, context).await)
    }

    fn register_standard_flows(&mut self) {
        let auth_flow = ServiceFlow::new(
            "authentication",
            "Authenticate a user with account number and PIN",
            vec![
                FlowStep::new("validate_account", "validate_account", &["account_number"])
                    .optional_args(&["mobile_number"])
                    .extract(|_args, result| {
                        vec![(
                            "validate_account_valid".to_string(),
                            json!(result["valid"] == true),
                        )]
                    }),
                FlowStep::new("validate_pin", "validate_pin", &["account_number", "pin"])
                    .optional_args(&["mobile_number"])
                    .precondition(|ctx| {
                        ctx.get_bool("validate_account_valid") && !ctx.get_bool("validate_pin_valid")
                    })
                    .extract(|_args, result| {
                        vec![(
                            "validate_pin_valid".to_string(),
                            json!(result["valid"] == true),
                        )]
                    }),
                FlowStep::new(
                    "get_account_details",
                    "get_account_details",
                    &["account_number", "pin"],
                )
                .optional_args(&["mobile_number"])
                .precondition(|ctx| ctx.get_bool("validate_pin_valid")),
            ],
        );

        let account_query_flow = ServiceFlow::new(
            "account_query",
            "Query specific account information",
            vec![
                FlowStep::new(
                    "get_account_field",
                    "get_account_field",
                    &["account_number", "field_name"],
                )
                .extract(|args, result| {
                    let mut extracted = vec![
                        (
                            "get_account_field_status".to_string(),
                            result["status"].clone(),
                        ),
                        (
                            "field_value".to_string(),
                            result.get("value").cloned().unwrap_or(json!("")),
                        ),
                    ];
                    // Make the detail steps reachable for the matching field
                    if result["status"] == "success" {
                        if let Some(value) = result.get("value").cloned() {
                            match args.get("field_name").and_then(Value::as_str) {
                                Some("currency") => {
                                    extracted.push(("currency_code".to_string(), value))
                                }
                                Some("account_type") => {
                                    extracted.push(("account_type".to_string(), value))
                                }
                                _ => {}
                            }
                        }
                    }
                    extracted
                }),
                FlowStep::new(
                    "get_currency_details",
                    "get_currency_details",
                    &["currency_code"],
                )
                .precondition(|ctx| {
                    ctx.get_str("field_name") == Some("currency")
                        && ctx.get_str("get_account_field_status") == Some("success")
                        && ctx.has_nonempty_str("field_value")
                }),
                FlowStep::new(
                    "get_account_type_details",
                    "get_account_type_details",
                    &["account_type"],
                )
                .precondition(|ctx| {
                    ctx.get_str("field_name") == Some("account_type")
                        && ctx.get_str("get_account_field_status") == Some("success")
                        && ctx.has_nonempty_str("field_value")
                }),
            ],
        );

        self.register_flow(auth_flow);
        self.register_flow(account_query_flow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBankingApi;
    use crate::services::create_default_registry;

    fn manager() -> FlowManager {
        let registry = Arc::new(create_default_registry(Arc::new(MockBankingApi::new())));
        FlowManager::new(registry)
    }

    #[tokio::test]
    async fn test_unknown_flow_is_not_found() {
        let manager = manager();
        let result = manager.execute_flow("transfer", FlowContext::new()).await;
        assert!(matches!(result, Err(AssistantError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_required_arg_skips_step() {
        let manager = manager();
        let context = FlowContext::new().with("account_number", json!("1311002345678"));
        let outcome = manager.execute_flow("authentication", context).await.unwrap();

        // No pin in context: validate_pin and get_account_details skip
        assert_eq!(outcome.executed_steps, vec!["validate_account"]);
        assert!(outcome.context.get_bool("validate_account_valid"));
    }

    #[tokio::test]
    async fn test_full_authentication_flow() {
        let manager = manager();
        let context = FlowContext::new()
            .with("account_number", json!("1311002345678"))
            .with("pin", json!("1234"));
        let outcome = manager.execute_flow("authentication", context).await.unwrap();

        assert_eq!(
            outcome.executed_steps,
            vec!["validate_account", "validate_pin", "get_account_details"]
        );
        let details = outcome.step_result("get_account_details").unwrap();
        assert_eq!(details["status"], "success");
    }

    #[tokio::test]
    async fn test_wrong_pin_blocks_details_step() {
        let manager = manager();
        let context = FlowContext::new()
            .with("account_number", json!("1311002345678"))
            .with("pin", json!("0000"));
        let outcome = manager.execute_flow("authentication", context).await.unwrap();

        assert_eq!(outcome.executed_steps, vec!["validate_account", "validate_pin"]);
        assert!(!outcome.context.get_bool("validate_pin_valid"));
        assert!(!outcome.executed("get_account_details"));
    }

    #[tokio::test]
    async fn test_currency_query_chains_detail_step() {
        let manager = manager();
        let context = FlowContext::new()
            .with("account_number", json!("1311002345678"))
            .with("field_name", json!("currency"));
        let outcome = manager.execute_flow("account_query", context).await.unwrap();

        assert_eq!(
            outcome.executed_steps,
            vec!["get_account_field", "get_currency_details"]
        );
        let currency = outcome.step_result("get_currency_details").unwrap();
        assert_eq!(currency["name"], "Bangladeshi Taka");
    }

    #[tokio::test]
    async fn test_balance_query_skips_detail_steps() {
        let manager = manager();
        let context = FlowContext::new()
            .with("account_number", json!("1311002345678"))
            .with("field_name", json!("balance"));
        let outcome = manager.execute_flow("account_query", context).await.unwrap();

        assert_eq!(outcome.executed_steps, vec!["get_account_field"]);
        let field = outcome.step_result("get_account_field").unwrap();
        assert_eq!(field["value"], "৳1,250.75");
    }

    #[tokio::test]
    async fn test_postcondition_failure_halts_flow() {
        let registry = Arc::new(create_default_registry(Arc::new(MockBankingApi::new())));
        let mut manager = FlowManager::new(registry);
        manager.register_flow(ServiceFlow::new(
            "strict_lookup",
            "Field lookup that requires success",
            vec![
                FlowStep::new(
                    "get_account_field",
                    "get_account_field",
                    &["account_number", "field_name"],
                )
                .postcondition(|_args, result| result["status"] == "success"),
                FlowStep::new(
                    "get_currency_details",
                    "get_currency_details",
                    &["currency_code"],
                ),
            ],
        ));

        let context = FlowContext::new()
            .with("account_number", json!("9999999999999"))
            .with("field_name", json!("balance"))
            .with("currency_code", json!("BDT"));
        let outcome = manager.execute_flow("strict_lookup", context).await.unwrap();

        assert!(outcome.executed_steps.is_empty());
        let record = outcome.results.get("get_account_field").unwrap();
        assert_eq!(record.status, StepStatus::ValidationFailed);
        assert!(!outcome.results.contains_key("get_currency_details"));
    }

    #[tokio::test]
    async fn test_tool_error_halts_flow() {
        let registry = Arc::new(create_default_registry(Arc::new(MockBankingApi::new())));
        let mut manager = FlowManager::new(registry);
        manager.register_flow(ServiceFlow::new(
            "broken",
            "Flow referencing an unregistered tool",
            vec![
                FlowStep::new("missing", "no_such_tool", &[]),
                FlowStep::new(
                    "get_currency_details",
                    "get_currency_details",
                    &["currency_code"],
                ),
            ],
        ));

        let context = FlowContext::new().with("currency_code", json!("BDT"));
        let outcome = manager.execute_flow("broken", context).await.unwrap();

        let record = outcome.results.get("missing").unwrap();
        assert_eq!(record.status, StepStatus::Error);
        assert!(outcome.executed_steps.is_empty());
    }
}
