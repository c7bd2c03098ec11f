//! Centralized tool schemas advertised to the LLM
//!
//! One place for every function-calling definition so the services and the
//! registry stay consistent about names and parameters.

use crate::models::ToolDefinition;
use serde_json::json;

pub fn auth_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "validate_account",
            "Validates if an account number exists in the system",
            json!({
                "type": "object",
                "properties": {
                    "account_number": {
                        "type": "string",
                        "description": "The account number to validate"
                    },
                    "mobile_number": {
                        "type": "string",
                        "description": "Optional mobile number for additional validation"
                    }
                },
                "required": ["account_number"]
            }),
        ),
        ToolDefinition::function(
            "validate_pin",
            "Validates if the PIN is correct for the given account number",
            json!({
                "type": "object",
                "properties": {
                    "account_number": {
                        "type": "string",
                        "description": "The account number"
                    },
                    "pin": {
                        "type": "string",
                        "description": "The PIN to validate"
                    },
                    "mobile_number": {
                        "type": "string",
                        "description": "Optional mobile number for additional validation"
                    }
                },
                "required": ["account_number", "pin"]
            }),
        ),
    ]
}

pub fn account_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "get_account_details",
            "Get detailed information about an account",
            json!({
                "type": "object",
                "properties": {
                    "account_number": {
                        "type": "string",
                        "description": "The account number"
                    },
                    "pin": {
                        "type": "string",
                        "description": "The PIN for the account"
                    },
                    "mobile_number": {
                        "type": "string",
                        "description": "Optional mobile number for additional validation"
                    }
                },
                "required": ["account_number", "pin"]
            }),
        ),
        ToolDefinition::function(
            "get_account_field",
            "Get a specific field from an authenticated account",
            json!({
                "type": "object",
                "properties": {
                    "account_number": {
                        "type": "string",
                        "description": "The account number"
                    },
                    "field_name": {
                        "type": "string",
                        "description": "The field to retrieve (e.g., balance, last_transaction, account_status)"
                    }
                },
                "required": ["account_number", "field_name"]
            }),
        ),
        ToolDefinition::function(
            "get_currency_details",
            "Get details about a currency",
            json!({
                "type": "object",
                "properties": {
                    "currency_code": {
                        "type": "string",
                        "description": "The currency code (e.g., USD, EUR)"
                    }
                },
                "required": ["currency_code"]
            }),
        ),
        ToolDefinition::function(
            "get_account_type_details",
            "Get details about an account type",
            json!({
                "type": "object",
                "properties": {
                    "account_type": {
                        "type": "string",
                        "description": "The account type (e.g., checking, savings)"
                    }
                },
                "required": ["account_type"]
            }),
        ),
    ]
}

pub fn mobile_auth_tools() -> Vec<ToolDefinition> {
    vec![ToolDefinition::function(
        "get_accounts_by_mobile",
        "Get account numbers associated with a mobile number",
        json!({
            "type": "object",
            "properties": {
                "mobile_number": {
                    "type": "string",
                    "description": "The mobile number to lookup accounts for"
                },
                "call_id": {
                    "type": "string",
                    "description": "Optional call ID for tracking purposes"
                }
            },
            "required": ["mobile_number"]
        }),
    )]
}
