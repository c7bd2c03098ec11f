//! HTTP client for the core banking middleware
//!
//! Speaks the middleware's envelope protocol: every endpoint is a GET with a
//! shared secret and connection name in the query string, and responds with
//! a `status.gstatus` flag plus a `response` payload. PINs are redacted from
//! every log line.

use super::{normalize_mobile_number, BankingApi};
use crate::error::AssistantError;
use crate::models::{AccountRecord, AccountSummary, DirectoryLookup, PinVerification};
use crate::Result;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
struct Envelope {
    status: EnvelopeStatus,
    #[serde(default)]
    response: Value,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    gstatus: bool,
    #[serde(default)]
    gmmsg: String,
}

/// Client for the real banking middleware
pub struct HttpBankingApi {
    client: Client,
    base_url: String,
    api_secret: String,
}

impl HttpBankingApi {
    pub fn new(base_url: impl Into<String>, api_secret: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        let base_url = base_url.into();
        info!(base_url = base_url.as_str(), "Initialized banking middleware client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_secret: api_secret.into(),
        }
    }

    fn fallback_call_id() -> String {
        Utc::now().timestamp_micros().to_string()
    }

    async fn get_envelope(&self, path: &str, params: &[(&str, &str)]) -> Result<Envelope> {
        let url = format!("{}{}", self.base_url, path);

        let redacted: Vec<(&str, &str)> = params
            .iter()
            .map(|&(k, v)| if k == "crp" { (k, "****") } else { (k, v) })
            .collect();
        debug!(path, params = ?redacted, "Calling banking middleware");

        // Strip the URL from transport errors so the shared secret in the
        // query string can never leak into logs or error text.
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!(path, error = %e, "Banking middleware request failed");
                AssistantError::Backend(format!("Middleware request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let envelope = response.json::<Envelope>().await.map_err(|e| {
            AssistantError::Backend(format!(
                "Invalid middleware response for {}: {}",
                path,
                e.without_url()
            ))
        })?;

        if !status.is_success() {
            return Err(AssistantError::Backend(format!(
                "Middleware returned {} for {}",
                status, path
            )));
        }

        Ok(envelope)
    }
}

#[async_trait::async_trait]
impl BankingApi for HttpBankingApi {
    async fn accounts_by_mobile(
        &self,
        mobile_number: &str,
        call_id: Option<&str>,
    ) -> Result<DirectoryLookup> {
        let mobile = normalize_mobile_number(mobile_number);
        let call_id = call_id
            .map(str::to_string)
            .unwrap_or_else(Self::fallback_call_id);

        info!(mobile = mobile.as_str(), "Looking up accounts for mobile number");

        let envelope = self
            .get_envelope(
                "/account/account-info-by-mobile-no",
                &[
                    ("secret", self.api_secret.as_str()),
                    ("rm", "I"),
                    ("callid", call_id.as_str()),
                    ("connname", "MWSEIBMN"),
                    ("cli", mobile.as_str()),
                ],
            )
            .await?;

        if !envelope.status.gstatus {
            return Ok(DirectoryLookup {
                found: false,
                message: if envelope.status.gmmsg.is_empty() {
                    "No accounts found for this mobile number".to_string()
                } else {
                    envelope.status.gmmsg
                },
                accounts: Vec::new(),
            });
        }

        let accounts: Vec<AccountSummary> = envelope
            .response
            .get("responseData")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let key = row.get("key")?.as_str()?;
                        let value = row.get("value")?.as_str()?;
                        Some(AccountSummary {
                            account_number: key.to_string(),
                            masked_account: value.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(DirectoryLookup {
            found: !accounts.is_empty(),
            message: format!("Found {} accounts", accounts.len()),
            accounts,
        })
    }

    async fn verify_pin(
        &self,
        account_number: &str,
        pin: &str,
        mobile_number: Option<&str>,
        call_id: Option<&str>,
    ) -> Result<PinVerification> {
        let call_id = call_id
            .map(str::to_string)
            .unwrap_or_else(Self::fallback_call_id);
        let mobile = mobile_number.unwrap_or("unknown");

        info!(account_number, "Verifying PIN via middleware");

        let envelope = self
            .get_envelope(
                "/card/verify-tpin",
                &[
                    ("secret", self.api_secret.as_str()),
                    ("rm", "I"),
                    ("callid", call_id.as_str()),
                    ("connname", "MWVRFTPN"),
                    ("cli", mobile),
                    ("ccn", account_number),
                    ("crp", pin),
                ],
            )
            .await?;

        let verified = envelope.status.gstatus
            && envelope
                .response
                .get("Status")
                .and_then(Value::as_str)
                .map(|s| s == "Successfull")
                .unwrap_or(false);

        let reason = envelope
            .response
            .get("Reason")
            .and_then(Value::as_str)
            .unwrap_or(if verified { "NA" } else { "Invalid PIN" })
            .to_string();

        Ok(PinVerification {
            valid: verified,
            reason,
        })
    }

    async fn account_details(
        &self,
        account_number: &str,
        mobile_number: Option<&str>,
        call_id: Option<&str>,
    ) -> Result<Option<AccountRecord>> {
        let call_id = call_id
            .map(str::to_string)
            .unwrap_or_else(Self::fallback_call_id);
        let mobile = mobile_number.unwrap_or("unknown");
        let ref_no = format!(
            "{}AHw{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            10 + Utc::now().timestamp() % 90
        );

        info!(account_number, "Fetching account details via middleware");

        let envelope = self
            .get_envelope(
                "/account/common-api-function",
                &[
                    ("secret", self.api_secret.as_str()),
                    ("rm", "I"),
                    ("callid", call_id.as_str()),
                    ("connname", "MWSADART"),
                    ("cli", mobile),
                    ("acc", account_number),
                    ("channelId", "102"),
                    ("refNo", ref_no.as_str()),
                ],
            )
            .await?;

        if !envelope.status.gstatus {
            return Ok(None);
        }

        let record = envelope
            .response
            .get("responseData")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .cloned();

        match record {
            Some(row) => {
                let parsed: AccountRecord = serde_json::from_value(row).map_err(|e| {
                    AssistantError::Backend(format!("Malformed account record: {}", e))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_deserialization() {
        let json = r#"{
            "status": {"gmsg": "OK", "gstatus": true, "gcode": 200, "gmcode": "2000", "gmmsg": "ok"},
            "response": {"responseData": [{"key": "1311002345678", "value": "131100***5678"}]}
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert!(envelope.status.gstatus);
        assert_eq!(
            envelope.response["responseData"][0]["key"],
            "1311002345678"
        );
    }

    #[test]
    fn test_envelope_tolerates_missing_response() {
        let json = r#"{"status": {"gstatus": false, "gmmsg": "No accounts found"}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert!(!envelope.status.gstatus);
        assert_eq!(envelope.status.gmmsg, "No accounts found");
    }
}
