//! Domain prompt loading and composition
//!
//! System-prompt fragments live in JSON files, one per service domain, and
//! are composed into the conversation's initial system turn. Falls back to a
//! built-in prompt when nothing loads.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Manages domain-specific prompts for the chatbot
pub struct PromptManager {
    config_dir: PathBuf,
    domain_prompts: HashMap<String, String>,
}

impl PromptManager {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        let mut manager = Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            domain_prompts: HashMap::new(),
        };
        manager.load_domain_prompts();
        manager
    }

    fn load_domain_prompts(&mut self) {
        info!(dir = %self.config_dir.display(), "Loading domain prompts");

        let entries = match fs::read_dir(&self.config_dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(dir = %self.config_dir.display(), "Prompt config directory not found");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            let domain = stem.strip_suffix("_prompt").unwrap_or(stem).to_string();

            match fs::read_to_string(&path).ok().and_then(|text| {
                serde_json::from_str::<Value>(&text).ok()
            }) {
                Some(config) => {
                    let prompt = config
                        .get("content")
                        .or_else(|| config.get("system_prompt"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();

                    if prompt.is_empty() {
                        warn!(path = %path.display(), "No prompt content found");
                    } else {
                        info!(domain = domain.as_str(), "Loaded domain prompt");
                        self.domain_prompts.insert(domain, prompt);
                    }
                }
                None => warn!(path = %path.display(), "Error loading prompt file"),
            }
        }
    }

    pub fn domain_prompt(&self, domain: &str) -> Option<&str> {
        let prompt = self.domain_prompts.get(domain).map(String::as_str);
        if prompt.is_none() {
            warn!(domain, "No prompt found for domain");
        }
        prompt
    }

    /// Compose a system prompt from multiple domains, falling back to the
    /// built-in prompt when none are available.
    pub fn compose_prompt(&self, domains: &[String]) -> String {
        let prompts: Vec<&str> = domains
            .iter()
            .filter_map(|domain| self.domain_prompts.get(domain).map(String::as_str))
            .collect();

        if prompts.is_empty() {
            warn!("No domain prompts found, using fallback prompt");
            return fallback_prompt().to_string();
        }

        info!(domains = ?domains, "Composed system prompt");
        prompts.join("\n\n")
    }
}

/// Built-in prompt used when no domain prompt files are available
pub fn fallback_prompt() -> &'static str {
    "You are a banking assistant that helps users check their account balance information.\n\
     Follow a strict flow:\n\
     1. Ask for account number first\n\
     2. Immediately validate that the account number exists before asking for the PIN\n\
     3. Only after validating the account number, ask for the PIN\n\
     4. Then provide detailed account balance information including current balance, currency, account status, and last transaction date.\n\n\
     IMPORTANT: Always validate account number existence using the validate_account tool before asking for the PIN.\n\
     IMPORTANT: If an account number is not found, immediately inform the user and ask for a valid account number.\n\
     IMPORTANT: Always provide ALL information that is available in the account details, including last transaction date.\n\n\
     Be professional and friendly. Remember: your focus is on providing complete and accurate account information for standard deposit accounts."
}
