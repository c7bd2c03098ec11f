//! Terminal interface for the banking assistant
//!
//! Interactive REPL over the HTTP API. Supports setting a caller id
//! (mobile number) and injecting system prompts into the live session.

use banking_assistant::api::{
    ChatRequest, ChatResponse, EndSessionRequest, InjectPromptRequest, SuccessResponse,
};
use std::io::{self, BufRead, Write};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8000".to_string());
    let session_id = format!("terminal-{}", Uuid::new_v4());
    let client = reqwest::Client::new();
    let mut caller_id: Option<String> = None;

    println!("=== Banking Assistant Terminal Interface ===");
    println!("Connected to server: {}", server_url);
    println!("Type 'quit' to exit");
    println!("Special commands:");
    println!("  !inject <prompt> - Inject a system prompt");
    println!("  !caller <number> - Set your caller ID (mobile number)");
    println!();
    println!("Assistant: How can I help you today?");

    let stdin = io::stdin();
    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();

        if input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            let response = client
                .post(format!("{}/end_session", server_url))
                .json(&EndSessionRequest {
                    session_id: session_id.clone(),
                })
                .send()
                .await;
            if response.is_err() {
                eprintln!("Failed to end session cleanly.");
            }
            break;
        }

        if let Some(prompt) = input.strip_prefix("!inject ") {
            let result: SuccessResponse = client
                .post(format!("{}/inject_prompt", server_url))
                .json(&InjectPromptRequest {
                    session_id: session_id.clone(),
                    prompt: prompt.to_string(),
                })
                .send()
                .await?
                .json()
                .await?;
            if result.success {
                println!("Prompt injected successfully.");
            } else {
                println!("Failed to inject prompt.");
            }
            continue;
        }

        if let Some(number) = input.strip_prefix("!caller ") {
            caller_id = Some(number.trim().to_string());
            println!("Caller ID set to {}", number.trim());
            continue;
        }

        if input.is_empty() {
            continue;
        }

        let response = client
            .post(format!("{}/chat", server_url))
            .json(&ChatRequest {
                message: input.to_string(),
                session_id: Some(session_id.clone()),
                caller_id: caller_id.clone(),
            })
            .send()
            .await;

        match response {
            Ok(response) => {
                let chat: ChatResponse = response.json().await?;
                println!("Assistant: {}", chat.response);
            }
            Err(e) => {
                eprintln!("Error talking to server: {}", e);
            }
        }
    }

    Ok(())
}
