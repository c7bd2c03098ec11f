use banking_assistant::{
    api::start_server,
    backend,
    chatbot::BankingChatbot,
    llm::OpenAiProvider,
    prompts::PromptManager,
    services::create_default_registry,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let openai_api_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!("⚠️  OPENAI_API_KEY not set in .env");
        eprintln!("📌 See .env.example for setup instructions");
        String::new()
    });
    let openai_model = std::env::var("OPENAI_MODEL").ok();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8000".to_string())
        .parse()?;

    let prompt_dir =
        std::env::var("PROMPT_DIR").unwrap_or_else(|_| "config/prompts".to_string());

    info!("🚀 Banking Assistant - API Server");
    info!("📍 Port: {}", port);

    // Create components
    let api_client = backend::create_client(false);
    let registry = Arc::new(create_default_registry(api_client));
    let llm = Arc::new(OpenAiProvider::new(openai_api_key, openai_model));
    let prompt_manager = PromptManager::new(&prompt_dir);

    let chatbot = Arc::new(BankingChatbot::new(llm, registry, &prompt_manager, None));

    info!("✅ Chatbot initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(chatbot, port).await?;

    Ok(())
}
