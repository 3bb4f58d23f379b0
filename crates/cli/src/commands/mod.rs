pub mod chat;
pub mod config_cmd;
pub mod init;
pub mod plan;

use companion_agent::Orchestrator;
use companion_config::AppConfig;
use companion_core::ToolSet;
use std::sync::Arc;

/// Load configuration, connect to the model and run the one-time
/// orchestrator bootstrap.
pub async fn bootstrap() -> Result<(AppConfig, Arc<Orchestrator>), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = match companion_providers::build_from_config(&config) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    COMPANION_API_KEY   (generic)");
            eprintln!("    OPENROUTER_API_KEY  (recommended)");
            eprintln!("    OPENAI_API_KEY      (for OpenAI direct)");
            eprintln!();
            eprintln!("  Or add api_key to {}", AppConfig::config_path().display());
            eprintln!();
            return Err(e.into());
        }
    };

    let store = companion_store::open(&config.storage);
    let orchestrator = Arc::new(Orchestrator::from_config(&config, store, ToolSet::empty()));

    eprint!("  Planning the session...");
    let init = orchestrator.init(provider).await;
    eprint!("\r                          \r");
    init?;

    tracing::info!(
        model = %config.model,
        plan_chars = orchestrator.current_plan().map(|p| p.len()).unwrap_or(0),
        "Companion ready"
    );
    Ok((config, orchestrator))
}
