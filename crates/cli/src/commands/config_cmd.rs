//! `companion config`: configuration management commands.

use companion_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("  Config error: {e}");
            return Err(e.into());
        }
    };
    println!("  Config parsed and validated");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("  All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("  warning: {w}");
        }
    }

    println!();
    println!("  Endpoint:    {}", config.api_url);
    println!("  Model:       {}", config.model);
    println!("  Storage:     {}", config.storage.resolved_path().display());
    println!("  Compaction:  {}", if config.compaction.enabled { "on" } else { "off" });
    println!(
        "  Sub-agents:  {}",
        if config.sub_agents.is_empty() {
            "(none)".to_string()
        } else {
            config
                .sub_agents
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        }
    );

    Ok(())
}

/// Problems that do not stop the config from loading.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.has_api_key() && !config.api_url.contains(":11434") {
        warnings.push(
            "No API key set (set COMPANION_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)".into(),
        );
    }
    if config.compaction.enabled && config.compaction.keep_recent == 0 {
        warnings.push("compaction.keep_recent = 0 summarizes every message".into());
    }
    for sub in &config.sub_agents {
        if sub.description.trim().is_empty() {
            warnings.push(format!(
                "Sub-agent '{}' has no description; the model will not know when to use it",
                sub.name
            ));
        }
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.api_key.is_some() {
        config.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_config::SubAgentConfig;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_path();
        assert!(path.to_str().unwrap().ends_with("config.toml"));
    }

    #[test]
    fn missing_key_and_blank_description_are_flagged() {
        let mut config = AppConfig::default();
        config.sub_agents.push(SubAgentConfig {
            name: "coach".into(),
            description: " ".into(),
            system_prompt: "You coach.".into(),
            reasoning: None,
            memory_key: None,
        });

        let warnings = warnings(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("No API key"));
        assert!(warnings[1].contains("coach"));
    }

    #[test]
    fn local_endpoint_needs_no_key() {
        let config = AppConfig {
            api_url: "http://localhost:11434/v1".into(),
            ..AppConfig::default()
        };
        assert!(warnings(&config).is_empty());
    }
}
