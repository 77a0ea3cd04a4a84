//! Settings Loading
//!
//! Layers, later wins: built-in defaults, the TOML file, then `AGENT_`
//! environment variables with `__` between section and key
//! (`AGENT_LLM__MODEL=llama3.2`).

use std::path::Path;

use agent_core::{AgentError, AgentSettings, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// File read from the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "agent.toml";

pub const ENV_PREFIX: &str = "AGENT_";

/// Load and validate settings
///
/// An explicitly given file must exist; the default file is optional.
pub fn load(path: Option<&Path>) -> Result<AgentSettings> {
    let file = match path {
        Some(path) if !path.is_file() => {
            return Err(AgentError::Config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        Some(path) => path,
        None => Path::new(DEFAULT_CONFIG_FILE),
    };

    let settings: AgentSettings = Figment::from(Serialized::defaults(AgentSettings::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| AgentError::Config(format!("Failed to load configuration: {e}")))?;

    settings.validate()?;
    tracing::debug!(
        provider = ?settings.llm.provider,
        model = %settings.llm.model,
        max_steps = settings.agent.max_steps,
        "Loaded settings"
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use agent_core::{MemoryWritePolicy, ProviderKind};
    use figment::Jail;

    use super::*;

    #[test]
    fn test_defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let settings = load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.agent.max_steps, 5);
            assert_eq!(settings.llm.provider, ProviderKind::Ollama);
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [llm]
                model = "mistral"
                min_request_interval_secs = 2.5

                [agent]
                max_steps = 8
                memory_writes = "every_step"
                "#,
            )?;
            jail.set_env("AGENT_AGENT__MAX_STEPS", "3");

            let settings = load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.llm.model, "mistral");
            assert!((settings.llm.min_request_interval_secs - 2.5).abs() < f64::EPSILON);
            assert_eq!(settings.agent.max_steps, 3);
            assert_eq!(settings.agent.memory_writes, MemoryWritePolicy::EveryStep);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("AGENT_LLM__PROVIDER", "openai");
            assert!(matches!(load(None), Err(AgentError::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = load(Some(Path::new("nowhere.toml"))).unwrap_err();
            assert!(err.to_string().contains("nowhere.toml"));
            Ok(())
        });
    }
}
