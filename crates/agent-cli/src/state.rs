//! Application State

use std::sync::Arc;

use agent_core::{
    Agent, AgentSettings, CalculatorTool, DateTimeTool, Embedder, HashEmbedder, LlmProvider,
    LlmSettings, MemorySettings, ProviderKind, RateLimitedClient, Result, ToolRegistry,
    VectorMemory,
};
use agent_runtime::{JsonFileStore, OllamaEmbedder, OllamaProvider, OpenAiProvider, register_discovered};

/// Everything a command needs, built once from settings
pub struct AppState {
    pub settings: AgentSettings,

    /// Throttled client shared by every agent run
    pub client: Arc<RateLimitedClient>,

    /// Tool registry with all available tools
    pub tools: Arc<ToolRegistry>,

    pub memory: Arc<VectorMemory>,
}

impl AppState {
    pub fn build(settings: AgentSettings) -> Result<Self> {
        let provider = build_provider(&settings.llm)?;
        let client = Arc::new(RateLimitedClient::from_settings(provider.clone(), &settings.llm));
        let tools = Arc::new(build_tools(&settings)?);

        let embedder = build_embedder(&settings.llm, &settings.memory)?;
        let memory = Arc::new(match &settings.memory.path {
            Some(path) => VectorMemory::new(embedder, Arc::new(JsonFileStore::open(path)?), &settings.memory)?,
            None => VectorMemory::in_memory(embedder, &settings.memory)?,
        });

        tracing::info!(
            provider = provider.name(),
            model = %settings.llm.model,
            tools = tools.len(),
            "Agent components ready"
        );

        Ok(Self {
            settings,
            client,
            tools,
            memory,
        })
    }

    pub fn agent(&self) -> Agent {
        Agent::from_settings(
            self.client.clone(),
            self.tools.clone(),
            Some(self.memory.clone()),
            &self.settings,
        )
    }
}

fn build_provider(llm: &LlmSettings) -> Result<Arc<dyn LlmProvider>> {
    Ok(match llm.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_settings(llm)?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_settings(llm)?),
    })
}

fn build_embedder(llm: &LlmSettings, memory: &MemorySettings) -> Result<Arc<dyn Embedder>> {
    match (&memory.embedding_model, llm.provider) {
        (Some(_), ProviderKind::Ollama) => Ok(Arc::new(OllamaEmbedder::from_settings(llm, memory)?)),
        (Some(model), ProviderKind::OpenAi) => {
            tracing::warn!(model = %model, "Embedding models are only served through Ollama, using local hashing embedder");
            Ok(Arc::new(HashEmbedder::new(memory.dimension)))
        }
        (None, _) => Ok(Arc::new(HashEmbedder::new(memory.dimension))),
    }
}

fn build_tools(settings: &AgentSettings) -> Result<ToolRegistry> {
    let mut tools = ToolRegistry::new().with_timeout(settings.agent.tool_timeout());

    // Core tools
    tools.register_tool(CalculatorTool)?;
    tools.register_tool(DateTimeTool)?;

    if let Some(dir) = &settings.tools.discovery_dir {
        register_discovered(&mut tools, dir)?;
    }

    for name in tools.list_tools() {
        tracing::debug!(tool = %name, "Registered tool");
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_has_builtin_tools() {
        let state = AppState::build(AgentSettings::default()).unwrap();
        assert_eq!(state.tools.list_tools(), vec!["calculator", "datetime"]);
        assert_eq!(state.client.provider().name(), "ollama");
        assert_eq!(state.agent().config().max_steps, 5);
    }

    #[tokio::test]
    async fn test_memory_path_persists_between_builds() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("agent-cli-memory-{}-{nanos}", std::process::id()));
        let mut settings = AgentSettings::default();
        settings.memory.path = Some(dir.join("memory.json"));

        let state = AppState::build(settings.clone()).unwrap();
        state.memory.add("remembered across runs", None).await.unwrap();
        drop(state);

        let state = AppState::build(settings).unwrap();
        assert_eq!(state.memory.len().await.unwrap(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_openai_requires_key() {
        let mut settings = AgentSettings::default();
        settings.llm.provider = ProviderKind::OpenAi;
        assert!(AppState::build(settings).is_err());
    }
}
