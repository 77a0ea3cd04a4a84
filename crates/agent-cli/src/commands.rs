//! Command Handlers

use agent_core::{AgentError, CancellationToken, Result, Termination};

use crate::state::AppState;

/// Run one query; Ctrl-C cancels at the next step boundary
pub async fn ask(state: &AppState, text: &str, max_steps: Option<usize>, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let result = state.agent().run_with_cancel(text, max_steps, &cancel).await;
    watcher.abort();
    let outcome = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.response);
        if outcome.termination == Termination::BudgetExhausted {
            eprintln!("(step budget of {} exhausted)", outcome.steps);
        }
    }
    Ok(())
}

/// Print registered tools as `name: description`
pub fn tools(state: &AppState) {
    if state.tools.is_empty() {
        println!("No tools registered.");
    } else {
        println!("{}", state.tools.describe());
    }
}

/// Check that the provider answers and list its models
pub async fn check(state: &AppState) -> Result<()> {
    let provider = state.client.provider();
    let name = provider.name();
    if !provider.health_check().await? {
        return Err(AgentError::ProviderUnavailable(format!(
            "{name} at {} is not reachable",
            state.settings.llm.api_base
        )));
    }
    println!("✓ Connected to {name} at {}", state.settings.llm.api_base);

    let models = provider.list_models().await?;
    let configured = &state.client.options().model;
    for model in &models {
        println!("  Model: {}", model.id);
    }
    if !models.iter().any(|m| m.id == *configured || m.id.starts_with(&format!("{configured}:"))) {
        println!("⚠ Configured model '{configured}' is not listed by the provider");
    }
    Ok(())
}
