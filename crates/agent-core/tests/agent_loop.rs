//! End-to-end runs of the agent loop against scripted models.

use std::sync::Arc;
use std::time::Duration;

use agent_core::testing::ScriptedProvider;
use agent_core::{
    AgentBuilder, AgentError, CalculatorTool, GenerationOptions, HashEmbedder, MemorySettings,
    RateLimitedClient, RetryPolicy, Termination, ToolRegistry, VectorMemory,
};

const USE_CALCULATOR: &str =
    r#"{"thought": "I should multiply", "action": "calculator", "action_input": "123*456"}"#;
const ANSWER: &str =
    r#"Here you go: {"thought": "done", "action": "respond", "action_input": "123 * 456 = 56088"}"#;

fn calculator_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register_tool(CalculatorTool).unwrap();
    tools
}

fn client(provider: Arc<ScriptedProvider>, interval: Duration, retry: RetryPolicy) -> Arc<RateLimitedClient> {
    Arc::new(
        RateLimitedClient::new(provider, GenerationOptions::default())
            .with_min_interval(interval)
            .with_retry(retry),
    )
}

#[tokio::test(start_paused = true)]
async fn calculator_question_answers_in_two_steps() {
    let provider = Arc::new(ScriptedProvider::replies([USE_CALCULATOR, ANSWER]));
    let agent = AgentBuilder::new()
        .client(client(provider.clone(), Duration::from_secs(1), RetryPolicy::no_retry()))
        .tools(calculator_tools())
        .build()
        .unwrap();

    let outcome = agent.run_detailed("Calculate 123*456", Some(5)).await.unwrap();

    assert_eq!(outcome.termination, Termination::Responded);
    assert_eq!(outcome.steps, 2);
    assert!(outcome.response.contains("56088"));
    assert_eq!(provider.call_count(), 2);

    let times = provider.call_times();
    assert!(times[1] - times[0] >= Duration::from_secs(1));
}

#[tokio::test]
async fn single_step_budget_returns_best_effort() {
    let provider = Arc::new(ScriptedProvider::always(USE_CALCULATOR));
    let agent = AgentBuilder::new()
        .client(client(provider.clone(), Duration::ZERO, RetryPolicy::no_retry()))
        .tools(calculator_tools())
        .build()
        .unwrap();

    let outcome = agent.run_detailed("Calculate 123*456", Some(1)).await.unwrap();

    assert_eq!(outcome.termination, Termination::BudgetExhausted);
    assert_eq!(provider.call_count(), 1);
    assert!(!outcome.response.is_empty());
    assert!(outcome.response.contains("56088"));
}

#[tokio::test]
async fn model_never_calls_more_than_budget() {
    let provider = Arc::new(ScriptedProvider::always("I am not sure what to do."));
    let agent = AgentBuilder::new()
        .client(client(provider.clone(), Duration::ZERO, RetryPolicy::no_retry()))
        .tools(calculator_tools())
        .max_steps(4)
        .build()
        .unwrap();

    let outcome = agent.run_detailed("anything", None).await.unwrap();

    assert_eq!(outcome.steps, 4);
    assert_eq!(provider.call_count(), 4);
    assert!(outcome.scratchpad.iter().all(|e| e.action.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_inside_a_step() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(AgentError::RateLimited("429 Too Many Requests".into())),
        Err(AgentError::ProviderUnavailable("503".into())),
        Ok(ANSWER.into()),
    ]));
    let retry = RetryPolicy::default().with_initial_delay(Duration::from_millis(100));
    let agent = AgentBuilder::new()
        .client(client(provider.clone(), Duration::ZERO, retry))
        .build()
        .unwrap();

    let outcome = agent.run_detailed("Calculate 123*456", None).await.unwrap();

    assert_eq!(outcome.steps, 1);
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_model_unavailable() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(AgentError::RateLimited("429".into())),
        Err(AgentError::RateLimited("429".into())),
        Err(AgentError::RateLimited("429".into())),
    ]));
    let retry = RetryPolicy::default()
        .with_max_retries(2)
        .with_initial_delay(Duration::from_millis(10));
    let agent = AgentBuilder::new()
        .client(client(provider.clone(), Duration::ZERO, retry))
        .build()
        .unwrap();

    match agent.run("hello", None).await {
        Err(AgentError::ModelUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected ModelUnavailable, got {other:?}"),
    }
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sessions_share_the_request_interval() {
    let provider = Arc::new(ScriptedProvider::always(ANSWER));
    let shared = client(provider.clone(), Duration::from_secs(2), RetryPolicy::no_retry());

    let first = AgentBuilder::new().client(shared.clone()).build().unwrap();
    let second = AgentBuilder::new().client(shared).build().unwrap();

    let (a, b) = tokio::join!(first.run("one", None), second.run("two", None));
    assert!(a.is_ok() && b.is_ok());

    let times = provider.call_times();
    assert_eq!(times.len(), 2);
    let gap = if times[1] > times[0] { times[1] - times[0] } else { times[0] - times[1] };
    assert!(gap >= Duration::from_secs(2));
}

#[tokio::test]
async fn answers_are_recalled_by_later_runs() {
    let settings = MemorySettings {
        dimension: 128,
        ..MemorySettings::default()
    };
    let memory = Arc::new(VectorMemory::in_memory(Arc::new(HashEmbedder::new(128)), &settings).unwrap());

    let provider = Arc::new(ScriptedProvider::replies([USE_CALCULATOR, ANSWER, ANSWER]));
    let agent = AgentBuilder::new()
        .client(client(provider.clone(), Duration::ZERO, RetryPolicy::no_retry()))
        .tools(calculator_tools())
        .memory(memory.clone())
        .build()
        .unwrap();

    agent.run("Calculate 123*456", None).await.unwrap();
    agent.run("What was 123*456 again?", None).await.unwrap();

    let prompts = provider.prompts();
    assert!(prompts[0].contains("Relevant Memories:\nNone"));
    assert!(prompts[2].contains("Assistant: 123 * 456 = 56088"));
}
