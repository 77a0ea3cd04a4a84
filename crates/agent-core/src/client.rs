//! Rate-Limited Model Client
//!
//! Serializes and throttles every completion request that leaves the process.
//! One client is constructed per process and shared (behind an `Arc`) by every
//! agent session, so the minimum request interval holds globally.
//!
//! A request waits until `min_interval` has elapsed since the previous request
//! returned, then runs under a per-call timeout. Transient failures are retried
//! with exponential backoff; when the retry budget is spent the caller gets
//! [`AgentError::ModelUnavailable`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::config::LlmSettings;
use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider};

/// Backoff between retries of a failed request
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `retry` (0-indexed)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Throttled, retrying front for an [`LlmProvider`]
pub struct RateLimitedClient {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
    min_interval: Duration,
    request_timeout: Duration,
    retry: RetryPolicy,
    /// When the previous request returned; held for the whole request
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(provider: Arc<dyn LlmProvider>, options: GenerationOptions) -> Self {
        Self {
            provider,
            options,
            min_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            last_call: Mutex::new(None),
        }
    }

    /// Build from the `llm` settings section
    pub fn from_settings(provider: Arc<dyn LlmProvider>, settings: &LlmSettings) -> Self {
        let retry = RetryPolicy {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.backoff_initial_ms),
            max_delay: Duration::from_millis(settings.backoff_max_ms),
            multiplier: 2.0,
        };

        Self::new(provider, GenerationOptions::from(settings))
            .with_min_interval(settings.min_request_interval())
            .with_request_timeout(settings.request_timeout())
            .with_retry(retry)
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Complete `messages`, retrying transient failures
    pub async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let mut retry = 0;

        loop {
            match self.throttled_call(messages).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() => {
                    if retry >= self.retry.max_retries {
                        tracing::error!(
                            provider = self.provider.name(),
                            attempts = retry + 1,
                            error = %e,
                            "Retry budget exhausted"
                        );
                        return Err(AgentError::ModelUnavailable {
                            attempts: retry + 1,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.retry.delay_for_retry(retry);
                    retry += 1;
                    tracing::warn!(
                        provider = self.provider.name(),
                        attempt = retry,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient completion failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(provider = self.provider.name(), error = %e, "Completion failed");
                    return Err(e);
                }
            }
        }
    }

    /// Complete a single system + user prompt and return the text
    pub async fn complete_prompt(&self, system: &str, prompt: &str) -> Result<String> {
        let messages = [Message::system(system), Message::user(prompt)];
        Ok(self.complete(&messages).await?.content)
    }

    /// One request under the shared throttle
    async fn throttled_call(&self, messages: &[Message]) -> Result<Completion> {
        let mut last_call = self.last_call.lock().await;

        if let Some(previous) = *last_call {
            let ready_at = previous.checked_add(self.min_interval).ok_or_else(|| {
                AgentError::Config("minimum request interval is out of range".into())
            })?;
            if Instant::now() < ready_at {
                tracing::debug!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Waiting for request interval"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        // Stamps the return time even when the caller abandons the request
        let _stamp = ReturnStamp(last_call);

        tokio::time::timeout(
            self.request_timeout,
            self.provider.complete(messages, &self.options),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AgentError::Timeout(format!(
                "completion exceeded {}s",
                self.request_timeout.as_secs_f64()
            )))
        })
    }
}

/// Records when a started request returned, on every exit path
struct ReturnStamp<'a>(MutexGuard<'a, Option<Instant>>);

impl Drop for ReturnStamp<'_> {
    fn drop(&mut self) {
        *self.0 = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn client(provider: Arc<ScriptedProvider>, interval: Duration, retries: u32) -> RateLimitedClient {
        RateLimitedClient::new(provider, GenerationOptions::default())
            .with_min_interval(interval)
            .with_retry(
                RetryPolicy::default()
                    .with_max_retries(retries)
                    .with_initial_delay(Duration::from_millis(100)),
            )
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::default().with_initial_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(0).as_millis(), 500);
        assert_eq!(policy.delay_for_retry(1).as_millis(), 1000);
        assert_eq!(policy.delay_for_retry(2).as_millis(), 2000);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_respect_interval() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let client = client(provider.clone(), Duration::from_secs(2), 0);

        client.complete_prompt("sys", "one").await.unwrap();
        client.complete_prompt("sys", "two").await.unwrap();
        client.complete_prompt("sys", "three").await.unwrap();

        let starts = provider.call_times();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_measured_from_return() {
        let provider = Arc::new(ScriptedProvider::always("ok").with_latency(Duration::from_secs(5)));
        let client = client(provider.clone(), Duration::from_secs(1), 0);

        client.complete_prompt("sys", "a").await.unwrap();
        client.complete_prompt("sys", "b").await.unwrap();

        let starts = provider.call_times();
        assert!(starts[1] - starts[0] >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_still_spaces_the_next() {
        let provider = Arc::new(ScriptedProvider::always("ok").with_latency(Duration::from_secs(5)));
        let client = client(provider.clone(), Duration::from_secs(1), 0);

        // Caller gives up two seconds into a five second request
        let abandoned = tokio::time::timeout(Duration::from_secs(2), client.complete_prompt("sys", "a")).await;
        assert!(abandoned.is_err());

        client.complete_prompt("sys", "b").await.unwrap();

        let starts = provider.call_times();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_holds_across_concurrent_sessions() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let client = Arc::new(client(provider.clone(), Duration::from_secs(1), 0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.complete_prompt("sys", &i.to_string()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut starts = provider.call_times();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(AgentError::RateLimited("429".into())),
            Err(AgentError::ProviderUnavailable("503".into())),
            Ok("recovered".into()),
        ]));
        let client = client(provider.clone(), Duration::ZERO, 3);

        let text = client.complete_prompt("sys", "hi").await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_fatal() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..10).map(|_| Err(AgentError::RateLimited("429".into()))).collect(),
        ));
        let client = client(provider.clone(), Duration::ZERO, 2);

        let err = client.complete_prompt("sys", "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable { attempts: 3, .. }));
        // initial attempt + 2 retries, nothing afterwards
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(AgentError::Auth("bad key".into())),
            Ok("never".into()),
        ]));
        let client = client(provider.clone(), Duration::ZERO, 5);

        let err = client.complete_prompt("sys", "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Auth(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let provider = Arc::new(ScriptedProvider::always("slow").with_latency(Duration::from_secs(10)));
        let client = client(provider.clone(), Duration::ZERO, 1)
            .with_request_timeout(Duration::from_secs(1));

        let err = client.complete_prompt("sys", "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::ModelUnavailable { attempts: 2, .. }));
        assert_eq!(provider.call_count(), 2);
    }
}
