//! Transport error mapping shared by the HTTP-backed providers.

use agent_core::error::AgentError;
use reqwest::StatusCode;

/// Map a failed HTTP status onto the retry taxonomy
pub fn status_error(status: StatusCode, body: &str) -> AgentError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", truncate(body.trim(), 300))
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AgentError::Timeout(detail),
        s if s.is_server_error() => AgentError::ProviderUnavailable(detail),
        _ => AgentError::Provider(detail),
    }
}

/// Map a transport-level reqwest failure
pub fn transport_error(err: &reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        AgentError::ProviderUnavailable(err.to_string())
    } else if let Some(status) = err.status() {
        status_error(status, "")
    } else if err.is_decode() {
        AgentError::Provider(format!("malformed response: {err}"))
    } else {
        AgentError::ProviderUnavailable(err.to_string())
    }
}

/// Map any client error that may wrap a reqwest failure
pub fn client_error(err: &(dyn std::error::Error + 'static)) -> AgentError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(reqwest_err) = current.downcast_ref::<reqwest::Error>() {
            return transport_error(reqwest_err);
        }
        source = current.source();
    }
    AgentError::Provider(err.to_string())
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, ""), AgentError::Auth(_)));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            AgentError::ProviderUnavailable(_)
        ));
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, "bad"), AgentError::Provider(_)));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error(StatusCode::FORBIDDEN, "").is_retryable());
        assert!(!status_error(StatusCode::NOT_FOUND, "").is_retryable());
    }

    #[test]
    fn test_body_is_truncated() {
        let body = "x".repeat(1000);
        let err = status_error(StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn test_non_reqwest_error_is_provider_error() {
        let io = std::io::Error::other("boom");
        assert!(matches!(client_error(&io), AgentError::Provider(_)));
    }
}
