use deltabot_core::{ConfigError, CoreError, ErrorExt, ErrorReporter, RedditApiError};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert_eq!(reddit_error.error_code(), "REDDIT_INVALID_TOKEN");

    let not_found = CoreError::not_found("t1_abc");
    assert_eq!(not_found.error_code(), "NOT_FOUND");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "messages.confirmation".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");
}

#[test]
fn test_retryable_errors() {
    let retryable_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert!(retryable_error.is_retryable());

    let server_error = CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 });
    assert!(server_error.is_retryable());

    let garbled = CoreError::RedditApi(RedditApiError::InvalidResponse {
        details: "expected value".to_string(),
    });
    assert!(garbled.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "tokens".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());

    // Unmapped statuses are not retried, 5xx arrives as ServerError instead.
    let failed = CoreError::RequestFailed {
        message: "HTTP 418".to_string(),
        status_code: Some(418),
    };
    assert!(!failed.is_retryable());

    // Deleted comments are skipped, not retried.
    assert!(!CoreError::not_found("t1_gone").is_retryable());
}

#[test]
fn test_only_rate_limits_are_safe_to_resend() {
    let rate_limited = CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 5 });
    assert!(rate_limited.is_safe_to_resend());

    for reddit_error in [
        RedditApiError::ServerError { status_code: 502 },
        RedditApiError::RequestTimeout,
        RedditApiError::InvalidResponse {
            details: "not json".to_string(),
        },
        RedditApiError::EndpointUnavailable {
            endpoint: "/api/comment".to_string(),
        },
    ] {
        let error = CoreError::RedditApi(reddit_error);
        assert!(error.is_retryable());
        assert!(!error.is_safe_to_resend(), "{} must not be resent", error);
    }
}

#[test]
fn test_not_found_classification() {
    assert!(CoreError::not_found("user/alice").is_not_found());
    assert!(!CoreError::RedditApi(RedditApiError::RequestTimeout).is_not_found());
}

#[test]
fn test_retry_after() {
    let rate_limit_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    let server_error = CoreError::RedditApi(RedditApiError::ServerError { status_code: 500 });
    assert_eq!(server_error.retry_after(), None);

    assert_eq!(CoreError::not_found("x").retry_after(), None);
}

#[test]
fn test_user_friendly_messages() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    let message = reddit_error.user_friendly_message();
    assert!(message.contains("access token is invalid"));

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "account.username".to_string(),
    });
    let message = config_error.user_friendly_message();
    assert!(message.contains("account.username"));
}

#[test]
fn test_error_reporter() {
    let reporter = ErrorReporter::new();
    let error = CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 10 });

    // This test just ensures reporting doesn't panic
    reporter.report_error(&error);
    reporter.report_error(&CoreError::not_found("t1_gone"));
}
