use super::*;

#[test]
fn test_timeouts_map_to_retryable_timeout() {
    let submit = Error::SubmissionTimeout {
        service: "alpha".to_string(),
        after: Duration::from_secs(5),
    };
    let response = Error::ResponseTimeout {
        service: "alpha".to_string(),
        after: Duration::from_secs(30),
    };

    assert_eq!(submit.outcome(), Outcome::Timeout);
    assert_eq!(response.outcome(), Outcome::Timeout);
    assert!(submit.is_retryable());
    assert!(response.is_retryable());
}

#[test]
fn test_auth_required_is_auth_lost() {
    let error = Error::AuthenticationRequired {
        service: "alpha".to_string(),
        reason: "redirected to login".to_string(),
    };
    assert_eq!(error.outcome(), Outcome::AuthLost);
    assert!(error.is_retryable());
}

#[test]
fn test_profile_errors_are_terminal() {
    let locked = Error::ProfileLocked {
        service: "alpha".to_string(),
    };
    let corrupt = Error::corrupt("alpha", "profile.json is not valid JSON");

    assert!(!locked.is_retryable());
    assert!(!corrupt.is_retryable());
    assert!(matches!(corrupt.outcome(), Outcome::Error(detail) if detail.contains("corrupt")));
}

#[test]
fn test_service_reported_error_is_not_retried() {
    let error = Error::ServiceReported {
        service: "beta".to_string(),
        message: "usage limit reached".to_string(),
    };
    assert!(!error.is_retryable());
    assert_eq!(error.code(), "service_reported");
}

#[test]
fn test_cancelled_outcome() {
    assert_eq!(Error::Cancelled.outcome(), Outcome::Cancelled);
    assert!(!Error::Cancelled.is_retryable());
}

#[test]
fn test_cli_format_includes_suggestion() {
    let error = Error::element("textarea#prompt");
    let output = format_error_for_cli(&error);
    assert!(output.contains("textarea#prompt"));
    assert!(output.contains("locators"));
}
