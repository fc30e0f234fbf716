use super::*;

// =============================================================================
// parse_token_response
// =============================================================================

#[test]
fn parse_token_response_full() {
    let body = r#"{"access_token":"A","refresh_token":"R","role":"staff","token_type":"bearer","expires_in":3600}"#;
    let parsed = parse_token_response(body).unwrap();
    assert_eq!(parsed.access_token, "A");
    assert_eq!(parsed.refresh_token.as_deref(), Some("R"));
    assert_eq!(parsed.role.as_deref(), Some("staff"));
}

#[test]
fn parse_token_response_without_refresh() {
    let parsed = parse_token_response(r#"{"access_token":"A"}"#).unwrap();
    assert!(parsed.refresh_token.is_none());
    assert!(parsed.role.is_none());
}

#[test]
fn parse_token_response_missing_access_token_is_malformed() {
    let err = parse_token_response(r#"{"refresh_token":"R"}"#).unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
}

#[test]
fn parse_token_response_not_json_is_malformed() {
    let err = parse_token_response("<html>").unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
}

// =============================================================================
// classify_failure
// =============================================================================

#[test]
fn classify_4xx_is_rejected_with_description() {
    let err = classify_failure(400, r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#);
    match err {
        ProviderError::Rejected(reason) => assert_eq!(reason, "refresh token revoked"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn classify_4xx_falls_back_to_error_code() {
    let err = classify_failure(401, r#"{"error":"invalid_client"}"#);
    assert!(matches!(err, ProviderError::Rejected(ref r) if r == "invalid_client"));
}

#[test]
fn classify_5xx_is_transport() {
    let err = classify_failure(503, "upstream down");
    assert!(matches!(err, ProviderError::Transport(ref r) if r == "status 503"));
}

// =============================================================================
// HttpIdentityProvider construction
// =============================================================================

#[test]
fn http_provider_uses_configured_endpoint() {
    let config = SessionConfig::with_base_url(url::Url::parse("https://api.example.com").unwrap());
    let provider = HttpIdentityProvider::new(&config).unwrap();
    assert_eq!(provider.token_url, "https://api.example.com/auth/v1/token");
    assert_eq!(provider.client_id, "web");
    assert_eq!(provider.redirect_uri, "https://api.example.com/auth/callback");
}
