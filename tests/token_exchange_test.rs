// Integration tests for the HTTP token generator against a mock endpoint

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use mockito::Matcher;
use tokensmith::credentials::{CredentialBundle, RequestEncoding, StoredCredentials, TokenConfig};
use tokensmith::token::{HttpTokenGenerator, TokenGenerator};
use tokensmith::TokenError;

fn bundle() -> CredentialBundle {
    CredentialBundle {
        client_id: "my-client".to_string(),
        client_secret: "my-secret".to_string(),
        username: "alice".to_string(),
        password: "pa ss&word".to_string(),
    }
}

fn config(endpoint: String, encoding: RequestEncoding, use_jwt_expiry: bool) -> TokenConfig {
    TokenConfig {
        id: "cfg-1".to_string(),
        name: "Test".to_string(),
        endpoint,
        credentials: StoredCredentials::Plaintext(bundle()),
        encoding,
        use_jwt_expiry,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn generator() -> HttpTokenGenerator {
    HttpTokenGenerator::new(std::time::Duration::from_secs(5), 900).unwrap()
}

#[tokio::test]
async fn test_json_request_with_expires_in() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(serde_json::json!({
            "client_id": "my-client",
            "client_secret": "my-secret",
            "username": "alice",
            "password": "pa ss&word",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"abc","expires_in":60}"#)
        .create_async()
        .await;

    let cfg = config(format!("{}/token", server.url()), RequestEncoding::Json, false);
    let before = Utc::now();
    let token = generator().generate(&cfg, &bundle()).await.unwrap();
    let after = Utc::now();

    assert_eq!(token.value, "abc");
    assert_eq!(token.config_id, "cfg-1");
    assert!(token.expires_at >= before + Duration::seconds(60));
    assert!(token.expires_at <= after + Duration::seconds(60));

    // Valid now, invalid 61 seconds later
    assert!(token.is_valid_at(after));
    assert!(!token.is_valid_at(after + Duration::seconds(61)));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_unrepresentable_expires_in_uses_default_lifetime() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"access_token":"abc","expires_in":1e300}"#)
        .create_async()
        .await;

    let cfg = config(format!("{}/token", server.url()), RequestEncoding::Json, false);
    let before = Utc::now();
    let token = generator().generate(&cfg, &bundle()).await.unwrap();
    let after = Utc::now();

    assert_eq!(token.value, "abc");
    assert!(token.expires_at >= before + Duration::seconds(900));
    assert!(token.expires_at <= after + Duration::seconds(900));
}

#[tokio::test]
async fn test_form_request_with_grant_type() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/oauth/token")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "password".into()),
            Matcher::UrlEncoded("client_id".into(), "my-client".into()),
            Matcher::UrlEncoded("client_secret".into(), "my-secret".into()),
            Matcher::UrlEncoded("username".into(), "alice".into()),
            Matcher::UrlEncoded("password".into(), "pa ss&word".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"token":"bare-token"}"#)
        .create_async()
        .await;

    let cfg = config(
        format!("{}/oauth/token", server.url()),
        RequestEncoding::Form,
        false,
    );
    let before = Utc::now();
    let token = generator().generate(&cfg, &bundle()).await.unwrap();

    assert_eq!(token.value, "bare-token");
    // No lifetime declared: 15 minute default
    assert!(token.expires_at >= before + Duration::minutes(15));
    assert!(token.expires_at <= Utc::now() + Duration::minutes(15));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_jwt_expiry_mode() {
    let jwt = format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(r#"{"sub":"alice","exp":1700000000}"#)
    );

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(format!(r#"{{"access_token":"{}","expires_in":3600}}"#, jwt))
        .create_async()
        .await;

    let cfg = config(format!("{}/token", server.url()), RequestEncoding::Json, true);
    let token = generator().generate(&cfg, &bundle()).await.unwrap();

    assert_eq!(token.expires_at.timestamp_millis(), 1_700_000_000 * 1000);
    assert!(!token.is_valid());
}

#[tokio::test]
async fn test_http_error_carries_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(401)
        .with_body(r#"{"error":"invalid_client"}"#)
        .create_async()
        .await;

    let cfg = config(format!("{}/token", server.url()), RequestEncoding::Json, false);
    let err = generator().generate(&cfg, &bundle()).await.unwrap_err();

    match err {
        TokenError::Http { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid_client"));
        }
        other => panic!("expected HTTP error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_token_field() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(r#"{"refresh_token":"r","expires_in":60}"#)
        .create_async()
        .await;

    let cfg = config(format!("{}/token", server.url()), RequestEncoding::Json, false);
    let err = generator().generate(&cfg, &bundle()).await.unwrap_err();
    assert!(matches!(err, TokenError::MissingToken));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    // Nothing listens on port 9
    let cfg = config(
        "http://127.0.0.1:9/token".to_string(),
        RequestEncoding::Json,
        false,
    );
    let err = generator().generate(&cfg, &bundle()).await.unwrap_err();
    assert!(matches!(err, TokenError::Network(_)));
}

#[tokio::test]
async fn test_missing_credential_is_validation_error() {
    let mut incomplete = bundle();
    incomplete.username.clear();

    let cfg = config(
        "http://127.0.0.1:9/token".to_string(),
        RequestEncoding::Json,
        false,
    );
    let err = generator().generate(&cfg, &incomplete).await.unwrap_err();
    assert!(matches!(err, TokenError::Validation(_)));
}
