//! End-to-end authorization flows against a mock identity provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailgate::auth::{Authenticator, Session};
use mailgate::config::GraphConfig;
use mailgate::gateway;
use mailgate::Error;

const TOKEN_PATH: &str = "/tenant-int/oauth2/v2.0/token";

fn config_for(server: &MockServer) -> Arc<GraphConfig> {
    Arc::new(GraphConfig {
        client_id: "client-int".into(),
        client_secret: "secret-int".into(),
        tenant_id: "tenant-int".into(),
        redirect_uri: "http://localhost:1/callback".into(),
        scopes: vec!["offline_access".into(), "Mail.Read".into()],
        authority_base: server.uri(),
        graph_base: format!("{}/v1.0", server.uri()),
        http_timeout: Duration::from_secs(5),
    })
}

fn authenticator(server: &MockServer) -> Authenticator {
    let config = config_for(server);
    let http = gateway::http_client(&config).expect("build http client");
    Authenticator::new(config, http)
}

fn expired_session(refresh_token: Option<&str>) -> Session {
    Session {
        access_token: "stale-access".into(),
        refresh_token: refresh_token.map(str::to_string),
        expires_at: Utc::now() - ChronoDuration::seconds(120),
        scope: None,
    }
}

#[tokio::test]
async fn valid_code_exchange_establishes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=valid-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "A",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "R",
            "scope": "Mail.Read"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    let session = auth.exchange_code("valid-code").await.expect("exchange");
    assert_eq!(session.access_token, "A");
    assert_eq!(session.refresh_token.as_deref(), Some("R"));
    assert!(!session.is_expired());

    let current = auth.current_session().await.expect("session is cached");
    assert_eq!(current.access_token, "A");
}

#[tokio::test]
async fn rejected_code_surfaces_provider_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "AADSTS70008: the code has expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    let error = auth
        .exchange_code("expired-code")
        .await
        .expect_err("rejected code must fail");
    match error {
        Error::AuthExchange { reason } => {
            assert!(reason.contains("invalid_grant"), "reason: {reason}");
            assert!(reason.contains("AADSTS70008"), "reason: {reason}");
        }
        other => panic!("expected AuthExchange, got {other:?}"),
    }
    assert!(auth.current_session().await.is_none());
}

#[tokio::test]
async fn token_response_missing_required_fields_is_a_failed_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token_type": "Bearer" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    let error = auth
        .exchange_code("some-code")
        .await
        .expect_err("incomplete token response must fail");
    assert!(matches!(error, Error::AuthExchange { .. }));
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "R2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    auth.restore_session(expired_session(Some("R1"))).await;

    let (a, b) = tokio::join!(auth.get_valid_session(), auth.get_valid_session());
    assert_eq!(a.expect("first caller").access_token, "fresh");
    assert_eq!(b.expect("second caller").access_token, "fresh");
    // .expect(1) on the mock verifies only one token call was made.
}

#[tokio::test]
async fn refresh_keeps_old_refresh_token_when_response_omits_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    auth.restore_session(expired_session(Some("R1"))).await;

    let session = auth.get_valid_session().await.expect("refresh");
    assert_eq!(session.access_token, "fresh");
    assert_eq!(session.refresh_token.as_deref(), Some("R1"));
}

#[tokio::test]
async fn failed_refresh_clears_session_and_demands_reauthorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    auth.restore_session(expired_session(Some("revoked"))).await;

    let error = auth
        .get_valid_session()
        .await
        .expect_err("revoked refresh token must fail");
    match error {
        Error::SessionExpired { reason } => {
            assert!(reason.contains("invalid_grant"), "reason: {reason}");
        }
        other => panic!("expected SessionExpired, got {other:?}"),
    }
    // State machine re-entered Unauthenticated.
    assert!(auth.current_session().await.is_none());
}

#[tokio::test]
async fn expired_session_without_refresh_token_never_calls_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let auth = authenticator(&server);
    auth.restore_session(expired_session(None)).await;

    let error = auth
        .get_valid_session()
        .await
        .expect_err("no refresh path must fail");
    assert!(matches!(error, Error::SessionExpired { .. }));
}

#[tokio::test]
async fn logout_destroys_the_session() {
    let server = MockServer::start().await;
    let auth = authenticator(&server);
    auth.restore_session(Session {
        access_token: "live".into(),
        refresh_token: Some("R".into()),
        expires_at: Utc::now() + ChronoDuration::seconds(3600),
        scope: None,
    })
    .await;

    auth.logout().await.expect("logout");
    assert!(auth.current_session().await.is_none());
    let error = auth
        .get_valid_session()
        .await
        .expect_err("logged-out session must fail");
    assert!(matches!(error, Error::SessionExpired { .. }));
}
