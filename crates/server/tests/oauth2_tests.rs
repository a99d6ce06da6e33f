//! HTTP tests for the authorization server endpoints.

mod common;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use base64::Engine;
use common::{CHALLENGE, PASSWORD, TestEnv, VERIFIER, WEB_REDIRECT};
use rust_oidc_provider::api;
use rust_oidc_provider::issuer::{Jwks, TokenResponse};

fn server(env: &TestEnv) -> TestServer {
    TestServer::new(api::app(env.state.clone(), env.resources())).expect("create test server")
}

fn basic(id: &str, secret: &str) -> HeaderValue {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

fn location(response: &axum_test::TestResponse) -> url::Url {
    let value = response.header(header::LOCATION);
    url::Url::parse(value.to_str().unwrap()).expect("absolute location")
}

fn query_value(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Sign in through the authorization endpoint and return the code.
async fn authorize(server: &TestServer, email: &str, scope: &str) -> String {
    let response = server
        .post("/oauth2/authorize")
        .form(&[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", WEB_REDIRECT),
            ("scope", scope),
            ("state", "af0ifjsldkj"),
            ("nonce", "n-0S6_WzA2Mj"),
            ("code_challenge", CHALLENGE),
            ("code_challenge_method", "S256"),
            ("email", email),
            ("password", PASSWORD),
        ])
        .await;
    response.assert_status_see_other();
    let redirect = location(&response);
    assert!(redirect.as_str().starts_with(WEB_REDIRECT));
    assert_eq!(query_value(&redirect, "state").as_deref(), Some("af0ifjsldkj"));
    query_value(&redirect, "code").expect("code in redirect")
}

async fn exchange_code(server: &TestServer, code: &str) -> TokenResponse {
    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", WEB_REDIRECT),
            ("client_id", "web"),
            ("code_verifier", VERIFIER),
        ])
        .await;
    response.assert_status_ok();
    assert_eq!(response.header(header::CACHE_CONTROL), "no-store");
    response.json::<TokenResponse>()
}

#[tokio::test]
async fn discovery_document_describes_the_provider() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    let doc: serde_json::Value = response.json();
    assert_eq!(doc["issuer"], common::ISSUER);
    assert_eq!(
        doc["token_endpoint"],
        format!("{}/oauth2/token", common::ISSUER)
    );
    assert_eq!(
        doc["jwks_uri"],
        format!("{}/.well-known/jwks.json", common::ISSUER)
    );
    assert_eq!(doc["code_challenge_methods_supported"], serde_json::json!(["S256"]));
    let scopes: Vec<String> = serde_json::from_value(doc["scopes_supported"].clone()).unwrap();
    for scope in ["openid", "profile", "email", "offline_access", "api.read", "api.write"] {
        assert!(scopes.iter().any(|s| s == scope), "missing {scope}");
    }
}

#[tokio::test]
async fn jwks_publishes_the_signing_key() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server.get("/.well-known/jwks.json").await;
    response.assert_status_ok();
    let jwks: Jwks = response.json();
    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].kid, env.issuer.keys().active_kid());
    assert_eq!(jwks.keys[0].alg, "EdDSA");
}

#[tokio::test]
async fn health_check_pings_the_database() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn authorize_redirects_to_the_login_page() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "web")
        .add_query_param("redirect_uri", WEB_REDIRECT)
        .add_query_param("scope", "openid")
        .add_query_param("state", "abc")
        .add_query_param("code_challenge", CHALLENGE)
        .add_query_param("code_challenge_method", "S256")
        .await;
    response.assert_status_see_other();
    let login = location(&response);
    assert_eq!(login.host_str(), Some("login.example.org"));
    assert_eq!(login.path(), "/login");
    assert_eq!(query_value(&login, "client_id").as_deref(), Some("web"));
    assert_eq!(query_value(&login, "state").as_deref(), Some("abc"));
}

#[tokio::test]
async fn authorize_rejects_unregistered_redirect_without_redirecting() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "web")
        .add_query_param("redirect_uri", "https://evil.example.com/cb")
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn authorize_reports_protocol_errors_to_the_client() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "token")
        .add_query_param("client_id", "web")
        .add_query_param("redirect_uri", WEB_REDIRECT)
        .add_query_param("state", "s1")
        .await;
    response.assert_status_see_other();
    let redirect = location(&response);
    assert!(redirect.as_str().starts_with(WEB_REDIRECT));
    assert_eq!(
        query_value(&redirect, "error").as_deref(),
        Some("unsupported_response_type")
    );
    assert_eq!(query_value(&redirect, "state").as_deref(), Some("s1"));
}

#[tokio::test]
async fn wrong_password_returns_to_login_with_error() {
    let env = TestEnv::new().await;
    env.confirmed_user("alice@example.org").await;
    let server = server(&env);

    let response = server
        .post("/oauth2/authorize")
        .form(&[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", WEB_REDIRECT),
            ("scope", "openid"),
            ("code_challenge", CHALLENGE),
            ("code_challenge_method", "S256"),
            ("email", "alice@example.org"),
            ("password", "not the password"),
        ])
        .await;
    response.assert_status_see_other();
    let login = location(&response);
    assert_eq!(login.path(), "/login");
    assert!(query_value(&login, "error").is_some());
    assert_eq!(
        query_value(&login, "login_hint").as_deref(),
        Some("alice@example.org")
    );
}

#[tokio::test]
async fn code_flow_token_userinfo_and_revocation() {
    let env = TestEnv::new().await;
    env.confirmed_user("alice@example.org").await;
    let server = server(&env);

    let code = authorize(&server, "alice@example.org", "openid email offline_access").await;
    let tokens = exchange_code(&server, &code).await;
    assert!(tokens.id_token.is_some());
    let refresh_token = tokens.refresh_token.clone().expect("refresh token");

    let response = server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    response.assert_status_ok();
    let info: serde_json::Value = response.json();
    assert_eq!(info["email"], "alice@example.org");
    assert_eq!(info["email_verified"], true);
    assert!(info["sub"].is_string());

    // The code is single-use.
    let replay = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", WEB_REDIRECT),
            ("client_id", "web"),
            ("code_verifier", VERIFIER),
        ])
        .await;
    replay.assert_status_bad_request();
    let body: serde_json::Value = replay.json();
    assert_eq!(body["error"], "invalid_grant");

    // Replay revoked the family, so a fresh login is needed for the revocation check.
    let code = authorize(&server, "alice@example.org", "openid offline_access").await;
    let tokens = exchange_code(&server, &code).await;
    let refresh_token_2 = tokens.refresh_token.expect("refresh token");
    assert_ne!(refresh_token, refresh_token_2);

    server
        .post("/oauth2/revoke")
        .form(&[
            ("token", refresh_token_2.as_str()),
            ("token_type_hint", "refresh_token"),
            ("client_id", "web"),
        ])
        .await
        .assert_status_ok();

    let refreshed = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token_2.as_str()),
            ("client_id", "web"),
        ])
        .await;
    refreshed.assert_status_bad_request();
    let body: serde_json::Value = refreshed.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn client_credentials_with_basic_authentication() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("backend", common::BACKEND_SECRET))
        .form(&[("grant_type", "client_credentials"), ("scope", "api.write")])
        .await;
    response.assert_status_ok();
    let tokens: TokenResponse = response.json();
    assert_eq!(tokens.scope, "api.write");
    assert!(tokens.refresh_token.is_none());

    let response = server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer(&tokens.access_token))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "insufficient_scope");
}

#[tokio::test]
async fn bad_client_secret_is_unauthorized() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("backend", "wrong"))
        .form(&[("grant_type", "client_credentials")])
        .await;
    response.assert_status_unauthorized();
    assert!(
        response
            .maybe_header(header::WWW_AUTHENTICATE)
            .is_some()
    );
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn unsupported_grant_type_is_rejected() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("client_id", "backend"),
            ("client_secret", common::BACKEND_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn userinfo_requires_a_valid_bearer_token() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let missing = server.get("/oauth2/userinfo").await;
    missing.assert_status_unauthorized();

    let garbage = server
        .get("/oauth2/userinfo")
        .add_header(header::AUTHORIZATION, bearer("not-a-jwt"))
        .await;
    garbage.assert_status_unauthorized();
    let body: serde_json::Value = garbage.json();
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn registration_sends_a_working_confirmation_link() {
    let env = TestEnv::new().await;
    let server = server(&env);

    let response = server
        .post("/account/register")
        .json(&serde_json::json!({
            "email": "new@example.org",
            "password": PASSWORD,
            "name": "New User",
            "claims": { "locale": "de-DE" }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let account: serde_json::Value = response.json();
    assert_eq!(account["email_verified"], false);

    let messages = env.mailer.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to, "new@example.org");
    let link = messages[0]
        .text_body
        .split_whitespace()
        .find(|w| w.contains("/account/verify?token="))
        .expect("verification link in email");
    let token = url::Url::parse(link)
        .ok()
        .and_then(|u| query_value(&u, "token"))
        .expect("token parameter");

    // Unconfirmed accounts cannot sign in yet.
    let denied = server
        .post("/oauth2/authorize")
        .form(&[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", WEB_REDIRECT),
            ("code_challenge", CHALLENGE),
            ("code_challenge_method", "S256"),
            ("email", "new@example.org"),
            ("password", PASSWORD),
        ])
        .await;
    denied.assert_status_see_other();
    assert_eq!(location(&denied).path(), "/login");

    let verified = server
        .get("/account/verify")
        .add_query_param("token", &token)
        .await;
    verified.assert_status_ok();
    let account: serde_json::Value = verified.json();
    assert_eq!(account["email_verified"], true);

    // Tokens are single-use.
    server
        .get("/account/verify")
        .add_query_param("token", &token)
        .await
        .assert_status_bad_request();

    authorize(&server, "new@example.org", "openid").await;
}

#[tokio::test]
async fn registration_rejects_duplicates_and_weak_passwords() {
    let env = TestEnv::new().await;
    env.confirmed_user("taken@example.org").await;
    let server = server(&env);

    let duplicate = server
        .post("/account/register")
        .json(&serde_json::json!({ "email": "Taken@Example.org", "password": PASSWORD }))
        .await;
    assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);

    let weak = server
        .post("/account/register")
        .json(&serde_json::json!({ "email": "weak@example.org", "password": "short" }))
        .await;
    weak.assert_status_bad_request();
    let body: serde_json::Value = weak.json();
    assert_eq!(body["error"], "invalid_request");

    assert!(env.mailer.messages().is_empty());
}

/// Pull the confirmation token out of the most recent email.
fn latest_confirmation_token(env: &TestEnv) -> String {
    let messages = env.mailer.messages();
    let message = messages.last().expect("confirmation email");
    let link = message
        .text_body
        .split_whitespace()
        .find(|w| w.contains("/account/verify?token="))
        .expect("verification link in email");
    url::Url::parse(link)
        .ok()
        .and_then(|u| query_value(&u, "token"))
        .expect("token parameter")
}

#[tokio::test]
async fn registration_can_be_retried_after_the_email_failed() {
    let env = TestEnv::new().await;
    let server = server(&env);
    let body = serde_json::json!({ "email": "retry@example.org", "password": PASSWORD });

    env.mailer.set_failing(true);
    let failed = server.post("/account/register").json(&body).await;
    assert_eq!(failed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(env.mailer.messages().is_empty());

    env.mailer.set_failing(false);
    let retried = server.post("/account/register").json(&body).await;
    assert_eq!(retried.status_code(), StatusCode::CREATED);
    assert_eq!(env.mailer.messages().len(), 1);

    let token = latest_confirmation_token(&env);
    server
        .get("/account/verify")
        .add_query_param("token", &token)
        .await
        .assert_status_ok();
    authorize(&server, "retry@example.org", "openid").await;

    // Once confirmed, the address is taken for good.
    let again = server.post("/account/register").json(&body).await;
    assert_eq!(again.status_code(), StatusCode::CONFLICT);
    assert_eq!(env.mailer.messages().len(), 1);
}

#[tokio::test]
async fn pending_registration_cannot_be_taken_over_with_another_password() {
    let env = TestEnv::new().await;
    let server = server(&env);

    server
        .post("/account/register")
        .json(&serde_json::json!({ "email": "pending@example.org", "password": PASSWORD }))
        .await
        .assert_status(StatusCode::CREATED);
    let first_token = latest_confirmation_token(&env);

    let other = server
        .post("/account/register")
        .json(&serde_json::json!({
            "email": "pending@example.org",
            "password": "a different passphrase"
        }))
        .await;
    assert_eq!(other.status_code(), StatusCode::CONFLICT);
    let body: serde_json::Value = other.json();
    assert_eq!(body["error"], "already_registered");
    assert_eq!(env.mailer.messages().len(), 1);

    // A resend with the same password replaces the earlier token.
    server
        .post("/account/register")
        .json(&serde_json::json!({ "email": "pending@example.org", "password": PASSWORD }))
        .await
        .assert_status(StatusCode::CREATED);
    assert_eq!(env.mailer.messages().len(), 2);
    server
        .get("/account/verify")
        .add_query_param("token", &first_token)
        .await
        .assert_status_bad_request();
    server
        .get("/account/verify")
        .add_query_param("token", &latest_confirmation_token(&env))
        .await
        .assert_status_ok();
}
