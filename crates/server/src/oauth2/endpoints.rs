//! OAuth2 HTTP endpoints.
//!
//! Implements the token-facing endpoints of the authorization server:
//! - Token endpoint
//! - Token revocation
//! - UserInfo (OpenID Connect)

use crate::error::ProtocolError;
use crate::issuer::{TokenGrant, TokenResponse, parse_scope};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router (mounted under `/oauth2`).
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(super::authorize::authorize, super::authorize::authorize_submit))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(userinfo))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// `authorization_code`, `refresh_token`, `client_credentials` or `password`
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub code_verifier: Option<String>,
    /// Resource owner email (password grant)
    pub username: Option<String>,
    /// Resource owner password (password grant)
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        if let ProtocolError::Server(detail) = &self {
            tracing::error!(
                name = "oauth2.server_error",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %detail,
                message = "request failed with a server error"
            );
        }
        let status = self.status();
        let body = ErrorResponse {
            error: self.error_code().to_string(),
            error_description: self.description(),
        };
        let mut response = (status, Json(body)).into_response();
        let challenge = match &self {
            ProtocolError::InvalidToken => Some(r#"Bearer error="invalid_token""#),
            ProtocolError::InsufficientScope(_) => Some(r#"Bearer error="insufficient_scope""#),
            ProtocolError::InvalidClient => Some(r#"Basic realm="oauth2""#),
            _ => None,
        };
        if let Some(challenge) = challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params), fields(grant_type = %params.grant_type))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange a grant for tokens",
    description = "Exchanges an authorization code, refresh token, client credentials or resource owner \
                   credentials for tokens.\n\n\
                   **Supported grant types:**\n\
                   - `authorization_code`: exchange a code (with `code_verifier` when PKCE was used)\n\
                   - `refresh_token`: rotate a refresh token; the presented token is consumed\n\
                   - `client_credentials`: confidential clients only, API scopes only\n\
                   - `password`: resource owner email and password\n\n\
                   **Client authentication:** HTTP Basic, or `client_id`/`client_secret` in the body. \
                   Public clients send only `client_id`.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued successfully", body = TokenResponse),
        (status = 400, description = "Invalid request, grant or scope", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Result<Response, ProtocolError> {
    let (client_id, client_secret) =
        extract_client_credentials(&headers, params.client_id.clone(), params.client_secret.clone());
    let client_id =
        client_id.ok_or_else(|| ProtocolError::InvalidRequest("client_id is required".into()))?;

    let client = state
        .issuer
        .registry()
        .authenticate(&client_id, client_secret.as_deref())
        .await?;

    let grant = token_grant(params)?;
    let tokens = state
        .issuer
        .exchange(&client, grant, OffsetDateTime::now_utc())
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        Json(tokens),
    )
        .into_response())
}

fn required(value: Option<String>, name: &str) -> Result<String, ProtocolError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProtocolError::InvalidRequest(format!("{name} is required")))
}

fn token_grant(params: TokenRequest) -> Result<TokenGrant, ProtocolError> {
    let scopes = parse_scope(params.scope.as_deref());
    match params.grant_type.as_str() {
        "authorization_code" => Ok(TokenGrant::AuthorizationCode {
            code: required(params.code, "code")?,
            redirect_uri: params.redirect_uri,
            code_verifier: params.code_verifier,
        }),
        "refresh_token" => Ok(TokenGrant::RefreshToken {
            refresh_token: required(params.refresh_token, "refresh_token")?,
            scopes,
        }),
        "client_credentials" => Ok(TokenGrant::ClientCredentials { scopes }),
        "password" => Ok(TokenGrant::Password {
            username: required(params.username, "username")?,
            password: required(params.password, "password")?,
            scopes,
        }),
        _ => Err(ProtocolError::UnsupportedGrantType),
    }
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke a refresh token",
    description = "Revokes a refresh token together with every token rotated from the same authorization. \
                   Implements RFC 7009 (OAuth 2.0 Token Revocation).\n\n\
                   **Behavior:**\n\
                   - Returns 200 OK even if the token was already revoked or doesn't exist (per RFC 7009)\n\
                   - Tokens issued to other clients are left untouched\n\
                   - Access tokens are self-contained JWTs and expire on their own",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked successfully (or was already invalid)"),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<RevokeRequest>,
) -> Result<StatusCode, ProtocolError> {
    let (client_id, client_secret) =
        extract_client_credentials(&headers, params.client_id, params.client_secret);
    let client_id =
        client_id.ok_or_else(|| ProtocolError::InvalidRequest("client_id is required".into()))?;
    let client = state
        .issuer
        .registry()
        .authenticate(&client_id, client_secret.as_deref())
        .await?;

    if let Err(e) = state
        .issuer
        .revoke(&client, &params.token, params.token_type_hint.as_deref())
        .await
    {
        // RFC 7009: the client cannot act on failures, so do not leak them.
        tracing::error!(
            name = "oauth2.revoke.failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            message = "token revocation failed"
        );
    }
    Ok(StatusCode::OK)
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Get authenticated user's profile information",
    description = "Returns claims about the authenticated user. Requires a valid access token with the `openid` scope.\n\n\
                   **Returned claims depend on granted scopes:**\n\
                   - `openid`: `sub` (subject identifier)\n\
                   - `email`: `email`, `email_verified`\n\
                   - `profile`: `name` and other profile claims present on the account\n\n\
                   **Authentication:** Include the access token as a Bearer token in the Authorization header.",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User profile claims as a JSON object", content_type = "application/json"),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Token does not have required `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Map<String, serde_json::Value>>, ProtocolError> {
    let token = bearer_token(&headers).ok_or(ProtocolError::InvalidToken)?;
    let claims = state.issuer.validate_access_token(token)?;
    Ok(Json(state.issuer.userinfo(&claims).await?))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Client credentials from HTTP Basic (RFC 6749 Section 2.3.1) or the form body.
pub(crate) fn extract_client_credentials(
    headers: &HeaderMap,
    body_client_id: Option<String>,
    body_client_secret: Option<String>,
) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
        && let (Ok(id), Ok(secret)) = (urlencoding::decode(id), urlencoding::decode(secret))
    {
        let secret = (!secret.is_empty()).then(|| secret.into_owned());
        return (Some(id.into_owned()), secret);
    }

    (body_client_id, body_client_secret.filter(|s| !s.is_empty()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Redirect to the client with an error (RFC 6749 Section 4.1.2.1).
pub(crate) fn error_redirect(
    redirect_uri: &str,
    state: Option<&str>,
    error: &ProtocolError,
) -> Response {
    let Ok(mut redirect_url) = url::Url::parse(redirect_uri) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: error.error_code().to_string(),
                error_description: error.description(),
            }),
        )
            .into_response();
    };

    {
        let mut pairs = redirect_url.query_pairs_mut();
        pairs.append_pair("error", error.error_code());
        if let Some(desc) = error.description() {
            pairs.append_pair("error_description", &desc);
        }
        if let Some(s) = state {
            pairs.append_pair("state", s);
        }
    }

    Redirect::to(redirect_url.as_str()).into_response()
}
