//! Authorization endpoint.
//!
//! `GET /oauth2/authorize` validates the request and sends the user agent to the
//! frontend login page. The login page posts the credentials back to
//! `POST /oauth2/authorize`, which redirects to the client with a code.

use crate::issuer::{AuthorizationRequest, AuthorizeError, SignInError};
use crate::oauth2::endpoints::{ErrorResponse, error_redirect};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Credentials submitted by the login page together with the original request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeSubmission {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub email: String,
    pub password: String,
}

impl AuthorizeSubmission {
    fn request(&self) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: self.response_type.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            nonce: self.nonce.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
            login_hint: Some(self.email.clone()),
        }
    }
}

fn authorize_error_response(err: AuthorizeError) -> Response {
    match err {
        AuthorizeError::Invalid(error) => {
            tracing::debug!(error = %error, "rejected authorization request");
            error.into_response()
        }
        AuthorizeError::Redirect {
            redirect_uri,
            state,
            error,
        } => {
            tracing::debug!(error = %error, "authorization error returned to client");
            error_redirect(&redirect_uri, state.as_deref(), &error)
        }
    }
}

/// Login page URL carrying the original request, plus an optional error message.
fn login_url(
    state: &OAuth2State,
    request: &AuthorizationRequest,
    error: Option<&str>,
) -> Result<url::Url, url::ParseError> {
    let mut url = url::Url::parse(&format!("{}/login", state.frontend_url))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("response_type", &request.response_type);
        pairs.append_pair("client_id", &request.client_id);
        let optional = [
            ("redirect_uri", &request.redirect_uri),
            ("scope", &request.scope),
            ("state", &request.state),
            ("nonce", &request.nonce),
            ("code_challenge", &request.code_challenge),
            ("code_challenge_method", &request.code_challenge_method),
            ("login_hint", &request.login_hint),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                pairs.append_pair(name, value);
            }
        }
        if let Some(error) = error {
            pairs.append_pair("error", error);
        }
    }
    Ok(url)
}

fn redirect_to_login(
    state: &OAuth2State,
    request: &AuthorizationRequest,
    error: Option<&str>,
) -> Response {
    match login_url(state, request, error) {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => crate::error::ProtocolError::Server(format!("invalid frontend_url: {e}"))
            .into_response(),
    }
}

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, params), fields(client_id = %params.client_id))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Initiate OAuth2 authorization flow",
    description = "Starts the OAuth2 Authorization Code flow. A valid request is redirected to the login page, \
                   which posts the user's credentials back to this endpoint.\n\n\
                   **PKCE:** public clients and clients configured to require it must send \
                   `code_challenge` with `code_challenge_method=S256`.\n\n\
                   **Errors:** an unknown client or unregistered redirect URI is answered directly with 400. \
                   Any later error is returned to the client's redirect URI.",
    params(
        ("response_type" = String, Query, description = "OAuth2 response type. Must be `code`."),
        ("client_id" = String, Query, description = "The client identifier issued during client registration."),
        ("redirect_uri" = Option<String>, Query, description = "Must match a registered redirect URI. May be omitted when the client has exactly one."),
        ("scope" = Option<String>, Query, description = "Space-separated list of requested scopes (e.g., `openid profile email`)."),
        ("state" = Option<String>, Query, description = "Opaque value for CSRF protection. Returned unchanged in the redirect."),
        ("nonce" = Option<String>, Query, description = "String value for replay protection. Included in the ID token if provided."),
        ("code_challenge" = Option<String>, Query, description = "PKCE code challenge: base64url-encoded SHA-256 of the code_verifier."),
        ("code_challenge_method" = Option<String>, Query, description = "PKCE challenge method. Must be `S256`."),
        ("login_hint" = Option<String>, Query, description = "Email address hint to pre-fill the login form."),
    ),
    responses(
        (status = 303, description = "Redirect to the login page, or back to the client with an error"),
        (status = 400, description = "Unknown client or unregistered redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    Query(params): Query<AuthorizationRequest>,
) -> Response {
    match state.issuer.validate_authorization_request(&params).await {
        Ok(_) => redirect_to_login(&state, &params, None),
        Err(e) => authorize_error_response(e),
    }
}

/// Credential submission from the login page.
#[tracing::instrument(skip(state, form), fields(client_id = %form.client_id))]
#[utoipa::path(
    post,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize Submit",
    summary = "Submit credentials for an authorization request",
    description = "Authenticates the user with email and password. On success, creates an authorization code \
                   and redirects to the client's redirect_uri with `code` and `state`.\n\n\
                   Wrong credentials or an unconfirmed email address redirect back to the login page with an `error`.",
    request_body(
        content = AuthorizeSubmission,
        content_type = "application/x-www-form-urlencoded",
        description = "Credentials and the original authorization request parameters"
    ),
    responses(
        (status = 303, description = "Redirect to the client with a code, or back to the login page with an error"),
        (status = 400, description = "Unknown client or unregistered redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize_submit(
    State(state): State<OAuth2State>,
    Form(form): Form<AuthorizeSubmission>,
) -> Response {
    let request = form.request();
    let authorization = match state.issuer.validate_authorization_request(&request).await {
        Ok(a) => a,
        Err(e) => return authorize_error_response(e),
    };

    let now = OffsetDateTime::now_utc();
    let user = match state.issuer.sign_in(&form.email, &form.password, now).await {
        Ok(user) => user,
        Err(SignInError::InvalidCredentials) => {
            return redirect_to_login(&state, &request, Some("Invalid email or password"));
        }
        Err(SignInError::Inactive) => {
            return redirect_to_login(
                &state,
                &request,
                Some("Please confirm your email address before signing in"),
            );
        }
        Err(SignInError::Protocol(e)) => return e.into_response(),
    };

    let code = match state
        .issuer
        .issue_authorization_code(&authorization, &user, now)
        .await
    {
        Ok(code) => code,
        Err(e) => {
            return error_redirect(
                &authorization.redirect_uri,
                authorization.state.as_deref(),
                &e,
            );
        }
    };

    let mut redirect = match url::Url::parse(&authorization.redirect_uri) {
        Ok(url) => url,
        Err(e) => {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "invalid_request".to_string(),
                    error_description: Some(format!("invalid redirect_uri: {e}")),
                }),
            )
                .into_response();
        }
    };
    {
        let mut pairs = redirect.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(s) = &authorization.state {
            pairs.append_pair("state", s);
        }
    }
    tracing::info!(user_id = %user.id, "authorization code issued");
    Redirect::to(redirect.as_str()).into_response()
}
