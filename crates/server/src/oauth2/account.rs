//! Account registration and email confirmation.

use crate::AppResources;
use crate::email::VerificationEmail;
use crate::identity::{NewUser, UserError};
use crate::oauth2::endpoints::ErrorResponse;
use crate::oauth2::state::OAuth2State;
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// OpenAPI tag for account endpoints
pub const ACCOUNT_TAG: &str = "Account";

/// Creates the account router (mounted under `/account`).
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(register))
        .routes(routes!(verify))
        .with_state(state)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    /// Additional profile claims, e.g. `locale` or `given_name`
    #[serde(default)]
    #[schema(value_type = Object)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: String,
}

fn error(status: StatusCode, code: &str, description: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            error_description: Some(description.into()),
        }),
    )
        .into_response()
}

/// Register a new account.
#[tracing::instrument(skip(state, resources, payload))]
#[utoipa::path(
    post,
    path = "/register",
    tag = ACCOUNT_TAG,
    operation_id = "Register Account",
    summary = "Create an account with email and password",
    description = "Creates an account and sends an email with a confirmation link. \
                   Depending on configuration, the account cannot sign in until the address is confirmed. \
                   Registering again for an unconfirmed address with the same password sends a new link.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, confirmation email sent", body = AccountResponse),
        (status = 400, description = "Invalid email address or weak password", body = ErrorResponse),
        (status = 409, description = "Email address already registered and confirmed, or pending with another password", body = ErrorResponse),
        (status = 500, description = "Account created but the confirmation email could not be sent", body = ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<OAuth2State>,
    Extension(resources): Extension<AppResources>,
    Json(payload): Json<RegisterRequest>,
) -> Response {
    let lifetime = Duration::seconds(resources.config.tokens.email_verification_lifetime);
    let new_user = NewUser {
        email: &payload.email,
        password: &payload.password,
        name: payload.name.as_deref(),
        claims: payload.claims.clone(),
    };

    let (user, token) = match state
        .users
        .create_user(new_user, lifetime, OffsetDateTime::now_utc())
        .await
    {
        Ok(created) => created,
        Err(e @ (UserError::InvalidEmail | UserError::WeakPassword)) => {
            return error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
        }
        Err(e @ UserError::DuplicateEmail) => {
            return error(StatusCode::CONFLICT, "already_registered", e.to_string());
        }
        Err(e) => {
            tracing::error!(
                name = "account.register.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "failed to create user"
            );
            return error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "failed to create account",
            );
        }
    };

    let verify_url = format!(
        "{}/account/verify?token={}",
        state.issuer_url(),
        urlencoding::encode(&token)
    );
    let message = VerificationEmail {
        issuer: state.issuer_url().to_string(),
        verify_url,
    }
    .into_message(&user.email);

    if let Err(e) = resources.mailer.send(&message).await {
        tracing::error!(
            name = "account.register.email_send_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            user_id = %user.id,
            message = "failed to send verification email"
        );
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "failed to send verification email",
        );
    }

    (
        StatusCode::CREATED,
        Json(AccountResponse {
            id: user.id,
            email: user.email,
            email_verified: user.email_verified,
        }),
    )
        .into_response()
}

/// Confirm an email address.
#[tracing::instrument(skip(state, query))]
#[utoipa::path(
    get,
    path = "/verify",
    tag = ACCOUNT_TAG,
    operation_id = "Verify Email",
    summary = "Confirm an email address",
    description = "Consumes the token sent in the confirmation email. Tokens are single-use and expire.",
    params(
        ("token" = String, Query, description = "Token from the confirmation email."),
    ),
    responses(
        (status = 200, description = "Email address confirmed", body = AccountResponse),
        (status = 400, description = "Unknown or expired token", body = ErrorResponse),
    )
)]
pub async fn verify(State(state): State<OAuth2State>, Query(query): Query<VerifyQuery>) -> Response {
    match state
        .users
        .confirm_email(&query.token, OffsetDateTime::now_utc())
        .await
    {
        Ok(Some(user)) => {
            tracing::info!(user_id = %user.id, "email address confirmed");
            Json(AccountResponse {
                id: user.id,
                email: user.email,
                email_verified: user.email_verified,
            })
            .into_response()
        }
        Ok(None) => error(
            StatusCode::BAD_REQUEST,
            "invalid_token",
            "verification link is invalid or has expired",
        ),
        Err(e) => {
            tracing::error!(
                name = "account.verify.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "failed to confirm email address"
            );
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "failed to confirm email address",
            )
        }
    }
}
