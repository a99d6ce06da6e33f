//! OpenID Connect discovery and the public key set.

use crate::error::ProtocolError;
use crate::issuer::{Jwks, pkce};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use crate::registry::SUPPORTED_GRANT_TYPES;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the `/.well-known` router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(openid_configuration))
        .routes(routes!(jwks))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Returns the OpenID Connect Discovery document containing metadata about the provider: \
                   endpoint URLs, supported grant and response types, scopes and claims, \
                   client authentication methods and PKCE support.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(
    State(state): State<OAuth2State>,
) -> Result<Json<OpenIdConfiguration>, ProtocolError> {
    let issuer = state.issuer_url();
    let catalog = state.issuer.catalog();
    let scopes_supported = catalog.supported_scopes().await?;
    let mut claims: BTreeSet<String> = catalog
        .identity_resources()
        .await?
        .into_iter()
        .flat_map(|r| r.claim_types_list())
        .collect();
    claims.extend(["iss", "sub", "aud", "exp", "iat", "auth_time", "nonce"].map(String::from));

    Ok(Json(OpenIdConfiguration {
        issuer: issuer.to_string(),
        authorization_endpoint: format!("{issuer}/oauth2/authorize"),
        token_endpoint: format!("{issuer}/oauth2/token"),
        userinfo_endpoint: format!("{issuer}/oauth2/userinfo"),
        revocation_endpoint: format!("{issuer}/oauth2/revoke"),
        jwks_uri: format!("{issuer}/.well-known/jwks.json"),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: SUPPORTED_GRANT_TYPES.map(String::from).to_vec(),
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: vec!["EdDSA".to_string()],
        scopes_supported,
        claims_supported: claims.into_iter().collect(),
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
            "none".to_string(),
        ],
        code_challenge_methods_supported: vec![pkce::S256.to_string()],
    }))
}

/// Public signing keys.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = OAUTH2_TAG,
    operation_id = "JSON Web Key Set",
    summary = "Public keys for verifying issued tokens",
    description = "Every key that may have signed a still-valid token. The active key is listed first; \
                   rotated-out keys stay published until they are removed from the configuration.",
    responses(
        (status = 200, description = "JSON Web Key Set", body = Jwks),
    )
)]
pub async fn jwks(State(state): State<OAuth2State>) -> Json<Jwks> {
    Json(state.issuer.keys().jwks())
}
