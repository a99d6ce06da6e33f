//! Token issuer.
//!
//! Validates authorization requests, mints authorization codes and signed tokens,
//! and drives the persisted grant state machine for codes and refresh tokens.

pub mod claims;
pub mod keys;
pub mod pkce;

pub use claims::{AccessTokenClaims, IdTokenClaims};
pub use keys::{Jwk, Jwks, KeyError, KeySet};

use crate::config::AppConfig;
use crate::crypto::{generate_handle, left_half_hash};
use crate::entity::{client, user};
use crate::error::ProtocolError;
use crate::grants::{AuthorizationCodeData, GrantStore, GrantType, NewGrant, RefreshTokenData};
use crate::identity::UserStore;
use crate::profile::{ProfileError, ProfileService};
use crate::registry::{ClientRegistry, ResolvedScopes, ResourceCatalog};
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

impl From<ProfileError> for ProtocolError {
    fn from(err: ProfileError) -> Self {
        ProtocolError::Server(err.to_string())
    }
}

impl From<KeyError> for ProtocolError {
    fn from(err: KeyError) -> Self {
        ProtocolError::Server(err.to_string())
    }
}

/// Issuer identity and token lifetimes.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub issuer: String,
    pub access_token_lifetime: Duration,
    pub id_token_lifetime: Duration,
    pub authorization_code_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
}

impl IssuerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            issuer: config.domain.issuer_url.clone(),
            access_token_lifetime: Duration::seconds(config.tokens.access_token_lifetime),
            id_token_lifetime: Duration::seconds(config.tokens.id_token_lifetime),
            authorization_code_lifetime: Duration::seconds(
                config.tokens.authorization_code_lifetime,
            ),
            refresh_token_lifetime: Duration::seconds(config.tokens.refresh_token_lifetime),
        }
    }

    /// Audience of access tokens that grant no API scope.
    pub fn default_audience(&self) -> String {
        format!("{}/resources", self.issuer)
    }
}

/// Authorization request parameters (OAuth2 Section 4.1.1, OIDC Core 3.1.2.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationRequest {
    /// Must be "code"
    pub response_type: String,
    pub client_id: String,
    /// Must match a registered redirect URI exactly
    pub redirect_uri: Option<String>,
    /// Space-separated list of requested scopes
    pub scope: Option<String>,
    /// Opaque value returned unchanged to the client
    pub state: Option<String>,
    /// Included in the ID token
    pub nonce: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE method, only "S256" is supported
    pub code_challenge_method: Option<String>,
    /// Email hint to pre-fill the login form
    pub login_hint: Option<String>,
}

/// An authorization request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    pub client: client::Model,
    pub redirect_uri: String,
    /// Whether `redirect_uri` was named in the request rather than defaulted.
    pub redirect_uri_requested: bool,
    pub scopes: ResolvedScopes,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
}

/// Authorization request failure.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    /// The client or redirect URI cannot be trusted; answer the user agent directly.
    #[error("{0}")]
    Invalid(ProtocolError),
    /// Report the error to the client's redirect URI.
    #[error("{error}")]
    Redirect {
        redirect_uri: String,
        state: Option<String>,
        error: ProtocolError,
    },
}

/// Why a resource owner could not sign in.
#[derive(Debug, Error)]
pub enum SignInError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is not active")]
    Inactive,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Token request after client authentication, by grant type.
#[derive(Debug, Clone)]
pub enum TokenGrant {
    AuthorizationCode {
        code: String,
        redirect_uri: Option<String>,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
        scopes: Vec<String>,
    },
    ClientCredentials {
        scopes: Vec<String>,
    },
    Password {
        username: String,
        password: String,
        scopes: Vec<String>,
    },
}

/// Successful token response (RFC 6749 Section 5.1).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Split a space-separated scope parameter.
pub fn parse_scope(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

struct Subject<'a> {
    user: &'a user::Model,
    auth_time: i64,
    nonce: Option<&'a str>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    settings: Arc<IssuerSettings>,
    keys: KeySet,
    grants: GrantStore,
    registry: ClientRegistry,
    catalog: ResourceCatalog,
    users: UserStore,
    profile: Arc<dyn ProfileService>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.settings.issuer)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(
        settings: IssuerSettings,
        keys: KeySet,
        grants: GrantStore,
        registry: ClientRegistry,
        catalog: ResourceCatalog,
        users: UserStore,
        profile: Arc<dyn ProfileService>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            keys,
            grants,
            registry,
            catalog,
            users,
            profile,
        }
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Validate an authorization request before the user signs in.
    #[tracing::instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn validate_authorization_request(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<ValidatedAuthorization, AuthorizeError> {
        let client = self
            .registry
            .find(&request.client_id)
            .await
            .map_err(|e| AuthorizeError::Invalid(e.into()))?
            .ok_or_else(|| {
                AuthorizeError::Invalid(ProtocolError::InvalidRequest("unknown client".into()))
            })?;

        let redirect_uri = match &request.redirect_uri {
            Some(uri) if client.is_redirect_uri_allowed(uri) => uri.clone(),
            Some(_) => {
                return Err(AuthorizeError::Invalid(ProtocolError::InvalidRequest(
                    "redirect_uri is not registered for this client".into(),
                )));
            }
            None => match client.redirect_uris_list().as_slice() {
                [only] => only.clone(),
                _ => {
                    return Err(AuthorizeError::Invalid(ProtocolError::InvalidRequest(
                        "redirect_uri is required".into(),
                    )));
                }
            },
        };

        let redirect = |error: ProtocolError| AuthorizeError::Redirect {
            redirect_uri: redirect_uri.clone(),
            state: request.state.clone(),
            error,
        };

        if request.response_type != "code" {
            return Err(redirect(ProtocolError::UnsupportedResponseType));
        }
        if !client.is_grant_type_allowed(GrantType::AuthorizationCode.as_str()) {
            return Err(redirect(ProtocolError::UnauthorizedClient(
                "client may not use the authorization code flow".into(),
            )));
        }

        let scopes = self
            .catalog
            .resolve(&client, &parse_scope(request.scope.as_deref()))
            .await
            .map_err(&redirect)?;

        match (&request.code_challenge, request.code_challenge_method.as_deref()) {
            (Some(_), Some(pkce::S256)) => {}
            (Some(_), _) => {
                return Err(redirect(ProtocolError::InvalidRequest(
                    "only the S256 code challenge method is supported".into(),
                )));
            }
            (None, _) if client.is_public() || client.require_pkce => {
                return Err(redirect(ProtocolError::InvalidRequest(
                    "code_challenge is required".into(),
                )));
            }
            (None, _) => {}
        }

        Ok(ValidatedAuthorization {
            redirect_uri: redirect_uri.clone(),
            redirect_uri_requested: request.redirect_uri.is_some(),
            scopes,
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            code_challenge: request.code_challenge.clone(),
            client,
        })
    }

    /// Authenticate a resource owner by email and password.
    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<user::Model, SignInError> {
        let user = self
            .users
            .verify_credentials(email, password)
            .await
            .map_err(ProtocolError::from)?
            .ok_or(SignInError::InvalidCredentials)?;
        if !self.profile.is_active(&user).await.map_err(ProtocolError::from)? {
            return Err(SignInError::Inactive);
        }
        self.users
            .record_login(&user.id, now)
            .await
            .map_err(ProtocolError::from)?;
        Ok(user)
    }

    /// Store an authorization code for a signed-in user and return its handle.
    #[tracing::instrument(skip(self, authorization, user), fields(client_id = %authorization.client.id, user_id = %user.id))]
    pub async fn issue_authorization_code(
        &self,
        authorization: &ValidatedAuthorization,
        user: &user::Model,
        now: OffsetDateTime,
    ) -> Result<String, ProtocolError> {
        let data = AuthorizationCodeData {
            redirect_uri: authorization.redirect_uri.clone(),
            redirect_uri_requested: authorization.redirect_uri_requested,
            scopes: authorization.scopes.all(),
            nonce: authorization.nonce.clone(),
            code_challenge: authorization.code_challenge.clone(),
            code_challenge_method: authorization
                .code_challenge
                .as_ref()
                .map(|_| pkce::S256.to_string()),
            auth_time: now.unix_timestamp(),
        };
        let issued = self
            .grants
            .issue(
                NewGrant {
                    grant_type: GrantType::AuthorizationCode,
                    client_id: &authorization.client.id,
                    subject_id: &user.id,
                    family_id: None,
                    lifetime: self.settings.authorization_code_lifetime,
                },
                &data,
                now,
            )
            .await?;
        Ok(issued.handle)
    }

    /// Token endpoint: exchange a grant for tokens on behalf of an authenticated client.
    #[tracing::instrument(skip(self, client, grant), fields(client_id = %client.id))]
    pub async fn exchange(
        &self,
        client: &client::Model,
        grant: TokenGrant,
        now: OffsetDateTime,
    ) -> Result<TokenResponse, ProtocolError> {
        match grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                self.exchange_code(client, &code, redirect_uri, code_verifier, now)
                    .await
            }
            TokenGrant::RefreshToken {
                refresh_token,
                scopes,
            } => self.refresh(client, &refresh_token, &scopes, now).await,
            TokenGrant::ClientCredentials { scopes } => {
                self.client_credentials(client, &scopes, now).await
            }
            TokenGrant::Password {
                username,
                password,
                scopes,
            } => {
                self.resource_owner_password(client, &username, &password, &scopes, now)
                    .await
            }
        }
    }

    fn require_grant_type(client: &client::Model, grant_type: &str) -> Result<(), ProtocolError> {
        if client.is_grant_type_allowed(grant_type) {
            Ok(())
        } else {
            Err(ProtocolError::UnauthorizedClient(format!(
                "client may not use the {grant_type} grant"
            )))
        }
    }

    /// Load the subject of a redeemed grant; gone or inactive users fail closed.
    async fn grant_subject(&self, subject_id: &str) -> Result<user::Model, ProtocolError> {
        let Some(user) = self.users.find_by_id(subject_id).await? else {
            tracing::debug!(subject_id, "grant subject no longer exists");
            return Err(ProtocolError::InvalidGrant);
        };
        if !self.profile.is_active(&user).await? {
            tracing::debug!(subject_id, "grant subject is not active");
            return Err(ProtocolError::InvalidGrant);
        }
        Ok(user)
    }

    /// Re-resolve stored scopes against the current client and catalog.
    async fn resolve_stored_scopes(
        &self,
        client: &client::Model,
        scopes: &[String],
    ) -> Result<ResolvedScopes, ProtocolError> {
        match self.catalog.resolve(client, scopes).await {
            Ok(resolved) => Ok(resolved),
            Err(ProtocolError::InvalidScope(reason)) => {
                tracing::debug!(reason, "stored scopes no longer granted");
                Err(ProtocolError::InvalidGrant)
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange_code(
        &self,
        client: &client::Model,
        code: &str,
        redirect_uri: Option<String>,
        code_verifier: Option<String>,
        now: OffsetDateTime,
    ) -> Result<TokenResponse, ProtocolError> {
        Self::require_grant_type(client, GrantType::AuthorizationCode.as_str())?;
        let grant = self
            .grants
            .redeem(code, GrantType::AuthorizationCode, &client.id, now)
            .await?;
        let data: AuthorizationCodeData = serde_json::from_str(&grant.data)
            .map_err(|e| ProtocolError::Server(e.to_string()))?;

        let redirect_matches = match redirect_uri.as_deref() {
            Some(uri) => uri == data.redirect_uri,
            None => !data.redirect_uri_requested,
        };
        if !redirect_matches {
            tracing::debug!("redirect_uri does not match the authorization request");
            return Err(ProtocolError::InvalidGrant);
        }

        match (&data.code_challenge, code_verifier.as_deref()) {
            (Some(challenge), Some(verifier)) if pkce::verify_s256(verifier, challenge) => {}
            (None, None) => {}
            _ => {
                tracing::debug!("PKCE verification failed");
                return Err(ProtocolError::InvalidGrant);
            }
        }

        let user = self.grant_subject(&grant.subject_id).await?;
        let scopes = self.resolve_stored_scopes(client, &data.scopes).await?;
        self.mint(
            client,
            Some(Subject {
                user: &user,
                auth_time: data.auth_time,
                nonce: data.nonce.as_deref(),
            }),
            &scopes,
            Some(&grant.family_id),
            now,
        )
        .await
    }

    async fn refresh(
        &self,
        client: &client::Model,
        refresh_token: &str,
        requested: &[String],
        now: OffsetDateTime,
    ) -> Result<TokenResponse, ProtocolError> {
        Self::require_grant_type(client, GrantType::RefreshToken.as_str())?;
        let grant = self
            .grants
            .redeem(refresh_token, GrantType::RefreshToken, &client.id, now)
            .await?;
        let data: RefreshTokenData = serde_json::from_str(&grant.data)
            .map_err(|e| ProtocolError::Server(e.to_string()))?;

        let scopes = if requested.is_empty() {
            data.scopes.clone()
        } else {
            if let Some(extra) = requested.iter().find(|s| !data.scopes.contains(s)) {
                return Err(ProtocolError::InvalidScope(format!(
                    "scope {extra} was not originally granted"
                )));
            }
            requested.to_vec()
        };

        let user = self.grant_subject(&grant.subject_id).await?;
        let scopes = self.resolve_stored_scopes(client, &scopes).await?;
        self.mint(
            client,
            Some(Subject {
                user: &user,
                auth_time: data.auth_time,
                nonce: None,
            }),
            &scopes,
            Some(&grant.family_id),
            now,
        )
        .await
    }

    async fn client_credentials(
        &self,
        client: &client::Model,
        requested: &[String],
        now: OffsetDateTime,
    ) -> Result<TokenResponse, ProtocolError> {
        if client.is_public() {
            return Err(ProtocolError::UnauthorizedClient(
                "public clients may not use the client_credentials grant".into(),
            ));
        }
        Self::require_grant_type(client, "client_credentials")?;

        let mut scopes = self.catalog.resolve(client, requested).await?;
        if requested.is_empty() {
            scopes.identity.clear();
            scopes.offline_access = false;
        } else if !scopes.identity.is_empty() || scopes.offline_access {
            return Err(ProtocolError::InvalidScope(
                "identity scopes require a user".into(),
            ));
        }
        self.mint(client, None, &scopes, None, now).await
    }

    async fn resource_owner_password(
        &self,
        client: &client::Model,
        username: &str,
        password: &str,
        requested: &[String],
        now: OffsetDateTime,
    ) -> Result<TokenResponse, ProtocolError> {
        Self::require_grant_type(client, "password")?;
        let scopes = self.catalog.resolve(client, requested).await?;
        let user = match self.sign_in(username, password, now).await {
            Ok(user) => user,
            Err(SignInError::Protocol(e)) => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "resource owner sign-in failed");
                return Err(ProtocolError::InvalidGrant);
            }
        };
        self.mint(
            client,
            Some(Subject {
                user: &user,
                auth_time: now.unix_timestamp(),
                nonce: None,
            }),
            &scopes,
            None,
            now,
        )
        .await
    }

    async fn mint(
        &self,
        client: &client::Model,
        subject: Option<Subject<'_>>,
        scopes: &ResolvedScopes,
        family_id: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<TokenResponse, ProtocolError> {
        let iat = now.unix_timestamp();
        let granted = scopes.all();
        let scope = granted.join(" ");

        let audiences = if scopes.audiences.is_empty() {
            vec![self.settings.default_audience()]
        } else {
            scopes.audiences.clone()
        };
        let jti = generate_handle().map_err(|e| ProtocolError::Server(e.to_string()))?;
        let access_claims = AccessTokenClaims {
            iss: self.settings.issuer.clone(),
            sub: subject.as_ref().map(|s| s.user.id.clone()),
            aud: audiences,
            client_id: client.id.clone(),
            scope: scope.clone(),
            iat,
            nbf: iat,
            exp: (now + self.settings.access_token_lifetime).unix_timestamp(),
            jti,
        };
        let access_token = self.keys.sign(&access_claims)?;

        let mut id_token = None;
        let mut refresh_token = None;
        if let Some(subject) = subject {
            if scopes.contains("openid") {
                let claim_types = self.catalog.claims_for_scopes(&scopes.identity).await?;
                let profile = self
                    .profile
                    .profile_claims(subject.user, &claim_types)
                    .await?;
                let id_claims = IdTokenClaims {
                    iss: self.settings.issuer.clone(),
                    sub: subject.user.id.clone(),
                    aud: client.id.clone(),
                    iat,
                    exp: (now + self.settings.id_token_lifetime).unix_timestamp(),
                    auth_time: subject.auth_time,
                    nonce: subject.nonce.map(String::from),
                    at_hash: Some(left_half_hash(&access_token)),
                    profile,
                };
                id_token = Some(self.keys.sign(&id_claims)?);
            }

            if scopes.offline_access && client.is_grant_type_allowed(GrantType::RefreshToken.as_str())
            {
                let issued = self
                    .grants
                    .issue(
                        NewGrant {
                            grant_type: GrantType::RefreshToken,
                            client_id: &client.id,
                            subject_id: &subject.user.id,
                            family_id,
                            lifetime: self.settings.refresh_token_lifetime,
                        },
                        &RefreshTokenData {
                            scopes: granted.clone(),
                            auth_time: subject.auth_time,
                        },
                        now,
                    )
                    .await?;
                refresh_token = Some(issued.handle);
            }
        }

        tracing::info!(
            client_id = %client.id,
            scope = %scope,
            id_token = id_token.is_some(),
            refresh_token = refresh_token.is_some(),
            "issued tokens"
        );

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.settings.access_token_lifetime.whole_seconds(),
            refresh_token,
            id_token,
            scope,
        })
    }

    /// Verify an access token issued by this provider.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ProtocolError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        // Audience is the resource server's concern.
        validation.validate_aud = false;
        validation.validate_nbf = true;
        self.keys
            .verify::<AccessTokenClaims>(token, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                ProtocolError::InvalidToken
            })
    }

    /// Claims released at the userinfo endpoint for a verified access token.
    #[tracing::instrument(skip(self, claims), fields(client_id = %claims.client_id))]
    pub async fn userinfo(
        &self,
        claims: &AccessTokenClaims,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ProtocolError> {
        if !claims.has_scope("openid") {
            return Err(ProtocolError::InsufficientScope(
                "token does not carry the openid scope".into(),
            ));
        }
        let sub = claims.sub.as_deref().ok_or(ProtocolError::InvalidToken)?;
        let user = self
            .users
            .find_by_id(sub)
            .await?
            .ok_or(ProtocolError::InvalidToken)?;
        if !self.profile.is_active(&user).await? {
            return Err(ProtocolError::InvalidToken);
        }

        let granted: Vec<String> = claims.scopes().map(String::from).collect();
        let claim_types = self.catalog.claims_for_scopes(&granted).await?;
        let mut info = self.profile.profile_claims(&user, &claim_types).await?;
        info.insert("sub".into(), serde_json::Value::from(user.id));
        Ok(info)
    }

    /// Revoke a refresh token (RFC 7009). Unknown tokens and other clients' tokens
    /// are ignored. Access tokens are self-contained and expire on their own.
    #[tracing::instrument(skip(self, client, token), fields(client_id = %client.id))]
    pub async fn revoke(
        &self,
        client: &client::Model,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<(), ProtocolError> {
        if token_type_hint == Some("access_token") && self.validate_access_token(token).is_ok() {
            tracing::debug!("access tokens are not revocable");
            return Ok(());
        }
        if self.grants.revoke(token, &client.id).await? {
            tracing::info!("revoked grant family");
        }
        Ok(())
    }
}
