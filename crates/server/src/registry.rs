//! Client registry and resource catalog.
//!
//! Both are read-mostly: requests only read them, writes happen at startup seeding or
//! through explicit registration/update calls.

use crate::config::{ApiResourceDescriptor, ClientSeed};
use crate::entity::{api_resource, client, identity_resource};
use crate::error::ProtocolError;
use crate::identity::{hash_password, verify_password};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, DbErr, EntityTrait, QueryOrder,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

/// Grant types the token endpoint understands.
pub const SUPPORTED_GRANT_TYPES: [&str; 4] = [
    "authorization_code",
    "refresh_token",
    "client_credentials",
    "password",
];

/// Scope that requests a refresh token.
pub const OFFLINE_ACCESS: &str = "offline_access";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("client {0} already exists")]
    DuplicateClient(String),
    #[error("client {0} not found")]
    UnknownClient(String),
    #[error("invalid client definition: {0}")]
    Invalid(String),
    #[error("secret hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Store(#[from] DbErr),
}

/// Client registration data.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub id: String,
    pub name: String,
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: Vec<String>,
    pub require_pkce: bool,
}

impl From<&ClientSeed> for NewClient {
    fn from(seed: &ClientSeed) -> Self {
        Self {
            id: seed.id.clone(),
            name: seed.name.clone(),
            secret: seed.secret.clone(),
            redirect_uris: seed.redirect_uris.clone(),
            grant_types: seed.grant_types.clone(),
            scopes: seed.scopes.clone(),
            require_pkce: seed.require_pkce,
        }
    }
}

/// Explicit update of an existing client. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: Option<String>,
    /// `Some(None)` turns the client into a public client.
    pub secret: Option<Option<String>>,
    pub redirect_uris: Option<Vec<String>>,
    pub grant_types: Option<Vec<String>>,
    pub scopes: Option<Vec<String>>,
    pub require_pkce: Option<bool>,
}

fn validate_definition(
    redirect_uris: &[String],
    grant_types: &[String],
    scopes: &[String],
) -> Result<(), RegistryError> {
    if grant_types.is_empty() {
        return Err(RegistryError::Invalid("no grant types".into()));
    }
    if let Some(unknown) = grant_types
        .iter()
        .find(|g| !SUPPORTED_GRANT_TYPES.contains(&g.as_str()))
    {
        return Err(RegistryError::Invalid(format!(
            "unsupported grant type {unknown}"
        )));
    }
    if grant_types.iter().any(|g| g == "authorization_code") && redirect_uris.is_empty() {
        return Err(RegistryError::Invalid(
            "authorization_code clients need a redirect URI".into(),
        ));
    }
    for uri in redirect_uris {
        let parsed = url::Url::parse(uri)
            .map_err(|e| RegistryError::Invalid(format!("redirect URI {uri}: {e}")))?;
        if parsed.fragment().is_some() {
            return Err(RegistryError::Invalid(format!(
                "redirect URI {uri} must not contain a fragment"
            )));
        }
    }
    if scopes.iter().any(|s| s.chars().any(char::is_whitespace)) {
        return Err(RegistryError::Invalid("scopes must not contain spaces".into()));
    }
    Ok(())
}

fn hash_secret(secret: &str) -> Result<String, RegistryError> {
    hash_password(secret).map_err(|e| RegistryError::Hash(e.to_string()))
}

/// Database-backed client registry.
#[derive(Clone, Debug)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, client_id: &str) -> Result<Option<client::Model>, DbErr> {
        client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await
    }

    /// Register a new client. The secret is stored as an Argon2 hash.
    #[tracing::instrument(skip(self, new), fields(client_id = %new.id))]
    pub async fn register(&self, new: NewClient) -> Result<client::Model, RegistryError> {
        validate_definition(&new.redirect_uris, &new.grant_types, &new.scopes)?;
        if self.find(&new.id).await?.is_some() {
            return Err(RegistryError::DuplicateClient(new.id));
        }
        let secret_hash = new.secret.as_deref().map(hash_secret).transpose()?;
        let now = OffsetDateTime::now_utc();
        let client = client::ActiveModel {
            id: Set(new.id),
            secret_hash: Set(secret_hash),
            name: Set(new.name),
            redirect_uris: Set(serde_json::Value::from(new.redirect_uris).to_string()),
            grant_types: Set(new.grant_types.join(" ")),
            scopes: Set(new.scopes.join(" ")),
            require_pkce: Set(new.require_pkce),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let client = client.insert(self.db.as_ref()).await?;
        tracing::info!(client_id = %client.id, public = client.is_public(), "registered client");
        Ok(client)
    }

    /// Apply an explicit update to an existing client.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(
        &self,
        client_id: &str,
        update: ClientUpdate,
    ) -> Result<client::Model, RegistryError> {
        let existing = self
            .find(client_id)
            .await?
            .ok_or_else(|| RegistryError::UnknownClient(client_id.to_string()))?;

        let redirect_uris = update
            .redirect_uris
            .clone()
            .unwrap_or_else(|| existing.redirect_uris_list());
        let grant_types = update
            .grant_types
            .clone()
            .unwrap_or_else(|| existing.grant_types_list());
        let scopes = update
            .scopes
            .clone()
            .unwrap_or_else(|| existing.scopes_list());
        validate_definition(&redirect_uris, &grant_types, &scopes)?;

        let mut active: client::ActiveModel = existing.into();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(secret) = update.secret {
            active.secret_hash = Set(secret.as_deref().map(hash_secret).transpose()?);
        }
        if let Some(require_pkce) = update.require_pkce {
            active.require_pkce = Set(require_pkce);
        }
        active.redirect_uris = Set(serde_json::Value::from(redirect_uris).to_string());
        active.grant_types = Set(grant_types.join(" "));
        active.scopes = Set(scopes.join(" "));
        active.updated_at = Set(OffsetDateTime::now_utc());
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Remove a client. Grants it still holds fail closed on their next use.
    pub async fn remove(&self, client_id: &str) -> Result<bool, DbErr> {
        let result = client::Entity::delete_by_id(client_id)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Authenticate a client at the token or revocation endpoint.
    ///
    /// Public clients authenticate by id alone and must not present a secret;
    /// confidential clients must present their secret.
    #[tracing::instrument(skip(self, secret))]
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<client::Model, ProtocolError> {
        let Some(client) = self.find(client_id).await? else {
            tracing::debug!("unknown client");
            return Err(ProtocolError::InvalidClient);
        };
        match (&client.secret_hash, secret) {
            (None, None) => Ok(client),
            (Some(hash), Some(provided)) if verify_password(provided, hash) => Ok(client),
            _ => {
                tracing::debug!("client authentication failed");
                Err(ProtocolError::InvalidClient)
            }
        }
    }
}

/// Catalog of API and identity resources.
#[derive(Clone, Debug)]
pub struct ResourceCatalog {
    db: Arc<DatabaseConnection>,
}

/// Scopes of a request split by the kind of resource they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScopes {
    pub identity: Vec<String>,
    pub api: Vec<String>,
    /// API resource names granted through `api`, used as token audiences.
    pub audiences: Vec<String>,
    pub offline_access: bool,
}

impl ResolvedScopes {
    pub fn all(&self) -> Vec<String> {
        let mut all = self.identity.clone();
        all.extend(self.api.iter().cloned());
        if self.offline_access {
            all.push(OFFLINE_ACCESS.to_string());
        }
        all
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.identity.iter().any(|s| s == scope)
            || self.api.iter().any(|s| s == scope)
            || (scope == OFFLINE_ACCESS && self.offline_access)
    }
}

impl ResourceCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn api_resources(&self) -> Result<Vec<api_resource::Model>, DbErr> {
        api_resource::Entity::find()
            .order_by_asc(api_resource::Column::Name)
            .all(self.db.as_ref())
            .await
    }

    pub async fn identity_resources(&self) -> Result<Vec<identity_resource::Model>, DbErr> {
        identity_resource::Entity::find()
            .order_by_asc(identity_resource::Column::Name)
            .all(self.db.as_ref())
            .await
    }

    /// Every scope a client could be granted, for the discovery document.
    pub async fn supported_scopes(&self) -> Result<Vec<String>, DbErr> {
        let mut scopes: BTreeSet<String> = self
            .identity_resources()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        for api in self.api_resources().await? {
            scopes.extend(api.scopes_list());
        }
        scopes.insert(OFFLINE_ACCESS.to_string());
        Ok(scopes.into_iter().collect())
    }

    /// Claim types released by the given scopes.
    pub async fn claims_for_scopes(&self, scopes: &[String]) -> Result<BTreeSet<String>, DbErr> {
        Ok(self
            .identity_resources()
            .await?
            .into_iter()
            .filter(|r| scopes.contains(&r.name))
            .flat_map(|r| r.claim_types_list())
            .collect())
    }

    /// Resolve requested scopes for a client.
    ///
    /// Every requested scope must be allowed for the client and known to the catalog.
    /// An empty request resolves to everything the client is allowed.
    pub async fn resolve(
        &self,
        client: &client::Model,
        requested: &[String],
    ) -> Result<ResolvedScopes, ProtocolError> {
        let requested: Vec<String> = if requested.is_empty() {
            client.scopes_list()
        } else {
            requested.to_vec()
        };

        let identity = self.identity_resources().await?;
        let apis = self.api_resources().await?;
        let mut resolved = ResolvedScopes::default();

        for scope in &requested {
            if !client.is_scope_allowed(scope) {
                return Err(ProtocolError::InvalidScope(format!(
                    "scope {scope} is not allowed for this client"
                )));
            }
            if scope == OFFLINE_ACCESS {
                resolved.offline_access = true;
            } else if identity.iter().any(|r| &r.name == scope) {
                if !resolved.identity.contains(scope) {
                    resolved.identity.push(scope.clone());
                }
            } else if let Some(api) = apis.iter().find(|a| a.has_scope(scope)) {
                if !resolved.api.contains(scope) {
                    resolved.api.push(scope.clone());
                }
                if !resolved.audiences.contains(&api.name) {
                    resolved.audiences.push(api.name.clone());
                }
            } else {
                return Err(ProtocolError::InvalidScope(format!("unknown scope {scope}")));
            }
        }

        Ok(resolved)
    }

    /// Insert or replace an API resource.
    pub async fn upsert_api_resource(&self, descriptor: &ApiResourceDescriptor) -> Result<(), DbErr> {
        let model = api_resource::ActiveModel {
            name: Set(descriptor.name.clone()),
            display_name: Set(descriptor.display_name.clone()),
            description: Set(descriptor.description.clone()),
            scopes: Set(descriptor.scopes.join(" ")),
        };
        if api_resource::Entity::find_by_id(descriptor.name.as_str())
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            model.update(self.db.as_ref()).await?;
        } else {
            model.insert(self.db.as_ref()).await?;
        }
        Ok(())
    }

    /// Insert an identity resource unless one with that name exists.
    pub async fn ensure_identity_resource(
        &self,
        resource: identity_resource::Model,
    ) -> Result<bool, DbErr> {
        if identity_resource::Entity::find_by_id(resource.name.as_str())
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Ok(false);
        }
        let active: identity_resource::ActiveModel = resource.into();
        active.insert(self.db.as_ref()).await?;
        Ok(true)
    }
}

/// The standard OpenID Connect identity resources.
pub fn standard_identity_resources() -> Vec<identity_resource::Model> {
    vec![
        identity_resource::Model {
            name: "openid".into(),
            display_name: "Your user identifier".into(),
            description: None,
            claim_types: "sub".into(),
            required: true,
        },
        identity_resource::Model {
            name: "profile".into(),
            display_name: "User profile".into(),
            description: Some("Your user profile information (name, etc.)".into()),
            claim_types: "name family_name given_name preferred_username locale zoneinfo updated_at"
                .into(),
            required: false,
        },
        identity_resource::Model {
            name: "email".into(),
            display_name: "Your email address".into(),
            description: None,
            claim_types: "email email_verified".into(),
            required: false,
        },
    ]
}
