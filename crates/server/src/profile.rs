//! Profile claims for tokens and the userinfo endpoint.

use crate::entity::user;
use futures::future::BoxFuture;
use sea_orm::DbErr;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Store(#[from] DbErr),
    #[error("profile source unavailable: {0}")]
    Unavailable(String),
}

/// Resolves the claims released about a user and whether they may receive tokens.
pub trait ProfileService: Send + Sync {
    /// Claims for `user` restricted to `claim_types`. `sub` is added by the caller.
    fn profile_claims<'a>(
        &'a self,
        user: &'a user::Model,
        claim_types: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<Map<String, Value>, ProfileError>>;

    /// Whether tokens may be issued for `user`.
    fn is_active<'a>(&'a self, user: &'a user::Model) -> BoxFuture<'a, Result<bool, ProfileError>>;
}

/// Profile service backed by the local identity store.
#[derive(Clone, Debug)]
pub struct UserProfileService {
    require_confirmed_email: bool,
}

impl UserProfileService {
    pub fn new(require_confirmed_email: bool) -> Self {
        Self {
            require_confirmed_email,
        }
    }

    fn claims_for(user: &user::Model, claim_types: &BTreeSet<String>) -> Map<String, Value> {
        let extra = user.extra_claims();
        let mut claims = Map::new();
        for claim in claim_types {
            let value = match claim.as_str() {
                "sub" => continue,
                "email" => Some(Value::from(user.email.clone())),
                "email_verified" => Some(Value::from(user.email_verified)),
                "name" => user.name.clone().map(Value::from),
                "updated_at" => extra
                    .get(claim)
                    .cloned()
                    .or_else(|| Some(Value::from(user.created_at.unix_timestamp()))),
                _ => extra.get(claim).cloned(),
            };
            if let Some(value) = value {
                claims.insert(claim.clone(), value);
            }
        }
        claims
    }
}

impl ProfileService for UserProfileService {
    fn profile_claims<'a>(
        &'a self,
        user: &'a user::Model,
        claim_types: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, Result<Map<String, Value>, ProfileError>> {
        Box::pin(async move { Ok(Self::claims_for(user, claim_types)) })
    }

    fn is_active<'a>(&'a self, user: &'a user::Model) -> BoxFuture<'a, Result<bool, ProfileError>> {
        Box::pin(async move { Ok(!self.require_confirmed_email || user.email_verified) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::OffsetDateTime;

    fn user(verified: bool) -> user::Model {
        user::Model {
            id: "u1".into(),
            email: "alice@example.org".into(),
            email_verified: verified,
            name: Some("Alice".into()),
            password_hash: None,
            claims: json!({"locale": "de-DE", "department": "ops"}).to_string(),
            email_verification_token: None,
            email_verification_expires_at: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            last_login_at: None,
        }
    }

    fn types(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn releases_only_requested_claim_types() {
        let service = UserProfileService::new(true);
        let claims = service
            .profile_claims(&user(true), &types(&["sub", "email", "locale", "zoneinfo"]))
            .await
            .unwrap();
        assert_eq!(claims["email"], "alice@example.org");
        assert_eq!(claims["locale"], "de-DE");
        assert!(!claims.contains_key("sub"));
        assert!(!claims.contains_key("zoneinfo"));
        assert!(!claims.contains_key("department"));
        assert!(!claims.contains_key("name"));
    }

    #[tokio::test]
    async fn unconfirmed_users_are_inactive_when_confirmation_is_required() {
        assert!(!UserProfileService::new(true).is_active(&user(false)).await.unwrap());
        assert!(UserProfileService::new(false).is_active(&user(false)).await.unwrap());
        assert!(UserProfileService::new(true).is_active(&user(true)).await.unwrap());
    }
}
