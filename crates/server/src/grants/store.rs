//! Database-backed persisted grant store.

use super::{GrantState, GrantType};
use crate::crypto::{generate_handle, sha256_b64url};
use crate::entity::{client, persisted_grant};
use crate::error::GrantError;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait, sea_query::Expr,
};
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Parameters for a grant about to be issued.
#[derive(Debug, Clone)]
pub struct NewGrant<'a> {
    pub grant_type: GrantType,
    pub client_id: &'a str,
    pub subject_id: &'a str,
    /// Family to join. `None` starts a new family rooted at this grant.
    pub family_id: Option<&'a str>,
    pub lifetime: Duration,
}

/// A freshly issued grant. `handle` is only ever held in memory and handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedGrant {
    pub handle: String,
    pub key: String,
    pub family_id: String,
    pub expires_at: OffsetDateTime,
}

/// Persisted grant store shared by the token issuer and the cleanup task.
///
/// All state transitions are single conditional statements so that concurrent
/// redemptions and cleanup never need application-level locking.
#[derive(Clone, Debug)]
pub struct GrantStore {
    db: Arc<DatabaseConnection>,
}

impl GrantStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Storage key for a client-facing handle.
    pub fn key_for(handle: &str) -> String {
        sha256_b64url(handle.as_bytes())
    }

    /// Store a new grant in the `Issued` state and return its handle.
    ///
    /// The owning client must exist; the lookup and the insert share one transaction.
    #[tracing::instrument(skip(self, new, data), fields(grant_type = %new.grant_type, client_id = new.client_id))]
    pub async fn issue<T: Serialize>(
        &self,
        new: NewGrant<'_>,
        data: &T,
        now: OffsetDateTime,
    ) -> Result<IssuedGrant, GrantError> {
        let handle = generate_handle()?;
        let key = Self::key_for(&handle);
        let family_id = new.family_id.map_or_else(|| key.clone(), String::from);
        let expires_at = now + new.lifetime;

        let grant = persisted_grant::ActiveModel {
            key: Set(key.clone()),
            grant_type: Set(new.grant_type.as_str().to_string()),
            client_id: Set(new.client_id.to_string()),
            subject_id: Set(new.subject_id.to_string()),
            family_id: Set(family_id.clone()),
            created_at: Set(now),
            expires_at: Set(expires_at),
            consumed_at: Set(None),
            data: Set(serde_json::to_string(data)?),
        };

        let txn = self.db.begin().await?;
        if client::Entity::find_by_id(new.client_id)
            .one(&txn)
            .await?
            .is_none()
        {
            txn.rollback().await?;
            return Err(GrantError::UnknownClient(new.client_id.to_string()));
        }
        grant.insert(&txn).await?;
        txn.commit().await?;

        Ok(IssuedGrant {
            handle,
            key,
            family_id,
            expires_at,
        })
    }

    /// Redeem a single-use grant: `Issued -> Consumed`.
    ///
    /// The check and the transition are one conditional `UPDATE`, so of any number of
    /// concurrent redemptions exactly one succeeds. A redemption of a grant that is
    /// already consumed (and not yet expired) is treated as replay and revokes the
    /// whole family.
    #[tracing::instrument(skip(self, handle))]
    pub async fn redeem(
        &self,
        handle: &str,
        grant_type: GrantType,
        client_id: &str,
        now: OffsetDateTime,
    ) -> Result<persisted_grant::Model, GrantError> {
        let key = Self::key_for(handle);

        let txn = self.db.begin().await?;
        let updated = persisted_grant::Entity::update_many()
            .col_expr(persisted_grant::Column::ConsumedAt, Expr::value(now))
            .filter(persisted_grant::Column::Key.eq(&key))
            .filter(persisted_grant::Column::GrantType.eq(grant_type.as_str()))
            .filter(persisted_grant::Column::ClientId.eq(client_id))
            .filter(persisted_grant::Column::ConsumedAt.is_null())
            .filter(persisted_grant::Column::ExpiresAt.gt(now))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 1 {
            let grant = persisted_grant::Entity::find_by_id(&key).one(&txn).await?;
            txn.commit().await?;
            return grant.ok_or(GrantError::InvalidGrant);
        }
        txn.commit().await?;

        self.on_failed_redemption(&key, grant_type, client_id, now)
            .await?;
        Err(GrantError::InvalidGrant)
    }

    async fn on_failed_redemption(
        &self,
        key: &str,
        grant_type: GrantType,
        client_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), GrantError> {
        let Some(existing) = persisted_grant::Entity::find_by_id(key)
            .one(self.db.as_ref())
            .await?
        else {
            tracing::debug!(grant_type = %grant_type, "redemption of unknown grant");
            return Ok(());
        };

        match GrantState::of(&existing, now) {
            GrantState::Consumed => {
                let revoked = self.revoke_family(&existing.family_id).await?;
                tracing::warn!(
                    grant_type = %grant_type,
                    client_id = client_id,
                    owner_client_id = %existing.client_id,
                    subject_id = %existing.subject_id,
                    revoked = revoked,
                    "replayed grant; revoked grant family"
                );
            }
            GrantState::Expired => {
                tracing::debug!(grant_type = %grant_type, "redemption of expired grant");
            }
            GrantState::Issued => {
                tracing::debug!(
                    grant_type = %grant_type,
                    stored_grant_type = %existing.grant_type,
                    client_id = client_id,
                    owner_client_id = %existing.client_id,
                    "grant presented by the wrong client or as the wrong type"
                );
            }
        }
        Ok(())
    }

    /// Look up a grant that is still usable (unexpired, unconsumed).
    pub async fn find_active(
        &self,
        handle: &str,
        now: OffsetDateTime,
    ) -> Result<Option<persisted_grant::Model>, GrantError> {
        let grant = persisted_grant::Entity::find_by_id(Self::key_for(handle))
            .one(self.db.as_ref())
            .await?;
        Ok(grant.filter(|g| GrantState::of(g, now) == GrantState::Issued))
    }

    /// Delete every grant of a family.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_family(&self, family_id: &str) -> Result<u64, GrantError> {
        let result = persisted_grant::Entity::delete_many()
            .filter(persisted_grant::Column::FamilyId.eq(family_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Revoke the family of the grant behind `handle` if it belongs to `client_id`.
    ///
    /// Returns whether anything was revoked.
    #[tracing::instrument(skip(self, handle))]
    pub async fn revoke(&self, handle: &str, client_id: &str) -> Result<bool, GrantError> {
        let Some(grant) = persisted_grant::Entity::find_by_id(Self::key_for(handle))
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(false);
        };
        if grant.client_id != client_id {
            return Ok(false);
        }
        Ok(self.revoke_family(&grant.family_id).await? > 0)
    }

    /// Delete every grant whose expiration lies strictly before `now`, in one statement.
    pub async fn remove_expired(&self, now: OffsetDateTime) -> Result<u64, GrantError> {
        let result = persisted_grant::Entity::delete_many()
            .filter(persisted_grant::Column::ExpiresAt.lt(now))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
