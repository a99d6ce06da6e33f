//! User accounts: registration, credential verification and email confirmation.

use super::password::{MIN_PASSWORD_LENGTH, hash_password, verify_password};
use crate::crypto::{generate_handle, sha256_b64url};
use crate::entity::user;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, SqlErr,
};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {} characters", MIN_PASSWORD_LENGTH)]
    WeakPassword,
    #[error("email address already registered")]
    DuplicateEmail,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("failed to generate token: {0}")]
    Random(#[from] getrandom::Error),
    #[error(transparent)]
    Store(#[from] DbErr),
}

/// Registration data.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: Option<&'a str>,
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Database-backed identity store.
#[derive(Clone, Debug)]
pub struct UserStore {
    db: Arc<DatabaseConnection>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl UserStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new account with an unconfirmed email.
    ///
    /// Returns the user and the email confirmation token. Only the token's hash is stored.
    /// Registering again for an address that is still unconfirmed issues a fresh token
    /// when the password matches or the previous token has expired, so a lost or unsent
    /// confirmation email can be requested again.
    #[tracing::instrument(skip(self, new), fields(email = new.email))]
    pub async fn create_user(
        &self,
        new: NewUser<'_>,
        verification_lifetime: Duration,
        now: OffsetDateTime,
    ) -> Result<(user::Model, String), UserError> {
        let email = normalize_email(new.email);
        if email.is_empty() || !email.contains('@') || email.starts_with('@') || email.ends_with('@')
        {
            return Err(UserError::InvalidEmail);
        }
        if new.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(UserError::WeakPassword);
        }
        if let Some(existing) = self.find_by_email(&email).await? {
            return self
                .reissue_verification(existing, &new, verification_lifetime, now)
                .await;
        }

        let password_hash =
            hash_password(new.password).map_err(|e| UserError::Hash(e.to_string()))?;
        let token = generate_handle()?;

        let user = user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(email),
            email_verified: Set(false),
            name: Set(new.name.map(String::from)),
            password_hash: Set(Some(password_hash)),
            claims: Set(serde_json::Value::Object(new.claims).to_string()),
            email_verification_token: Set(Some(sha256_b64url(token.as_bytes()))),
            email_verification_expires_at: Set(Some(now + verification_lifetime)),
            created_at: Set(now),
            last_login_at: Set(None),
        };
        let user = user.insert(self.db.as_ref()).await.map_err(|e| {
            // A concurrent registration won the race for the unique email index.
            match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => UserError::DuplicateEmail,
                _ => UserError::Store(e),
            }
        })?;
        tracing::info!(user_id = %user.id, "created user");
        Ok((user, token))
    }

    async fn reissue_verification(
        &self,
        existing: user::Model,
        new: &NewUser<'_>,
        verification_lifetime: Duration,
        now: OffsetDateTime,
    ) -> Result<(user::Model, String), UserError> {
        if existing.email_verified {
            return Err(UserError::DuplicateEmail);
        }
        let same_password = existing
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(new.password, hash));
        let pending = existing.has_pending_verification(now);
        if pending && !same_password {
            return Err(UserError::DuplicateEmail);
        }

        let token = generate_handle()?;
        let user_id = existing.id.clone();
        let mut active: user::ActiveModel = existing.into();
        if !same_password {
            let password_hash =
                hash_password(new.password).map_err(|e| UserError::Hash(e.to_string()))?;
            active.password_hash = Set(Some(password_hash));
        }
        active.email_verification_token = Set(Some(sha256_b64url(token.as_bytes())));
        active.email_verification_expires_at = Set(Some(now + verification_lifetime));
        let user = active.update(self.db.as_ref()).await?;
        tracing::info!(user_id = %user_id, pending = pending, "reissued email confirmation token");
        Ok((user, token))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find_by_id(id).one(self.db.as_ref()).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(self.db.as_ref())
            .await
    }

    /// Return the user if `password` matches their stored credential.
    #[tracing::instrument(skip(self, password))]
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<user::Model>, DbErr> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };
        let verified = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        Ok(verified.then_some(user))
    }

    /// Confirm an email address using the token sent by mail.
    #[tracing::instrument(skip(self, token))]
    pub async fn confirm_email(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<user::Model>, DbErr> {
        let Some(user) = user::Entity::find()
            .filter(user::Column::EmailVerificationToken.eq(sha256_b64url(token.as_bytes())))
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(None);
        };

        if user.email_verification_expires_at.is_none_or(|exp| exp <= now) {
            tracing::debug!(user_id = %user.id, "expired email confirmation token");
            return Ok(None);
        }

        let mut active: user::ActiveModel = user.into();
        active.email_verified = Set(true);
        active.email_verification_token = Set(None);
        active.email_verification_expires_at = Set(None);
        Ok(Some(active.update(self.db.as_ref()).await?))
    }

    /// Update the user's last login time.
    pub async fn record_login(&self, user_id: &str, now: OffsetDateTime) -> Result<(), DbErr> {
        if let Some(user) = self.find_by_id(user_id).await? {
            let mut active: user::ActiveModel = user.into();
            active.last_login_at = Set(Some(now));
            active.update(self.db.as_ref()).await?;
        }
        Ok(())
    }
}
