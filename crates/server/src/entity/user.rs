//! Local user account owned by the identity store.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "identity_user")]
pub struct Model {
    /// Subject identifier (`sub`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// JSON object of additional profile claims
    pub claims: String,
    #[serde(skip_serializing)]
    pub email_verification_token: Option<String>,
    pub email_verification_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// An unconfirmed account whose confirmation token is still valid at `now`.
    pub fn has_pending_verification(&self, now: OffsetDateTime) -> bool {
        !self.email_verified
            && self.email_verification_token.is_some()
            && self.email_verification_expires_at.is_some_and(|exp| exp > now)
    }

    /// Additional claims; malformed JSON yields an empty map.
    pub fn extra_claims(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.claims).unwrap_or_default()
    }
}
