//! Persisted grant: server-side state behind authorization codes and refresh tokens.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "persisted_grant")]
pub struct Model {
    /// SHA-256 (base64url) of the handle given to the client
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub grant_type: String,
    pub client_id: String,
    pub subject_id: String,
    /// Key of the root grant this one descends from
    pub family_id: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    /// Serialized grant payload (JSON)
    pub data: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}
