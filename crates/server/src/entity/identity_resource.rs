//! Identity resource catalog entry: a scope that releases user claims.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "identity_resource")]
pub struct Model {
    /// Scope name, e.g. `openid`, `profile`
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    /// Space-separated claim types released by this scope
    pub claim_types: String,
    pub required: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn claim_types_list(&self) -> Vec<String> {
        self.claim_types
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}
