//! A small OpenID Connect provider.
//!
//! Clients and resources live in a registry, tokens are minted by the issuer, and
//! authorization codes and refresh tokens are persisted grants that move through a
//! single-use state machine. A background task purges expired grants.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::email::EmailSender;

pub mod api;
pub mod cleanup;
pub mod config;
pub mod crypto;
pub mod email;
pub mod entity;
pub mod error;
pub mod grants;
pub mod identity;
pub mod issuer;
pub mod logging;
pub mod oauth2;
pub mod profile;
pub mod registry;
pub mod startup;

#[derive(Clone)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub mailer: Arc<dyn EmailSender>,
    pub config: Arc<AppConfig>,
}
