//! Database preparation at startup: connect, migrate, seed.
//!
//! Every step propagates its error. A database that cannot be migrated never
//! serves requests.

use crate::config::AppConfig;
use crate::email::EmailError;
use crate::issuer::KeyError;
use crate::logging::LoggingError;
use crate::registry::{
    ClientRegistry, NewClient, RegistryError, ResourceCatalog, standard_identity_resources,
};
use crate::{config::ConfigError, entity::identity_resource};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),
    #[error("database connection failed: {0}")]
    Connect(#[source] DbErr),
    #[error("database migration failed: {0}")]
    Migration(#[source] DbErr),
    #[error("seeding failed: {0}")]
    Seed(String),
    #[error("signing keys unavailable: {0}")]
    Keys(#[from] KeyError),
    #[error("email transport setup failed: {0}")]
    Email(#[from] EmailError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl From<RegistryError> for StartupError {
    fn from(err: RegistryError) -> Self {
        StartupError::Seed(err.to_string())
    }
}

pub async fn connect_database(url: &str) -> Result<Arc<DatabaseConnection>, StartupError> {
    let db = Database::connect(url).await.map_err(StartupError::Connect)?;
    Ok(Arc::new(db))
}

/// Apply all pending migrations.
#[tracing::instrument(skip(db))]
pub async fn migrate(db: &DatabaseConnection) -> Result<(), StartupError> {
    let pending = Migrator::get_pending_migrations(db)
        .await
        .map_err(StartupError::Migration)?
        .len();
    Migrator::up(db, None).await.map_err(|e| {
        tracing::error!(
            name = "startup.migrate.failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            message = "database migration failed"
        );
        StartupError::Migration(e)
    })?;
    tracing::info!(applied = pending, "database migrations applied");
    Ok(())
}

/// Register the standard identity resources, the configured API resource and the
/// configured clients. Existing clients are left untouched.
#[tracing::instrument(skip(db, config))]
pub async fn seed(db: Arc<DatabaseConnection>, config: &AppConfig) -> Result<(), StartupError> {
    let catalog = ResourceCatalog::new(db.clone());
    let registry = ClientRegistry::new(db);

    let seed_err = |e: DbErr| StartupError::Seed(e.to_string());

    let mut identity_added = 0;
    for resource in standard_identity_resources()
        .into_iter()
        .chain(std::iter::once(offline_access_resource()))
    {
        if catalog
            .ensure_identity_resource(resource)
            .await
            .map_err(seed_err)?
        {
            identity_added += 1;
        }
    }

    catalog
        .upsert_api_resource(&config.app.api_resource)
        .await
        .map_err(seed_err)?;

    let mut clients_added = 0;
    for seed in &config.clients {
        if registry.find(&seed.id).await.map_err(seed_err)?.is_some() {
            tracing::debug!(client_id = %seed.id, "client already registered");
            continue;
        }
        registry.register(NewClient::from(seed)).await?;
        clients_added += 1;
    }

    tracing::info!(
        identity_resources = identity_added,
        api_resource = %config.app.api_resource.name,
        clients = clients_added,
        "seeded database"
    );
    Ok(())
}

fn offline_access_resource() -> identity_resource::Model {
    identity_resource::Model {
        name: crate::registry::OFFLINE_ACCESS.into(),
        display_name: "Offline access".into(),
        description: Some("Access to your data while you are not signed in".into()),
        claim_types: String::new(),
        required: false,
    }
}

/// Migrate then seed.
pub async fn prepare_database(
    db: Arc<DatabaseConnection>,
    config: &AppConfig,
) -> Result<(), StartupError> {
    migrate(db.as_ref()).await?;
    seed(db, config).await
}
