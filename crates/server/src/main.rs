use color_eyre::eyre::WrapErr;
use rust_oidc_provider::AppResources;
use rust_oidc_provider::api::start_webserver;
use rust_oidc_provider::cleanup::TokenCleanup;
use rust_oidc_provider::config::load_config;
use rust_oidc_provider::email::{EmailSender, LogEmailSender, SmtpEmailSender};
use rust_oidc_provider::grants::GrantStore;
use rust_oidc_provider::identity::UserStore;
use rust_oidc_provider::issuer::{IssuerSettings, KeySet, TokenIssuer};
use rust_oidc_provider::logging;
use rust_oidc_provider::oauth2::OAuth2State;
use rust_oidc_provider::profile::{ProfileService, UserProfileService};
use rust_oidc_provider::registry::{ClientRegistry, ResourceCatalog};
use rust_oidc_provider::startup::{StartupError, connect_database, prepare_database};
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let config = Arc::new(load_config().map_err(StartupError::from)?);
    logging::init(&config.logging).map_err(StartupError::from)?;

    let db = connect_database(&config.app.database_url).await?;
    prepare_database(db.clone(), &config)
        .await
        .wrap_err("database preparation failed; refusing to start")?;

    let keys = KeySet::load(&config.signing.key_files, config.signing.allow_ephemeral)
        .map_err(StartupError::from)?;

    let mailer: Arc<dyn EmailSender> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpEmailSender::new(smtp).map_err(StartupError::from)?),
        None => {
            tracing::warn!("no SMTP relay configured; emails will only be logged");
            Arc::new(LogEmailSender)
        }
    };

    let grants = GrantStore::new(db.clone());
    let users = UserStore::new(db.clone());
    let profile: Arc<dyn ProfileService> =
        Arc::new(UserProfileService::new(config.domain.require_confirmed_email));
    let issuer = TokenIssuer::new(
        IssuerSettings::from_config(&config),
        keys,
        grants.clone(),
        ClientRegistry::new(db.clone()),
        ResourceCatalog::new(db.clone()),
        users.clone(),
        profile,
    );

    if config.tokens.enable_cleanup {
        let cleanup = TokenCleanup::new(
            grants,
            Duration::from_secs(config.tokens.cleanup_interval_secs),
        );
        tracing::info!(interval_secs = cleanup.interval().as_secs(), "starting grant cleanup");
        cleanup.spawn();
    } else {
        tracing::info!("grant cleanup disabled");
    }

    let state = OAuth2State::new(issuer, users, &config.domain.frontend_url);
    let resources = AppResources {
        db,
        mailer,
        config: config.clone(),
    };

    tracing::info!(issuer = %config.domain.issuer_url, "starting identity provider");
    start_webserver(state, resources).await?;
    Ok(())
}
