//! Shared fixtures: an in-memory database that is migrated and seeded, and the
//! services wired the way the binary wires them.
#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use futures::future::BoxFuture;
use rust_oidc_provider::AppResources;
use rust_oidc_provider::config::{
    ApiResourceDescriptor, AppConfig, AppSettings, ClientSeed, DomainSettings, LoggingConfig,
    SigningSettings, TokenSettings,
};
use rust_oidc_provider::email::{EmailError, EmailMessage, EmailSender};
use rust_oidc_provider::entity::user;
use rust_oidc_provider::grants::GrantStore;
use rust_oidc_provider::identity::{NewUser, UserStore};
use rust_oidc_provider::issuer::{IssuerSettings, KeySet, TokenIssuer};
use rust_oidc_provider::oauth2::OAuth2State;
use rust_oidc_provider::profile::UserProfileService;
use rust_oidc_provider::registry::{ClientRegistry, ResourceCatalog};
use rust_oidc_provider::startup::{connect_database, prepare_database};
use sea_orm::DatabaseConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};

pub const ISSUER: &str = "https://id.example.org";
pub const WEB_REDIRECT: &str = "https://app.example.org/callback";
pub const BACKEND_REDIRECT: &str = "https://backend.example.org/cb";
pub const BACKEND_SECRET: &str = "backend-secret";
pub const PASSWORD: &str = "correct horse battery";

// RFC 7636 Appendix B
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

pub fn test_config() -> AppConfig {
    AppConfig {
        domain: DomainSettings {
            issuer_url: ISSUER.into(),
            frontend_url: "https://login.example.org".into(),
            listen_addr: "127.0.0.1:0".into(),
            require_confirmed_email: true,
        },
        app: AppSettings {
            database_url: "sqlite::memory:".into(),
            api_resource: ApiResourceDescriptor {
                name: "api".into(),
                display_name: "Example API".into(),
                description: None,
                scopes: vec!["api.read".into(), "api.write".into()],
            },
        },
        smtp: None,
        tokens: TokenSettings::default(),
        signing: SigningSettings {
            key_files: vec![],
            allow_ephemeral: true,
        },
        logging: LoggingConfig::default(),
        clients: vec![
            ClientSeed {
                id: "web".into(),
                name: "Web".into(),
                secret: None,
                redirect_uris: vec![WEB_REDIRECT.into()],
                grant_types: vec!["authorization_code".into(), "refresh_token".into()],
                scopes: ["openid", "profile", "email", "offline_access", "api.read"]
                    .map(String::from)
                    .to_vec(),
                require_pkce: true,
            },
            ClientSeed {
                id: "backend".into(),
                name: "Backend".into(),
                secret: Some(BACKEND_SECRET.into()),
                redirect_uris: vec![BACKEND_REDIRECT.into()],
                grant_types: [
                    "authorization_code",
                    "refresh_token",
                    "client_credentials",
                    "password",
                ]
                .map(String::from)
                .to_vec(),
                scopes: [
                    "openid",
                    "profile",
                    "email",
                    "offline_access",
                    "api.read",
                    "api.write",
                ]
                .map(String::from)
                .to_vec(),
                require_pkce: false,
            },
        ],
    }
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Records messages instead of sending them. While `failing` is set every send fails.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub failing: AtomicBool,
}

impl RecordingSender {
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl EmailSender for RecordingSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), EmailError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                let address = "unreachable".to_string();
                let source = address.parse::<lettre::Address>().unwrap_err();
                return Err(EmailError::Address { address, source });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        })
    }
}

pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub grants: GrantStore,
    pub users: UserStore,
    pub issuer: TokenIssuer,
    pub state: OAuth2State,
    pub mailer: Arc<RecordingSender>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with(test_config(), KeySet::from_keys(&[signing_key(1)]).unwrap()).await
    }

    pub async fn with(config: AppConfig, keys: KeySet) -> Self {
        let db = connect_database(&config.app.database_url)
            .await
            .expect("connect");
        prepare_database(db.clone(), &config)
            .await
            .expect("migrate and seed");

        let grants = GrantStore::new(db.clone());
        let users = UserStore::new(db.clone());
        let issuer = TokenIssuer::new(
            IssuerSettings::from_config(&config),
            keys,
            grants.clone(),
            ClientRegistry::new(db.clone()),
            ResourceCatalog::new(db.clone()),
            users.clone(),
            Arc::new(UserProfileService::new(
                config.domain.require_confirmed_email,
            )),
        );
        let state = OAuth2State::new(issuer.clone(), users.clone(), &config.domain.frontend_url);

        Self {
            db,
            config: Arc::new(config),
            grants,
            users,
            issuer,
            state,
            mailer: Arc::new(RecordingSender::default()),
        }
    }

    /// Same database and services with a different signing key set.
    pub fn with_keys(&self, keys: KeySet) -> TokenIssuer {
        TokenIssuer::new(
            IssuerSettings::from_config(&self.config),
            keys,
            self.grants.clone(),
            ClientRegistry::new(self.db.clone()),
            ResourceCatalog::new(self.db.clone()),
            self.users.clone(),
            Arc::new(UserProfileService::new(
                self.config.domain.require_confirmed_email,
            )),
        )
    }

    pub fn resources(&self) -> AppResources {
        AppResources {
            db: self.db.clone(),
            mailer: self.mailer.clone(),
            config: self.config.clone(),
        }
    }

    /// Register a user and confirm their email.
    pub async fn confirmed_user(&self, email: &str) -> user::Model {
        let mut claims = serde_json::Map::new();
        claims.insert("locale".into(), serde_json::Value::from("en-GB"));
        let (_, token) = self
            .users
            .create_user(
                NewUser {
                    email,
                    password: PASSWORD,
                    name: Some("Test User"),
                    claims,
                },
                Duration::hours(1),
                OffsetDateTime::now_utc(),
            )
            .await
            .expect("create user");
        self.users
            .confirm_email(&token, OffsetDateTime::now_utc())
            .await
            .expect("confirm")
            .expect("token valid")
    }

    pub async fn client(&self, id: &str) -> rust_oidc_provider::entity::client::Model {
        ClientRegistry::new(self.db.clone())
            .find(id)
            .await
            .expect("lookup")
            .expect("seeded client")
    }
}
