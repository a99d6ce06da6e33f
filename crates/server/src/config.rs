use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Settings describing the public identity of this provider.
#[derive(Clone, Debug, Deserialize)]
pub struct DomainSettings {
    /// Issuer identifier placed in `iss` and the discovery document. No trailing slash.
    pub issuer_url: String,
    /// Base URL of the frontend hosting the login page.
    pub frontend_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Refuse sign-in until the user confirmed their email address.
    #[serde(default = "default_true")]
    pub require_confirmed_email: bool,
}

/// Descriptor of the API resource protected by tokens from this provider.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiResourceDescriptor {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppSettings {
    pub database_url: String,
    pub api_resource: ApiResourceDescriptor,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TokenSettings {
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_id_token_lifetime")]
    pub id_token_lifetime: i64,
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    #[serde(default = "default_email_verification_lifetime")]
    pub email_verification_lifetime: i64,
    #[serde(default = "default_true")]
    pub enable_cleanup: bool,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_token_lifetime: default_access_token_lifetime(),
            id_token_lifetime: default_id_token_lifetime(),
            authorization_code_lifetime: default_authorization_code_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            email_verification_lifetime: default_email_verification_lifetime(),
            enable_cleanup: true,
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Signing key material.
///
/// `key_files` are PKCS#8 PEM encoded Ed25519 private keys. The first one signs new
/// tokens; every listed key is published and accepted for verification so keys can be
/// rotated without invalidating tokens that are still valid.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SigningSettings {
    #[serde(default)]
    pub key_files: Vec<PathBuf>,
    /// Generate an in-memory key when no key files are configured. Development only.
    #[serde(default)]
    pub allow_ephemeral: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_true")]
    pub with_target: bool,
    #[serde(default = "default_true")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            with_target: true,
            ansi: true,
        }
    }
}

/// A client registered at startup when it does not exist yet.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientSeed {
    pub id: String,
    pub name: String,
    /// Plain secret, hashed before storage. Absent for public clients.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub require_pkce: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub domain: DomainSettings,
    pub app: AppSettings,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub tokens: TokenSettings,
    #[serde(default)]
    pub signing: SigningSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_id_token_lifetime() -> i64 {
    300
}

fn default_authorization_code_lifetime() -> i64 {
    300
}

fn default_refresh_token_lifetime() -> i64 {
    86400 * 30
}

fn default_email_verification_lifetime() -> i64 {
    86400
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "rust_oidc_provider=info,tower_http=info,sea_orm=warn".to_string()
}

/// Upper bound for every configured token lifetime, in seconds (ten years).
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 86400;

impl AppConfig {
    /// Check invariants the deserializer cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = url::Url::parse(&self.domain.issuer_url)
            .map_err(|e| ConfigError::Validation(format!("domain.issuer_url: {e}")))?;
        if issuer.query().is_some() || issuer.fragment().is_some() {
            return Err(ConfigError::Validation(
                "domain.issuer_url must not carry a query or fragment".into(),
            ));
        }
        if self.domain.issuer_url.ends_with('/') {
            return Err(ConfigError::Validation(
                "domain.issuer_url must not end with '/'".into(),
            ));
        }
        url::Url::parse(&self.domain.frontend_url)
            .map_err(|e| ConfigError::Validation(format!("domain.frontend_url: {e}")))?;
        if self.app.database_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "app.database_url must not be empty".into(),
            ));
        }
        if self.app.api_resource.name.trim().is_empty() || self.app.api_resource.scopes.is_empty()
        {
            return Err(ConfigError::Validation(
                "app.api_resource needs a name and at least one scope".into(),
            ));
        }

        let t = &self.tokens;
        for (name, value) in [
            ("tokens.access_token_lifetime", t.access_token_lifetime),
            ("tokens.id_token_lifetime", t.id_token_lifetime),
            ("tokens.authorization_code_lifetime", t.authorization_code_lifetime),
            ("tokens.refresh_token_lifetime", t.refresh_token_lifetime),
            ("tokens.email_verification_lifetime", t.email_verification_lifetime),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
            if value > MAX_TOKEN_LIFETIME_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} must be at most {MAX_TOKEN_LIFETIME_SECS} seconds"
                )));
            }
        }
        if t.cleanup_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "tokens.cleanup_interval_secs must be > 0".into(),
            ));
        }

        if self.signing.key_files.is_empty() && !self.signing.allow_ephemeral {
            return Err(ConfigError::Validation(
                "signing.key_files is empty and signing.allow_ephemeral is false".into(),
            ));
        }

        if let Some(smtp) = &self.smtp
            && smtp.port == 0
        {
            return Err(ConfigError::Validation("smtp.port must be > 0".into()));
        }

        for client in &self.clients {
            if client.id.trim().is_empty() {
                return Err(ConfigError::Validation("clients[].id must not be empty".into()));
            }
            if client.grant_types.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "client {} has no grant types",
                    client.id
                )));
            }
        }

        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables override file values using double underscores as the
/// nesting separator, e.g. `APP__DATABASE_URL` or `TOKENS__CLEANUP_INTERVAL_SECS`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(Path::new("config.yaml"))
}

/// Same as [`load_config`] with an explicit file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
