//! OAuth2 / OpenID Connect HTTP surface.
//!
//! ## Supported Flows
//!
//! - Authorization Code with PKCE (S256)
//! - Refresh Token (rotating)
//! - Client Credentials (confidential clients)
//! - Resource Owner Password
//!
//! ## Endpoints
//!
//! - `GET|POST /oauth2/authorize` - Authorization endpoint and credential submission
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `GET /oauth2/userinfo` - OpenID Connect UserInfo
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery
//! - `GET /.well-known/jwks.json` - Signing keys
//! - `POST /account/register`, `GET /account/verify` - Accounts

pub mod account;
pub mod authorize;
pub mod discovery;
pub mod endpoints;
mod state;

pub use endpoints::router;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
