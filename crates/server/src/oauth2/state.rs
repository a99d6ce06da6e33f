//! Shared state of the protocol endpoints.

use crate::identity::UserStore;
use crate::issuer::TokenIssuer;
use std::sync::Arc;

/// Everything the OAuth2/OIDC handlers need. Cheap to clone.
#[derive(Clone, Debug)]
pub struct OAuth2State {
    pub issuer: TokenIssuer,
    pub users: UserStore,
    /// Base URL of the frontend that hosts the login page
    pub frontend_url: Arc<str>,
}

impl OAuth2State {
    pub fn new(issuer: TokenIssuer, users: UserStore, frontend_url: &str) -> Self {
        Self {
            issuer,
            users,
            frontend_url: Arc::from(frontend_url.trim_end_matches('/')),
        }
    }

    /// Base URL for the OAuth2 server (the `iss` of every token)
    pub fn issuer_url(&self) -> &str {
        &self.issuer.settings().issuer
    }
}
