//! Grant state machine.
//!
//! A persisted grant moves through `Issued -> Consumed -> Expired/Deleted`:
//!
//! - `Issued`: created by the token issuer for an authorization code or refresh token.
//! - `Consumed`: single-use redemption marks the grant consumed exactly once. Any later
//!   redemption fails with `invalid_grant` and revokes every grant of the same family.
//! - `Expired`: past `expires_at` the grant is treated as absent whatever its consumed
//!   state; the cleanup task deletes it.
//!
//! Only the issuer (issue, redeem, revoke) and the cleanup task (delete) change grant
//! state, always through the conditional statements in [`GrantStore`].

mod store;

pub use store::{GrantStore, IssuedGrant, NewGrant};

use crate::entity::persisted_grant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Grant types that need server-side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(format!("not a persisted grant type: {other}")),
        }
    }
}

/// Observable state of a stored grant at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Issued,
    Consumed,
    Expired,
}

impl GrantState {
    pub fn of(grant: &persisted_grant::Model, now: OffsetDateTime) -> Self {
        if grant.is_expired_at(now) {
            GrantState::Expired
        } else if grant.is_consumed() {
            GrantState::Consumed
        } else {
            GrantState::Issued
        }
    }
}

/// Payload stored with an authorization code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCodeData {
    pub redirect_uri: String,
    /// The authorization request named `redirect_uri`; the token request must repeat it.
    #[serde(default)]
    pub redirect_uri_requested: bool,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    /// Unix time the user authenticated
    pub auth_time: i64,
}

/// Payload stored with a refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenData {
    pub scopes: Vec<String>,
    pub auth_time: i64,
}
