//! SeaORM entities for the client registry, resource catalog, identity store
//! and persisted grant store.

pub mod api_resource;
pub mod client;
pub mod identity_resource;
pub mod persisted_grant;
pub mod user;
