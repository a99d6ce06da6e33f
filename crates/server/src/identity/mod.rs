//! Identity and credential store.

pub mod password;
mod users;

pub use password::{hash_password, verify_password};
pub use users::{NewUser, UserError, UserStore};
