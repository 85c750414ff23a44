//! `stockledger-auth`: roles and access policy.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod principal;
pub mod roles;

pub use authorize::{Access, AuthzError, authorize};
pub use principal::Principal;
pub use roles::Role;
