//! Credential-safe persistence for user accounts on an embedded SQLite file.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod users;

pub use auth::{CredentialHasher, HashCost, ValidationError};
pub use config::{AppConfig, StoreMode};
pub use errors::StoreError;
pub use users::{NewUser, StoreState, User, UserStore};
