mod cancel;
pub mod catalog;
pub mod client;
pub mod config;
pub mod credentials;
pub mod delete;
pub mod digest;
pub mod error;
pub mod scope;
pub mod token;


pub use catalog::{ImageCatalog, Manifest};
pub use client::Client;
pub use config::{Configuration, CredentialConfig};
pub use delete::{DeletionOutcome, RegistryApiError};
pub use digest::Digest;
pub use error::{Error, Result};
pub use scope::{Action, Scope};
pub use token::RegistryToken;
