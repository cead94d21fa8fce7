use std::path::PathBuf;

use reqwest::{Method, StatusCode};
use thiserror::Error;

use crate::digest::DigestError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Could not load service account file {}", path.display())]
    CredentialFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid service account private key: {reason}")]
    KeyFormat { reason: String },

    #[error("Failed to exchange signed assertion at {url}")]
    TokenExchange {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Credential helper {program:?} failed: {reason}")]
    DelegateExecution { program: String, reason: String },

    #[error("Failed to request registry token from {url}")]
    TokenRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode registry token from {url}")]
    TokenDecode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode image catalog from {url}")]
    CatalogDecode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {method} response from {url}")]
    OutcomeDecode {
        method: Method,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not resolve digests for image {image:?}")]
    Resolution {
        image: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Request failed (method: {method}, url: {url})")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} (method: {method}, url: {url})")]
    UnexpectedStatus {
        method: Method,
        url: String,
        status: StatusCode,
    },

    #[error("Invalid registry endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error(transparent)]
    InvalidDigest(#[from] DigestError),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
