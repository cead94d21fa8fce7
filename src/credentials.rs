use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
};

use jwt_simple::prelude::*;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    cancel::cancellable,
    config::CredentialConfig,
    error::{Error, Result},
};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Long-lived bearer credential used to mint registry tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityCredential(String);

impl IdentityCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityCredential(<redacted>)")
    }
}

/// The fields of a service account key file that matter for signing.
#[derive(Deserialize)]
pub(crate) struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

impl ServiceAccountKey {
    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|source| Error::CredentialFile {
                path: path.to_path_buf(),
                source,
            })?;

        serde_json::from_slice(&contents).map_err(|err| Error::CredentialFile {
            path: path.to_path_buf(),
            source: err.into(),
        })
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct AssertionClaims {
    pub scope: String,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

pub struct ServiceAccountProvider {
    pub key_file: PathBuf,
    pub token_endpoint: String,
    pub scope: String,
}

impl ServiceAccountProvider {
    pub(crate) fn assertion(&self, key: &ServiceAccountKey) -> Result<String> {
        let key_pair = RS256KeyPair::from_pem(&key.private_key).map_err(|err| Error::KeyFormat {
            reason: err.to_string(),
        })?;

        let key_pair = match &key.private_key_id {
            Some(key_id) => key_pair.with_key_id(key_id),
            None => key_pair,
        };

        let custom_claims = AssertionClaims {
            scope: self.scope.clone(),
        };
        let mut claims = Claims::with_custom_claims(
            custom_claims,
            Duration::from_secs(ASSERTION_LIFETIME_SECS),
        )
        .with_issuer(&key.client_email)
        .with_audience(&self.token_endpoint);
        claims.invalid_before = None;

        key_pair.sign(claims).map_err(|err| Error::KeyFormat {
            reason: err.to_string(),
        })
    }

    pub async fn credential(
        &self,
        http: &reqwest::Client,
        cancel: &CancellationToken,
    ) -> Result<IdentityCredential> {
        let key = ServiceAccountKey::load(&self.key_file).await?;
        let assertion = self.assertion(&key)?;

        debug!(
            url = %self.token_endpoint,
            issuer = %key.client_email,
            "Exchanging signed assertion"
        );

        let url = &self.token_endpoint;
        let request = http
            .post(url)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())]);

        let response: AccessTokenResponse = cancellable(cancel, async {
            let exchange = async {
                request
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<AccessTokenResponse>()
                    .await
            };

            exchange.await.map_err(|source| Error::TokenExchange {
                url: url.clone(),
                source,
            })
        })
        .await?;

        info!(issuer = %key.client_email, "Obtained service account credential");

        Ok(IdentityCredential::new(response.access_token))
    }
}

pub struct HelperProvider {
    pub command: Vec<String>,
}

impl HelperProvider {
    pub async fn credential(&self, cancel: &CancellationToken) -> Result<IdentityCredential> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(Error::DelegateExecution {
                program: String::new(),
                reason: "no command configured".into(),
            });
        };

        let failed = |reason: String| Error::DelegateExecution {
            program: program.clone(),
            reason,
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!(%program, "Running credential helper");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| failed(format!("could not start: {err}")))?;

        let output = cancellable(cancel, async {
            child
                .wait_with_output()
                .await
                .map_err(|err| failed(format!("could not collect output: {err}")))
        })
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(failed("produced no output".into()));
        }

        info!(%program, "Obtained delegated credential");

        Ok(IdentityCredential::new(token))
    }
}

/// Source of the identity credential, picked once from configuration.
pub enum CredentialProvider {
    ServiceAccount(ServiceAccountProvider),
    Helper(HelperProvider),
}

impl CredentialProvider {
    pub fn from_config(config: &CredentialConfig) -> Self {
        match config {
            CredentialConfig::ServiceAccount {
                key_file,
                token_endpoint,
                scope,
            } => Self::ServiceAccount(ServiceAccountProvider {
                key_file: key_file.clone(),
                token_endpoint: token_endpoint.clone(),
                scope: scope.clone(),
            }),
            CredentialConfig::Helper { command } => Self::Helper(HelperProvider {
                command: command.clone(),
            }),
        }
    }

    pub async fn credential(
        &self,
        http: &reqwest::Client,
        cancel: &CancellationToken,
    ) -> Result<IdentityCredential> {
        match self {
            Self::ServiceAccount(provider) => provider.credential(http, cancel).await,
            Self::Helper(provider) => provider.credential(cancel).await,
        }
    }
}
