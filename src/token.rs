use std::fmt;

use base64::engine::{Engine, general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cancel::cancellable,
    client::Client,
    error::{Error, Result},
    scope::Scope,
};

const TOKEN_USERNAME: &str = "_token";

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<f64>,
    issued_at: Option<DateTime<Utc>>,
}

/// Short lived bearer token for one scope. Fetched per operation, never cached.
#[derive(Clone, Deserialize)]
#[serde(try_from = "TokenResponse")]
pub struct RegistryToken {
    value: String,
    pub expires_in: Option<u64>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl TryFrom<TokenResponse> for RegistryToken {
    type Error = String;

    fn try_from(response: TokenResponse) -> Result<Self, Self::Error> {
        let value = response
            .token
            .or(response.access_token)
            .filter(|token| !token.is_empty())
            .ok_or("token response carries neither token nor access_token")?;

        Ok(RegistryToken {
            value,
            expires_in: response
                .expires_in
                .filter(|secs| secs.is_finite())
                .map(|secs| secs.max(0.0) as u64),
            issued_at: response.issued_at,
        })
    }
}

impl RegistryToken {
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for RegistryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryToken")
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

impl Client {
    fn basic_credential(&self) -> String {
        let encoded = STANDARD.encode(format!(
            "{TOKEN_USERNAME}:{}",
            self.credential.expose()
        ));
        format!("Basic {encoded}")
    }

    /// Trades the identity credential for a registry token limited to `scope`.
    pub async fn registry_token(
        &self,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> Result<RegistryToken> {
        let url = self.token_url.to_string();
        let scope = scope.to_string();

        debug!(%url, %scope, "Requesting registry token");

        let request = self
            .http
            .get(self.token_url.clone())
            .query(&[("scope", scope.as_str()), ("service", self.host.as_str())])
            .header(AUTHORIZATION, self.basic_credential())
            .header(CONTENT_TYPE, "application/json");

        let body = cancellable(cancel, async {
            let exchange = async {
                let response = request.send().await?.error_for_status()?;
                response.bytes().await
            };

            exchange.await.map_err(|source| Error::TokenRequest {
                url: url.clone(),
                source,
            })
        })
        .await?;

        serde_json::from_slice(&body).map_err(|source| Error::TokenDecode { url, source })
    }
}
