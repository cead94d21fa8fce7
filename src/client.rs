use reqwest::{Method, Request, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cancel::cancellable,
    config::Configuration,
    credentials::{CredentialProvider, IdentityCredential},
    error::{Error, Result},
    token::RegistryToken,
};

/// Session against one repository of one registry.
///
/// Built once at startup and never mutated afterwards. Cloning is cheap and
/// clones share the connection pool.
#[derive(Clone, Debug)]
pub struct Client {
    pub(crate) http: reqwest::Client,
    pub(crate) base: Url,
    pub(crate) token_url: Url,
    pub(crate) credential: IdentityCredential,
    pub(crate) host: String,
    pub(crate) repository: String,
}

fn parse_url(url: String) -> Result<Url> {
    Url::parse(&url).map_err(|err| Error::InvalidEndpoint {
        reason: err.to_string(),
        url,
    })
}

/// Joins `subpath` onto `base`, collapsing empty segments.
pub(crate) fn join_path(base: &str, subpath: &str) -> String {
    let segments = base
        .split('/')
        .chain(subpath.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();

    format!("/{}", segments.join("/"))
}

impl Client {
    /// Obtains the identity credential from the configured source and builds a client around it.
    pub async fn connect(config: &Configuration, cancel: &CancellationToken) -> Result<Client> {
        let http = Self::http_client(config)?;
        let credential = CredentialProvider::from_config(&config.credentials)
            .credential(&http, cancel)
            .await?;

        Self::from_parts(config, http, credential)
    }

    pub fn with_credential(config: &Configuration, credential: IdentityCredential) -> Result<Client> {
        Self::from_parts(config, Self::http_client(config)?, credential)
    }

    fn http_client(config: &Configuration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| Error::InvalidEndpoint {
                url: config.endpoint(),
                reason: err.to_string(),
            })
    }

    fn from_parts(
        config: &Configuration,
        http: reqwest::Client,
        credential: IdentityCredential,
    ) -> Result<Client> {
        let endpoint = config.endpoint();
        let repository = config.repository.trim_matches('/').to_string();

        let mut base = parse_url(endpoint.clone())?;
        base.set_path(&join_path("/v2", &repository));

        let mut token_url = parse_url(endpoint)?;
        token_url.set_path("/v2/token");

        debug!(%base, %token_url, "Registry client ready");

        Ok(Client {
            http,
            base,
            token_url,
            credential,
            host: config.host.clone(),
            repository,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub(crate) fn url_for(&self, subpath: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(&join_path(self.base.path(), subpath));
        url
    }

    /// Builds one registry API request carrying `token` as its bearer.
    pub fn request(
        &self,
        method: Method,
        subpath: &str,
        body: Option<Vec<u8>>,
        token: &RegistryToken,
    ) -> Result<Request> {
        let url = self.url_for(subpath);

        let builder = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(token.expose());

        let builder = match body {
            Some(body) => builder.body(body),
            None => builder,
        };

        builder.build().map_err(|source| Error::Transport {
            method,
            url: url.to_string(),
            source,
        })
    }

    /// Sends `request` once and reads the whole body, aborting if `cancel` fires.
    pub(crate) async fn execute(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let method = request.method().clone();
        let url = request.url().to_string();

        debug!(%method, %url, "Sending registry request");

        cancellable(cancel, async {
            let exchange = async {
                let response = self.http.execute(request).await?;
                let status = response.status();
                let body = response.bytes().await?;
                Ok((status, body.to_vec()))
            };

            exchange.await.map_err(|source| Error::Transport {
                method: method.clone(),
                url: url.clone(),
                source,
            })
        })
        .await
    }
}
