use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use platform_dirs::AppDirs;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const DEFAULT_OAUTH_SCOPE: &str =
    "https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/cloud-platform";

fn default_helper_command() -> Vec<String> {
    ["gcloud", "auth", "print-access-token"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

fn default_oauth_scope() -> String {
    DEFAULT_OAUTH_SCOPE.to_string()
}

fn default_user_agent() -> String {
    format!("regsweep/{}", env!("CARGO_PKG_VERSION"))
}

/// Where the long-lived identity credential comes from.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialConfig {
    /// Run an already authenticated tool and use what it prints.
    Helper {
        #[serde(default = "default_helper_command")]
        command: Vec<String>,
    },
    /// Sign an assertion with a service account key and trade it for an access token.
    ServiceAccount {
        key_file: PathBuf,
        #[serde(default = "default_token_endpoint")]
        token_endpoint: String,
        #[serde(default = "default_oauth_scope")]
        scope: String,
    },
}

impl CredentialConfig {
    pub fn service_account(key_file: PathBuf) -> Self {
        Self::ServiceAccount {
            key_file,
            token_endpoint: default_token_endpoint(),
            scope: default_oauth_scope(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self::Helper {
            command: default_helper_command(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Configuration {
    pub host: String,
    pub repository: String,
    pub endpoint: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub credentials: CredentialConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            host: "gcr.io".into(),
            repository: String::new(),
            endpoint: None,
            user_agent: default_user_agent(),
            credentials: CredentialConfig::default(),
        }
    }
}

impl Configuration {
    pub fn figment(configs: Vec<PathBuf>) -> Figment {
        let fig = Figment::from(Serialized::defaults(Configuration::default()));

        let fig = match AppDirs::new(Some("regsweep"), true) {
            Some(app_dirs) => {
                let config_path = app_dirs.config_dir.join("config.yaml");
                match config_path.exists() {
                    true => fig.merge(Yaml::file(config_path)),
                    false => fig,
                }
            }
            None => fig,
        };

        let fig = configs
            .into_iter()
            .fold(fig, |fig, config_path| fig.merge(Yaml::file(config_path)));

        fig.merge(Env::prefixed("REGSWEEP_").split("__"))
    }

    /// Switches credentials to the service account at `key_file`.
    ///
    /// Only the variant and the key path are set, so a configured
    /// `token_endpoint` or `scope` is kept.
    pub fn with_key_file(figment: Figment, key_file: &Path) -> Figment {
        figment
            .merge(("credentials.type", "service_account"))
            .merge(("credentials.key_file", key_file))
    }

    pub fn config(figment: Figment) -> Result<Configuration> {
        let config: Configuration = figment.extract().context("Failed to load configuration")?;

        if config.host.trim().is_empty() {
            bail!("host must not be empty");
        }

        if config.repository.trim_matches('/').is_empty() {
            bail!("repository must not be empty");
        }

        if let CredentialConfig::Helper { command } = &config.credentials {
            if command.is_empty() {
                bail!("credential helper command must not be empty");
            }
        }

        Ok(config)
    }

    /// Scheme and authority every registry URL is built on.
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.host),
        }
    }
}
