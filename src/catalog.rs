use std::collections::{BTreeMap, BTreeSet};

use reqwest::Method;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::Client,
    digest::{Digest, DigestError},
    error::{Error, Result},
    scope::Scope,
};

/// Registries report the numeric manifest fields as strings.
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(number) => Ok(number),
        NumberOrString::String(string) if string.is_empty() => Ok(0),
        NumberOrString::String(string) => string.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default, rename = "tag")]
    pub tags: Vec<String>,
    #[serde(default, rename = "imageSizeBytes", deserialize_with = "number_or_string")]
    pub size_bytes: u64,
    #[serde(default, rename = "layerId")]
    pub layer_id: String,
    #[serde(default, rename = "mediaType")]
    pub media_type: String,
    #[serde(default, rename = "timeCreatedMs", deserialize_with = "number_or_string")]
    pub created_at_ms: u64,
    #[serde(default, rename = "timeUploadedMs", deserialize_with = "number_or_string")]
    pub uploaded_at_ms: u64,
}

/// One page of `tags/list` output, for the repository root or one image.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ImageCatalog {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "child")]
    pub children: BTreeSet<String>,
    #[serde(default, rename = "manifest")]
    pub manifests: BTreeMap<String, Manifest>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ImageCatalog {
    /// Every digest whose manifest carries `tag`, in catalog order.
    ///
    /// More than one digest can carry the same tag when the registry is
    /// inconsistent; all of them are returned.
    pub fn digests_for_tag(&self, tag: &str) -> Result<Vec<Digest>, DigestError> {
        self.manifests
            .iter()
            .filter(|(_, manifest)| manifest.tags.iter().any(|candidate| candidate == tag))
            .map(|(digest, _)| digest.parse())
            .collect()
    }
}

impl Client {
    /// Lists the images and tags directly under the repository.
    pub async fn list_repository(&self, cancel: &CancellationToken) -> Result<ImageCatalog> {
        self.fetch_catalog(None, cancel).await
    }

    /// Lists the manifests and tags of `image`.
    pub async fn list_tags(&self, image: &str, cancel: &CancellationToken) -> Result<ImageCatalog> {
        self.fetch_catalog(Some(image), cancel).await
    }

    async fn fetch_catalog(
        &self,
        image: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ImageCatalog> {
        let token = self
            .registry_token(&Scope::pull(&self.repository, image), cancel)
            .await?;

        let subpath = match image {
            Some(image) => format!("{image}/tags/list"),
            None => "tags/list".to_string(),
        };

        let request = self.request(Method::GET, &subpath, None, &token)?;
        let url = request.url().to_string();

        let (status, body) = self.execute(request, cancel).await?;
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                method: Method::GET,
                url,
                status,
            });
        }

        let catalog: ImageCatalog =
            serde_json::from_slice(&body).map_err(|source| Error::CatalogDecode {
                url: url.clone(),
                source,
            })?;

        debug!(
            %url,
            children = catalog.children.len(),
            manifests = catalog.manifests.len(),
            tags = catalog.tags.len(),
            "Read image catalog"
        );

        Ok(catalog)
    }
}
