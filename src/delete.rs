use std::fmt;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::Client,
    digest::Digest,
    error::{Error, Result},
    scope::Scope,
};

/// An error the registry reported about a request it received.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct RegistryApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for RegistryApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// What the registry said about one delete. No errors means it was accepted.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct DeletionOutcome {
    #[serde(default)]
    pub errors: Vec<RegistryApiError>,
}

impl DeletionOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn from_response(status: StatusCode, body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut outcome = match body.iter().all(u8::is_ascii_whitespace) {
            true => DeletionOutcome::default(),
            false => serde_json::from_slice(body)?,
        };

        if !status.is_success() && outcome.errors.is_empty() {
            outcome.errors.push(RegistryApiError {
                code: "UNKNOWN".to_string(),
                message: format!("registry responded with {status}"),
            });
        }

        Ok(outcome)
    }
}

impl Client {
    async fn delete_manifest(
        &self,
        image: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome> {
        let token = self
            .registry_token(&Scope::push_pull(&self.repository, Some(image)), cancel)
            .await?;

        let request = self.request(
            Method::DELETE,
            &format!("{image}/manifests/{reference}"),
            None,
            &token,
        )?;
        let url = request.url().to_string();

        let (status, body) = self.execute(request, cancel).await?;

        let outcome =
            DeletionOutcome::from_response(status, &body).map_err(|source| Error::OutcomeDecode {
                method: Method::DELETE,
                url: url.clone(),
                source,
            })?;

        match outcome.is_success() {
            true => debug!(%url, %status, "Delete accepted"),
            false => warn!(%url, %status, errors = ?outcome.errors, "Delete rejected"),
        }

        Ok(outcome)
    }

    /// Deletes the manifest addressed by `digest`, skipping tag resolution.
    pub async fn delete_digest(
        &self,
        image: &str,
        digest: &Digest,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome> {
        self.delete_manifest(image, &digest.to_string(), cancel)
            .await
    }

    /// Deletes `tag` from `image` along with every manifest carrying it.
    ///
    /// The tag itself goes first, then each digest the tag resolved to, in
    /// catalog order. The first digest delete the registry rejects ends the
    /// run and its outcome is returned; digests already deleted stay deleted.
    /// When every digest delete is accepted the outcome of the tag delete is
    /// returned.
    pub async fn delete_tag(
        &self,
        image: &str,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome> {
        let catalog = self
            .list_tags(image, cancel)
            .await
            .map_err(|err| match err {
                Error::Cancelled => Error::Cancelled,
                other => Error::Resolution {
                    image: image.to_string(),
                    source: Box::new(other),
                },
            })?;

        let digests = catalog
            .digests_for_tag(tag)
            .map_err(|err| Error::Resolution {
                image: image.to_string(),
                source: Box::new(err.into()),
            })?;

        info!(image, tag, digests = digests.len(), "Deleting tag");

        let tag_outcome = self.delete_manifest(image, tag, cancel).await?;

        for digest in &digests {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!(image, %digest, "Deleting digest");

            let outcome = self.delete_digest(image, digest, cancel).await?;
            if !outcome.is_success() {
                return Ok(outcome);
            }
        }

        Ok(tag_outcome)
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use serde_json::json;
    use test_log::test;

    use crate::tests::FixtureBuilder;

    use super::*;

    const REJECTED: &str =
        r#"{"errors": [{"code": "DENIED", "message": "manifest is still referenced"}]}"#;

    fn app_catalog(manifests: serde_json::Value) -> serde_json::Value {
        json!({"name": "proj/app", "manifest": manifests, "tags": []})
    }

    fn request(method: &str, path: &str) -> (String, String) {
        (method.to_string(), path.to_string())
    }

    #[test]
    fn empty_body_is_success() {
        let outcome = DeletionOutcome::from_response(StatusCode::ACCEPTED, b"").unwrap();
        assert!(outcome.is_success());

        let outcome = DeletionOutcome::from_response(StatusCode::OK, b"{}").unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn registry_errors_are_kept_in_order() {
        let outcome = DeletionOutcome::from_response(
            StatusCode::BAD_REQUEST,
            br#"{"errors": [{"code": "A", "message": "first"}, {"code": "B", "message": "second", "detail": {}}]}"#,
        )
        .unwrap();

        assert_eq!(
            outcome.errors,
            vec![
                RegistryApiError {
                    code: "A".into(),
                    message: "first".into()
                },
                RegistryApiError {
                    code: "B".into(),
                    message: "second".into()
                },
            ]
        );
        assert_eq!(outcome.errors[0].to_string(), "A: first");
    }

    #[test]
    fn failed_status_without_errors_is_not_success() {
        let outcome = DeletionOutcome::from_response(StatusCode::NOT_FOUND, b"").unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.errors[0].code, "UNKNOWN");
        assert!(outcome.errors[0].message.contains("404"));
    }

    #[test]
    fn non_json_body_fails_to_decode() {
        assert!(DeletionOutcome::from_response(StatusCode::OK, b"<html>").is_err());
    }

    #[test(tokio::test)]
    async fn deletes_tag_then_digest() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({"sha256:deadbeef": {"tag": ["latest"]}})),
            )
            .delete_response("/v2/proj/app/manifests/latest", StatusCode::ACCEPTED, "")
            .delete_response(
                "/v2/proj/app/manifests/sha256:deadbeef",
                StatusCode::ACCEPTED,
                "{}",
            )
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_tag("app", "latest", &CancellationToken::new())
            .await?;

        assert!(outcome.is_success());
        assert_eq!(
            fixture.registry_requests(),
            vec![
                request("GET", "/v2/proj/app/tags/list"),
                request("DELETE", "/v2/proj/app/manifests/latest"),
                request("DELETE", "/v2/proj/app/manifests/sha256:deadbeef"),
            ]
        );

        let scopes: Vec<_> = fixture
            .requests()
            .into_iter()
            .filter_map(|request| request.query.get("scope").cloned())
            .collect();
        assert_eq!(
            scopes,
            vec![
                "repository:proj/app:pull",
                "repository:proj/app:push,pull",
                "repository:proj/app:push,pull",
            ]
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn deletes_every_digest_bearing_tag() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({
                    "sha256:a": {"tag": ["v1"]},
                    "sha256:b": {"tag": ["v1", "v2"]},
                    "sha256:c": {"tag": ["v2"]}
                })),
            )
            .delete_response("/v2/proj/app/manifests/v1", StatusCode::ACCEPTED, "")
            .delete_response("/v2/proj/app/manifests/sha256:a", StatusCode::ACCEPTED, "")
            .delete_response("/v2/proj/app/manifests/sha256:b", StatusCode::ACCEPTED, "")
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_tag("app", "v1", &CancellationToken::new())
            .await?;

        assert!(outcome.is_success());

        let deleted: Vec<_> = fixture
            .registry_requests()
            .into_iter()
            .filter(|(method, _)| method == "DELETE")
            .map(|(_, path)| path)
            .collect();
        assert_eq!(deleted[0], "/v2/proj/app/manifests/v1");
        let mut digests = deleted[1..].to_vec();
        digests.sort();
        assert_eq!(
            digests,
            vec![
                "/v2/proj/app/manifests/sha256:a",
                "/v2/proj/app/manifests/sha256:b"
            ]
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn first_rejected_digest_stops_the_run() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({
                    "sha256:a": {"tag": ["v1"]},
                    "sha256:b": {"tag": ["v1"]}
                })),
            )
            .delete_response("/v2/proj/app/manifests/v1", StatusCode::ACCEPTED, "")
            .delete_response("/v2/proj/app/manifests/sha256:a", StatusCode::BAD_REQUEST, REJECTED)
            .delete_response("/v2/proj/app/manifests/sha256:b", StatusCode::ACCEPTED, "")
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_tag("app", "v1", &CancellationToken::new())
            .await?;

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].code, "DENIED");
        assert!(
            !fixture
                .registry_requests()
                .contains(&request("DELETE", "/v2/proj/app/manifests/sha256:b"))
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn rejected_tag_delete_is_returned_when_digests_succeed() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({"sha256:a": {"tag": ["v1"]}})),
            )
            .delete_response("/v2/proj/app/manifests/v1", StatusCode::BAD_REQUEST, REJECTED)
            .delete_response("/v2/proj/app/manifests/sha256:a", StatusCode::ACCEPTED, "")
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_tag("app", "v1", &CancellationToken::new())
            .await?;

        assert_eq!(outcome.errors[0].code, "DENIED");
        assert!(
            fixture
                .registry_requests()
                .contains(&request("DELETE", "/v2/proj/app/manifests/sha256:a"))
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn digest_failure_takes_precedence_over_tag_failure() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({"sha256:a": {"tag": ["v1"]}})),
            )
            .delete_response(
                "/v2/proj/app/manifests/v1",
                StatusCode::BAD_REQUEST,
                r#"{"errors": [{"code": "TAG_INVALID", "message": "tag"}]}"#,
            )
            .delete_response("/v2/proj/app/manifests/sha256:a", StatusCode::BAD_REQUEST, REJECTED)
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_tag("app", "v1", &CancellationToken::new())
            .await?;

        assert_eq!(outcome.errors[0].code, "DENIED");

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn deleting_absent_tag_reports_registry_error() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog("/v2/proj/app/tags/list", app_catalog(json!({})))
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_tag("app", "gone", &CancellationToken::new())
            .await?;

        assert_eq!(outcome.errors[0].code, "MANIFEST_UNKNOWN");
        assert_eq!(
            fixture.registry_requests(),
            vec![
                request("GET", "/v2/proj/app/tags/list"),
                request("DELETE", "/v2/proj/app/manifests/gone"),
            ]
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn failed_resolution_deletes_nothing() -> Result<()> {
        let fixture = FixtureBuilder::new().build().await?;
        let client = fixture.client()?;

        let err = client
            .delete_tag("app", "latest", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Resolution { image, source } => {
                assert_eq!(image, "app");
                assert!(matches!(*source, Error::UnexpectedStatus { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(
            fixture
                .registry_requests()
                .iter()
                .all(|(method, _)| method != "DELETE")
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn malformed_digest_fails_resolution() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({"deadbeef": {"tag": ["latest"]}})),
            )
            .build()
            .await?;
        let client = fixture.client()?;

        let err = client
            .delete_tag("app", "latest", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Resolution { .. }));

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn cancelled_delete_sends_nothing() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({"sha256:a": {"tag": ["v1"]}})),
            )
            .build()
            .await?;
        let client = fixture.client()?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.delete_tag("app", "v1", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());

        let err = client
            .delete_digest("app", &Digest::sha256("a"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        assert!(fixture.requests().is_empty());

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn cancellation_between_digest_deletes() -> Result<()> {
        let cancel = CancellationToken::new();
        let fixture = FixtureBuilder::new()
            .catalog(
                "/v2/proj/app/tags/list",
                app_catalog(json!({
                    "sha256:a": {"tag": ["v1"]},
                    "sha256:b": {"tag": ["v1"]}
                })),
            )
            .delete_response("/v2/proj/app/manifests/v1", StatusCode::ACCEPTED, "")
            .delete_response("/v2/proj/app/manifests/sha256:a", StatusCode::ACCEPTED, "")
            .delete_response("/v2/proj/app/manifests/sha256:b", StatusCode::ACCEPTED, "")
            .cancel_on("/v2/proj/app/manifests/sha256:a", cancel.clone())
            .build()
            .await?;
        let client = fixture.client()?;

        let err = client.delete_tag("app", "v1", &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(
            fixture.registry_requests(),
            vec![
                request("GET", "/v2/proj/app/tags/list"),
                request("DELETE", "/v2/proj/app/manifests/v1"),
                request("DELETE", "/v2/proj/app/manifests/sha256:a"),
            ]
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn deletes_single_digest() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .delete_response(
                "/v2/proj/app/manifests/sha256:deadbeef",
                StatusCode::ACCEPTED,
                "",
            )
            .build()
            .await?;
        let client = fixture.client()?;

        let outcome = client
            .delete_digest("app", &Digest::sha256("deadbeef"), &CancellationToken::new())
            .await?;

        assert!(outcome.is_success());
        assert_eq!(
            fixture.registry_requests(),
            vec![request("DELETE", "/v2/proj/app/manifests/sha256:deadbeef")]
        );

        let requests = fixture.requests();
        assert_eq!(
            requests[0].query.get("scope").map(String::as_str),
            Some("repository:proj/app:push,pull")
        );
        assert_eq!(
            requests[1].authorization.as_deref(),
            Some("Bearer registry-token-1")
        );

        fixture.teardown().await
    }

    #[test(tokio::test)]
    async fn undecodable_delete_response() -> Result<()> {
        let fixture = FixtureBuilder::new()
            .delete_response(
                "/v2/proj/app/manifests/sha256:deadbeef",
                StatusCode::OK,
                "<html>oops</html>",
            )
            .build()
            .await?;
        let client = fixture.client()?;

        let err = client
            .delete_digest("app", &Digest::sha256("deadbeef"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OutcomeDecode { .. }));

        fixture.teardown().await
    }
}
