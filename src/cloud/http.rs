//! REST implementation of [`CloudClient`] backed by reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{CloudClient, ExternalResource, ListQuery, ProjectScope, ResourceKind, ResourceSpec};
use crate::Error;

/// Environment variable holding the API base URL
pub const ENV_AUTH_URL: &str = "VIETTEL_CLOUD_AUTH_URL";
/// Environment variable holding the API user
pub const ENV_USER_NAME: &str = "VIETTEL_CLOUD_USER_NAME";
/// Environment variable holding the API password
pub const ENV_PASSWORD: &str = "VIETTEL_CLOUD_PASS_WORD";

/// Connection settings for the Viettel Cloud API
#[derive(Clone)]
pub struct CloudConfig {
    /// API root, e.g. `https://api.viettelcloud.vn/`
    pub base_url: String,
    /// Basic auth user
    pub username: String,
    /// Basic auth password
    pub password: String,
    /// Per-request deadline
    pub request_timeout: Duration,
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl CloudConfig {
    /// Default per-request deadline
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Read credentials from the standard environment variables
    pub fn from_env() -> Result<Self, Error> {
        let var = |key: &str| {
            std::env::var(key)
                .map_err(|_| Error::unsupported(format!("environment variable {key} is not set")))
        };

        Ok(Self {
            base_url: var(ENV_AUTH_URL)?,
            username: var(ENV_USER_NAME)?,
            password: var(ENV_PASSWORD)?,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        })
    }
}

/// One page of a list response
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<ExternalResource>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Viettel Cloud API client
pub struct HttpCloudClient {
    client: reqwest::Client,
    config: CloudConfig,
}

impl HttpCloudClient {
    /// Create a client from connection settings
    pub fn new(config: CloudConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::transport("client", &config.base_url, e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, kind: ResourceKind, id: Option<&str>) -> String {
        resource_url(&self.config.base_url, kind.path(), id)
    }

    fn request(&self, method: Method, url: &str, scope: &ProjectScope) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[("project_id", scope.project_id.as_str())])
    }
}

/// Join the API root, a resource path and an optional ID into a URL
fn resource_url(base: &str, path: &str, id: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match id {
        Some(id) => format!("{base}/{path}/{id}/"),
        None => format!("{base}/{path}/"),
    }
}

/// Wrap a reqwest failure with resource context
fn wrap(kind: impl std::fmt::Display, id: &str) -> impl Fn(reqwest::Error) -> Error + '_ {
    let kind = kind.to_string();
    move |e| Error::transport(kind.clone(), id, e.to_string())
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    #[instrument(skip(self, scope), fields(project = %scope.project_id))]
    async fn list(
        &self,
        kind: ResourceKind,
        scope: &ProjectScope,
        query: &ListQuery,
    ) -> Result<Vec<ExternalResource>, Error> {
        let filter = format!("{query:?}");
        let mut items = Vec::new();
        let mut next = Some(self.url(kind, None));
        let mut first = true;

        while let Some(url) = next.take() {
            let mut req = self.request(Method::GET, &url, scope);
            // Pagination links already carry the original filter
            if first {
                req = req.query(&query.to_params());
                first = false;
            }

            let page: Page = req
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(wrap(kind, &filter))?
                .json()
                .await
                .map_err(wrap(kind, &filter))?;

            items.extend(page.results);
            next = page.next;
        }

        debug!(%kind, count = items.len(), "listed resources");
        Ok(items)
    }

    #[instrument(skip(self, scope, spec), fields(project = %scope.project_id, kind = %spec.kind(), name = %spec.name()))]
    async fn create(&self, scope: &ProjectScope, spec: &ResourceSpec) -> Result<String, Error> {
        let kind = spec.kind();
        let created: Created = self
            .request(Method::POST, &self.url(kind, None), scope)
            .json(spec)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(wrap(kind, spec.name()))?
            .json()
            .await
            .map_err(wrap(kind, spec.name()))?;

        Ok(created.id)
    }

    async fn retrieve(
        &self,
        kind: ResourceKind,
        scope: &ProjectScope,
        id: &str,
    ) -> Result<ExternalResource, Error> {
        let resp = self
            .request(Method::GET, &self.url(kind, Some(id)), scope)
            .send()
            .await
            .map_err(wrap(kind, id))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::not_found(kind.to_string(), id));
        }

        resp.error_for_status()
            .map_err(wrap(kind, id))?
            .json()
            .await
            .map_err(wrap(kind, id))
    }

    #[instrument(skip(self, scope), fields(project = %scope.project_id))]
    async fn destroy(
        &self,
        kind: ResourceKind,
        scope: &ProjectScope,
        id: &str,
    ) -> Result<(), Error> {
        let resp = self
            .request(Method::DELETE, &self.url(kind, Some(id)), scope)
            .send()
            .await
            .map_err(wrap(kind, id))?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(%kind, id, "already gone");
            return Ok(());
        }

        resp.error_for_status().map_err(wrap(kind, id))?;
        Ok(())
    }

    async fn enable_internet_access(
        &self,
        scope: &ProjectScope,
        route_table_id: &str,
    ) -> Result<(), Error> {
        let url = format!(
            "{}enable-internet-access/",
            resource_url(&self.config.base_url, "infra/route-tables", Some(route_table_id))
        );

        self.request(Method::PUT, &url, scope)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(wrap("route table", route_table_id))?;

        Ok(())
    }
}
