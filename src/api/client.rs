use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{ApiConfig, ExtensionQuery, QueryResponse, ResolvedPackage};
use crate::domain::{AppError, ExtensionId};

const QUERY_ACCEPT: &str = "application/json;api-version=3.0-preview.1";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidIdentifier(AppError),

    #[error("Marketplace unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Download request failed with status {0}")]
    DownloadStatus(StatusCode),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::InvalidIdentifier(inner) => inner,
            ApiError::UpstreamUnavailable(reason) => AppError::UpstreamUnavailable(reason),
            ApiError::NotFound(identifier) => AppError::NotFound(identifier),
            ApiError::InvalidResponse(reason) => AppError::Internal(reason),
            ApiError::RequestError(e) => AppError::NetworkFailure(e.to_string()),
            ApiError::DownloadStatus(status) => {
                AppError::NetworkFailure(format!("HTTP {}", status))
            }
        }
    }
}

/// Talks to the marketplace query service and to package byte sources.
#[derive(Clone)]
pub struct MarketplaceClient {
    config: ApiConfig,
    http: Client,
}

impl MarketplaceClient {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    /// Turn an identifier (and optional pinned version) into a download URL.
    ///
    /// Makes exactly one request to the query service, never retries, and
    /// fails before touching the network when the identifier is malformed.
    /// A pinned version is taken verbatim; if it does not exist the failure
    /// surfaces later, when the package itself is fetched.
    pub async fn resolve(&self, identifier: &str, version: Option<&str>) -> Result<ResolvedPackage> {
        let extension = ExtensionId::parse(identifier).map_err(ApiError::InvalidIdentifier)?;
        let pinned = version.filter(|v| !v.trim().is_empty());

        debug!(%extension, ?pinned, "Querying marketplace");
        let response = self
            .http
            .post(&self.config.query_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, QUERY_ACCEPT)
            .header(USER_AGENT, &self.config.user_agent)
            .json(&ExtensionQuery::by_name(&extension.to_string()))
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            warn!(%extension, status = %response.status(), "Marketplace query failed");
            return Err(ApiError::UpstreamUnavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("JSON decode error: {}", e)))?;

        let version = match pinned {
            Some(v) => v.to_string(),
            None => body
                .latest_version()
                .ok_or_else(|| ApiError::NotFound(extension.to_string()))?
                .to_string(),
        };

        let package = ResolvedPackage {
            download_url: self
                .config
                .asset_url(&extension.publisher, &extension.name, &version),
            filename: extension.filename(&version),
            extension: extension.to_string(),
            version,
        };
        info!(extension = %package.extension, version = %package.version, "Resolved package");
        Ok(package)
    }

    /// Open a streaming GET on a package URL.
    /// Returns (total_size, stream)
    pub async fn download_stream(
        &self,
        download_url: &str,
    ) -> Result<(Option<u64>, BoxStream<'static, Result<bytes::Bytes>>)> {
        let response = self.http.get(download_url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::DownloadStatus(response.status()));
        }

        let total_size = response.content_length().filter(|len| *len > 0);
        let stream = response
            .bytes_stream()
            .map_err(ApiError::RequestError)
            .boxed();

        Ok((total_size, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    const LATEST: &str =
        r#"{"results":[{"extensions":[{"versions":[{"version":"2024.2.0"},{"version":"2024.1.0"}]}]}]}"#;

    fn client_for(server: &ServerGuard) -> MarketplaceClient {
        MarketplaceClient::new(ApiConfig {
            query_url: format!("{}/query", server.url()),
            asset_url_template: format!("{}/assets/{{publisher}}/{{name}}/{{version}}", server.url()),
            ..ApiConfig::default()
        })
    }

    #[tokio::test]
    async fn test_resolve_latest_version() {
        let mut server = Server::new_async().await;
        let query = server
            .mock("POST", "/query")
            .match_header("accept", QUERY_ACCEPT)
            .match_header("user-agent", "VSIX Downloader/1.0")
            .match_body(Matcher::PartialJsonString(
                r#"{"filters":[{"criteria":[{"filterType":7,"value":"ms-python.python"}]}],"flags":914}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(LATEST)
            .expect(1)
            .create_async()
            .await;

        let package = client_for(&server)
            .resolve("ms-python.python", None)
            .await
            .unwrap();

        query.assert_async().await;
        assert_eq!(package.version, "2024.2.0");
        assert_eq!(package.filename, "ms-python.python-2024.2.0.vsix");
        assert_eq!(package.extension, "ms-python.python");
        assert_eq!(
            package.download_url,
            format!("{}/assets/ms-python/python/2024.2.0", server.url())
        );
    }

    #[tokio::test]
    async fn test_resolve_pinned_version_is_verbatim() {
        let mut server = Server::new_async().await;
        let _query = server
            .mock("POST", "/query")
            .with_status(200)
            .with_body(LATEST)
            .create_async()
            .await;

        let client = client_for(&server);
        let package = client
            .resolve("ms-python.python", Some("0.0.1-does-not-exist"))
            .await
            .unwrap();
        assert_eq!(package.version, "0.0.1-does-not-exist");

        let package = client
            .resolve("ms-python.python", Some(" 1.2.3"))
            .await
            .unwrap();
        assert_eq!(package.version, " 1.2.3");

        // An empty version means "latest"
        let package = client.resolve("ms-python.python", Some("")).await.unwrap();
        assert_eq!(package.version, "2024.2.0");
        let package = client.resolve("ms-python.python", Some("  ")).await.unwrap();
        assert_eq!(package.version, "2024.2.0");
    }

    #[tokio::test]
    async fn test_resolve_invalid_identifier_skips_network() {
        let mut server = Server::new_async().await;
        let query = server
            .mock("POST", "/query")
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server);
        for bad in ["python", ".python", "ms-python.", "a.b.c"] {
            let err = client.resolve(bad, None).await.unwrap_err();
            assert_eq!(
                AppError::from(err),
                AppError::InvalidIdentifier(bad.to_string())
            );
        }
        query.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_upstream_error() {
        let mut server = Server::new_async().await;
        let _query = server
            .mock("POST", "/query")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server)
            .resolve("ms-python.python", None)
            .await
            .unwrap_err();
        assert!(matches!(
            AppError::from(err),
            AppError::UpstreamUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let mut server = Server::new_async().await;
        let _query = server
            .mock("POST", "/query")
            .with_status(200)
            .with_body(r#"{"results":[{"extensions":[]}]}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .resolve("nobody.nothing", None)
            .await
            .unwrap_err();
        assert_eq!(
            AppError::from(err),
            AppError::NotFound("nobody.nothing".to_string())
        );
    }

    #[tokio::test]
    async fn test_download_stream_reports_length() {
        let mut server = Server::new_async().await;
        let _asset = server
            .mock("GET", "/file.vsix")
            .with_status(200)
            .with_body(vec![7u8; 2048])
            .create_async()
            .await;

        let client = client_for(&server);
        let (total, stream) = client
            .download_stream(&format!("{}/file.vsix", server.url()))
            .await
            .unwrap();
        assert_eq!(total, Some(2048));

        let chunks: Vec<_> = stream.collect().await;
        let received: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(received, 2048);
    }

    #[tokio::test]
    async fn test_download_stream_rejects_error_status() {
        let mut server = Server::new_async().await;
        let _asset = server
            .mock("GET", "/missing.vsix")
            .with_status(404)
            .create_async()
            .await;

        let result = client_for(&server)
            .download_stream(&format!("{}/missing.vsix", server.url()))
            .await;
        assert!(matches!(
            result,
            Err(ApiError::DownloadStatus(status)) if status == StatusCode::NOT_FOUND
        ));
    }
}
