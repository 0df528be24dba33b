use serde::{Deserialize, Serialize};

pub const DEFAULT_QUERY_URL: &str =
    "https://marketplace.visualstudio.com/_apis/public/gallery/extensionquery";
pub const DEFAULT_ASSET_URL_TEMPLATE: &str = "https://{publisher}.gallery.vsassets.io/_apis/public/gallery/publisher/{publisher}/extension/{name}/{version}/assetbyname/Microsoft.VisualStudio.Services.VSIXPackage";
pub const DEFAULT_USER_AGENT: &str = "VSIX Downloader/1.0";

/// Criteria filter type that matches on the full `publisher.name`.
const FILTER_BY_NAME: u32 = 7;
/// Include versions, files and asset URIs in the response.
const QUERY_FLAGS: u32 = 914;

/// Body of the `extensionquery` request
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionQuery {
    pub filters: Vec<QueryFilter>,
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryFilter {
    pub criteria: Vec<QueryCriterion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCriterion {
    pub filter_type: u32,
    pub value: String,
}

impl ExtensionQuery {
    pub fn by_name(identifier: &str) -> Self {
        Self {
            filters: vec![QueryFilter {
                criteria: vec![QueryCriterion {
                    filter_type: FILTER_BY_NAME,
                    value: identifier.to_string(),
                }],
            }],
            flags: QUERY_FLAGS,
        }
    }
}

/// Response from the `extensionquery` endpoint, reduced to what we read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub extensions: Vec<ExtensionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtensionEntry {
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionEntry {
    #[serde(default)]
    pub version: String,
}

impl QueryResponse {
    /// The marketplace lists the newest version first.
    pub fn latest_version(&self) -> Option<&str> {
        self.results
            .first()?
            .extensions
            .first()?
            .versions
            .first()
            .map(|v| v.version.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Where a package can be fetched from and what to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPackage {
    pub download_url: String,
    pub filename: String,
    pub extension: String,
    pub version: String,
}

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub query_url: String,
    /// `{publisher}`, `{name}` and `{version}` are substituted.
    pub asset_url_template: String,
    pub user_agent: String,
}

impl ApiConfig {
    pub fn asset_url(&self, publisher: &str, name: &str, version: &str) -> String {
        self.asset_url_template
            .replace("{publisher}", publisher)
            .replace("{name}", name)
            .replace("{version}", version)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            query_url: DEFAULT_QUERY_URL.to_string(),
            asset_url_template: DEFAULT_ASSET_URL_TEMPLATE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_payload_shape() {
        let body = serde_json::to_value(ExtensionQuery::by_name("ms-python.python")).unwrap();
        assert_eq!(
            body,
            json!({
                "filters": [{ "criteria": [{ "filterType": 7, "value": "ms-python.python" }] }],
                "flags": 914
            })
        );
    }

    #[test]
    fn test_latest_version() {
        let response: QueryResponse = serde_json::from_value(json!({
            "results": [{ "extensions": [{ "versions": [{ "version": "2.0.1" }, { "version": "2.0.0" }] }] }]
        }))
        .unwrap();
        assert_eq!(response.latest_version(), Some("2.0.1"));

        let empty: QueryResponse =
            serde_json::from_value(json!({ "results": [{ "extensions": [] }] })).unwrap();
        assert_eq!(empty.latest_version(), None);
    }

    #[test]
    fn test_default_asset_url() {
        let url = ApiConfig::default().asset_url("ms-python", "python", "2024.1.0");
        assert_eq!(
            url,
            "https://ms-python.gallery.vsassets.io/_apis/public/gallery/publisher/ms-python/extension/python/2024.1.0/assetbyname/Microsoft.VisualStudio.Services.VSIXPackage"
        );
    }

    #[test]
    fn test_resolved_package_wire_format() {
        let package = ResolvedPackage {
            download_url: "https://x/y".into(),
            filename: "a.b-1.0.0.vsix".into(),
            extension: "a.b".into(),
            version: "1.0.0".into(),
        };
        let value = serde_json::to_value(&package).unwrap();
        assert_eq!(value["downloadUrl"], "https://x/y");
        assert_eq!(value["extension"], "a.b");
    }
}
