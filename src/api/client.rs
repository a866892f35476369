use reqwest::Client as HttpClient;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::api::models::EngagementRecord;
use crate::error::{InboxError, Result};

/// Supplies the engagements a viewer may see. Authorization lives here: the
/// returned records are already limited to ones the viewer takes part in.
pub trait EngagementSource {
    fn list_visible_engagements(&self, viewer: &str) -> Result<Vec<EngagementRecord>>;
}

fn visible_to(records: Vec<EngagementRecord>, viewer: &str) -> Vec<EngagementRecord> {
    records.into_iter().filter(|r| r.is_participant(viewer)).collect()
}

pub struct ApiClient {
    pub http: HttpClient,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }

    fn base_api(base_url: &str) -> Result<Url> {
        let trimmed = base_url.trim_end_matches('/');
        let base = if trimmed.ends_with("/api") {
            trimmed.to_string()
        } else {
            format!("{}/api", trimmed)
        };
        Url::parse(&format!("{}/", base)).map_err(|e| InboxError::Config(format!("{base_url}: {e}")))
    }

    fn with_auth(mut req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    /// Fetch every project the mock API exposes, proposals included.
    pub async fn projects(&self, base_url: &str, token: Option<&str>) -> Result<Vec<EngagementRecord>> {
        let endpoint = Self::base_api(base_url)?
            .join("projects")
            .map_err(|e| InboxError::Config(e.to_string()))?;
        log::debug!("GET {endpoint}");
        let resp = Self::with_auth(self.http.get(endpoint), token)
            .send()
            .await?
            .error_for_status()?;
        let json: Value = resp.json().await?;
        parse_projects(json)
    }
}

/// Accepts a bare array or an array wrapped in `data` / `projects`.
pub fn parse_projects(json: Value) -> Result<Vec<EngagementRecord>> {
    let items = match json {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("data")
            .or_else(|| map.remove("projects"))
            .unwrap_or(Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    };
    Ok(serde_json::from_value(items)?)
}

/// [`EngagementSource`] backed by the HTTP mock API.
pub struct RemoteSource {
    pub client: ApiClient,
    pub base_url: String,
    pub token: Option<String>,
}

impl EngagementSource for RemoteSource {
    fn list_visible_engagements(&self, viewer: &str) -> Result<Vec<EngagementRecord>> {
        let records = crate::utils::block_on(self.client.projects(&self.base_url, self.token.as_deref()))?;
        Ok(visible_to(records, viewer))
    }
}

/// [`EngagementSource`] reading a JSON array of projects from disk.
pub struct SeedFile {
    path: PathBuf,
}

impl SeedFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Vec<EngagementRecord>> {
        let bytes = fs::read(&self.path)?;
        parse_projects(serde_json::from_slice(&bytes)?)
    }
}

impl EngagementSource for SeedFile {
    fn list_visible_engagements(&self, viewer: &str) -> Result<Vec<EngagementRecord>> {
        Ok(visible_to(self.load()?, viewer))
    }
}
