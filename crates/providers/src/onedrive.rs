//! OneDrive access through Microsoft Graph.
//!
//! Paths are drive-relative and `/` separated, without a leading slash; the
//! empty string is the drive root.

use crate::ProviderError;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub last_modified: Option<String>,
    pub is_folder: bool,
    pub mime_type: Option<String>,
}

#[async_trait::async_trait]
pub trait DriveClient: Send + Sync {
    async fn list_children(&self, path: &str) -> Result<Vec<DriveItem>, ProviderError>;
    async fn item_by_path(&self, path: &str) -> Result<DriveItem, ProviderError>;
    /// Moves `item_id` into `target_folder` (created when missing) under `new_name`.
    async fn move_item(
        &self,
        item_id: &str,
        target_folder: &str,
        new_name: &str,
    ) -> Result<DriveItem, ProviderError>;
    async fn download(&self, item_id: &str) -> Result<Bytes, ProviderError>;
}

#[derive(Clone)]
pub struct GraphConfig {
    pub base_url: String,
    pub access_token: String,
}

#[derive(Clone)]
pub struct GraphDriveClient {
    client: Client,
    cfg: Arc<GraphConfig>,
}

#[derive(Deserialize)]
struct GraphItem {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "lastModifiedDateTime")]
    last_modified: Option<String>,
    folder: Option<serde_json::Value>,
    file: Option<GraphFile>,
}

#[derive(Deserialize)]
struct GraphFile {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct GraphPage {
    value: Vec<GraphItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

impl From<GraphItem> for DriveItem {
    fn from(item: GraphItem) -> Self {
        DriveItem {
            id: item.id,
            name: item.name,
            size: item.size,
            last_modified: item.last_modified,
            is_folder: item.folder.is_some(),
            mime_type: item.file.and_then(|f| f.mime_type),
        }
    }
}

impl GraphDriveClient {
    pub fn new(cfg: GraphConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn base(&self) -> &str {
        self.cfg.base_url.trim_end_matches('/')
    }

    fn item_url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/me/drive/root", self.base())
        } else {
            format!("{}/me/drive/root:/{}:", self.base(), encode_path(path))
        }
    }

    fn children_url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("{}/me/drive/root/children", self.base())
        } else {
            format!("{}/children", self.item_url(path))
        }
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, ProviderError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<DriveItem, ProviderError> {
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail",
        });
        let resp = self
            .client
            .post(self.children_url(parent))
            .bearer_auth(&self.cfg.access_token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp, name).await?;
        let item: GraphItem = resp.json().await?;
        Ok(item.into())
    }

    /// Resolves a folder by path, creating every missing segment.
    pub async fn ensure_folder(&self, path: &str) -> Result<DriveItem, ProviderError> {
        let mut current = String::new();
        let mut item = self.item_by_path("").await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = if current.is_empty() {
                segment.to_string()
            } else {
                format!("{}/{}", current, segment)
            };
            item = match self.item_by_path(&next).await {
                Ok(found) => found,
                Err(ProviderError::NotFound(_)) => {
                    debug!(folder = %next, "creating drive folder");
                    self.create_folder(&current, segment).await?
                }
                Err(e) => return Err(e),
            };
            current = next;
        }
        Ok(item)
    }
}

#[async_trait::async_trait]
impl DriveClient for GraphDriveClient {
    async fn list_children(&self, path: &str) -> Result<Vec<DriveItem>, ProviderError> {
        let mut items = Vec::new();
        let mut url = Some(self.children_url(path));
        while let Some(next) = url.take() {
            let resp = self
                .client
                .get(&next)
                .bearer_auth(&self.cfg.access_token)
                .send()
                .await?;
            let resp = Self::check(resp, path).await?;
            let page: GraphPage = resp.json().await?;
            items.extend(page.value.into_iter().map(DriveItem::from));
            url = page.next_link;
        }
        Ok(items)
    }

    async fn item_by_path(&self, path: &str) -> Result<DriveItem, ProviderError> {
        let resp = self
            .client
            .get(self.item_url(path))
            .bearer_auth(&self.cfg.access_token)
            .send()
            .await?;
        let resp = Self::check(resp, path).await?;
        let item: GraphItem = resp.json().await?;
        Ok(item.into())
    }

    async fn move_item(
        &self,
        item_id: &str,
        target_folder: &str,
        new_name: &str,
    ) -> Result<DriveItem, ProviderError> {
        let folder = self.ensure_folder(target_folder).await?;
        let body = serde_json::json!({
            "parentReference": { "id": folder.id },
            "name": new_name,
        });
        let resp = self
            .client
            .patch(format!("{}/me/drive/items/{}", self.base(), item_id))
            .bearer_auth(&self.cfg.access_token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp, item_id).await?;
        let item: GraphItem = resp.json().await?;
        Ok(item.into())
    }

    async fn download(&self, item_id: &str) -> Result<Bytes, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/me/drive/items/{}/content", self.base(), item_id))
            .bearer_auth(&self.cfg.access_token)
            .send()
            .await?;
        let resp = Self::check(resp, item_id).await?;
        Ok(resp.bytes().await?)
    }
}

/// Percent-encodes each path segment, keeping the `/` separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
