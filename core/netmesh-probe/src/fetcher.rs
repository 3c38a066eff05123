//! Fetching the raw content of external resources.

use crate::{ProbeError, ProbeResult};
use async_trait::async_trait;
use netmesh_types::NetMeshBaseIdentifier;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Raw content of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    /// MIME type without parameters, if known.
    pub content_type: Option<String>,
}

impl FetchedResource {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.map(normalize_content_type),
        }
    }
}

/// Strips parameters such as `; charset=utf-8`.
fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Retrieves the content behind a network identifier.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Whether this fetcher can retrieve `id` at all.
    fn supports(&self, id: &NetMeshBaseIdentifier) -> bool;

    async fn fetch(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<FetchedResource>;
}

/// Serves content held in memory. Useful for tests and for resources
/// generated in-process.
#[derive(Default)]
pub struct MemoryFetcher {
    resources: RwLock<HashMap<NetMeshBaseIdentifier, FetchedResource>>,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the content of a resource.
    pub fn insert(&self, id: NetMeshBaseIdentifier, resource: FetchedResource) {
        self.resources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, resource);
    }

    /// Removes a resource; fetching it fails from now on.
    pub fn remove(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.resources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    fn supports(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    async fn fetch(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<FetchedResource> {
        self.resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| ProbeError::NotFound(id.to_string()))
    }
}

/// Reads `file://` resources from the local file system.
#[derive(Debug, Default, Clone)]
pub struct FileFetcher;

impl FileFetcher {
    fn path_of(id: &NetMeshBaseIdentifier) -> PathBuf {
        PathBuf::from(id.authority())
    }

    fn guess_content_type(path: &std::path::Path) -> Option<&'static str> {
        match path.extension()?.to_str()? {
            "json" => Some("application/json"),
            "txt" => Some("text/plain"),
            "xml" => Some("application/xml"),
            _ => None,
        }
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    fn supports(&self, id: &NetMeshBaseIdentifier) -> bool {
        id.scheme() == "file"
    }

    async fn fetch(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<FetchedResource> {
        let path = Self::path_of(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(FetchedResource::new(bytes, Self::guess_content_type(&path)))
    }
}

/// Fetches `http://` and `https://` resources.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> ProbeResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("netmesh/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Uses an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn supports(&self, id: &NetMeshBaseIdentifier) -> bool {
        matches!(id.scheme(), "http" | "https")
    }

    async fn fetch(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<FetchedResource> {
        let response = self
            .client
            .get(id.as_str())
            .send()
            .await
            .map_err(|e| ProbeError::Fetch(format!("{id}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProbeError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(ProbeError::Fetch(format!("{id}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes from {}", bytes.len(), id);
        Ok(FetchedResource::new(bytes.to_vec(), content_type.as_deref()))
    }
}

/// Tries fetchers in order; the first that supports an identifier wins.
#[derive(Default)]
pub struct FetcherChain {
    fetchers: Vec<std::sync::Arc<dyn Fetcher>>,
}

impl FetcherChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, fetcher: std::sync::Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }
}

#[async_trait]
impl Fetcher for FetcherChain {
    fn supports(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.fetchers.iter().any(|f| f.supports(id))
    }

    async fn fetch(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<FetchedResource> {
        match self.fetchers.iter().find(|f| f.supports(id)) {
            Some(fetcher) => fetcher.fetch(id).await,
            None => Err(ProbeError::NotProbeManaged(id.to_string())),
        }
    }
}
