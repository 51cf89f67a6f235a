use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::error::{CoordError, Result};
use crate::state::Document;

pub const STATE_ROUTE: &str = "/state";
pub const HEARTBEAT_ROUTE: &str = "/heartbeat";
pub const EVENTS_ROUTE: &str = "/events";

/// Get/upsert/delete of named state documents on one endpoint.
///
/// Implementations are pure transport: no retries, no policy. They must be safe
/// for concurrent use by pollers working on different document IDs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Human-readable endpoint for logs and errors.
    fn endpoint(&self) -> &str;

    /// `Ok(None)` when the document does not exist.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Create-or-replace.
    async fn upsert(&self, doc: &Document) -> Result<()>;

    /// `Ok(false)` when the document was already absent.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Whether the endpoint's API is up.
    async fn heartbeat(&self) -> Result<bool>;

    /// Whether the endpoint has an instruction receiver online.
    async fn events_online(&self) -> Result<bool>;
}

/// HTTP client for a remote (or loop-back) agent state API.
#[derive(Debug, Clone)]
pub struct HttpStateClient {
    client: Client,
    base: Url,
    base_url: String,
}

impl HttpStateClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| CoordError::Config(format!("invalid endpoint '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(CoordError::Config(format!(
                "invalid endpoint '{}': not a base URL",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoordError::transport(base_url.clone(), e))?;
        Ok(Self {
            client,
            base,
            base_url,
        })
    }

    pub fn for_host(ip_address: &str, port: u16, request_timeout: Duration) -> Result<Self> {
        let base_url = if ip_address.contains(':') && !ip_address.starts_with('[') {
            format!("http://[{}]:{}", ip_address, port)
        } else {
            format!("http://{}:{}", ip_address, port)
        };
        Self::new(base_url, request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The document id is pushed as a single percent-encoded path segment.
    fn state_url(&self, id: &str) -> Url {
        self.route_url(&[STATE_ROUTE.trim_start_matches('/'), id])
    }

    fn route_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn unexpected(&self, id: &str, status: StatusCode) -> CoordError {
        CoordError::UnexpectedStatus {
            endpoint: self.base_url.clone(),
            document: id.to_string(),
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl StateStore for HttpStateClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let response = self
            .client
            .get(self.state_url(id))
            .send()
            .await
            .map_err(|e| CoordError::transport(self.base_url.clone(), e))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| CoordError::transport(self.base_url.clone(), e))?;
                let doc = serde_json::from_slice(&body).map_err(|source| {
                    CoordError::InvalidDocument {
                        document: id.to_string(),
                        source,
                    }
                })?;
                Ok(Some(doc))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(self.unexpected(id, status)),
        }
    }

    async fn upsert(&self, doc: &Document) -> Result<()> {
        let response = self
            .client
            .put(self.state_url(&doc.id))
            .json(doc)
            .send()
            .await
            .map_err(|e| CoordError::transport(self.base_url.clone(), e))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            status => Err(self.unexpected(&doc.id, status)),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.state_url(id))
            .send()
            .await
            .map_err(|e| CoordError::transport(self.base_url.clone(), e))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.unexpected(id, status)),
        }
    }

    async fn heartbeat(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.route_url(&[HEARTBEAT_ROUTE.trim_start_matches('/')]))
            .send()
            .await
            .map_err(|e| CoordError::transport(self.base_url.clone(), e))?;
        Ok(response.status().is_success())
    }

    async fn events_online(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.route_url(&[EVENTS_ROUTE.trim_start_matches('/')]))
            .send()
            .await
            .map_err(|e| CoordError::transport(self.base_url.clone(), e))?;
        Ok(response.status().is_success())
    }
}
