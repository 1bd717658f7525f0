//! NGSI v2 entity store (Orion Context Broker)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy, Url};
use serde_json::Value;
use tracing::debug;

use super::SinkError;
use crate::config::{OrionConfig, UpdateMode};

/// Status and body of one store call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreResponse {
    pub status: u16,
    pub body: String,
}

impl StoreResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_created(&self) -> bool {
        self.status == 201
    }

    /// `422` with description "Already Exists"
    pub fn is_conflict(&self) -> bool {
        if self.status != 422 {
            return false;
        }
        serde_json::from_str::<Value>(&self.body)
            .ok()
            .and_then(|body| body.get("description").and_then(|d| d.as_str()).map(|d| d == "Already Exists"))
            .unwrap_or(false)
    }
}

/// Remote entity store seam
///
/// HTTP failures come back as a [`StoreResponse`]; only transport problems
/// are errors.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// `POST /v2/entities` with the full wire form
    async fn create(&self, entity: &Value) -> Result<StoreResponse, SinkError>;

    /// `POST` (append) or `PUT` (replace) `/v2/entities/{id}/attrs`
    async fn update(&self, id: &str, attrs: &Value, mode: UpdateMode) -> Result<StoreResponse, SinkError>;
}

/// HTTP client for an Orion Context Broker
pub struct OrionClient {
    base_url: Url,
    http: Client,
}

impl OrionClient {
    pub fn from_config(config: &OrionConfig) -> Result<Self, SinkError> {
        debug!(url = %config.url, service = %config.fiware_service, "OrionClient::from_config: called");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Fiware-Service", header_value(&config.fiware_service)?);
        headers.insert("Fiware-ServicePath", header_value(&config.fiware_service_path)?);
        if let (Some(name), Some(token)) = (&config.auth_header_name, &config.auth_token) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SinkError::Config(format!("invalid auth header name '{}': {}", name, e)))?;
            headers.insert(name, header_value(token)?);
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers);
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy).map_err(|e| SinkError::Config(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let base_url =
            Url::parse(&config.url).map_err(|e| SinkError::Config(format!("invalid url '{}': {}", config.url, e)))?;

        Ok(Self {
            base_url,
            http: builder.build()?,
        })
    }

    /// Base URL with `segments` appended, each one percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SinkError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::Config(format!("url '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<StoreResponse, SinkError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(status, body_len = body.len(), "OrionClient::send: response");
        Ok(StoreResponse { status, body })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, SinkError> {
    HeaderValue::from_str(value).map_err(|e| SinkError::Config(format!("invalid header value '{}': {}", value, e)))
}

#[async_trait]
impl EntityStore for OrionClient {
    async fn create(&self, entity: &Value) -> Result<StoreResponse, SinkError> {
        let url = self.endpoint(&["v2", "entities"])?;
        debug!(%url, "OrionClient::create: called");
        self.send(self.http.post(url).json(entity)).await
    }

    async fn update(&self, id: &str, attrs: &Value, mode: UpdateMode) -> Result<StoreResponse, SinkError> {
        let url = self.endpoint(&["v2", "entities", id, "attrs"])?;
        debug!(%url, ?mode, "OrionClient::update: called");
        let request = match mode {
            UpdateMode::Append => self.http.post(url),
            UpdateMode::Replace => self.http.put(url),
        };
        self.send(request.json(attrs)).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_response_classification() {
        assert!(StoreResponse::new(201, "").is_created());
        assert!(StoreResponse::new(204, "").is_success());
        assert!(mock::MockEntityStore::conflict().is_conflict());
        assert!(!StoreResponse::new(422, "not json").is_conflict());
        assert!(!StoreResponse::new(400, r#"{"description":"Already Exists"}"#).is_conflict());
    }

    #[test]
    fn test_client_rejects_bad_header() {
        let config = OrionConfig {
            url: "http://localhost:1026".into(),
            auth_header_name: Some("bad header".into()),
            auth_token: Some("t".into()),
            ..Default::default()
        };
        assert!(matches!(OrionClient::from_config(&config), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_client_builds_with_proxy() {
        let config = OrionConfig {
            url: "http://localhost:1026/".into(),
            proxy: Some("http://proxy.local:3128".into()),
            ..Default::default()
        };
        let client = OrionClient::from_config(&config).unwrap();
        assert_eq!(
            client.endpoint(&["v2", "entities"]).unwrap().as_str(),
            "http://localhost:1026/v2/entities"
        );
    }

    #[test]
    fn test_client_rejects_bad_url() {
        let config = OrionConfig {
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(OrionClient::from_config(&config), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_entity_id_is_one_path_segment() {
        let config = OrionConfig {
            url: "http://localhost:1026/orion/".into(),
            ..Default::default()
        };
        let client = OrionClient::from_config(&config).unwrap();

        let url = client
            .endpoint(&["v2", "entities", "urn:ngsi:Lot/7?x#y%z", "attrs"])
            .unwrap();
        assert_eq!(url.path(), "/orion/v2/entities/urn:ngsi:Lot%2F7%3Fx%23y%25z/attrs");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let plain = client.endpoint(&["v2", "entities", "urn:ngsi:Lot:7", "attrs"]).unwrap();
        assert_eq!(plain.path(), "/orion/v2/entities/urn:ngsi:Lot:7/attrs");
    }
}
