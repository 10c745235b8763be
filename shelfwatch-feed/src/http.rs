//! HTTP implementations of the source traits

use crate::error::FeedError;
use crate::source::{CameraDirectory, ConnectivitySource, DetectionSource, FrameRequest, ImageSource};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::Deserialize;
use shelfwatch_core::config::EndpointConfig;
use shelfwatch_core::{Camera, CameraId, CameraStatus, ConnectivityStatus, DetectionResponse, Snapshot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectivityReply {
    connection_status: ConnectivityStatus,
}

/// Talks to the detection service, connectivity check, image endpoint
/// and camera registry over HTTP. Timeouts are applied by the callers.
#[derive(Clone)]
pub struct HttpSources {
    client: Client,
    endpoints: EndpointConfig,
}

impl HttpSources {
    pub fn new(endpoints: EndpointConfig) -> Self {
        Self::with_client(Client::new(), endpoints)
    }

    pub fn with_client(client: Client, endpoints: EndpointConfig) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    fn url(base: &str, segments: &[&str]) -> Result<Url, FeedError> {
        let mut url = Url::parse(base)
            .map_err(|e| FeedError::Config(format!("Invalid endpoint URL '{}': {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| FeedError::Config(format!("Endpoint URL '{}' cannot take a path", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, FeedError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DetectionSource for HttpSources {
    async fn fetch_detections(&self, camera_id: &CameraId) -> Result<DetectionResponse, FeedError> {
        let url = Self::url(&self.endpoints.detection_url, &["detections", camera_id.as_str()])?;
        self.get_json(url).await
    }
}

#[async_trait]
impl ConnectivitySource for HttpSources {
    async fn connection_status(&self, camera_id: &CameraId) -> Result<ConnectivityStatus, FeedError> {
        let url = Self::url(
            &self.endpoints.connectivity_url,
            &["cameras", camera_id.as_str(), "connectivity"],
        )?;
        let reply: ConnectivityReply = self.get_json(url).await?;
        Ok(reply.connection_status)
    }
}

#[async_trait]
impl ImageSource for HttpSources {
    async fn load_frame(&self, request: &FrameRequest) -> Result<Snapshot, FeedError> {
        let mut url = Self::url(
            &self.endpoints.image_url,
            &["cameras", request.camera_id.as_str(), "snapshot"],
        )?;
        url.query_pairs_mut().append_pair("t", &request.cache_bust);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(FeedError::Source(format!(
                "empty frame from camera '{}'",
                request.camera_id
            )));
        }
        Ok(Snapshot::new(data, content_type))
    }
}

#[async_trait]
impl CameraDirectory for HttpSources {
    async fn list_cameras(&self) -> Result<Vec<Camera>, FeedError> {
        let url = Self::url(&self.endpoints.registry_url, &["cameras"])?;
        self.get_json(url).await
    }

    async fn camera_status(&self, camera_id: &CameraId) -> Result<CameraStatus, FeedError> {
        let url = Self::url(&self.endpoints.registry_url, &["cameras", camera_id.as_str()])?;
        let camera: Camera = self.get_json(url).await?;
        Ok(camera.status)
    }
}
