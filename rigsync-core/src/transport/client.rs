//! HTTP client for the counterpart server.
//!
//! Every call targets `http://<host>:<port>` and resolves to exactly one of a
//! typed payload or a [`TransportError`]. Nothing is retried here; the session
//! above decides when to try again.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_TYPE};
use serde::de::DeserializeOwned;

use super::error::TransportError;
use super::protocol::{
    animation_status_path, bone_rest_path, export_animation_path, import_animation_path,
    server_message, AnimationStatus, ArmatureList, BoneRest, LIST_ARMATURES_PATH,
};
use crate::fingerprint::Fingerprint;

/// Host used when none is given. Both endpoints run on the same machine.
pub const DEFAULT_HOST: &str = "localhost";

const OCTET_STREAM: &str = "application/octet-stream";
const JSON: &str = "application/json";

/// The five requests the sync core makes against the counterpart server.
///
/// Implementations hold no per-session state and can be cloned freely.
pub trait Transport: Clone + Send + Sync + 'static {
    /// `GET /list_armatures`
    fn list_armatures(
        &self,
        port: u16,
    ) -> impl Future<Output = Result<Vec<String>, TransportError>> + Send;

    /// `GET /export_animation/{armature}` as raw bytes.
    fn import_animation(
        &self,
        port: u16,
        armature: &str,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// `POST /import_animation[?armature=]` with the encoded payload.
    fn export_animation(
        &self,
        port: u16,
        payload: Vec<u8>,
        target: Option<&str>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// `GET /animation_status`. Returns `None` on any failure.
    fn check_animation_status(
        &self,
        port: u16,
        armature: &str,
        last_known: Option<&Fingerprint>,
    ) -> impl Future<Output = Option<AnimationStatus>> + Send;

    /// `GET /get_bone_rest/{armature}`
    fn get_bone_rest(
        &self,
        port: u16,
        armature: &str,
    ) -> impl Future<Output = Result<BoneRest, TransportError>> + Send;
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportClient {
    http: reqwest::Client,
    host: String,
}

impl TransportClient {
    /// Creates a client for `localhost` with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Self::with_host(DEFAULT_HOST, timeout)
    }

    /// Creates a client for an explicit host.
    pub fn with_host(host: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        // Payloads are small and never leave the machine, so compression is off.
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            host: host.into(),
        })
    }

    /// Returns the host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Builds the full URL for a request path.
    pub fn endpoint(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.host, port, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, port: u16, path: &str) -> Result<T, TransportError> {
        let response = self
            .http
            .get(self.endpoint(port, path))
            .header(ACCEPT, JSON)
            .send()
            .await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;

        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn get_bytes(&self, port: u16, path: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http
            .get(self.endpoint(port, path))
            .header(ACCEPT, OCTET_STREAM)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn post_bytes(&self, port: u16, path: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.endpoint(port, path))
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Turns a non-success response into [`TransportError::ServerRejected`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await.unwrap_or_default();
    let message = server_message(&body)
        .unwrap_or_else(|| format!("Server returned status {}", status));

    Err(TransportError::ServerRejected {
        status: status.as_u16(),
        message,
    })
}

impl Transport for TransportClient {
    async fn list_armatures(&self, port: u16) -> Result<Vec<String>, TransportError> {
        match self.get_json::<ArmatureList>(port, LIST_ARMATURES_PATH).await {
            Ok(list) => Ok(list.armatures),
            Err(e) => {
                tracing::warn!(port, "Failed to list armatures: {}", e);
                Err(e)
            }
        }
    }

    async fn import_animation(&self, port: u16, armature: &str) -> Result<Vec<u8>, TransportError> {
        let result = self
            .get_bytes(port, &export_animation_path(armature))
            .await;
        if let Err(e) = &result {
            tracing::warn!(port, armature, "Failed to import animation: {}", e);
        }
        result
    }

    async fn export_animation(
        &self,
        port: u16,
        payload: Vec<u8>,
        target: Option<&str>,
    ) -> Result<(), TransportError> {
        let result = self
            .post_bytes(port, &import_animation_path(target), payload)
            .await;
        if let Err(e) = &result {
            tracing::warn!(port, ?target, "Failed to export animation: {}", e);
        }
        result
    }

    async fn check_animation_status(
        &self,
        port: u16,
        armature: &str,
        last_known: Option<&Fingerprint>,
    ) -> Option<AnimationStatus> {
        // Runs on every poll tick; failures stay at debug level.
        match self
            .get_json::<AnimationStatus>(port, &animation_status_path(armature, last_known))
            .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!(port, armature, "Status check failed: {}", e);
                None
            }
        }
    }

    async fn get_bone_rest(&self, port: u16, armature: &str) -> Result<BoneRest, TransportError> {
        match self.get_json::<BoneRest>(port, &bone_rest_path(armature)).await {
            Ok(bones) => Ok(bones),
            Err(e) => {
                tracing::warn!(port, armature, "Failed to fetch bone rest poses: {}", e);
                Err(e)
            }
        }
    }
}
