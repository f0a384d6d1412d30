//! REST client for the appliance.

use async_trait::async_trait;
use hearth_core::api::{ActiveSource, BackendError, EnrollmentApi, EventSource, SnapshotSource};
use hearth_core::types::{
    ActiveSubject, Angle, DetectionEvent, Person, SessionId, Snapshot, StartedSession,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl From<ClientError> for BackendError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Status(status) => BackendError::Status(status.as_u16()),
            ClientError::Decode(e) => BackendError::Decode(e.to_string()),
            ClientError::Rejected(reason) => BackendError::Rejected(reason),
            ClientError::Http(e) if e.is_decode() => BackendError::Decode(e.to_string()),
            ClientError::Http(e) => match e.status() {
                Some(status) => BackendError::Status(status.as_u16()),
                None => BackendError::Transport(e.to_string()),
            },
            ClientError::WebSocket(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | ClientError::WebSocket(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => {
                BackendError::ChannelClosed
            }
            other => BackendError::Transport(other.to_string()),
        }
    }
}

/// Where the appliance lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Always ends in `/` so endpoint paths join underneath it.
    pub base_url: Url,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::UnsupportedScheme(base_url.scheme().to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        })
    }
}

#[derive(Serialize)]
struct StartRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CaptureRequest<'a> {
    session_id: &'a SessionId,
    angle: Angle,
    image_b64: &'a str,
}

#[derive(Serialize)]
struct FinishRequest<'a> {
    session_id: &'a SessionId,
}

/// `{"ok": bool, "error": "..."}` acknowledgement used by the enroll endpoints.
#[derive(Deserialize)]
struct Ack {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

/// Enroll endpoints answer 200 even for rejected frames; the verdict is in
/// the body. An empty or non-JSON body counts as accepted.
fn check_ack(body: &[u8]) -> Result<(), ClientError> {
    match serde_json::from_slice::<Ack>(body) {
        Ok(Ack { ok: false, error }) => Err(ClientError::Rejected(
            error.unwrap_or_else(|| "unspecified".to_string()),
        )),
        _ => Ok(()),
    }
}

/// MIME type for a snapshot: the `Content-Type` header when it names an
/// image, otherwise sniffed from the bytes, otherwise JPEG.
fn snapshot_mime(header: Option<&str>, bytes: &[u8]) -> String {
    if let Some(mime) = header
        .map(|h| h.split(';').next().unwrap_or("").trim())
        .filter(|m| m.starts_with("image/"))
    {
        return mime.to_string();
    }
    image::guess_format(bytes)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/jpeg".to_string())
}

/// HTTP client for every REST endpoint the appliance exposes.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base: Url,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    fn checked(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ClientError::Status(status))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "GET");
        let response = Self::checked(self.http.get(url).send().await?)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, ClientError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "POST");
        Self::checked(self.http.post(url).json(body).send().await?)
    }

    /// `true` when `/health` answers 2xx; any failure reads as down.
    pub async fn health(&self) -> bool {
        let url = match self.endpoint("health") {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "health: bad URL");
                return false;
            }
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "health: backend unreachable");
                false
            }
        }
    }

    pub async fn events(&self) -> Result<Vec<DetectionEvent>, ClientError> {
        self.get_json("events").await
    }

    pub async fn active(&self) -> Result<Vec<ActiveSubject>, ClientError> {
        self.get_json("active").await
    }

    pub async fn people(&self) -> Result<Vec<Person>, ClientError> {
        self.get_json("people").await
    }

    pub async fn delete_person(&self, id: i64) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("people/{id}"))?;
        tracing::debug!(%url, "DELETE");
        Self::checked(self.http.delete(url).send().await?)?;
        tracing::info!(id, "person deleted");
        Ok(())
    }

    /// One still from the live camera. The appliance answers 503 before its
    /// first frame.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, ClientError> {
        let url = self.endpoint("snapshot")?;
        let response = Self::checked(self.http.get(url).send().await?)?;
        let header = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        let mime = snapshot_mime(header.as_deref(), &bytes);
        tracing::debug!(bytes = bytes.len(), mime = %mime, "snapshot fetched");
        Ok(Snapshot::new(bytes, mime))
    }

    pub async fn start(&self, name: &str) -> Result<StartedSession, ClientError> {
        let response = self.post_json("enroll/start", &StartRequest { name }).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn capture(
        &self,
        session_id: &SessionId,
        angle: Angle,
        image_b64: &str,
    ) -> Result<(), ClientError> {
        let request = CaptureRequest {
            session_id,
            angle,
            image_b64,
        };
        let response = self.post_json("enroll/capture", &request).await?;
        check_ack(&response.bytes().await?)
    }

    pub async fn finish(&self, session_id: &SessionId) -> Result<(), ClientError> {
        let response = self
            .post_json("enroll/finish", &FinishRequest { session_id })
            .await?;
        check_ack(&response.bytes().await?)
    }
}

#[async_trait]
impl EnrollmentApi for BackendClient {
    async fn start_session(&self, name: &str) -> Result<StartedSession, BackendError> {
        Ok(self.start(name).await?)
    }

    async fn submit_capture(
        &self,
        session_id: &SessionId,
        angle: Angle,
        image: &str,
    ) -> Result<(), BackendError> {
        Ok(self.capture(session_id, angle, image).await?)
    }

    async fn finish_session(&self, session_id: &SessionId) -> Result<(), BackendError> {
        Ok(self.finish(session_id).await?)
    }
}

#[async_trait]
impl SnapshotSource for BackendClient {
    async fn snapshot(&self) -> Result<Snapshot, BackendError> {
        Ok(self.fetch_snapshot().await?)
    }
}

#[async_trait]
impl EventSource for BackendClient {
    async fn recent_events(&self) -> Result<Vec<DetectionEvent>, BackendError> {
        Ok(self.events().await?)
    }
}

#[async_trait]
impl ActiveSource for BackendClient {
    async fn active_subjects(&self) -> Result<Vec<ActiveSubject>, BackendError> {
        Ok(self.active().await?)
    }
}
