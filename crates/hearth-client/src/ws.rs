//! Push channel over WebSocket (`/ws/events`).

use crate::http::{ClientConfig, ClientError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hearth_core::api::{BackendError, PushChannel, PushConnector};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

const PUSH_PATH: &str = "ws/events";

/// Budget for TCP connect plus the upgrade handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Derive the push endpoint from the REST base URL (`http` -> `ws`, `https` -> `wss`).
pub fn push_url(base: &Url) -> Result<Url, ClientError> {
    let mut url = base.join(PUSH_PATH)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::UnsupportedScheme(scheme.to_string()))?;
    Ok(url)
}

/// Opens [`WsChannel`]s to a fixed push URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn for_base(base: &Url) -> Result<Self, ClientError> {
        Ok(Self::new(push_url(base)?))
    }

    /// Push endpoint for `config.base_url`; the handshake gets the same
    /// budget as one REST request.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::for_base(&config.base_url)?.with_handshake_timeout(config.request_timeout))
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn open(&self) -> Result<WsChannel, ClientError> {
        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let (stream, response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                tracing::warn!(
                    url = %self.url,
                    timeout = ?self.handshake_timeout,
                    "push channel: handshake timed out"
                );
                ClientError::Timeout(self.handshake_timeout)
            })??;
        tracing::info!(url = %self.url, status = %response.status(), "push channel open");
        Ok(WsChannel { stream, open: true })
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn PushChannel>, BackendError> {
        Ok(Box::new(self.open().await?))
    }
}

/// One open WebSocket subscription.
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    open: bool,
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn next_message(&mut self) -> Option<Result<String, BackendError>> {
        if !self.open {
            return None;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "push channel: close frame");
                    self.open = false;
                    return None;
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return Some(Err(ClientError::from(e).into()));
                }
                None => {
                    self.open = false;
                    return None;
                }
            }
        }
    }

    async fn send_probe(&mut self, payload: &str) -> Result<(), BackendError> {
        if !self.open {
            return Err(BackendError::ChannelClosed);
        }
        if let Err(e) = self.stream.send(Message::Text(payload.to_string())).await {
            self.open = false;
            return Err(ClientError::from(e).into());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!(error = %e, "push channel: close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::sync::{ChannelStatus, EventStreamSynchronizer, SyncConfig};
    use hearth_core::types::DetectionEvent;
    use hearth_core::EventSource;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts TCP connections and never answers the upgrade.
    async fn silent_listener() -> (Url, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (Url::parse(&format!("http://{addr}/")).unwrap(), handle)
    }

    struct History(Vec<i64>);

    #[async_trait]
    impl EventSource for History {
        async fn recent_events(&self) -> Result<Vec<DetectionEvent>, BackendError> {
            Ok(self
                .0
                .iter()
                .map(|&id| DetectionEvent {
                    id,
                    timestamp: "2024-05-01T10:00:00Z".into(),
                    label: "Unknown".into(),
                    camera: "Front Door".into(),
                    confidence: None,
                    person: None,
                    snapshot_path: None,
                })
                .collect())
        }
    }

    #[test]
    fn test_push_url_from_http_base() {
        let base = Url::parse("http://localhost:8000/").unwrap();
        assert_eq!(push_url(&base).unwrap().as_str(), "ws://localhost:8000/ws/events");
    }

    #[test]
    fn test_push_url_keeps_prefix_and_tls() {
        let base = Url::parse("https://hub.example.com/hearth/").unwrap();
        assert_eq!(
            push_url(&base).unwrap().as_str(),
            "wss://hub.example.com/hearth/ws/events"
        );
    }

    #[tokio::test]
    async fn test_channel_round_trip_against_loopback_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::Ping(vec![1, 2])).await.unwrap();
            ws.send(Message::Text(r#"{"id":4}"#.to_string())).await.unwrap();
            let probe = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected {other:?}"),
                }
            };
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            probe
        });

        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        let connector = WsConnector::for_base(&base).unwrap();
        let mut channel = connector.connect().await.unwrap();
        assert!(channel.is_open());

        let first = channel.next_message().await.unwrap().unwrap();
        assert_eq!(first, r#"{"id":4}"#);

        channel.send_probe("ping").await.unwrap();
        assert!(channel.next_message().await.is_none());
        assert!(!channel.is_open());
        assert_eq!(
            channel.send_probe("ping").await,
            Err(BackendError::ChannelClosed)
        );
        channel.close().await;
        drop(channel);

        assert_eq!(server.await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let connector = WsConnector::new(Url::parse(&format!("ws://{addr}/ws/events")).unwrap());
        assert!(matches!(
            connector.connect().await,
            Err(BackendError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_upgrade_times_out() {
        let (base, server) = silent_listener().await;
        let connector = WsConnector::for_base(&base)
            .unwrap()
            .with_handshake_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(5), connector.connect())
            .await
            .expect("handshake should give up on its own");
        assert!(matches!(result, Err(BackendError::Transport(_))));
        server.abort();
    }

    #[tokio::test]
    async fn test_silent_upgrade_falls_back_to_bootstrap_only() {
        let (base, server) = silent_listener().await;
        let mut config = ClientConfig::new(base.as_str()).unwrap();
        config.request_timeout = Duration::from_millis(200);
        let connector = WsConnector::from_config(&config).unwrap();

        let mut sync = EventStreamSynchronizer::new(
            Arc::new(History(vec![3, 2])),
            Arc::new(connector),
            SyncConfig::default(),
        );
        tokio::time::timeout(Duration::from_secs(5), sync.activate())
            .await
            .expect("activation should not hang on the push handshake")
            .unwrap();

        assert_eq!(sync.channel_status(), ChannelStatus::Unavailable);
        let ids: Vec<i64> = sync.events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2]);
        sync.deactivate().await;
        server.abort();
    }
}
