//! hearth-client — Transport to the Hearth appliance.
//!
//! Implements the `hearth-core` collaborator traits over the appliance's
//! REST endpoints (reqwest) and its `/ws/events` push channel
//! (tokio-tungstenite).

pub mod http;
pub mod ws;

pub use http::{BackendClient, ClientConfig, ClientError, DEFAULT_BASE_URL};
pub use ws::{push_url, WsChannel, WsConnector};
