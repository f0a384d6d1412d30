//! Keeps the [`EventFeed`] in step with the appliance.
//!
//! Activation connects the push channel, applies the bootstrap fetch, and
//! only then starts reading pushes. Anything pushed while the bootstrap was
//! in flight waits in the channel and lands on top afterwards, so a slow
//! bootstrap can never wipe newer events.

use crate::api::{BackendError, EventSource, PushChannel, PushConnector};
use crate::feed::{EventFeed, DEFAULT_FEED_CAPACITY};
use crate::types::DetectionEvent;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
pub const DEFAULT_PROBE: &str = "ping";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum events retained.
    pub capacity: usize,
    /// Liveness probe period.
    pub heartbeat: Duration,
    /// Probe payload; the server ignores it.
    pub probe: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_FEED_CAPACITY,
            heartbeat: DEFAULT_HEARTBEAT,
            probe: DEFAULT_PROBE.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("bootstrap fetch failed: {0}")]
    Bootstrap(BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Not activated, or torn down.
    Disconnected,
    Connecting,
    Open,
    /// Closed or errored after opening. Not reopened here.
    Closed,
    /// The push channel could not be opened; the feed shows bootstrap data only.
    Unavailable,
}

/// What subscribers see.
#[derive(Debug, Clone)]
pub struct FeedState {
    feed: EventFeed,
    channel: ChannelStatus,
    active: bool,
    generation: u64,
}

impl FeedState {
    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    pub fn channel(&self) -> ChannelStatus {
        self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Mutate only if `generation` is still the live activation.
fn apply_if_current(
    state: &watch::Sender<FeedState>,
    generation: u64,
    f: impl FnOnce(&mut FeedState),
) -> bool {
    state.send_if_modified(|s| {
        if s.generation != generation || !s.active {
            return false;
        }
        f(s);
        true
    })
}

struct Pump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the feed and the push subscription behind it.
pub struct EventStreamSynchronizer {
    source: Arc<dyn EventSource>,
    connector: Arc<dyn PushConnector>,
    config: SyncConfig,
    state: Arc<watch::Sender<FeedState>>,
    pump: Option<Pump>,
}

impl EventStreamSynchronizer {
    pub fn new(
        source: Arc<dyn EventSource>,
        connector: Arc<dyn PushConnector>,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(FeedState {
            feed: EventFeed::with_capacity(config.capacity),
            channel: ChannelStatus::Disconnected,
            active: false,
            generation: 0,
        });
        Self {
            source,
            connector,
            config,
            state: Arc::new(state),
            pump: None,
        }
    }

    /// Watch feed changes.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Copy of the feed, newest first.
    pub fn events(&self) -> Vec<DetectionEvent> {
        self.state.borrow().feed.iter().cloned().collect()
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.state.borrow().channel
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Bootstrap the feed and start following the push channel.
    ///
    /// An already active synchronizer is torn down first. On bootstrap
    /// failure the feed is left empty; call `activate` again to retry.
    pub async fn activate(&mut self) -> Result<(), SyncError> {
        if self.is_active() || self.pump.is_some() {
            self.deactivate().await;
        }

        let mut generation = 0;
        self.state.send_modify(|s| {
            s.generation += 1;
            s.active = true;
            s.channel = ChannelStatus::Connecting;
            generation = s.generation;
        });

        let channel = match self.connector.connect().await {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!(error = %e, "feed: push channel unavailable; showing bootstrap only");
                None
            }
        };

        let batch = match self.source.recent_events().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "feed: bootstrap failed");
                self.state.send_modify(|s| {
                    s.feed.clear();
                    s.active = false;
                    s.channel = ChannelStatus::Disconnected;
                });
                if let Some(mut channel) = channel {
                    channel.close().await;
                }
                return Err(SyncError::Bootstrap(e));
            }
        };

        let fetched = batch.len();
        let status = if channel.is_some() {
            ChannelStatus::Open
        } else {
            ChannelStatus::Unavailable
        };
        apply_if_current(&self.state, generation, |s| {
            s.feed.replace(batch);
            s.channel = status;
        });
        tracing::info!(fetched, channel = ?status, "feed: bootstrapped");

        if let Some(channel) = channel {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_pump(
                channel,
                Arc::clone(&self.state),
                generation,
                cancel.clone(),
                self.config.heartbeat,
                self.config.probe.clone(),
            ));
            self.pump = Some(Pump { cancel, handle });
        }
        Ok(())
    }

    /// Close the push channel and stop the heartbeat.
    ///
    /// Once this returns, nothing mutates the feed and no probe is sent.
    pub async fn deactivate(&mut self) {
        self.state.send_modify(|s| {
            s.generation += 1;
            s.active = false;
            s.channel = ChannelStatus::Disconnected;
        });
        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            if let Err(e) = pump.handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "feed: pump task panicked");
                }
            }
        }
        tracing::debug!("feed: deactivated");
    }
}

impl Drop for EventStreamSynchronizer {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            pump.handle.abort();
        }
    }
}

/// Reads pushes into the feed and sends probes until cancelled.
async fn run_pump(
    mut channel: Box<dyn PushChannel>,
    state: Arc<watch::Sender<FeedState>>,
    generation: u64,
    cancel: CancellationToken,
    heartbeat: Duration,
    probe: String,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut receiving = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = channel.next_message(), if receiving => match message {
                Some(Ok(text)) => match serde_json::from_str::<DetectionEvent>(&text) {
                    Ok(event) => {
                        let id = event.id;
                        if apply_if_current(&state, generation, |s| s.feed.push_front(event)) {
                            tracing::debug!(id, "feed: push applied");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "feed: skipping malformed push message"),
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "feed: push channel errored");
                    receiving = false;
                    apply_if_current(&state, generation, |s| s.channel = ChannelStatus::Closed);
                }
                None => {
                    tracing::info!("feed: push channel closed by peer");
                    receiving = false;
                    apply_if_current(&state, generation, |s| s.channel = ChannelStatus::Closed);
                }
            },
            _ = ticker.tick() => {
                if !channel.is_open() {
                    tracing::debug!("feed: channel closed; skipping heartbeat");
                    continue;
                }
                if let Err(e) = channel.send_probe(&probe).await {
                    tracing::warn!(error = %e, "feed: heartbeat failed");
                }
            }
        }
    }

    channel.close().await;
    tracing::debug!("feed: pump stopped");
}
