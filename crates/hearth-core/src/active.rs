//! Timer-driven pull of the subjects the appliance currently sees.

use crate::api::ActiveSource;
use crate::types::ActiveSubject;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ACTIVE_POLL: Duration = Duration::from_secs(2);

/// Polls `ActiveSource` on a fixed period while active.
///
/// A failed poll keeps the previous list. `deactivate` cancels the timer;
/// nothing is published after it returns.
pub struct ActiveSubjectsPoller {
    source: Arc<dyn ActiveSource>,
    period: Duration,
    subjects: Arc<watch::Sender<Vec<ActiveSubject>>>,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ActiveSubjectsPoller {
    pub fn new(source: Arc<dyn ActiveSource>, period: Duration) -> Self {
        let (subjects, _) = watch::channel(Vec::new());
        Self {
            source,
            period,
            subjects: Arc::new(subjects),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ActiveSubject>> {
        self.subjects.subscribe()
    }

    pub fn subjects(&self) -> Vec<ActiveSubject> {
        self.subjects.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Start polling; the first pull happens immediately.
    pub fn activate(&mut self) {
        if self.task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.subjects),
            self.period,
            cancel.clone(),
        ));
        self.task = Some((cancel, handle));
    }

    pub async fn deactivate(&mut self) {
        if let Some((cancel, handle)) = self.task.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "active: poll task panicked");
                }
            }
        }
    }
}

impl Drop for ActiveSubjectsPoller {
    fn drop(&mut self) {
        if let Some((cancel, handle)) = self.task.take() {
            cancel.cancel();
            handle.abort();
        }
    }
}

async fn poll_loop(
    source: Arc<dyn ActiveSource>,
    subjects: Arc<watch::Sender<Vec<ActiveSubject>>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = source.active_subjects() => result,
        };

        match result {
            Ok(list) => {
                subjects.send_if_modified(|current| {
                    if *current == list {
                        return false;
                    }
                    *current = list;
                    true
                });
            }
            Err(e) => tracing::warn!(error = %e, "active: poll failed; keeping last list"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BackendError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl ActiveSource for Scripted {
        async fn active_subjects(&self) -> Result<Vec<ActiveSubject>, BackendError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            match n {
                0 => Ok(vec![ActiveSubject {
                    id: None,
                    name: "Justin".into(),
                    first_seen: "2024-05-01T10:00:00".into(),
                    left_at: None,
                }]),
                1 => Err(BackendError::Transport("timeout".into())),
                _ => Ok(Vec::new()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_keeps_last_list_on_error_and_stops_on_deactivate() {
        let source = Arc::new(Scripted {
            polls: AtomicUsize::new(0),
        });
        let mut poller = ActiveSubjectsPoller::new(source.clone(), Duration::from_secs(2));
        poller.activate();
        assert!(poller.is_active());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 1);
        assert_eq!(poller.subjects().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 2);
        assert_eq!(poller.subjects()[0].name, "Justin");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
        assert!(poller.subjects().is_empty());

        poller.deactivate().await;
        assert!(!poller.is_active());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.polls.load(Ordering::SeqCst), 3);
    }
}
