//! Periodic background work.
//!
//! Emits the digest event on its configured interval and prunes old
//! activity-log entries. Reads job history; never mutates job state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::BackgroundSettings;
use crate::history::{ActivityLogger, HistoryStore};
use crate::notify::{NotificationEvent, Notifier};

pub struct BackgroundRunner {
    history: Arc<dyn HistoryStore>,
    activity: ActivityLogger,
    notifier: Arc<dyn Notifier>,
    cfg: BackgroundSettings,
}

impl BackgroundRunner {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        notifier: Arc<dyn Notifier>,
        cfg: BackgroundSettings,
    ) -> Self {
        Self {
            activity: ActivityLogger::new(history.clone()),
            history,
            notifier,
            cfg,
        }
    }

    /// Main loop - call from a spawned task.
    pub async fn run(self, shutdown: CancellationToken) {
        let digest_enabled = self.cfg.digest_interval_hours > 0;
        let prune_enabled = self.cfg.event_retention_days > 0;
        info!(
            "background runner starting (digest={}h, retention={}d)",
            self.cfg.digest_interval_hours, self.cfg.event_retention_days
        );

        let digest_period =
            Duration::from_secs(self.cfg.digest_interval_hours.max(1) * 60 * 60);
        let prune_period = Duration::from_secs(self.cfg.prune_interval_hours.max(1) * 60 * 60);
        let mut digest_ticker = tokio::time::interval(digest_period);
        let mut prune_ticker = tokio::time::interval(prune_period);

        // Skip the first immediate tick, wait for the first interval.
        digest_ticker.tick().await;
        prune_ticker.tick().await;

        loop {
            tokio::select! {
                _ = digest_ticker.tick() => {
                    if digest_enabled {
                        self.emit_digest();
                    }
                }
                _ = prune_ticker.tick() => {
                    if prune_enabled {
                        self.prune_events();
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("background runner shutting down");
                    break;
                }
            }
        }
    }

    fn emit_digest(&self) {
        let since = Utc::now() - chrono::Duration::hours(self.cfg.digest_interval_hours as i64);
        let rip_count = match self.history.rips_since(since.timestamp()) {
            Ok(rips) => rips.len(),
            Err(e) => {
                error!("failed to query rip history for digest: {e}");
                return;
            }
        };
        self.notifier.notify(NotificationEvent::DigestDue { since });
        self.activity.digest_emitted(rip_count);
    }

    fn prune_events(&self) {
        let cutoff =
            Utc::now().timestamp() - (self.cfg.event_retention_days as i64 * 24 * 60 * 60);
        match self.history.prune_events_older_than(cutoff) {
            Ok(count) if count > 0 => info!("pruned {count} old activity events"),
            Ok(_) => {}
            Err(e) => error!("failed to prune activity events: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SqliteHistoryStore;
    use crate::notify::ChannelNotifier;

    #[tokio::test(start_paused = true)]
    async fn test_digest_fires_after_interval() {
        let history: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        let notifier = Arc::new(ChannelNotifier::new(8));
        let mut rx = notifier.subscribe();

        let runner = BackgroundRunner::new(
            history,
            notifier.clone(),
            BackgroundSettings {
                digest_interval_hours: 1,
                event_retention_days: 0,
                prune_interval_hours: 24,
            },
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runner.run(shutdown.clone()));

        tokio::time::advance(Duration::from_secs(60 * 60 + 1)).await;

        // Let the runner task process the tick.
        let mut received = None;
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if let Ok(event) = rx.try_recv() {
                received = Some(event);
                break;
            }
        }
        match received {
            Some(NotificationEvent::DigestDue { .. }) => {}
            other => panic!("expected digest event, got {other:?}"),
        }

        shutdown.cancel();
        let _ = handle.await;
    }
}
