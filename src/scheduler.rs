// src/scheduler.rs
// Daily maintenance tick: one reflection run per day at 06:00 UTC, plus a
// reminder sweep whose fired reminders go out through the webhook.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::mcp::EngramServer;
use crate::notify::WebhookNotifier;
use crate::reflection::{LAST_REFLECTION_KEY, LastReflection};

/// Daily trigger time, UTC.
const TICK_HOUR: u32 = 6;

pub struct DailyScheduler {
    server: Arc<EngramServer>,
    notifier: Option<Arc<WebhookNotifier>>,
    shutdown: watch::Receiver<bool>,
}

/// Next 06:00 UTC at or after `now`.
fn next_tick(now: DateTime<Utc>) -> DateTime<Utc> {
    let tick_time = NaiveTime::from_hms_opt(TICK_HOUR, 0, 0).unwrap_or_default();
    let today_tick = now.date_naive().and_time(tick_time).and_utc();
    if today_tick > now {
        today_tick
    } else {
        today_tick + ChronoDuration::days(1)
    }
}

/// Whether a reflection should run: at most one per UTC day, guarded by the
/// persisted marker.
fn should_run_reflection(marker: Option<&LastReflection>, today: &str) -> bool {
    marker.map(|m| m.date != today).unwrap_or(true)
}

impl DailyScheduler {
    pub fn new(
        server: Arc<EngramServer>,
        notifier: Option<Arc<WebhookNotifier>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            server,
            notifier,
            shutdown,
        }
    }

    /// Start the scheduler loop
    pub async fn run(mut self) {
        info!("daily scheduler started");

        loop {
            if *self.shutdown.borrow() {
                info!("daily scheduler shutting down");
                break;
            }

            let now = Utc::now();
            let wake_at = next_tick(now);
            let wait = (wake_at - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.tick().await;
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("daily scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();

        // Reflection first: at most once per day.
        if let Some(controller) = &self.server.reflection {
            let marker = self.read_marker().await;
            if should_run_reflection(marker.as_ref(), &today) {
                info!(date = %today, "running scheduled reflection");
                let result = controller.run().await;
                if !result.success {
                    warn!(
                        "scheduled reflection failed: {}",
                        result.error.as_deref().unwrap_or("unknown")
                    );
                }
            } else {
                info!(date = %today, "reflection already ran today, skipping");
            }
        }

        // Reminder sweep: anything due goes to the webhook.
        match self.server.reminders.check().await {
            Ok(fired) if !fired.is_empty() => {
                info!(count = fired.len(), "reminders fired by daily sweep");
                if let Some(notifier) = &self.notifier {
                    for reminder in fired {
                        notifier
                            .send(&format!("Reminder: {}", reminder.description))
                            .await;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("reminder sweep failed: {}", e),
        }
    }

    async fn read_marker(&self) -> Option<LastReflection> {
        let obj = self.server.store.read(LAST_REFLECTION_KEY).await.ok()??;
        serde_json::from_str(&obj.content).ok()
    }
}

/// Spawn the daily scheduler. Returns the shutdown handle.
pub fn spawn(
    server: Arc<EngramServer>,
    notifier: Option<Arc<WebhookNotifier>>,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = DailyScheduler::new(server, notifier, shutdown_rx);
    tokio::spawn(async move {
        scheduler.run().await;
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_tick_before_six() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 3, 15, 0).unwrap();
        assert_eq!(next_tick(now), Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_next_tick_after_six_rolls_over() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap();
        assert_eq!(next_tick(now), Utc.with_ymd_and_hms(2026, 8, 2, 6, 0, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2026, 8, 1, 23, 59, 0).unwrap();
        assert_eq!(next_tick(now), Utc.with_ymd_and_hms(2026, 8, 2, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_should_run_reflection_guard() {
        assert!(should_run_reflection(None, "2026-08-01"));
        let marker = LastReflection {
            timestamp: "2026-07-31T06:00:02Z".into(),
            date: "2026-07-31".into(),
        };
        assert!(should_run_reflection(Some(&marker), "2026-08-01"));
        let marker_today = LastReflection {
            timestamp: "2026-08-01T06:00:02Z".into(),
            date: "2026-08-01".into(),
        };
        assert!(!should_run_reflection(Some(&marker_today), "2026-08-01"));
    }
}
