// src/reminders/mod.rs
// Poll-fired reminder scheduler. State is one JSON blob in the object
// store; every mutation serializes on the scheduler's own lock.

pub mod cron;

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngramError, Result};
use crate::store::ObjectStore;
use self::cron::CronExpr;

/// Fixed key for the persisted reminder list.
pub const REMINDERS_KEY: &str = "reminders/index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    /// RFC3339 instant; fires exactly once, then the reminder is removed.
    Once,
    /// 5-field UTC cron expression; fires at most once per matching minute.
    Cron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub expression: String,
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<String>,
}

pub struct ReminderScheduler {
    store: Arc<dyn ObjectStore>,
    /// Serializes every read-modify-write of the blob.
    lock: Mutex<()>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<Reminder>> {
        match self.store.read(REMINDERS_KEY).await? {
            Some(obj) => Ok(serde_json::from_str(&obj.content)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, reminders: &[Reminder]) -> Result<()> {
        let blob = serde_json::to_string_pretty(reminders)?;
        self.store.write(REMINDERS_KEY, &blob).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Reminder>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Reminder>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|r| r.id == id))
    }

    /// Upsert by id.
    pub async fn schedule(&self, reminder: Reminder) -> Result<Reminder> {
        if reminder.kind == ReminderKind::Once
            && DateTime::parse_from_rfc3339(&reminder.expression).is_err()
        {
            return Err(EngramError::InvalidInput(format!(
                "one-shot reminder expression is not an RFC3339 instant: {}",
                reminder.expression
            )));
        }
        if reminder.kind == ReminderKind::Cron && CronExpr::parse(&reminder.expression).is_none() {
            return Err(EngramError::InvalidInput(format!(
                "invalid cron expression: {}",
                reminder.expression
            )));
        }

        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;
        match reminders.iter_mut().find(|r| r.id == reminder.id) {
            Some(existing) => *existing = reminder.clone(),
            None => reminders.push(reminder.clone()),
        }
        self.save(&reminders).await?;
        Ok(reminder)
    }

    /// Returns true when a reminder was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;
        let before = reminders.len();
        reminders.retain(|r| r.id != id);
        if reminders.len() == before {
            return Ok(false);
        }
        self.save(&reminders).await?;
        Ok(true)
    }

    /// Evaluate every reminder against the current UTC time and return the
    /// ones that fired. One-shots are removed on fire; cron reminders record
    /// `last_fired` so a matching minute fires at most once regardless of
    /// how often this is polled.
    pub async fn check(&self) -> Result<Vec<Reminder>> {
        self.check_at(Utc::now()).await
    }

    pub(crate) async fn check_at(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let _guard = self.lock.lock().await;
        let mut reminders = self.load().await?;
        let mut fired = Vec::new();
        let mut kept = Vec::with_capacity(reminders.len());
        let mut dirty = false;

        for mut reminder in reminders.drain(..) {
            match reminder.kind {
                ReminderKind::Once => {
                    let due = DateTime::parse_from_rfc3339(&reminder.expression)
                        .map(|t| t.with_timezone(&Utc) <= now)
                        .unwrap_or(false);
                    if due {
                        dirty = true;
                        fired.push(reminder);
                    } else {
                        kept.push(reminder);
                    }
                }
                ReminderKind::Cron => {
                    // Invalid expressions never match and never error.
                    let matched = CronExpr::parse(&reminder.expression)
                        .map(|expr| expr.matches(&now))
                        .unwrap_or(false);
                    let already_fired_this_minute = reminder
                        .last_fired
                        .as_deref()
                        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                        .map(|t| same_utc_minute(&t.with_timezone(&Utc), &now))
                        .unwrap_or(false);
                    if matched && !already_fired_this_minute {
                        reminder.last_fired = Some(now.to_rfc3339());
                        dirty = true;
                        fired.push(reminder.clone());
                        kept.push(reminder);
                    } else {
                        kept.push(reminder);
                    }
                }
            }
        }

        if dirty {
            self.save(&kept).await?;
            debug!(fired = fired.len(), "reminder sweep persisted");
        }
        Ok(fired)
    }
}

fn same_utc_minute(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    a.year() == b.year()
        && a.month() == b.month()
        && a.day() == b.day()
        && a.hour() == b.hour()
        && a.minute() == b.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use chrono::TimeZone;

    fn scheduler() -> ReminderScheduler {
        ReminderScheduler::new(Arc::new(MemoryObjectStore::new()))
    }

    fn cron_reminder(id: &str, expression: &str) -> Reminder {
        Reminder {
            id: id.into(),
            kind: ReminderKind::Cron,
            expression: expression.into(),
            description: format!("reminder {id}"),
            payload: serde_json::Value::Null,
            created_at: Utc::now().to_rfc3339(),
            last_fired: None,
        }
    }

    fn once_reminder(id: &str, expression: &str) -> Reminder {
        Reminder {
            kind: ReminderKind::Once,
            ..cron_reminder(id, expression)
        }
    }

    #[tokio::test]
    async fn test_schedule_upserts_by_id() {
        let sched = scheduler();
        sched.schedule(cron_reminder("r1", "0 9 * * *")).await.unwrap();
        sched.schedule(cron_reminder("r1", "30 9 * * *")).await.unwrap();

        let all = sched.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].expression, "30 9 * * *");
        assert_eq!(sched.get("r1").await.unwrap().unwrap().id, "r1");
        assert!(sched.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let sched = scheduler();
        sched.schedule(cron_reminder("r1", "0 9 * * *")).await.unwrap();
        assert!(sched.remove("r1").await.unwrap());
        assert!(!sched.remove("r1").await.unwrap());
        assert!(sched.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_validates_expressions() {
        let sched = scheduler();
        assert!(sched.schedule(cron_reminder("bad", "not a cron")).await.is_err());
        assert!(sched.schedule(once_reminder("bad", "tomorrow")).await.is_err());
    }

    #[tokio::test]
    async fn test_once_fires_exactly_once_and_is_removed() {
        let sched = scheduler();
        sched
            .schedule(once_reminder("r", "2026-08-01T09:00:00Z"))
            .await
            .unwrap();

        let before = Utc.with_ymd_and_hms(2026, 8, 1, 8, 59, 0).unwrap();
        assert!(sched.check_at(before).await.unwrap().is_empty());

        let due = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 5).unwrap();
        let fired = sched.check_at(due).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, "r");

        assert!(sched.list().await.unwrap().is_empty());
        assert!(sched.check_at(due).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cron_at_most_once_per_minute() {
        let sched = scheduler();
        sched.schedule(cron_reminder("r", "0 9 * * *")).await.unwrap();

        let nine = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        let fired = sched.check_at(nine).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, "r");

        // Thirty seconds later, same minute: nothing.
        let nine_thirty_s = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 30).unwrap();
        assert!(sched.check_at(nine_thirty_s).await.unwrap().is_empty());

        // Next day it fires again.
        let next_day = Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap();
        let fired = sched.check_at(next_day).await.unwrap();
        assert_eq!(fired.len(), 1);

        // The reminder itself is retained.
        assert_eq!(sched.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cron_in_blob_never_fires() {
        // An invalid expression can enter the blob out-of-band; it must be
        // retained and silently skipped.
        let store = Arc::new(MemoryObjectStore::new());
        let mut reminder = cron_reminder("bad", "0 9 * * *");
        reminder.expression = "99 99 * * *".into();
        store
            .write(REMINDERS_KEY, &serde_json::to_string(&[reminder]).unwrap())
            .await
            .unwrap();

        let sched = ReminderScheduler::new(store);
        let any_time = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        assert!(sched.check_at(any_time).await.unwrap().is_empty());
        assert_eq!(sched.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_json_shape() {
        // Persisted blob uses the camelCase wire shape.
        let sched = scheduler();
        sched.schedule(cron_reminder("r", "0 9 * * *")).await.unwrap();
        let blob = sched.store.read(REMINDERS_KEY).await.unwrap().unwrap();
        assert!(blob.content.contains("\"createdAt\""));
        assert!(blob.content.contains("\"type\": \"cron\""));
    }
}
