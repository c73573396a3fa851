/// Presence roster — heartbeat while connected, push patches, snapshot merge
use crate::connection::{ConnectionManager, ConnectionState};
use crate::protocol::ClientEvent;
use crate::rest::RestBackend;
use crate::types::{PresenceRecord, PresenceStatus, SyncEvent, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// What the local user is currently working on; rides the heartbeat
#[derive(Debug, Clone, Default)]
pub struct Activity {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub location: Option<String>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    roster: Arc<RwLock<HashMap<UserId, PresenceRecord>>>,
    activity: Arc<RwLock<Activity>>,
    connection: ConnectionManager,
    rest: Arc<dyn RestBackend>,
    events: broadcast::Sender<SyncEvent>,
    heartbeat_interval: Duration,
}

impl PresenceTracker {
    pub fn new(
        connection: ConnectionManager,
        rest: Arc<dyn RestBackend>,
        events: broadcast::Sender<SyncEvent>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            roster: Arc::new(RwLock::new(HashMap::new())),
            activity: Arc::new(RwLock::new(Activity::default())),
            connection,
            rest,
            events,
            heartbeat_interval,
        }
    }

    /// Heartbeat task: ticks forever, emits only while connected
    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(tracker.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tracker.connection.state().await != ConnectionState::Connected {
                    continue;
                }
                let activity = tracker.activity.read().await.clone();
                if let Err(e) = tracker
                    .connection
                    .emit(ClientEvent::Heartbeat {
                        project_id: activity.project_id,
                        task_id: activity.task_id,
                        location: activity.location,
                    })
                    .await
                {
                    debug!("Heartbeat skipped: {}", e);
                }
            }
        })
    }

    /// Update the activity carried by subsequent heartbeats
    pub async fn set_activity(&self, activity: Activity) {
        *self.activity.write().await = activity;
    }

    /// Full record push from the server
    pub async fn apply_update(&self, record: PresenceRecord) {
        self.roster
            .write()
            .await
            .insert(record.user_id.clone(), record.clone());
        let _ = self.events.send(SyncEvent::PresenceChanged { record });
    }

    pub async fn user_online(&self, user_id: &str, at: DateTime<Utc>) {
        self.modify(user_id, at, |record| {
            record.status = PresenceStatus::Online;
            record.last_seen_at = Some(at);
        })
        .await;
    }

    pub async fn user_offline(&self, user_id: &str, at: DateTime<Utc>) {
        self.modify(user_id, at, |record| {
            record.status = PresenceStatus::Offline;
            record.last_seen_at = Some(at);
        })
        .await;
    }

    pub async fn activity_changed(
        &self,
        user_id: &str,
        project_id: Option<String>,
        task_id: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.modify(user_id, at, |record| {
            record.project_id = project_id;
            record.task_id = task_id;
        })
        .await;
    }

    pub async fn status_updated(&self, user_id: &str, message: Option<String>, at: DateTime<Utc>) {
        self.modify(user_id, at, |record| {
            record.status_message = message;
        })
        .await;
    }

    /// Merge a roster snapshot; a row never overwrites a record freshened by
    /// a later push
    pub async fn merge_snapshot(&self, rows: Vec<PresenceRecord>) {
        let mut applied = Vec::new();
        {
            let mut roster = self.roster.write().await;
            for row in rows {
                if let Some(existing) = roster.get(&row.user_id) {
                    if existing.updated_at > row.updated_at {
                        debug!("Snapshot row for {} older than push state", row.user_id);
                        continue;
                    }
                }
                roster.insert(row.user_id.clone(), row.clone());
                applied.push(row);
            }
        }
        for record in applied {
            let _ = self.events.send(SyncEvent::PresenceChanged { record });
        }
    }

    /// REST fallback: initial population, or the socket is down
    pub async fn refresh_roster(&self) -> crate::error::Result<()> {
        let rows = self.rest.fetch_roster().await?;
        self.merge_snapshot(rows).await;
        Ok(())
    }

    pub async fn presence(&self, user_id: &str) -> Option<PresenceRecord> {
        self.roster.read().await.get(user_id).cloned()
    }

    pub async fn roster(&self) -> Vec<PresenceRecord> {
        self.roster.read().await.values().cloned().collect()
    }

    async fn modify(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        apply: impl FnOnce(&mut PresenceRecord),
    ) {
        let snapshot = {
            let mut roster = self.roster.write().await;
            let record = roster
                .entry(user_id.to_string())
                .or_insert_with(|| PresenceRecord::offline(user_id.to_string(), at));
            apply(record);
            record.updated_at = at;
            record.clone()
        };
        let _ = self.events.send(SyncEvent::PresenceChanged { record: snapshot });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::testutil::{NoRest, OfflineTransport};
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn tracker() -> PresenceTracker {
        let (events, _) = broadcast::channel(64);
        let (dispatch, _inbound) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(
            Arc::new(OfflineTransport),
            SyncConfig::default(),
            dispatch,
            events.clone(),
        );
        PresenceTracker::new(connection, Arc::new(NoRest), events, Duration::from_secs(30))
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn record(user: &str, status: PresenceStatus, seconds: i64) -> PresenceRecord {
        PresenceRecord {
            user_id: user.to_string(),
            status,
            last_seen_at: Some(at(seconds)),
            project_id: None,
            task_id: None,
            status_message: None,
            updated_at: at(seconds),
        }
    }

    #[tokio::test]
    async fn test_push_events_patch_the_record() {
        let tracker = tracker();
        tracker.user_online("u2", at(10)).await;
        tracker
            .activity_changed("u2", Some("p1".to_string()), None, at(20))
            .await;
        tracker
            .status_updated("u2", Some("lunch".to_string()), at(30))
            .await;

        let held = tracker.presence("u2").await.unwrap();
        assert_eq!(held.status, PresenceStatus::Online);
        assert_eq!(held.project_id.as_deref(), Some("p1"));
        assert_eq!(held.status_message.as_deref(), Some("lunch"));
        assert_eq!(held.updated_at, at(30));
    }

    #[tokio::test]
    async fn test_snapshot_never_regresses_fresher_push() {
        let tracker = tracker();
        tracker.user_online("u2", at(100)).await;
        // Stale snapshot taken before the user came online
        tracker
            .merge_snapshot(vec![record("u2", PresenceStatus::Offline, 50)])
            .await;
        assert_eq!(
            tracker.presence("u2").await.unwrap().status,
            PresenceStatus::Online
        );

        // A fresher snapshot row does apply
        tracker
            .merge_snapshot(vec![record("u2", PresenceStatus::Away, 150)])
            .await;
        assert_eq!(
            tracker.presence("u2").await.unwrap().status,
            PresenceStatus::Away
        );
    }

    #[tokio::test]
    async fn test_snapshot_populates_unknown_users() {
        let tracker = tracker();
        tracker
            .merge_snapshot(vec![
                record("u2", PresenceStatus::Online, 10),
                record("u3", PresenceStatus::Busy, 10),
            ])
            .await;
        assert_eq!(tracker.roster().await.len(), 2);
    }
}
