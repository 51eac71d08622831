// Collaborator hooks: response cache, realtime broadcast and notification
// dispatch.
//
// The core only knows these traits. Side effects are collected while an
// operation runs and handed to `Hooks::dispatch` after the transaction has
// committed; a failing hook is logged and otherwise ignored.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{LeagueId, MatchId, PlayerId};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    MatchCreated,
    ResultUploaded,
    CaptainConfirmed,
    ResultPublished,
    RevisionRequested,
    StatsUpdated,
    VoteUpdated,
    PickUpdated,
    XpSettled,
    AchievementUnlocked,
}

/// Realtime payload pushed to subscribed clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub match_id: MatchId,
    pub league_id: LeagueId,
    pub player_id: Option<PlayerId>,
    pub action: EventAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ResultConfirmationRequest,
    CaptainConfirmed,
    CaptainRevisionSuggested,
    MotmVote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient: PlayerId,
    pub kind: NotificationKind,
    pub match_id: MatchId,
    /// Player whose action triggered the notification.
    pub actor: PlayerId,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Cache keys
// ---------------------------------------------------------------------------

/// Key prefixes invalidated after writes. The trailing `:` keeps
/// `league:1:` from matching `league:10:`.
pub fn league_prefix(id: LeagueId) -> String {
    format!("league:{id}:")
}

pub fn match_prefix(id: MatchId) -> String {
    format!("match:{id}:")
}

pub fn player_prefix(id: PlayerId) -> String {
    format!("player:{id}:")
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Response cache owned by the surrounding system.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> anyhow::Result<()>;
    /// Drop every entry whose key starts with `prefix`. Returns how many
    /// entries were removed.
    fn invalidate_by_prefix(&self, prefix: &str) -> anyhow::Result<usize>;
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &RealtimeEvent) -> anyhow::Result<()>;
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// In-process TTL cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, serde_json::Value)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((expires, value)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache mutex poisoned"))?;
        let now = Instant::now();
        entries.retain(|_, (expires, _)| *expires > now);
        entries.insert(key.to_string(), (now + ttl, value));
        Ok(())
    }

    fn invalidate_by_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache mutex poisoned"))?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}

/// Cache that stores nothing.
pub struct NullCache;

impl ResponseCache for NullCache {
    fn get(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }

    fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    fn invalidate_by_prefix(&self, _prefix: &str) -> anyhow::Result<usize> {
        Ok(0)
    }
}

/// Forwards payloads into a bounded tokio channel without waiting. A full or
/// closed channel is reported as an error, which dispatch logs and drops.
pub struct ChannelSink<T> {
    tx: mpsc::Sender<T>,
}

pub type ChannelEventSink = ChannelSink<RealtimeEvent>;
pub type ChannelNotificationSink = ChannelSink<Notification>;

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink<RealtimeEvent> {
    fn publish(&self, event: &RealtimeEvent) -> anyhow::Result<()> {
        self.tx
            .try_send(event.clone())
            .map_err(|e| anyhow!("realtime channel rejected event: {e}"))
    }
}

impl NotificationSink for ChannelSink<Notification> {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.tx
            .try_send(notification.clone())
            .map_err(|e| anyhow!("notification channel rejected record: {e}"))
    }
}

/// Writes events and notifications to the log only.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &RealtimeEvent) -> anyhow::Result<()> {
        info!(
            match_id = event.match_id,
            league_id = event.league_id,
            player_id = ?event.player_id,
            action = ?event.action,
            "realtime event"
        );
        Ok(())
    }
}

impl NotificationSink for LogSink {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            recipient = notification.recipient,
            kind = ?notification.kind,
            match_id = notification.match_id,
            "notification: {}",
            notification.message
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Side-effect collection and dispatch
// ---------------------------------------------------------------------------

/// Side effects produced by one operation, dispatched after commit.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SideEffects {
    pub invalidate: BTreeSet<String>,
    pub events: Vec<RealtimeEvent>,
    pub notifications: Vec<Notification>,
}

impl SideEffects {
    pub fn invalidate(&mut self, prefix: String) {
        self.invalidate.insert(prefix);
    }

    pub fn event(&mut self, match_id: MatchId, league_id: LeagueId, player_id: Option<PlayerId>, action: EventAction) {
        self.events.push(RealtimeEvent {
            match_id,
            league_id,
            player_id,
            action,
        });
    }

    pub fn notify(
        &mut self,
        recipient: PlayerId,
        kind: NotificationKind,
        match_id: MatchId,
        actor: PlayerId,
        message: impl Into<String>,
    ) {
        self.notifications.push(Notification {
            recipient,
            kind,
            match_id,
            actor,
            message: message.into(),
        });
    }

    /// Invalidate everything cached for the match, its league and `players`.
    pub fn touch(&mut self, league_id: LeagueId, match_id: MatchId, players: impl IntoIterator<Item = PlayerId>) {
        self.invalidate(league_prefix(league_id));
        self.invalidate(match_prefix(match_id));
        for player_id in players {
            self.invalidate(player_prefix(player_id));
        }
    }
}

/// The collaborators injected into the service.
#[derive(Clone)]
pub struct Hooks {
    pub cache: Arc<dyn ResponseCache>,
    pub events: Arc<dyn EventSink>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            cache: Arc::new(NullCache),
            events: Arc::new(LogSink),
            notifications: Arc::new(LogSink),
        }
    }
}

impl Hooks {
    /// Fire every side effect. Never fails: each hook error is logged and
    /// the remaining effects still run.
    pub fn dispatch(&self, effects: SideEffects) {
        for prefix in &effects.invalidate {
            match self.cache.invalidate_by_prefix(prefix) {
                Ok(n) => debug!(prefix = %prefix, removed = n, "cache invalidated"),
                Err(e) => warn!(prefix = %prefix, "cache invalidation failed: {e:#}"),
            }
        }
        for event in &effects.events {
            if let Err(e) = self.events.publish(event) {
                warn!(match_id = event.match_id, action = ?event.action, "broadcast failed: {e:#}");
            }
        }
        for notification in &effects.notifications {
            if let Err(e) = self.notifications.notify(notification) {
                warn!(
                    recipient = notification.recipient,
                    kind = ?notification.kind,
                    "notification dispatch failed: {e:#}"
                );
            }
        }
    }
}
