use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::lock;
use crate::identity::Resolver;
use crate::state::{Repository, WatchState};

const CHANNEL_CAPACITY: usize = 256;

pub type TabId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub id: String,
    pub seen: bool,
}

impl SyncMessage {
    /// Strict about shape: anything other than a string id and a boolean
    /// `seen` is dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let id = value.get("id")?.as_str()?.trim();
        let seen = value.get("seen")?.as_bool()?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            seen,
        })
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: TabId,
    payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
    origin: TabId,
}

/// What tabs of one browser profile share: named broadcast channels and a
/// storage area whose changes are announced to every other tab.
pub struct Hub {
    broadcast_supported: bool,
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    storage: Mutex<HashMap<String, String>>,
    storage_events: broadcast::Sender<StorageEvent>,
    next_tab: AtomicU64,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    pub fn without_broadcast() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    fn build(broadcast_supported: bool) -> Self {
        let (storage_events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            broadcast_supported,
            channels: Mutex::new(HashMap::new()),
            storage: Mutex::new(HashMap::new()),
            storage_events,
            next_tab: AtomicU64::new(1),
        }
    }

    pub fn new_tab_id(&self) -> TabId {
        self.next_tab.fetch_add(1, Ordering::Relaxed)
    }

    fn channel(&self, name: &str) -> Option<broadcast::Sender<Envelope>> {
        if !self.broadcast_supported {
            return None;
        }
        let mut channels = lock(&self.channels);
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Some(sender.clone())
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.storage).get(key).cloned()
    }

    pub fn set_item(&self, origin: TabId, key: &str, value: &str) {
        let previous = lock(&self.storage).insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.announce(origin, key, Some(value.to_string()));
        }
    }

    pub fn remove_item(&self, origin: TabId, key: &str) {
        if lock(&self.storage).remove(key).is_some() {
            self.announce(origin, key, None);
        }
    }

    fn announce(&self, origin: TabId, key: &str, new_value: Option<String>) {
        // No receivers simply means no other tab is open.
        let _ = self.storage_events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            origin,
        });
    }
}

enum Transport {
    Channel(broadcast::Sender<Envelope>),
    Storage,
}

pub struct SyncRelay {
    repo: Arc<Repository>,
    resolver: Resolver,
    hub: Arc<Hub>,
    tab: TabId,
    storage_key: String,
    transport: Transport,
}

impl SyncRelay {
    pub fn new(
        repo: Arc<Repository>,
        resolver: Resolver,
        hub: Arc<Hub>,
        channel_name: &str,
        storage_key: &str,
    ) -> Self {
        let tab = hub.new_tab_id();
        let transport = match hub.channel(channel_name) {
            Some(sender) => Transport::Channel(sender),
            None => {
                debug!(tab, "broadcast channel unavailable, using storage events");
                Transport::Storage
            }
        };
        Self {
            repo,
            resolver,
            hub,
            tab,
            storage_key: storage_key.to_string(),
            transport,
        }
    }

    pub fn uses_fallback(&self) -> bool {
        matches!(self.transport, Transport::Storage)
    }

    /// Tells other tabs an episode or movie was just marked seen. Seasons,
    /// series and unmarks are never broadcast.
    pub fn broadcast_seen(&self, id: &str) -> bool {
        let info = self.resolver.analyze(id);
        let (Some(kind), Some(id)) = (info.kind, info.id) else {
            return false;
        };
        if !kind.is_leaf() {
            return false;
        }

        let message = SyncMessage { id, seen: true };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "could not encode sync message");
                return false;
            }
        };

        match &self.transport {
            Transport::Channel(sender) => {
                let _ = sender.send(Envelope {
                    origin: self.tab,
                    payload,
                });
            }
            Transport::Storage => {
                // The change event is the signal; the value must not linger.
                self.hub.set_item(self.tab, &self.storage_key, &payload);
                self.hub.remove_item(self.tab, &self.storage_key);
            }
        }
        debug!(tab = self.tab, id = %message.id, "broadcast seen");
        true
    }

    /// Applies a message from another tab through the per-id queue. Returns
    /// `None` for anything that is not a well-formed episode/movie update.
    pub fn receive(&self, raw: &str) -> Option<JoinHandle<()>> {
        let Some(message) = SyncMessage::parse(raw) else {
            debug!(raw, "ignoring malformed sync message");
            return None;
        };
        let info = self.resolver.analyze(message.id.as_str());
        let kind = info.kind.filter(|kind| info.valid && kind.is_leaf())?;
        let id = info.id?;

        let repo = Arc::clone(&self.repo);
        let target = id.clone();
        let op = async move {
            if message.seen {
                repo.set_state(kind, &target, WatchState::Seen, None).await;
            } else {
                repo.remove(kind, &target).await;
            }
        };
        debug!(tab = self.tab, %kind, id = %id, "applying sync message");
        Some(tokio::spawn(self.repo.serialized(&id, op)))
    }

    /// Subscribes now and spawns the receive loop.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        match &self.transport {
            Transport::Channel(sender) => {
                let mut rx = sender.subscribe();
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(envelope) if envelope.origin != relay.tab => {
                                relay.receive(&envelope.payload);
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "sync listener fell behind");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            }
            Transport::Storage => {
                let mut rx = self.hub.storage_events.subscribe();
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) => {
                                if event.origin == relay.tab || event.key != relay.storage_key {
                                    continue;
                                }
                                if let Some(payload) = event.new_value {
                                    relay.receive(&payload);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "sync listener fell behind");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::identity::EntityType;
    use crate::testing::{Harness, TestStore, harness_with, resolver};

    const EP: &str = "/episode/foo-3-episodio-12";

    async fn tab(hub: &Arc<Hub>, store: &Arc<TestStore>) -> (Harness, Arc<SyncRelay>) {
        let h = harness_with(Arc::clone(store)).await;
        let relay = Arc::new(SyncRelay::new(
            Arc::clone(&h.repo),
            resolver(),
            Arc::clone(hub),
            "watchmark-sync",
            "watchmark-sync-signal",
        ));
        (h, relay)
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert_eq!(
            SyncMessage::parse(r#"{"id":"/movie/up","seen":true}"#),
            Some(SyncMessage {
                id: "/movie/up".to_string(),
                seen: true
            })
        );
        for raw in [
            "not json",
            r#"{"id":1,"seen":true}"#,
            r#"{"id":"/movie/up"}"#,
            r#"{"id":"/movie/up","seen":"true"}"#,
            r#"{"id":"  ","seen":true}"#,
            "[]",
        ] {
            assert_eq!(SyncMessage::parse(raw), None, "{raw}");
        }
    }

    #[tokio::test]
    async fn receive_ignores_non_leaf_and_invalid_ids() {
        let hub = Hub::new();
        let (h, relay) = tab(&hub, &Arc::new(TestStore::new())).await;
        assert!(relay.receive(r#"{"id":"/series/foo","seen":true}"#).is_none());
        assert!(relay.receive(r#"{"id":"/about","seen":true}"#).is_none());
        assert!(relay.receive(r#"{"id":"mailto:x@y.z","seen":true}"#).is_none());
        assert!(relay.receive("garbage").is_none());
        assert_eq!(h.store.writes(), 0);
    }

    #[tokio::test]
    async fn rapid_messages_for_one_id_apply_in_order() {
        let hub = Hub::new();
        let (h, relay) = tab(&hub, &Arc::new(TestStore::new())).await;

        let seen = relay
            .receive(&format!(r#"{{"id":"{EP}","seen":true}}"#))
            .expect("accepted");
        let unseen = relay
            .receive(&format!(r#"{{"id":"{EP}","seen":false}}"#))
            .expect("accepted");
        unseen.await.expect("join");
        seen.await.expect("join");

        assert_eq!(h.repo.get(EntityType::Episode, EP), None);
        assert_eq!(h.repo.pending_serialized(), 0);
        assert_eq!(h.tags().last().map(String::as_str), Some("EPISODE_REMOVE"));
    }

    #[tokio::test]
    async fn broadcast_reaches_other_tabs_only() {
        let hub = Hub::new();
        let store_a = Arc::new(TestStore::new());
        let store_b = Arc::new(TestStore::new());
        let (a, relay_a) = tab(&hub, &store_a).await;
        let (b, relay_b) = tab(&hub, &store_b).await;
        let _listen_a = relay_a.listen();
        let _listen_b = relay_b.listen();
        assert!(!relay_a.uses_fallback());

        assert!(relay_a.broadcast_seen("https://stream.example/movie/up"));
        let repo_b = Arc::clone(&b.repo);
        wait_until(move || repo_b.get_status(EntityType::Movie, "/movie/up") == WatchState::Seen)
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.repo.get_status(EntityType::Movie, "/movie/up"), WatchState::Untracked);
        // Received updates are not echoed back.
        assert_eq!(store_a.writes(), 0);
    }

    #[tokio::test]
    async fn storage_fallback_delivers_through_change_events() {
        let hub = Hub::without_broadcast();
        let (_a, relay_a) = tab(&hub, &Arc::new(TestStore::new())).await;
        let (b, relay_b) = tab(&hub, &Arc::new(TestStore::new())).await;
        let _listen = relay_b.listen();
        assert!(relay_a.uses_fallback());

        assert!(relay_a.broadcast_seen(EP));
        assert!(relay_a.broadcast_seen(EP));
        assert_eq!(hub.get_item("watchmark-sync-signal"), None);

        let repo_b = Arc::clone(&b.repo);
        wait_until(move || repo_b.get_status(EntityType::Episode, EP) == WatchState::Seen).await;
    }

    #[tokio::test]
    async fn containers_are_never_broadcast() {
        let hub = Hub::new();
        let (_h, relay) = tab(&hub, &Arc::new(TestStore::new())).await;
        assert!(!relay.broadcast_seen("/season/foo-3"));
        assert!(!relay.broadcast_seen("/series/foo"));
        assert!(!relay.broadcast_seen("/search/foo"));
    }
}
