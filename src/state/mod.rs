mod change;
mod entity;
mod prefs;
mod queue;


use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::db::{Collection, Store, StoreError};
use crate::errors::{ErrorHandler, HandleOptions, StateError, lock};
use crate::identity::{EntityType, Resolver};
use crate::notices::Notices;

pub use self::change::{Change, Listener};
pub use self::entity::{Entity, WatchState};
pub use self::prefs::{PREFS_ID, Preferences};
pub use self::queue::KeyedQueue;

use self::entity::collection_for;

type Cache = HashMap<EntityType, BTreeMap<String, Entity>>;

#[derive(Debug, Clone, PartialEq)]
pub struct PrefsUpdate {
    pub prefs: Preferences,
    pub changed: bool,
    pub warnings: Vec<String>,
}

/// In-memory view of every tracked entity, kept in step with the store.
/// Reads never touch the store; writes update the cache only after the store
/// accepted them.
pub struct Repository {
    store: Arc<dyn Store>,
    resolver: Resolver,
    errors: ErrorHandler,
    cache: Mutex<Cache>,
    prefs: Mutex<Preferences>,
    listeners: Mutex<Vec<Listener>>,
    queue: Arc<KeyedQueue>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>, resolver: Resolver, notices: Arc<dyn Notices>) -> Self {
        Self {
            store,
            resolver,
            errors: ErrorHandler::new(notices),
            cache: Mutex::new(empty_cache()),
            prefs: Mutex::new(Preferences::default()),
            listeners: Mutex::new(Vec::new()),
            queue: Arc::new(KeyedQueue::new()),
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn notices(&self) -> &Arc<dyn Notices> {
        self.errors.notices()
    }

    pub async fn load(&self) -> Result<(), StateError> {
        let mut fresh = empty_cache();
        let mut stale = Vec::new();
        for kind in EntityType::ALL {
            let records = match self.persist(move |store| store.get_all(collection_for(kind))).await {
                Ok(records) => records,
                Err(err) => {
                    return self.errors.handle(
                        err,
                        HandleOptions::new(format!("load {kind}"), ())
                            .toast("Could not read saved watch history.")
                            .rethrow(),
                    );
                }
            };
            let entities = fresh.entry(kind).or_default();
            for record in records {
                match serde_json::from_value::<Entity>(record) {
                    Ok(entity) if entity.state != WatchState::Untracked && entity.state.allowed_for(kind) => {
                        entities.insert(entity.id.clone(), entity);
                    }
                    Ok(entity) => {
                        warn!(%kind, id = %entity.id, state = %entity.state, "dropping record with impossible state");
                        stale.push((kind, entity.id));
                    }
                    Err(err) => warn!(%kind, %err, "ignoring malformed record"),
                }
            }
        }
        *lock(&self.cache) = fresh;

        let raw = match self
            .persist(|store| store.get(Collection::Preferences, PREFS_ID))
            .await
        {
            Ok(raw) => raw.unwrap_or(Value::Null),
            Err(err) => self.errors.handle(
                err,
                HandleOptions::new("load preferences", Value::Null).dedupe("load-preferences"),
            )?,
        };
        let (prefs, warnings) = Preferences::sanitize(&raw);
        for warning in &warnings {
            warn!(%warning, "stored preferences sanitized");
        }
        *lock(&self.prefs) = prefs;

        let purged = self.purge_stale(stale).await;
        let backfilled = self.backfill_hierarchy().await;
        info!(
            episodes = self.count(EntityType::Episode),
            seasons = self.count(EntityType::Season),
            series = self.count(EntityType::Series),
            movies = self.count(EntityType::Movie),
            purged,
            backfilled,
            "watch state loaded"
        );
        self.notify(&Change::Init);
        Ok(())
    }

    /// Rows that can never be cached are deleted so persistence holds
    /// exactly the tracked entities.
    async fn purge_stale(&self, stale: Vec<(EntityType, String)>) -> usize {
        let mut purged = 0;
        for (kind, id) in stale {
            let key = id.clone();
            match self
                .persist(move |store| store.delete(collection_for(kind), &key))
                .await
            {
                Ok(()) => purged += 1,
                Err(err) => {
                    let _ = self.errors.handle(
                        err,
                        HandleOptions::new(format!("purge {kind} {id}"), ()).dedupe("purge"),
                    );
                }
            }
        }
        purged
    }

    /// One pass filling links and names that older records were saved
    /// without. Only records that actually change are written back.
    async fn backfill_hierarchy(&self) -> usize {
        let pending = {
            let cache = lock(&self.cache);
            let mut pending = Vec::new();
            for kind in EntityType::ALL {
                for entity in cache.get(&kind).into_iter().flat_map(BTreeMap::values) {
                    let mut updated = entity.clone();
                    if self.derive_links(kind, &mut updated) {
                        pending.push((kind, updated));
                    }
                }
            }
            pending
        };

        let mut written = 0;
        for (kind, entity) in pending {
            match self.write_record(kind, &entity).await {
                Ok(()) => {
                    lock(&self.cache)
                        .entry(kind)
                        .or_default()
                        .insert(entity.id.clone(), entity);
                    written += 1;
                }
                Err(err) => {
                    let _ = self.errors.handle(
                        err,
                        HandleOptions::new(format!("backfill {kind} {}", entity.id), ())
                            .dedupe("backfill"),
                    );
                }
            }
        }
        written
    }

    pub async fn set_state(
        &self,
        kind: EntityType,
        id: &str,
        state: WatchState,
        fields: Option<Map<String, Value>>,
    ) -> Option<Entity> {
        if state == WatchState::Untracked {
            self.remove(kind, id).await;
            return None;
        }
        if !state.allowed_for(kind) {
            return self
                .errors
                .handle(
                    StateError::InvalidState { kind, state },
                    HandleOptions::new(format!("set {kind} {id}"), None),
                )
                .ok()
                .flatten();
        }

        let fields = fields.unwrap_or_default();
        let entity = self.prepare(kind, id, state, &fields);
        if let Err(err) = self.write_record(kind, &entity).await {
            return self
                .errors
                .handle(
                    err,
                    HandleOptions::new(format!("set {kind} {id}"), None)
                        .toast(format!("Could not save {}.", entity_label(&entity))),
                )
                .ok()
                .flatten();
        }

        lock(&self.cache)
            .entry(kind)
            .or_default()
            .insert(id.to_string(), entity.clone());
        debug!(%kind, id, %state, "state saved");
        self.notify(&Change::Changed {
            kind,
            id: id.to_string(),
            state,
            fields,
        });
        Some(entity)
    }

    pub async fn remove(&self, kind: EntityType, id: &str) -> bool {
        let key = id.to_string();
        if let Err(err) = self
            .persist(move |store| store.delete(collection_for(kind), &key))
            .await
        {
            return self
                .errors
                .handle(
                    err,
                    HandleOptions::new(format!("remove {kind} {id}"), false)
                        .toast(format!("Could not update {id}.")),
                )
                .unwrap_or(false);
        }

        if let Some(entities) = lock(&self.cache).get_mut(&kind) {
            entities.remove(id);
        }
        debug!(%kind, id, "state removed");
        self.notify(&Change::Removed {
            kind,
            id: id.to_string(),
        });
        true
    }

    pub async fn clear(&self, kind: EntityType) -> bool {
        if let Err(err) = self
            .persist(move |store| store.clear(collection_for(kind)))
            .await
        {
            return self
                .errors
                .handle(
                    err,
                    HandleOptions::new(format!("clear {kind}"), false)
                        .toast(format!("Could not clear {kind} history.")),
                )
                .unwrap_or(false);
        }

        if let Some(entities) = lock(&self.cache).get_mut(&kind) {
            entities.clear();
        }
        info!(%kind, "collection cleared");
        self.notify(&Change::Cleared { kind });
        true
    }

    pub fn get(&self, kind: EntityType, id: &str) -> Option<Entity> {
        lock(&self.cache)
            .get(&kind)
            .and_then(|entities| entities.get(id))
            .cloned()
    }

    pub fn get_all(&self, kind: EntityType) -> Vec<Entity> {
        lock(&self.cache)
            .get(&kind)
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_by_state(&self, kind: EntityType, state: WatchState) -> Vec<Entity> {
        self.filter(kind, |entity| entity.state == state)
    }

    pub fn get_status(&self, kind: EntityType, id: &str) -> WatchState {
        self.get(kind, id)
            .map(|entity| entity.state)
            .unwrap_or(WatchState::Untracked)
    }

    pub fn count(&self, kind: EntityType) -> usize {
        lock(&self.cache).get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn get_seasons_for_series(&self, series_id: &str) -> Vec<String> {
        self.filter(EntityType::Season, |entity| {
            entity.series_id.as_deref() == Some(series_id)
        })
        .into_iter()
        .map(|entity| entity.id)
        .collect()
    }

    pub fn get_episodes_for_season(&self, season_id: &str) -> Vec<String> {
        self.filter(EntityType::Episode, |entity| {
            entity.season_id.as_deref() == Some(season_id)
        })
        .into_iter()
        .map(|entity| entity.id)
        .collect()
    }

    pub fn get_prefs(&self) -> Preferences {
        lock(&self.prefs).clone()
    }

    pub async fn set_prefs(&self, partial: &Value) -> PrefsUpdate {
        let (sanitized, warnings) = Preferences::sanitize(partial);
        for warning in &warnings {
            warn!(%warning, "preference update sanitized");
        }

        let old = self.get_prefs();
        let new = old.merged(&sanitized);
        if new == old {
            return PrefsUpdate {
                prefs: old,
                changed: false,
                warnings,
            };
        }

        let record = new.to_record();
        if let Err(err) = self
            .persist(move |store| store.put(Collection::Preferences, PREFS_ID, &record))
            .await
        {
            let _ = self.errors.handle(
                err,
                HandleOptions::new("save preferences", ()).toast("Could not save settings."),
            );
            return PrefsUpdate {
                prefs: old,
                changed: false,
                warnings,
            };
        }

        *lock(&self.prefs) = new.clone();
        self.notify(&Change::PrefsChanged {
            old,
            new: new.clone(),
        });
        PrefsUpdate {
            prefs: new,
            changed: true,
            warnings,
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Change) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Arc::new(listener));
    }

    /// Delivers to every listener in registration order. A failing or
    /// panicking listener is logged and skipped.
    pub fn notify(&self, change: &Change) {
        let listeners = lock(&self.listeners).clone();
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(change))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(listener = index, event = %change.tag(), error = %err, "change listener failed")
                }
                Err(_) => error!(listener = index, event = %change.tag(), "change listener panicked"),
            }
        }
    }

    /// Runs `op` after every operation previously submitted for `id` has
    /// finished. Used by anything that mutates on behalf of another tab.
    pub fn serialized<F, T>(&self, id: &str, op: F) -> impl Future<Output = T> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.submit(id, op)
    }

    pub fn pending_serialized(&self) -> usize {
        self.queue.pending_keys()
    }

    fn prepare(
        &self,
        kind: EntityType,
        id: &str,
        state: WatchState,
        fields: &Map<String, Value>,
    ) -> Entity {
        let mut entity = self
            .get(kind, id)
            .unwrap_or_else(|| Entity::new(id, state));
        entity.state = state;
        entity.t = Utc::now().timestamp_millis().max(entity.t);
        self.derive_links(kind, &mut entity);
        entity.apply_fields(fields);
        entity
    }

    /// Fills links and name that are still empty. Existing values are never
    /// replaced here.
    fn derive_links(&self, kind: EntityType, entity: &mut Entity) -> bool {
        let info = self.resolver.analyze(entity.id.as_str());
        if !info.valid {
            return false;
        }

        let mut changed = false;
        let mut fill = |slot: &mut Option<String>, derived: Option<String>| {
            if slot.is_none() && derived.is_some() {
                *slot = derived;
                changed = true;
            }
        };
        match kind {
            EntityType::Episode => {
                fill(&mut entity.season_id, info.hierarchy.season_id.clone());
                fill(&mut entity.series_id, info.hierarchy.series_id.clone());
            }
            EntityType::Season => fill(&mut entity.series_id, info.hierarchy.series_id.clone()),
            EntityType::Series | EntityType::Movie => {}
        }
        fill(&mut entity.name, info.display_name());
        changed
    }

    async fn write_record(&self, kind: EntityType, entity: &Entity) -> Result<(), StateError> {
        let value = serde_json::to_value(entity)?;
        let key = entity.id.clone();
        self.persist(move |store| store.put(collection_for(kind), &key, &value))
            .await
    }

    async fn persist<T, F>(&self, op: F) -> Result<T, StateError>
    where
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || op(store.as_ref())).await??)
    }

    fn filter(&self, kind: EntityType, keep: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        lock(&self.cache)
            .get(&kind)
            .map(|entities| entities.values().filter(|entity| keep(*entity)).cloned().collect())
            .unwrap_or_default()
    }
}

fn empty_cache() -> Cache {
    EntityType::ALL
        .into_iter()
        .map(|kind| (kind, BTreeMap::new()))
        .collect()
}

fn entity_label(entity: &Entity) -> &str {
    entity.name.as_deref().unwrap_or(entity.id.as_str())
}
