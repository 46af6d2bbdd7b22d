use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::db::Store;
use crate::identity::{EntityType, PathInfo, Resolver};
use crate::notices::Notices;
use crate::propagation::{ChildHints, Propagator};
use crate::state::{Repository, WatchState};
use crate::sync::{Hub, SyncRelay};

/// Everything one open page needs, built explicitly so several tabs can
/// share a hub and store without sharing globals.
pub struct Tab {
    repo: Arc<Repository>,
    resolver: Resolver,
    engine: Propagator,
    relay: Arc<SyncRelay>,
    listener: JoinHandle<()>,
}

impl Tab {
    pub async fn open(
        store: Arc<dyn Store>,
        config: &Config,
        hub: Arc<Hub>,
        notices: Arc<dyn Notices>,
    ) -> Result<Self> {
        let resolver = Resolver::new(config.origin.clone());
        let repo = Arc::new(Repository::new(store, resolver.clone(), notices));
        repo.subscribe(|change| {
            debug!(event = %change.tag(), payload = %change.payload(), "change");
            Ok(())
        });
        repo.load().await?;

        let engine = Propagator::new(Arc::clone(&repo), resolver.clone());
        let relay = Arc::new(SyncRelay::new(
            Arc::clone(&repo),
            resolver.clone(),
            hub,
            &config.channel_name,
            &config.storage_key,
        ));
        let listener = relay.listen();

        Ok(Self {
            repo,
            resolver,
            engine,
            relay,
            listener,
        })
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn analyze(&self, input: &str) -> PathInfo {
        self.resolver.analyze(input)
    }

    pub fn status(&self, input: &str) -> Option<(EntityType, String, WatchState)> {
        let info = self.resolver.analyze(input);
        let kind = info.kind?;
        let id = info.id?;
        let state = self.repo.get_status(kind, &id);
        Some((kind, id, state))
    }

    pub async fn toggle(&self, input: &str, children: &[String]) -> Option<(EntityType, WatchState)> {
        let info = self.resolver.analyze(input);
        let id = info.id?;
        let hints = self.child_hints(children);
        let (kind, state) = self.engine.toggle(&id, &hints).await?;
        if kind.is_leaf() && state == WatchState::Seen {
            self.relay.broadcast_seen(&id);
        }
        Some((kind, state))
    }

    pub async fn mark_seen(&self, input: &str) -> Option<EntityType> {
        let info = self.resolver.analyze(input);
        let kind = info.kind?;
        let id = info.id?;
        let saved = match kind {
            EntityType::Episode => self.engine.mark_episode_seen(&id).await,
            EntityType::Movie => self
                .repo
                .set_state(kind, &id, WatchState::Seen, None)
                .await
                .is_some(),
            EntityType::Season | EntityType::Series => return None,
        };
        if !saved {
            return None;
        }
        self.relay.broadcast_seen(&id);
        Some(kind)
    }

    pub async fn unmark(&self, input: &str) -> bool {
        let info = self.resolver.analyze(input);
        let (Some(kind), Some(id)) = (info.kind, info.id) else {
            return false;
        };
        self.engine.unmark(kind, &id).await
    }

    fn child_hints(&self, children: &[String]) -> ChildHints {
        let mut hints = ChildHints::default();
        for child in children {
            let info = self.resolver.analyze(child);
            match (info.kind, info.id) {
                (Some(EntityType::Episode), Some(id)) => hints.episodes.push(id),
                (Some(EntityType::Season), Some(id)) => hints.seasons.push(id),
                _ => {}
            }
        }
        hints
    }
}

impl Drop for Tab {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
