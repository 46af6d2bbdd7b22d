use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::identity::{EntityType, Resolver, slug_to_title};
use crate::notices::NoticeLevel;
use crate::state::{Repository, WatchState};

/// Children the page currently lists for a season or series. Tracked
/// children are found in the repository; these add the untracked ones.
#[derive(Debug, Clone, Default)]
pub struct ChildHints {
    pub seasons: Vec<String>,
    pub episodes: Vec<String>,
}

pub struct Propagator {
    repo: Arc<Repository>,
    resolver: Resolver,
}

impl Propagator {
    pub fn new(repo: Arc<Repository>, resolver: Resolver) -> Self {
        Self { repo, resolver }
    }

    /// Advances the entity one step through its state cycle. `None` when the
    /// id is not a trackable page.
    pub async fn toggle(&self, id: &str, hints: &ChildHints) -> Option<(EntityType, WatchState)> {
        let kind = self.resolver.analyze(id).kind?;
        let state = match kind {
            EntityType::Episode => self.toggle_episode(id).await,
            EntityType::Movie => self.toggle_movie(id).await,
            EntityType::Season => self.toggle_season(id, hints).await,
            EntityType::Series => self.toggle_series(id, hints).await,
        };
        Some((kind, state))
    }

    pub async fn toggle_episode(&self, id: &str) -> WatchState {
        if self.repo.get_status(EntityType::Episode, id) == WatchState::Seen {
            self.unmark(EntityType::Episode, id).await;
        } else {
            self.mark_episode_seen(id).await;
        }
        self.repo.get_status(EntityType::Episode, id)
    }

    pub async fn toggle_movie(&self, id: &str) -> WatchState {
        if self.repo.get_status(EntityType::Movie, id) == WatchState::Seen {
            self.unmark(EntityType::Movie, id).await;
        } else {
            self.repo
                .set_state(EntityType::Movie, id, WatchState::Seen, None)
                .await;
        }
        self.repo.get_status(EntityType::Movie, id)
    }

    /// Marks seen and walks up the hierarchy. Also used for auto-marking on
    /// navigation: an already seen episode is written again but its
    /// ancestors are left alone.
    pub async fn mark_episode_seen(&self, id: &str) -> bool {
        let was_seen = self.repo.get_status(EntityType::Episode, id) == WatchState::Seen;
        let saved = self
            .repo
            .set_state(EntityType::Episode, id, WatchState::Seen, None)
            .await
            .is_some();
        if saved && !was_seen {
            self.propagate_watching_state(id).await;
        }
        saved
    }

    pub async fn unmark(&self, kind: EntityType, id: &str) -> bool {
        self.repo.remove(kind, id).await
    }

    /// Promotes the episode's season, then its series, to watching unless
    /// they already are. Completed ancestors are re-opened as well.
    pub async fn propagate_watching_state(&self, episode_id: &str) -> Vec<String> {
        let info = self.resolver.analyze(episode_id);
        if !info.is(EntityType::Episode) {
            return Vec::new();
        }

        let mut promoted = Vec::new();
        let series_id = info.hierarchy.series_id;

        if let Some(season_id) = info.hierarchy.season_id {
            let name = self.display_name(&season_id);
            let mut fields = Map::new();
            fields.insert("name".to_string(), Value::String(name.clone()));
            if let Some(series_id) = &series_id {
                fields.insert("series_id".to_string(), Value::String(series_id.clone()));
            }
            if self
                .promote(EntityType::Season, &season_id, &name, fields)
                .await
            {
                promoted.push(season_id);
            }
        }

        if let Some(series_id) = series_id {
            let name = self.display_name(&series_id);
            let mut fields = Map::new();
            fields.insert("name".to_string(), Value::String(name.clone()));
            if self
                .promote(EntityType::Series, &series_id, &name, fields)
                .await
            {
                promoted.push(series_id);
            }
        }

        if !promoted.is_empty() {
            debug!(episode = episode_id, ?promoted, "ancestors promoted to watching");
        }
        promoted
    }

    pub async fn toggle_season(&self, id: &str, hints: &ChildHints) -> WatchState {
        match self.repo.get_status(EntityType::Season, id) {
            WatchState::Watching => {
                if self
                    .repo
                    .set_state(EntityType::Season, id, WatchState::Completed, None)
                    .await
                    .is_some()
                {
                    self.complete_episodes(id, hints).await;
                }
            }
            WatchState::Completed => {
                if self.repo.remove(EntityType::Season, id).await {
                    self.untrack_episodes(id, hints).await;
                }
            }
            WatchState::Untracked | WatchState::Seen => {
                self.repo
                    .set_state(EntityType::Season, id, WatchState::Watching, None)
                    .await;
            }
        }
        self.repo.get_status(EntityType::Season, id)
    }

    pub async fn toggle_series(&self, id: &str, hints: &ChildHints) -> WatchState {
        match self.repo.get_status(EntityType::Series, id) {
            WatchState::Watching => {
                if self
                    .repo
                    .set_state(EntityType::Series, id, WatchState::Completed, None)
                    .await
                    .is_some()
                {
                    let seasons = self.seasons_of(id, hints);
                    info!(series = id, seasons = seasons.len(), "completing series");
                    for season_id in seasons {
                        let mut fields = Map::new();
                        fields.insert("series_id".to_string(), Value::String(id.to_string()));
                        self.repo
                            .set_state(EntityType::Season, &season_id, WatchState::Completed, Some(fields))
                            .await;
                        self.complete_episodes(&season_id, hints).await;
                    }
                }
            }
            WatchState::Completed => {
                if self.repo.remove(EntityType::Series, id).await {
                    let seasons = self.seasons_of(id, hints);
                    info!(series = id, seasons = seasons.len(), "untracking series");
                    for season_id in seasons {
                        if self.repo.get_status(EntityType::Season, &season_id) != WatchState::Untracked {
                            self.repo.remove(EntityType::Season, &season_id).await;
                        }
                        self.untrack_episodes(&season_id, hints).await;
                    }
                }
            }
            WatchState::Untracked | WatchState::Seen => {
                self.repo
                    .set_state(EntityType::Series, id, WatchState::Watching, None)
                    .await;
            }
        }
        self.repo.get_status(EntityType::Series, id)
    }

    async fn promote(
        &self,
        kind: EntityType,
        id: &str,
        name: &str,
        fields: Map<String, Value>,
    ) -> bool {
        if self.repo.get_status(kind, id) == WatchState::Watching {
            return false;
        }
        let saved = self
            .repo
            .set_state(kind, id, WatchState::Watching, Some(fields))
            .await
            .is_some();
        if saved {
            self.repo
                .notices()
                .toast(NoticeLevel::Info, &format!("Now watching {name}"));
        }
        saved
    }

    // One write in flight at a time, children in id order.
    async fn complete_episodes(&self, season_id: &str, hints: &ChildHints) {
        for episode_id in self.episodes_of(season_id, hints) {
            self.repo
                .set_state(EntityType::Episode, &episode_id, WatchState::Seen, None)
                .await;
        }
    }

    async fn untrack_episodes(&self, season_id: &str, hints: &ChildHints) {
        for episode_id in self.episodes_of(season_id, hints) {
            if self.repo.get_status(EntityType::Episode, &episode_id) != WatchState::Untracked {
                self.repo.remove(EntityType::Episode, &episode_id).await;
            }
        }
    }

    fn episodes_of(&self, season_id: &str, hints: &ChildHints) -> Vec<String> {
        let mut out = self.repo.get_episodes_for_season(season_id);
        for candidate in &hints.episodes {
            let info = self.resolver.analyze(candidate);
            if info.is(EntityType::Episode)
                && info.hierarchy.season_id.as_deref() == Some(season_id)
                && let Some(id) = info.id
            {
                push_unique(&mut out, id);
            }
        }
        out
    }

    fn seasons_of(&self, series_id: &str, hints: &ChildHints) -> Vec<String> {
        let mut out = self.repo.get_seasons_for_series(series_id);
        for episode in self.repo.get_all(EntityType::Episode) {
            if episode.series_id.as_deref() == Some(series_id)
                && let Some(season_id) = episode.season_id
            {
                push_unique(&mut out, season_id);
            }
        }
        for candidate in hints.seasons.iter().chain(&hints.episodes) {
            let info = self.resolver.analyze(candidate);
            if info.hierarchy.series_id.as_deref() != Some(series_id) {
                continue;
            }
            if let Some(season_id) = info.hierarchy.season_id {
                push_unique(&mut out, season_id);
            }
        }
        out
    }

    fn display_name(&self, id: &str) -> String {
        let info = self.resolver.analyze(id);
        info.display_name()
            .or_else(|| info.series_slug.as_deref().map(slug_to_title))
            .unwrap_or_else(|| id.to_string())
    }
}

fn push_unique(out: &mut Vec<String>, id: String) {
    if !out.contains(&id) {
        out.push(id);
    }
}
