use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;

use super::display::{describe_path, entity_row, format_updated_display, truncate};
use super::settings;
use super::tab::Tab;
use crate::config::{Config, DEFAULT_CHANNEL, DEFAULT_STORAGE_KEY};
use crate::identity::EntityType;
use crate::notices::recording::RecordingNotices;
use crate::state::{Entity, Repository, WatchState};
use crate::sync::Hub;
use crate::testing::{ORIGIN, TestStore, harness, resolver};

fn config() -> Config {
    Config {
        database_path: "unused.db".into(),
        origin: Url::parse(ORIGIN).expect("origin"),
        channel_name: DEFAULT_CHANNEL.to_string(),
        storage_key: DEFAULT_STORAGE_KEY.to_string(),
        busy_timeout: Duration::from_millis(10),
    }
}

async fn open_tab(hub: &Arc<Hub>) -> (Tab, Arc<TestStore>) {
    let store = Arc::new(TestStore::new());
    let tab = Tab::open(
        store.clone(),
        &config(),
        Arc::clone(hub),
        Arc::new(RecordingNotices::default()),
    )
    .await
    .expect("tab opens");
    (tab, store)
}

fn snapshot(repo: &Repository) -> BTreeSet<(EntityType, String, String)> {
    EntityType::ALL
        .into_iter()
        .flat_map(|kind| {
            repo.get_all(kind)
                .into_iter()
                .map(move |entity| (kind, entity.id, entity.state.to_string()))
        })
        .collect()
}

#[tokio::test]
async fn marking_in_one_tab_shows_up_in_another() {
    let hub = Hub::new();
    let (first, _) = open_tab(&hub).await;
    let (second, second_store) = open_tab(&hub).await;

    let url = format!("{ORIGIN}/episode/dark-1-episodio-3?autoplay=1");
    assert_eq!(first.mark_seen(&url).await, Some(EntityType::Episode));
    assert_eq!(
        first.repo().get_status(EntityType::Season, "/season/dark-1"),
        WatchState::Watching
    );

    for _ in 0..200 {
        if second
            .repo()
            .get_status(EntityType::Episode, "/episode/dark-1-episodio-3")
            == WatchState::Seen
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        second
            .repo()
            .get_status(EntityType::Episode, "/episode/dark-1-episodio-3"),
        WatchState::Seen
    );
    // Only the episode travels between tabs; ancestors are not propagated.
    assert_eq!(
        second.repo().get_status(EntityType::Season, "/season/dark-1"),
        WatchState::Untracked
    );
    assert_eq!(second_store.writes(), 1);
}

#[tokio::test]
async fn toggle_resolves_child_links_for_cascade() {
    let hub = Hub::new();
    let (tab, _) = open_tab(&hub).await;
    let children = vec![
        format!("{ORIGIN}/episode/dark-1-episodio-1"),
        "/episode/dark-1-episodio-2".to_string(),
        "/search/dark".to_string(),
    ];

    assert_eq!(
        tab.toggle("/season/dark-1", &children).await,
        Some((EntityType::Season, WatchState::Watching))
    );
    assert_eq!(
        tab.toggle("/season/dark-1", &children).await,
        Some((EntityType::Season, WatchState::Completed))
    );
    assert_eq!(
        tab.repo().get_episodes_for_season("/season/dark-1").len(),
        2
    );
    assert_eq!(tab.toggle("/search/dark", &[]).await, None);
}

#[tokio::test]
async fn containers_cannot_be_marked_seen() {
    let hub = Hub::new();
    let (tab, store) = open_tab(&hub).await;
    assert_eq!(tab.mark_seen("/series/dark").await, None);
    assert_eq!(tab.mark_seen("/about").await, None);
    assert_eq!(store.writes(), 0);

    assert_eq!(tab.mark_seen("/movie/up").await, Some(EntityType::Movie));
    assert!(tab.unmark("/movie/up").await);
    assert_eq!(
        tab.status("/movie/up"),
        Some((EntityType::Movie, "/movie/up".to_string(), WatchState::Untracked))
    );
}

#[tokio::test]
async fn export_then_reset_then_import_restores_everything() {
    let h = harness().await;
    let repo = &h.repo;
    for (kind, id, state) in [
        (EntityType::Episode, "/episode/foo-1-episodio-1", WatchState::Seen),
        (EntityType::Episode, "/watch/abc", WatchState::Seen),
        (EntityType::Season, "/season/foo-1", WatchState::Completed),
        (EntityType::Series, "/series/foo", WatchState::Watching),
        (EntityType::Movie, "/movie/up", WatchState::Seen),
    ] {
        repo.set_state(kind, id, state, None).await.expect("seed");
    }
    let before = snapshot(repo);
    let season_before = repo.get(EntityType::Season, "/season/foo-1");

    let exported = settings::export(repo);
    assert!(settings::reset(repo).await);
    assert!(snapshot(repo).is_empty());

    let report = settings::import(repo, &exported).await.expect("import");
    assert_eq!(report.applied, 5);
    assert_eq!(report.skipped + report.failed, 0);
    assert_eq!(snapshot(repo), before);
    assert_eq!(
        repo.get(EntityType::Season, "/season/foo-1").map(|e| e.series_id),
        season_before.map(|e| e.series_id)
    );
}

#[tokio::test]
async fn import_rejects_non_object_without_clearing() {
    let h = harness().await;
    h.repo
        .set_state(EntityType::Movie, "/movie/up", WatchState::Seen, None)
        .await
        .expect("seed");
    assert!(settings::import(&h.repo, &json!([1, 2])).await.is_err());
    assert_eq!(h.repo.count(EntityType::Movie), 1);
}

#[tokio::test]
async fn import_skips_malformed_records_and_keeps_order() {
    let h = harness().await;
    let doc = json!({
        "movie": [
            {"id": "/movie/a", "state": "seen", "rating": 4},
            {"id": "/movie/b"},
            {"id": "/movie/c", "state": "watching"},
            "nonsense"
        ],
        "series": [{"id": "/series/foo", "state": "completed", "name": "Foo!"}],
        "playlists": []
    });
    let report = settings::import(&h.repo, &doc).await.expect("import");
    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped, 3);

    let movie = h.repo.get(EntityType::Movie, "/movie/a").expect("movie");
    assert_eq!(movie.extra.get("rating"), Some(&json!(4)));
    let series = h.repo.get(EntityType::Series, "/series/foo").expect("series");
    assert_eq!(series.name.as_deref(), Some("Foo!"));
}

#[tokio::test]
async fn import_stores_canonical_ids_in_matching_section() {
    let h = harness().await;
    let doc = json!({
        "movie": [
            {"id": format!("{ORIGIN}/movie/up/"), "state": "seen"},
            {"id": "/episode/foo-1-episodio-2", "state": "seen"},
            {"id": "mailto:someone@example.com", "state": "seen"}
        ],
        "episode": [{"id": "/episode//foo-1-episodio-3/", "state": "seen"}]
    });
    let report = settings::import(&h.repo, &doc).await.expect("import");
    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped, 2);

    let movies: Vec<String> = h
        .repo
        .get_all(EntityType::Movie)
        .into_iter()
        .map(|entity| entity.id)
        .collect();
    assert_eq!(movies, vec!["/movie/up".to_string()]);
    assert_eq!(h.repo.get_status(EntityType::Movie, "/movie/up"), WatchState::Seen);
    assert_eq!(
        h.repo
            .get_status(EntityType::Episode, "/episode/foo-1-episodio-3"),
        WatchState::Seen
    );
    assert_eq!(
        h.repo
            .get_status(EntityType::Episode, "/episode/foo-1-episodio-2"),
        WatchState::Untracked
    );
}

#[tokio::test]
async fn failed_import_reports_without_rollback() {
    let h = harness().await;
    h.store.set_failing(true);
    let doc = json!({"movie": [{"id": "/movie/a", "state": "seen"}]});
    let report = settings::import(&h.repo, &doc).await.expect("import");
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 0);
}

#[tokio::test]
async fn locale_and_highlight_update_preferences() {
    let h = harness().await;
    let update = settings::set_locale(&h.repo, " it ").await;
    assert!(update.changed);
    assert_eq!(h.repo.get_prefs().user_lang(), "it");

    let blank = settings::set_locale(&h.repo, "").await;
    assert!(!blank.changed);
    assert_eq!(blank.warnings.len(), 1);

    assert!(settings::toggle_highlight(&h.repo).await.prefs.row_highlight());
    assert!(!settings::toggle_highlight(&h.repo).await.prefs.row_highlight());
}

#[test]
fn truncate_keeps_short_strings() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a much longer title", 10), "a much ...");
}

#[test]
fn describe_path_lists_structured_fields() {
    let lines = describe_path(&resolver().analyze("/episode/foo-2-episodio-7"));
    assert!(lines.iter().any(|line| line.contains("/season/foo-2")));
    assert!(lines.iter().any(|line| line.contains("episode-standard")));
    assert_eq!(
        describe_path(&resolver().analyze("/user/me")),
        vec!["Not a trackable page.".to_string()]
    );
}

#[test]
fn entity_rows_show_state_and_fallbacks() {
    let mut entity = Entity::new("/movie/up", WatchState::Seen);
    let row = entity_row(&entity);
    assert!(row.starts_with("/movie/up"));
    assert!(row.contains("seen"));
    entity.t = 0;
    assert_ne!(format_updated_display(entity.t), "-");
    assert_eq!(format_updated_display(i64::MAX), "-");
}
