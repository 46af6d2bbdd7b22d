use chrono::{DateTime, Local};

use crate::identity::PathInfo;
use crate::state::Entity;

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_updated_display(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

pub(crate) fn entity_row(entity: &Entity) -> String {
    format!(
        "{:<44} {:<32} {:<10} {:<24}",
        truncate(&entity.id, 44),
        truncate(entity.name.as_deref().unwrap_or("-"), 32),
        entity.state,
        format_updated_display(entity.t)
    )
}

pub(crate) fn entity_header() -> String {
    format!("{:<44} {:<32} {:<10} {:<24}", "ID", "NAME", "STATE", "UPDATED")
}

pub(crate) fn describe_path(info: &PathInfo) -> Vec<String> {
    if !info.valid {
        return vec!["Not a trackable page.".to_string()];
    }

    let mut lines = Vec::new();
    let mut field = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            lines.push(format!("  {label:<12} {value}"));
        }
    };
    field("id", info.id.clone());
    field("type", info.kind.map(|kind| kind.to_string()));
    field("pattern", info.pattern.map(str::to_string));
    field("series", info.series_slug.clone());
    field("season", info.season_number.map(|n| n.to_string()));
    field("episode", info.episode_slug.clone());
    field("movie", info.movie_slug.clone());
    field("season id", info.hierarchy.season_id.clone());
    field("series id", info.hierarchy.series_id.clone());
    field("name", info.display_name());
    lines
}
