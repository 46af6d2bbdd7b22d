use anyhow::{Result, bail};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::identity::EntityType;
use crate::state::{PrefsUpdate, Repository, WatchState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn export(repo: &Repository) -> Value {
    let mut doc = Map::new();
    for kind in EntityType::ALL {
        let records = repo
            .get_all(kind)
            .into_iter()
            .filter_map(|entity| serde_json::to_value(entity).ok())
            .collect::<Vec<_>>();
        doc.insert(kind.as_str().to_string(), Value::Array(records));
    }
    Value::Object(doc)
}

/// Clears all four collections, then replays records in array order. A
/// failure part way leaves what was already applied; there is no rollback.
pub async fn import(repo: &Repository, doc: &Value) -> Result<ImportReport> {
    let Some(object) = doc.as_object() else {
        bail!("import file must contain a JSON object keyed by entity type");
    };
    for key in object.keys() {
        if key.parse::<EntityType>().is_err() {
            warn!(key = %key, "ignoring unknown section in import");
        }
    }

    reset(repo).await;

    let mut report = ImportReport::default();
    for kind in EntityType::ALL {
        let Some(records) = object.get(kind.as_str()).and_then(Value::as_array) else {
            continue;
        };
        for record in records {
            let Some((id, state, fields)) = split_record(record) else {
                report.skipped += 1;
                continue;
            };
            if !state.allowed_for(kind) || state == WatchState::Untracked {
                report.skipped += 1;
                continue;
            }
            let info = repo.resolver().analyze(id.as_str());
            let matches_section = info.is(kind);
            let Some(id) = info.id.filter(|_| matches_section) else {
                warn!(%kind, id = %id, "skipping record that does not resolve to its section");
                report.skipped += 1;
                continue;
            };
            match repo.set_state(kind, &id, state, Some(fields)).await {
                Some(_) => report.applied += 1,
                None => report.failed += 1,
            }
        }
    }
    info!(
        applied = report.applied,
        skipped = report.skipped,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

fn split_record(record: &Value) -> Option<(String, WatchState, Map<String, Value>)> {
    let mut fields = record.as_object()?.clone();
    let id = fields.remove("id")?.as_str()?.trim().to_string();
    let state = fields.remove("state")?.as_str()?.parse::<WatchState>().ok()?;
    fields.remove("t");
    if id.is_empty() {
        return None;
    }
    Some((id, state, fields))
}

pub async fn reset(repo: &Repository) -> bool {
    let mut all_cleared = true;
    for kind in EntityType::ALL {
        all_cleared &= repo.clear(kind).await;
    }
    all_cleared
}

pub async fn set_locale(repo: &Repository, code: &str) -> PrefsUpdate {
    repo.set_prefs(&json!({ "userLang": code })).await
}

pub async fn toggle_highlight(repo: &Repository) -> PrefsUpdate {
    let current = repo.get_prefs().row_highlight();
    repo.set_prefs(&json!({ "rowHighlight": !current })).await
}
