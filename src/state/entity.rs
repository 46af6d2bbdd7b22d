use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::Collection;
use crate::identity::EntityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    Untracked,
    Watching,
    Completed,
    Seen,
}

impl WatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Untracked => "untracked",
            Self::Watching => "watching",
            Self::Completed => "completed",
            Self::Seen => "seen",
        }
    }

    pub fn allowed_for(self, kind: EntityType) -> bool {
        match self {
            Self::Untracked => true,
            Self::Seen => kind.is_leaf(),
            Self::Watching | Self::Completed => !kind.is_leaf(),
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchState {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "untracked" => Ok(Self::Untracked),
            "watching" => Ok(Self::Watching),
            "completed" => Ok(Self::Completed),
            "seen" => Ok(Self::Seen),
            other => Err(format!("unknown state '{other}'")),
        }
    }
}

pub(crate) fn collection_for(kind: EntityType) -> Collection {
    match kind {
        EntityType::Episode => Collection::Episodes,
        EntityType::Season => Collection::Seasons,
        EntityType::Series => Collection::Series,
        EntityType::Movie => Collection::Movies,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub state: WatchState,
    #[serde(default)]
    pub t: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity {
    pub fn new(id: &str, state: WatchState) -> Self {
        Self {
            id: id.to_string(),
            state,
            t: 0,
            season_id: None,
            series_id: None,
            name: None,
            extra: Map::new(),
        }
    }

    /// Caller-supplied fields win over anything derived; `null` clears a link.
    pub fn apply_fields(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            match key.as_str() {
                "id" | "state" | "t" => {}
                "name" => self.name = value.as_str().map(str::to_string),
                "season_id" => self.season_id = value.as_str().map(str::to_string),
                "series_id" => self.series_id = value.as_str().map(str::to_string),
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }
}
