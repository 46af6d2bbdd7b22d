use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::identity::EntityType;

use super::{Preferences, WatchState};

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Init,
    Changed {
        kind: EntityType,
        id: String,
        state: WatchState,
        fields: Map<String, Value>,
    },
    Removed {
        kind: EntityType,
        id: String,
    },
    Cleared {
        kind: EntityType,
    },
    PrefsChanged {
        old: Preferences,
        new: Preferences,
    },
}

impl Change {
    /// Event name in the `EPISODE_CHANGE` form decoration code keys on.
    pub fn tag(&self) -> String {
        match self {
            Self::Init => "INIT".to_string(),
            Self::Changed { kind, .. } => format!("{}_CHANGE", kind.tag()),
            Self::Removed { kind, .. } => format!("{}_REMOVE", kind.tag()),
            Self::Cleared { kind } => format!("{}_CLEAR", kind.tag()),
            Self::PrefsChanged { .. } => "PREFS_CHANGE".to_string(),
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Init | Self::Cleared { .. } => Value::Null,
            Self::Changed {
                id, state, fields, ..
            } => {
                let mut payload = fields.clone();
                payload.insert("id".to_string(), Value::String(id.clone()));
                payload.insert("state".to_string(), Value::String(state.to_string()));
                Value::Object(payload)
            }
            Self::Removed { id, .. } => json!({ "id": id }),
            Self::PrefsChanged { old, new } => json!({ "oldPrefs": old, "newPrefs": new }),
        }
    }
}

pub type Listener = Arc<dyn Fn(&Change) -> anyhow::Result<()> + Send + Sync>;
