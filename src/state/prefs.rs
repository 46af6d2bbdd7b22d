use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PREFS_ID: &str = "userPreferences";
pub const DEFAULT_LANG: &str = "en";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_highlight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_lang: Option<String>,
}

impl Preferences {
    pub fn row_highlight(&self) -> bool {
        self.row_highlight.unwrap_or(false)
    }

    pub fn user_lang(&self) -> &str {
        self.user_lang.as_deref().unwrap_or(DEFAULT_LANG)
    }

    /// Keeps only recognized keys whose values pass their validator. Every
    /// dropped key produces one warning.
    pub fn sanitize(raw: &Value) -> (Self, Vec<String>) {
        let mut prefs = Self::default();
        let mut warnings = Vec::new();
        let Some(object) = raw.as_object() else {
            if !raw.is_null() {
                warnings.push(format!("ignored preferences that are not an object: {raw}"));
            }
            return (prefs, warnings);
        };

        for (key, value) in object {
            match key.as_str() {
                "id" => {}
                "rowHighlight" => match value.as_bool() {
                    Some(flag) => prefs.row_highlight = Some(flag),
                    None => warnings.push(format!("dropped rowHighlight: expected a boolean, got {value}")),
                },
                "userLang" => match value.as_str().map(str::trim) {
                    Some(lang) if !lang.is_empty() => prefs.user_lang = Some(lang.to_string()),
                    _ => warnings.push(format!("dropped userLang: expected a language code, got {value}")),
                },
                other => warnings.push(format!("dropped unknown preference '{other}'")),
            }
        }
        (prefs, warnings)
    }

    pub fn merged(&self, partial: &Self) -> Self {
        Self {
            row_highlight: partial.row_highlight.or(self.row_highlight),
            user_lang: partial.user_lang.clone().or_else(|| self.user_lang.clone()),
        }
    }

    pub(crate) fn to_record(&self) -> Value {
        let mut record = Map::new();
        record.insert("id".to_string(), Value::String(PREFS_ID.to_string()));
        if let Some(flag) = self.row_highlight {
            record.insert("rowHighlight".to_string(), Value::Bool(flag));
        }
        if let Some(lang) = &self.user_lang {
            record.insert("userLang".to_string(), Value::String(lang.clone()));
        }
        Value::Object(record)
    }
}
