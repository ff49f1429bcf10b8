use crate::consts::DEFAULT_LANGUAGE;
use crate::models::MetadataValue;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::debug;

/// Context for auto-generated field values.
///
/// Each generator is keyed by field id, compared case-insensitively:
///
/// | Field id    | Value                                   |
/// |-------------|-----------------------------------------|
/// | `title`     | the SIP title                           |
/// | `now`       | current UTC time, `2024-01-31T12:00:00Z`|
/// | `id`        | the SIP id                              |
/// | `level`     | the SIP description level               |
/// | `parentid`  | the parent's id                         |
/// | `language`  | the configured language display name    |
#[derive(Debug, Clone, Default)]
pub struct AutoFill {
    pub title: Option<String>,
    pub id: Option<String>,
    pub level: Option<String>,
    pub parent_id: Option<String>,
    pub language: Option<String>,
}
impl AutoFill {
    /// The generated value for a field id, if there is a generator for it.
    pub fn generate(&self, field_id: &str) -> Option<String> {
        match field_id.to_lowercase().as_str() {
            "title" => self.title.clone(),
            "now" => now(),
            "id" => self.id.clone(),
            "level" => self.level.clone(),
            "parentid" => self.parent_id.clone(),
            "language" => Some(self.language.clone().unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())),
            _ => None,
        }
    }

    /// Fills every empty value that has a generator. Populated values,
    /// including option pairs, are left alone.
    pub fn apply(&self, values: &mut [MetadataValue]) {
        for value in values.iter_mut().filter(|value| value.is_empty()) {
            if let Some(generated) = self.generate(&value.id) {
                debug!(field = %value.id, "auto-filling value");
                value.set(generated);
            }
        }
    }
}

fn now() -> Option<String> {
    OffsetDateTime::now_utc().format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z")).ok()
}
