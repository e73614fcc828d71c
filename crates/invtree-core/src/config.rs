//! Retention rules as they are stored in configuration.

use crate::filter::SDChoice;
use crate::retention::SDRetentionFilterChoices;
use crate::value::parse_visible_raw_path;
use serde::{Deserialize, Serialize};

/// One configured retention rule.
///
/// ```json
/// {"interval": 3600, "visible_raw_path": "software.packages", "columns": "all"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIntervalFromConfig {
    pub interval: i64,
    pub visible_raw_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<SDChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<SDChoice>,
}

impl RawIntervalFromConfig {
    /// Retention choices for data cached at `cache_info = (cached_at, cache_interval)`.
    pub fn to_choices(&self, cache_info: (i64, i64)) -> SDRetentionFilterChoices {
        let mut choices =
            SDRetentionFilterChoices::new(parse_visible_raw_path(&self.visible_raw_path), self.interval);
        if let Some(choice) = &self.attributes {
            choices.add_pairs_choice(choice.clone(), cache_info);
        }
        if let Some(choice) = &self.columns {
            choices.add_columns_choice(choice.clone(), cache_info);
        }
        choices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::sd_path;

    #[test]
    fn test_to_choices() {
        let raw: RawIntervalFromConfig = serde_json::from_str(
            r#"{
                "interval": 6,
                "visible_raw_path": "path-to.node",
                "attributes": ["choices", ["key"]],
                "columns": "all"
            }"#,
        )
        .unwrap();
        let choices = raw.to_choices((4, 5));
        assert_eq!(choices.path, sd_path(&["path-to", "node"]));
        assert_eq!(choices.interval, 6);
        assert_eq!(choices.pairs().len(), 1);
        assert_eq!(choices.pairs()[0].choice, SDChoice::keys(["key"]));
        assert_eq!(choices.columns()[0].choice, SDChoice::All);
        assert_eq!(choices.columns()[0].cache_info, (4, 5));
    }

    #[test]
    fn test_missing_sides_register_nothing() {
        let raw: RawIntervalFromConfig =
            serde_json::from_str(r#"{"interval": 1, "visible_raw_path": ""}"#).unwrap();
        let choices = raw.to_choices((0, 0));
        assert!(choices.path.is_empty());
        assert!(choices.pairs().is_empty());
        assert!(choices.columns().is_empty());
    }
}
