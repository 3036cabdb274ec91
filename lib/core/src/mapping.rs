use serde::{Deserialize, Serialize};

/// How a reviewer UI should render items of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Conversation,
    QaPair,
    Plain,
    #[default]
    Auto,
}

fn default_role_field() -> String {
    "role".to_string()
}

fn default_content_field() -> String {
    "content".to_string()
}

fn default_user_role() -> String {
    "user".to_string()
}

fn default_assistant_role() -> String {
    "assistant".to_string()
}

fn default_system_role() -> String {
    "system".to_string()
}

/// Maps record keys onto the roles a review item understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub question_field: Option<String>,
    #[serde(default)]
    pub answer_field: Option<String>,
    #[serde(default)]
    pub thinking_field: Option<String>,
    #[serde(default)]
    pub context_field: Option<String>,
    #[serde(default)]
    pub messages_field: Option<String>,
    #[serde(default)]
    pub image_field: Option<String>,

    #[serde(default = "default_role_field")]
    pub message_role_field: String,
    #[serde(default = "default_content_field")]
    pub message_content_field: String,
    #[serde(default = "default_user_role")]
    pub user_role_value: String,
    #[serde(default = "default_assistant_role")]
    pub assistant_role_value: String,
    #[serde(default = "default_system_role")]
    pub system_role_value: String,

    #[serde(default)]
    pub metadata_fields: Vec<String>,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub detected_fields: Vec<String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            question_field: None,
            answer_field: None,
            thinking_field: None,
            context_field: None,
            messages_field: None,
            image_field: None,
            message_role_field: default_role_field(),
            message_content_field: default_content_field(),
            user_role_value: default_user_role(),
            assistant_role_value: default_assistant_role(),
            system_role_value: default_system_role(),
            metadata_fields: Vec::new(),
            display_mode: DisplayMode::Auto,
            detected_fields: Vec::new(),
        }
    }
}

impl FieldMapping {
    /// Keys assigned to a role, in category order
    pub fn role_fields(&self) -> Vec<&str> {
        [
            &self.question_field,
            &self.answer_field,
            &self.thinking_field,
            &self.context_field,
            &self.messages_field,
            &self.image_field,
        ]
        .into_iter()
        .filter_map(|f| f.as_deref())
        .collect()
    }

    /// Drop role keys from `metadata_fields`
    pub fn exclude_roles_from_metadata(&mut self) {
        let roles: Vec<String> = self.role_fields().into_iter().map(str::to_string).collect();
        self.metadata_fields.retain(|f| !roles.contains(f));
    }

    /// Merge newly detected keys into `detected_fields`, keeping it sorted
    pub fn merge_detected(&mut self, fields: &[String]) {
        for field in fields {
            if !self.detected_fields.contains(field) {
                self.detected_fields.push(field.clone());
            }
        }
        self.detected_fields.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let mapping: FieldMapping = serde_json::from_str("{}").unwrap();
        assert_eq!(mapping, FieldMapping::default());
        assert_eq!(mapping.message_role_field, "role");
        assert_eq!(mapping.display_mode, DisplayMode::Auto);
    }

    #[test]
    fn test_display_mode_wire_names() {
        assert_eq!(serde_json::to_string(&DisplayMode::QaPair).unwrap(), "\"qa_pair\"");
        let mode: DisplayMode = serde_json::from_str("\"conversation\"").unwrap();
        assert_eq!(mode, DisplayMode::Conversation);
    }

    #[test]
    fn test_roles_never_in_metadata() {
        let mut mapping = FieldMapping {
            question_field: Some("prompt".into()),
            answer_field: Some("response".into()),
            metadata_fields: vec!["prompt".into(), "source".into(), "response".into()],
            ..Default::default()
        };
        mapping.exclude_roles_from_metadata();
        assert_eq!(mapping.metadata_fields, vec!["source".to_string()]);
    }

    #[test]
    fn test_merge_detected() {
        let mut mapping = FieldMapping {
            detected_fields: vec!["b".into(), "q".into()],
            ..Default::default()
        };
        mapping.merge_detected(&["a".into(), "q".into()]);
        assert_eq!(mapping.detected_fields, vec!["a", "b", "q"]);
    }
}
