//! Activity record model.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::DeviceInfo;
use crate::auth::Role;

/// JSON object used for metadata and state snapshots.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// What kind of operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Login,
    Logout,
    View,
    Create,
    Update,
    Delete,
    Export,
    Import,
    Execute,
    Configure,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Login => "login",
            ActionType::Logout => "logout",
            ActionType::View => "view",
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Export => "export",
            ActionType::Import => "import",
            ActionType::Execute => "execute",
            ActionType::Configure => "configure",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the audited operation.
///
/// `Error` means the operation itself broke (a fault); `Failed` means it
/// ran and was refused (bad input, denied, not found).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Success,
    Error,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Error => "error",
            ActivityStatus::Failed => "failed",
        }
    }
}

/// One persisted audit entry. Immutable once handed to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub action: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub device: DeviceInfo,
    pub status: ActivityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<JsonMap>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub component_states: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "JsonMap::is_empty", default)]
    pub metadata: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_value(ActionType::Configure).unwrap(), "configure");
        assert_eq!(serde_json::to_value(ActivityStatus::Failed).unwrap(), "failed");
        assert_eq!(ActionType::Delete.to_string(), "delete");
        assert_eq!(ActivityStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let record = ActivityRecord {
            id: Uuid::new_v4(),
            user_id: "1".into(),
            username: "alice".into(),
            role: Role::Admin,
            action: ActionType::View,
            resource_type: None,
            resource_id: None,
            description: None,
            ip_address: "127.0.0.1".into(),
            user_agent: None,
            device: DeviceInfo::default(),
            status: ActivityStatus::Success,
            error_message: None,
            duration_ms: 3,
            before: None,
            after: None,
            component_states: BTreeMap::new(),
            metadata: JsonMap::new(),
            request_id: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["role"], "admin");
        assert!(json.get("before").is_none());
        assert!(json.get("metadata").is_none());
        assert!(json.get("error_message").is_none());

        let back: ActivityRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
