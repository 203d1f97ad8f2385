use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The claims sealed inside an `ak_` API key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyData {
    pub user_id: String,
    pub permissions: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// 16 random bytes, hex. Distinguishes keys issued for the same user.
    pub key_id: String,
}

impl ApiKeyData {
    /// Whether the key grants `permission`. `*` grants everything.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == "*" || p == permission)
    }
}
