use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A session payload stamped with its lifetime.
///
/// The whole record is serialized and encrypted into the session token, so
/// nothing here is ever visible to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord<T> {
    /// The caller's payload.
    pub data: T,
    /// When the token was issued.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// When the token stops being accepted.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl<T> SessionRecord<T> {
    /// Whether the record is still valid at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// How long ago the record was issued.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// The identity stored in a login session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// The ID of the user this session belongs to.
    pub user_id: String,
    /// The email the user logged in with.
    pub email: String,
}
