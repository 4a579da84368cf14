//! Messages and the callbacks a channel hands them to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A single unit of traffic moving through a connector.
///
/// The payload is opaque to the supervisor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Time-ordered message ID (UUIDv7)
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Service to invoke for this message, stamped by channels from `service_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            service: None,
            payload,
        }
    }

    pub fn with_service(mut self, service: Option<String>) -> Self {
        self.service = service;
        self
    }
}

/// Credentials presented by a caller of a channel connector.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Invoked by channels for each message received.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Invoked by channels that need to authenticate callers.
pub type AuthFunc = Arc<dyn Fn(&Credentials) -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_message_has_no_service() {
        let msg = Message::new(json!({"amount": 10}));
        assert!(msg.service.is_none());
        assert_eq!(msg.payload["amount"], 10);

        let msg = msg.with_service(Some("billing.charge".to_string()));
        assert_eq!(msg.service.as_deref(), Some("billing.charge"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::new(json!(null));
        let b = Message::new(json!(null));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "user1".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("user1"));
        assert!(!rendered.contains("hunter2"));
    }
}
