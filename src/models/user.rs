use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch::{null_as_default, nullable};

/// A platform member. Created server-side on sign-up, never deleted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_date: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub connections: Vec<UserConnection>,
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
}

/// Directed connection request: `user_id` asked to connect with `connected_user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConnection {
    pub id: String,
    pub user_id: String,
    pub connected_user_id: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

/// Field-level changes to a user. Absent fields are left alone; for optional profile
/// fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub join_date: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<UserConnection>>,
}

impl UserPatch {
    pub fn connections(connections: Vec<UserConnection>) -> Self {
        Self {
            connections: Some(connections),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<&User> for UserPatch {
    /// Full-value patch, used to restore a snapshot exactly
    fn from(user: &User) -> Self {
        Self {
            name: Some(user.name.clone()),
            email: Some(user.email.clone()),
            avatar: Some(user.avatar.clone()),
            bio: Some(user.bio.clone()),
            subtitle: Some(user.subtitle.clone()),
            join_date: Some(user.join_date.clone()),
            role: Some(user.role.clone()),
            connections: Some(user.connections.clone()),
        }
    }
}

impl User {
    pub fn apply_patch(&mut self, patch: &UserPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(avatar) = &patch.avatar {
            self.avatar = avatar.clone();
        }
        if let Some(bio) = &patch.bio {
            self.bio = bio.clone();
        }
        if let Some(subtitle) = &patch.subtitle {
            self.subtitle = subtitle.clone();
        }
        if let Some(join_date) = &patch.join_date {
            self.join_date = join_date.clone();
        }
        if let Some(role) = &patch.role {
            self.role = role.clone();
        }
        if let Some(connections) = &patch.connections {
            self.connections = connections.clone();
        }
    }

    pub fn connection_to(&self, connected_user_id: &str) -> Option<&UserConnection> {
        self.connections
            .iter()
            .find(|conn| conn.connected_user_id == connected_user_id)
    }

    pub fn pending_request_from(&self, requester_id: &str) -> Option<&UserConnection> {
        self.connections
            .iter()
            .find(|conn| conn.user_id == requester_id && conn.status == ConnectionStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            avatar: None,
            bio: Some("math".to_string()),
            subtitle: None,
            join_date: None,
            role: "user".to_string(),
            created_at: Utc::now(),
            connections: Vec::new(),
        }
    }

    #[test]
    fn test_patch_keeps_absent_and_clears_null() {
        let mut u = user();
        let patch: UserPatch = serde_json::from_str(r#"{"name": "Ada L.", "bio": null}"#).unwrap();
        u.apply_patch(&patch);

        assert_eq!(u.name, "Ada L.");
        assert_eq!(u.email, "ada@example.com");
        assert_eq!(u.bio, None);
    }

    #[test]
    fn test_full_patch_restores_snapshot() {
        let original = user();
        let mut edited = original.clone();
        edited.name = "Someone".to_string();
        edited.avatar = Some("https://img".to_string());

        edited.apply_patch(&UserPatch::from(&original));
        assert_eq!(edited, original);
    }

    #[test]
    fn test_server_payload_without_connections() {
        let json = r#"{"id":"u2","name":"Bo","email":"bo@x.io","role":"admin",
                       "created_at":"2024-01-01T00:00:00Z","connections":null}"#;
        let parsed: User = serde_json::from_str(json).unwrap();
        assert!(parsed.connections.is_empty());
        assert_eq!(parsed.role, "admin");
    }
}
