// Typed mutation requests - one per coordinator operation
// Validation runs before anything touches the store

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::network::{NetworkEdge, NetworkNode};
use crate::error::{AppError, AppResult};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

const MAX_CONTENT_LEN: usize = 10_000;

fn validate_content(field: &str, content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::Validation(format!("{} cannot be empty", field)));
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(AppError::Validation(format!(
            "{} exceeds {} characters",
            field, MAX_CONTENT_LEN
        )));
    }
    Ok(())
}

fn validate_weight(weight: f64) -> AppResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(AppError::Validation(format!(
            "weight must be a non-negative number, got {}",
            weight
        )));
    }
    Ok(())
}

fn validate_id(field: &str, id: &str) -> AppResult<()> {
    if id.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPostRequest {
    pub content: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl NewPostRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_content("content", &self.content)?;
        if let Some(weight) = self.weight {
            validate_weight(weight)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostUpdateRequest {
    pub post_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl PostUpdateRequest {
    pub fn new(post_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            content: None,
            weight: None,
            tags: None,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        validate_id("post_id", &self.post_id)?;
        if self.content.is_none() && self.weight.is_none() && self.tags.is_none() {
            return Err(AppError::Validation("update changes no fields".to_string()));
        }
        if let Some(content) = &self.content {
            validate_content("content", content)?;
        }
        if let Some(weight) = self.weight {
            validate_weight(weight)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommentRequest {
    pub post_id: String,
    pub content: String,
}

impl NewCommentRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_id("post_id", &self.post_id)?;
        validate_content("comment", &self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentUpdateRequest {
    pub comment_id: String,
    pub content: String,
}

impl CommentUpdateRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_id("comment_id", &self.comment_id)?;
        validate_content("comment", &self.content)
    }
}

/// Profile edit. `Some("")` for an optional field clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdateRequest {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
}

impl UserUpdateRequest {
    pub fn validate(&self) -> AppResult<()> {
        validate_id("user_id", &self.user_id)?;
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("name cannot be empty".to_string()));
            }
        }
        if let Some(email) = &self.email {
            if !EMAIL_PATTERN.is_match(email) {
                return Err(AppError::Validation(format!("invalid email address: {}", email)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub connected_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptConnectionRequest {
    /// The user who sent the pending request
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDataUpdateRequest {
    #[serde(default)]
    pub nodes: Vec<NetworkNode>,
    #[serde(default)]
    pub edges: Vec<NetworkEdge>,
}

impl NetworkDataUpdateRequest {
    pub fn validate(&self) -> AppResult<()> {
        for edge in &self.edges {
            let known = |id: &str| self.nodes.iter().any(|n| n.id == id);
            if !known(&edge.from) || !known(&edge.to) {
                return Err(AppError::Validation(format!(
                    "edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_update_requires_a_field() {
        let err = PostUpdateRequest::new("p1").validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(PostUpdateRequest::new("p1").weight(15.0).validate().is_ok());
        assert!(PostUpdateRequest::new("p1").weight(-1.0).validate().is_err());
        assert!(PostUpdateRequest::new("p1").content("  ").validate().is_err());
    }

    #[test]
    fn test_user_email_validation() {
        let mut request = UserUpdateRequest {
            user_id: "u1".to_string(),
            email: Some("not-an-email".to_string()),
            ..UserUpdateRequest::default()
        };
        assert!(request.validate().is_err());

        request.email = Some("ada@example.com".to_string());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_network_update_rejects_dangling_edges() {
        let request = NetworkDataUpdateRequest {
            nodes: vec![NetworkNode {
                id: "a".to_string(),
                label: "A".to_string(),
                value: 1.0,
                group: None,
            }],
            edges: vec![NetworkEdge {
                from: "a".to_string(),
                to: "b".to_string(),
                value: 1.0,
                title: None,
            }],
        };
        assert!(request.validate().is_err());
    }
}
