use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::patch::{null_as_default, nullable};

/// User-generated post. Wire field names follow the stored-procedure payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: u64,
    /// Equals `comments_list.len()` whenever the list is populated
    #[serde(rename = "comments", default)]
    pub comments_count: u64,
    #[serde(rename = "commentsList", default, deserialize_with = "null_as_default")]
    pub comments_list: Vec<Comment>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub edited: bool,
}

/// Minimal author card embedded in comments for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentAuthor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    #[serde(rename = "user_id")]
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<CommentAuthor>,
}

/// Field-level changes to a post; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPatch {
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(rename = "comments", default, skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<u64>,
    #[serde(rename = "commentsList", default, skip_serializing_if = "Option::is_none")]
    pub comments_list: Option<Vec<Comment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
}

/// Which visualization inputs a patch actually changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostChanges {
    pub author: bool,
    pub weight: bool,
    pub tags: bool,
}

impl PostChanges {
    pub fn affects_graph(&self) -> bool {
        self.author || self.weight || self.tags
    }
}

impl From<&Post> for PostPatch {
    /// Full-value patch, used to restore a snapshot exactly
    fn from(post: &Post) -> Self {
        Self {
            author_id: Some(post.author_id.clone()),
            content: Some(post.content.clone()),
            created_at: Some(post.created_at),
            likes: Some(post.likes),
            comments_count: Some(post.comments_count),
            comments_list: Some(post.comments_list.clone()),
            weight: Some(post.weight),
            tags: Some(post.tags.clone()),
            edited: Some(post.edited),
        }
    }
}

impl Post {
    pub fn apply_patch(&mut self, patch: &PostPatch) -> PostChanges {
        let mut changes = PostChanges::default();

        if let Some(author_id) = &patch.author_id {
            changes.author = *author_id != self.author_id;
            self.author_id = author_id.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
        if let Some(likes) = patch.likes {
            self.likes = likes;
        }
        if let Some(count) = patch.comments_count {
            self.comments_count = count;
        }
        if let Some(list) = &patch.comments_list {
            self.comments_list = list.clone();
        }
        if let Some(weight) = patch.weight {
            changes.weight = weight != self.weight;
            self.weight = weight;
        }
        if let Some(tags) = &patch.tags {
            changes.tags = tags.first() != self.tags.first();
            self.tags = tags.clone();
        }
        if let Some(edited) = patch.edited {
            self.edited = edited;
        }

        changes
    }

    /// First tag, used as the visualization group
    pub fn group(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments_list.iter().find(|c| c.id == comment_id)
    }

    pub fn comment_position(&self, comment_id: &str) -> Option<usize> {
        self.comments_list.iter().position(|c| c.id == comment_id)
    }
}

/// Field-level changes to a comment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub author: Option<Option<CommentAuthor>>,
}

impl From<&Comment> for CommentPatch {
    fn from(comment: &Comment) -> Self {
        Self {
            content: Some(comment.content.clone()),
            author: Some(comment.author.clone()),
        }
    }
}

impl Comment {
    pub fn apply_patch(&mut self, patch: &CommentPatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(author) = &patch.author {
            self.author = author.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Post {
        Post {
            id: "p1".to_string(),
            author_id: "u1".to_string(),
            content: "hello".to_string(),
            created_at: Utc::now(),
            likes: 5,
            comments_count: 0,
            comments_list: Vec::new(),
            weight: 8.0,
            tags: vec!["rust".to_string()],
            edited: false,
        }
    }

    #[test]
    fn test_server_post_defaults_missing_comments_list() {
        let json = r#"{"id":"post-42","user_id":"u1","content":"x",
                       "created_at":"2024-05-01T10:00:00Z","likes":0,"comments":0,"weight":1}"#;
        let parsed: Post = serde_json::from_str(json).unwrap();
        assert!(parsed.comments_list.is_empty());
        assert!(parsed.tags.is_empty());
        assert!(!parsed.edited);
    }

    #[test]
    fn test_patch_reports_graph_changes() {
        let mut p = post();
        let changes = p.apply_patch(&PostPatch {
            content: Some("edited".to_string()),
            ..PostPatch::default()
        });
        assert!(!changes.affects_graph());

        let changes = p.apply_patch(&PostPatch {
            weight: Some(15.0),
            tags: Some(vec!["rust".to_string(), "graphs".to_string()]),
            ..PostPatch::default()
        });
        assert!(changes.weight);
        assert!(!changes.tags, "first tag unchanged");
        assert_eq!(p.weight, 15.0);
    }

    #[test]
    fn test_full_patch_restores_snapshot() {
        let original = post();
        let mut edited = original.clone();
        edited.content = "changed".to_string();
        edited.edited = true;
        edited.likes = 99;

        edited.apply_patch(&PostPatch::from(&original));
        assert_eq!(edited, original);
    }
}
