use crate::models::{
    Comment, CommentPatch, NetworkGraph, Post, PostPatch, PreferencesPatch, RemovedNode, User,
    UserPatch,
};

use super::snapshot::StoreSnapshot;

/// Where a removed post used to live, so re-adding it restores list order,
/// its node and its edges exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct PostPlacement {
    pub position: usize,
    pub node: Option<RemovedNode>,
}

/// The fixed set of state transitions the store accepts.
/// Each one maps the current snapshot to a fresh snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreMutation {
    SetUser(Option<User>),
    SetAllUsers(Vec<User>),
    UpdateUser {
        id: String,
        patch: UserPatch,
    },
    SetAllPosts(Vec<Post>),
    SetSelectedPost(Option<String>),
    AddPost {
        post: Post,
        placement: Option<PostPlacement>,
    },
    UpdatePost {
        id: String,
        patch: PostPatch,
    },
    RemovePost {
        id: String,
    },
    AddComment {
        post_id: String,
        comment: Comment,
        position: Option<usize>,
    },
    UpdateComment {
        post_id: String,
        comment_id: String,
        patch: CommentPatch,
    },
    RemoveComment {
        post_id: String,
        comment_id: String,
    },
    /// Wholesale replace; the node set is then re-synced with the posts
    SetNetworkGraph(NetworkGraph),
    SetPreferences(PreferencesPatch),
    SetLoading(bool),
    SetError(Option<String>),
    /// Restore a cached snapshot; loading and error flags are left as they are
    Hydrate(Box<StoreSnapshot>),
}

impl StoreMutation {
    pub fn operation_type(&self) -> &'static str {
        match self {
            StoreMutation::SetUser(_) => "set_user",
            StoreMutation::SetAllUsers(_) => "set_all_users",
            StoreMutation::UpdateUser { .. } => "update_user",
            StoreMutation::SetAllPosts(_) => "set_all_posts",
            StoreMutation::SetSelectedPost(_) => "set_selected_post",
            StoreMutation::AddPost { .. } => "add_post",
            StoreMutation::UpdatePost { .. } => "update_post",
            StoreMutation::RemovePost { .. } => "remove_post",
            StoreMutation::AddComment { .. } => "add_comment",
            StoreMutation::UpdateComment { .. } => "update_comment",
            StoreMutation::RemoveComment { .. } => "remove_comment",
            StoreMutation::SetNetworkGraph(_) => "set_network_graph",
            StoreMutation::SetPreferences(_) => "set_preferences",
            StoreMutation::SetLoading(_) => "set_loading",
            StoreMutation::SetError(_) => "set_error",
            StoreMutation::Hydrate(_) => "hydrate",
        }
    }

    pub fn add_post(post: Post) -> Self {
        StoreMutation::AddPost {
            post,
            placement: None,
        }
    }

    pub fn add_comment(post_id: impl Into<String>, comment: Comment) -> Self {
        StoreMutation::AddComment {
            post_id: post_id.into(),
            comment,
            position: None,
        }
    }
}
