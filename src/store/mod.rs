// State Container - single shared store of users, posts, graph and preferences
// Every mutation swaps in a fresh snapshot under the channel's write lock

pub mod derived;
pub mod mutation;
pub mod snapshot;

pub use mutation::{PostPlacement, StoreMutation};
pub use snapshot::StoreSnapshot;

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{
    Comment, CommentPatch, NetworkGraph, Post, PostPatch, PreferencesPatch, User, UserPatch,
};

/// Cloneable handle to the store. Readers take cheap `Arc` snapshots; writers go
/// through `dispatch` or `transact`.
#[derive(Clone)]
pub struct Store {
    sender: Arc<watch::Sender<Arc<StoreSnapshot>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Store")
            .field("users", &snapshot.users().len())
            .field("posts", &snapshot.posts().len())
            .field("is_loading", &snapshot.is_loading())
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_snapshot(StoreSnapshot::new())
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        let (sender, _) = watch::channel(Arc::new(snapshot));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current state. The returned snapshot never changes underneath the caller.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.sender.borrow().clone()
    }

    /// Change notifications for views; fires only when a transition changed state
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, mutation: StoreMutation) -> Arc<StoreSnapshot> {
        self.dispatch_all(vec![mutation])
    }

    /// Apply several mutations as one transition; observers see either none or all
    pub fn dispatch_all(&self, mutations: Vec<StoreMutation>) -> Arc<StoreSnapshot> {
        let result: AppResult<()> = self.transact(|_| Ok((mutations, ())));
        if let Err(e) = result {
            debug!("dispatch failed: {}", e);
        }
        self.snapshot()
    }

    /// Read the current snapshot and derive the mutations to apply, atomically.
    /// If `plan` fails nothing is applied and the error is returned.
    pub fn transact<T, F>(&self, plan: F) -> AppResult<T>
    where
        F: FnOnce(&StoreSnapshot) -> AppResult<(Vec<StoreMutation>, T)>,
    {
        let mut outcome: Option<AppResult<T>> = None;

        self.sender.send_if_modified(|current| match plan(&**current) {
            Ok((mutations, value)) => {
                outcome = Some(Ok(value));
                if mutations.is_empty() {
                    return false;
                }
                let operations: Vec<&'static str> =
                    mutations.iter().map(StoreMutation::operation_type).collect();
                let mut next = (**current).clone();
                for mutation in mutations {
                    next.mutate(mutation);
                }
                if next == **current {
                    debug!("store: {:?} changed nothing", operations);
                    return false;
                }
                debug!("store: applied {:?}", operations);
                *current = Arc::new(next);
                true
            }
            Err(e) => {
                outcome = Some(Err(e));
                false
            }
        });

        outcome.unwrap_or_else(|| Err(AppError::Internal("store transition did not run".to_string())))
    }

    // ---------------------------------------------------------------------
    // Named mutations
    // ---------------------------------------------------------------------

    pub fn set_user(&self, user: Option<User>) {
        self.dispatch(StoreMutation::SetUser(user));
    }

    pub fn set_all_users(&self, users: Vec<User>) {
        self.dispatch(StoreMutation::SetAllUsers(users));
    }

    pub fn update_user(&self, id: impl Into<String>, patch: UserPatch) {
        self.dispatch(StoreMutation::UpdateUser {
            id: id.into(),
            patch,
        });
    }

    pub fn set_all_posts(&self, posts: Vec<Post>) {
        self.dispatch(StoreMutation::SetAllPosts(posts));
    }

    pub fn set_selected_post(&self, id: Option<String>) {
        self.dispatch(StoreMutation::SetSelectedPost(id));
    }

    pub fn add_post(&self, post: Post, placement: Option<PostPlacement>) {
        self.dispatch(StoreMutation::AddPost { post, placement });
    }

    pub fn update_post(&self, id: impl Into<String>, patch: PostPatch) {
        self.dispatch(StoreMutation::UpdatePost {
            id: id.into(),
            patch,
        });
    }

    pub fn remove_post(&self, id: impl Into<String>) {
        self.dispatch(StoreMutation::RemovePost { id: id.into() });
    }

    pub fn add_comment(&self, post_id: impl Into<String>, comment: Comment, position: Option<usize>) {
        self.dispatch(StoreMutation::AddComment {
            post_id: post_id.into(),
            comment,
            position,
        });
    }

    pub fn update_comment(
        &self,
        post_id: impl Into<String>,
        comment_id: impl Into<String>,
        patch: CommentPatch,
    ) {
        self.dispatch(StoreMutation::UpdateComment {
            post_id: post_id.into(),
            comment_id: comment_id.into(),
            patch,
        });
    }

    pub fn remove_comment(&self, post_id: impl Into<String>, comment_id: impl Into<String>) {
        self.dispatch(StoreMutation::RemoveComment {
            post_id: post_id.into(),
            comment_id: comment_id.into(),
        });
    }

    pub fn set_network_graph(&self, graph: NetworkGraph) {
        self.dispatch(StoreMutation::SetNetworkGraph(graph));
    }

    pub fn set_preferences(&self, patch: PreferencesPatch) {
        self.dispatch(StoreMutation::SetPreferences(patch));
    }

    pub fn set_loading(&self, loading: bool) {
        self.dispatch(StoreMutation::SetLoading(loading));
    }

    pub fn set_error(&self, error: Option<String>) {
        self.dispatch(StoreMutation::SetError(error));
    }

    pub fn hydrate(&self, cached: StoreSnapshot) {
        self.dispatch(StoreMutation::Hydrate(Box::new(cached)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            author_id: "u1".to_string(),
            content: "hello".to_string(),
            created_at: Utc::now(),
            likes: 0,
            comments_count: 0,
            comments_list: Vec::new(),
            weight: 1.0,
            tags: Vec::new(),
            edited: false,
        }
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let store = Store::new();
        store.add_post(post("p1"), None);
        let before = store.snapshot();
        store.remove_post("p1");

        assert_eq!(before.posts().len(), 1);
        assert!(store.snapshot().posts().is_empty());
    }

    #[test]
    fn test_transact_error_applies_nothing() {
        let store = Store::new();
        let result: AppResult<()> = store.transact(|_| {
            Err(AppError::NotFound("post p1".to_string()))
        });
        assert!(result.unwrap_err().is_not_found());
        assert!(store.snapshot().posts().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_only_see_real_changes() {
        let store = Store::new();
        store.add_post(post("p1"), None);
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.set_selected_post(Some("p1".to_string()));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // Same selection again is a no-op transition.
        store.set_selected_post(Some("p1".to_string()));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_dispatch_all_is_one_transition() {
        let store = Store::new();
        let mut rx = store.subscribe();
        store.dispatch_all(vec![
            StoreMutation::add_post(post("p1")),
            StoreMutation::add_post(post("p2")),
            StoreMutation::SetLoading(true),
        ]);
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.posts().len(), 2);
        assert!(seen.is_loading());
    }
}
