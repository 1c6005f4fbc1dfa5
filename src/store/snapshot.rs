// Store snapshot - the immutable aggregate the UI reads and the coordinators transform
// `apply` never touches `self`; it returns the next snapshot

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::TempIdGenerator;
use crate::models::{
    Comment, CommentPatch, NetworkGraph, Post, PostPatch, Preferences, PreferencesPatch, User,
    UserPatch,
};

use super::derived;
use super::mutation::{PostPlacement, StoreMutation};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    current_user: Option<User>,
    users: Vec<User>,
    posts: Vec<Post>,
    /// Backs both the selected and the viewed post; always resolves against `posts`
    selected_post_id: Option<String>,
    network: NetworkGraph,
    is_loading: bool,
    error: Option<String>,
    preferences: Preferences,
}

impl StoreSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------------

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn post_position(&self, id: &str) -> Option<usize> {
        self.posts.iter().position(|p| p.id == id)
    }

    /// Post whose comment list contains `comment_id`
    pub fn post_with_comment(&self, comment_id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.comment(comment_id).is_some())
    }

    pub fn selected_post(&self) -> Option<&Post> {
        self.selected_post_id.as_deref().and_then(|id| self.post(id))
    }

    /// Detail-view pointer; the same canonical post as `selected_post`
    pub fn viewed_post(&self) -> Option<&Post> {
        self.selected_post()
    }

    pub fn selected_post_id(&self) -> Option<&str> {
        self.selected_post_id.as_deref()
    }

    pub fn network(&self) -> &NetworkGraph {
        &self.network
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Everything needed to put a post back exactly where it was
    pub fn post_placement(&self, id: &str) -> Option<PostPlacement> {
        let position = self.post_position(id)?;
        let node = self.network.node_position(id).map(|node_position| {
            let edges = self
                .network
                .edges()
                .iter()
                .enumerate()
                .filter(|(_, edge)| edge.touches(id))
                .map(|(pos, edge)| (pos, edge.clone()))
                .collect();
            crate::models::RemovedNode {
                position: node_position,
                node: self.network.nodes()[node_position].clone(),
                edges,
            }
        });
        Some(PostPlacement { position, node })
    }

    // ---------------------------------------------------------------------
    // Transitions
    // ---------------------------------------------------------------------

    /// Compute the snapshot that follows `mutation`
    pub fn apply(&self, mutation: StoreMutation) -> StoreSnapshot {
        let mut next = self.clone();
        next.mutate(mutation);
        next
    }

    pub(super) fn mutate(&mut self, mutation: StoreMutation) {
        match mutation {
            StoreMutation::SetUser(user) => self.set_user(user),
            StoreMutation::SetAllUsers(users) => self.set_all_users(users),
            StoreMutation::UpdateUser { id, patch } => self.update_user(&id, &patch),
            StoreMutation::SetAllPosts(posts) => self.set_all_posts(posts),
            StoreMutation::SetSelectedPost(id) => self.set_selected_post(id),
            StoreMutation::AddPost { post, placement } => self.add_post(post, placement),
            StoreMutation::UpdatePost { id, patch } => self.update_post(&id, &patch),
            StoreMutation::RemovePost { id } => self.remove_post(&id),
            StoreMutation::AddComment {
                post_id,
                comment,
                position,
            } => self.add_comment(&post_id, comment, position),
            StoreMutation::UpdateComment {
                post_id,
                comment_id,
                patch,
            } => self.update_comment(&post_id, &comment_id, &patch),
            StoreMutation::RemoveComment {
                post_id,
                comment_id,
            } => self.remove_comment(&post_id, &comment_id),
            StoreMutation::SetNetworkGraph(graph) => self.set_network_graph(graph),
            StoreMutation::SetPreferences(patch) => self.set_preferences(&patch),
            StoreMutation::SetLoading(loading) => self.is_loading = loading,
            StoreMutation::SetError(error) => self.error = error,
            StoreMutation::Hydrate(cached) => self.hydrate(*cached),
        }
    }

    fn set_user(&mut self, user: Option<User>) {
        self.current_user = user;
        let Some(current) = &self.current_user else {
            return;
        };
        let label = derived::author_label(&current.id, &self.users, Some(current));
        derived::relabel_author(&mut self.network, &self.posts, &current.id, &label);
    }

    fn set_all_users(&mut self, users: Vec<User>) {
        let mut unique: Vec<User> = Vec::with_capacity(users.len());
        for user in users {
            if !unique.iter().any(|u| u.id == user.id) {
                unique.push(user);
            }
        }
        self.users = unique;
        derived::relabel_all(
            &mut self.network,
            &self.posts,
            &self.users,
            self.current_user.as_ref(),
        );
    }

    fn update_user(&mut self, id: &str, patch: &UserPatch) {
        let mut found = false;
        if let Some(user) = self.users.iter_mut().find(|u| u.id == id) {
            user.apply_patch(patch);
            found = true;
        }
        if let Some(current) = self.current_user.as_mut().filter(|u| u.id == id) {
            current.apply_patch(patch);
            found = true;
        }
        if !found {
            debug!("update_user: no user {}", id);
            return;
        }
        if let Some(name) = &patch.name {
            derived::relabel_author(&mut self.network, &self.posts, id, name);
        }
    }

    fn set_all_posts(&mut self, posts: Vec<Post>) {
        let mut unique: Vec<Post> = Vec::with_capacity(posts.len());
        for post in posts {
            if !unique.iter().any(|p| p.id == post.id) {
                unique.push(post);
            }
        }
        self.posts = unique;
        let (added, removed) = derived::resync_graph(
            &mut self.network,
            &self.posts,
            &self.users,
            self.current_user.as_ref(),
        );
        debug!("set_all_posts: graph resync added {} removed {}", added, removed);

        let selection_gone = self
            .selected_post_id
            .as_deref()
            .map(|id| !self.posts.iter().any(|p| p.id == id))
            .unwrap_or(false);
        if selection_gone {
            self.selected_post_id = None;
        }
    }

    /// Replace the graph, then bring its node set back in line with the posts
    fn set_network_graph(&mut self, graph: NetworkGraph) {
        self.network = graph;
        let (added, removed) = derived::resync_graph(
            &mut self.network,
            &self.posts,
            &self.users,
            self.current_user.as_ref(),
        );
        if added + removed > 0 {
            debug!("set_network_graph: resync added {} removed {}", added, removed);
        }
    }

    fn set_selected_post(&mut self, id: Option<String>) {
        self.selected_post_id = id.filter(|id| self.posts.iter().any(|p| &p.id == id));
    }

    fn add_post(&mut self, post: Post, placement: Option<PostPlacement>) {
        if let Some(pos) = self.post_position(&post.id) {
            // Ids are unique: re-adding replaces in place.
            self.posts[pos] = post;
            let node = derived::derive_node(&self.posts[pos], &self.users, self.current_user.as_ref());
            self.network.upsert_node(node, None);
            return;
        }

        let (position, removed_node) = match placement {
            Some(placement) => (Some(placement.position), placement.node),
            None => (None, None),
        };

        match removed_node {
            Some(removed) => {
                self.network.upsert_node(removed.node, Some(removed.position));
                self.network.restore_edges(removed.edges);
            }
            None => {
                let node = derived::derive_node(&post, &self.users, self.current_user.as_ref());
                self.network.upsert_node(node, None);
            }
        }

        match position {
            Some(pos) if pos < self.posts.len() => self.posts.insert(pos, post),
            _ => self.posts.push(post),
        }
    }

    fn update_post(&mut self, id: &str, patch: &PostPatch) {
        let Some(pos) = self.post_position(id) else {
            debug!("update_post: no post {}", id);
            return;
        };
        let changes = self.posts[pos].apply_patch(patch);
        if changes.affects_graph() || !self.network.contains_node(id) {
            derived::refresh_node(
                &mut self.network,
                &self.posts[pos],
                &self.users,
                self.current_user.as_ref(),
                changes,
            );
        }
    }

    fn remove_post(&mut self, id: &str) {
        let Some(pos) = self.post_position(id) else {
            debug!("remove_post: no post {}", id);
            return;
        };
        self.posts.remove(pos);
        self.network.remove_node(id);
        if self.selected_post_id.as_deref() == Some(id) {
            self.selected_post_id = None;
        }
    }

    fn add_comment(&mut self, post_id: &str, comment: Comment, position: Option<usize>) {
        let Some(post) = self.posts.iter_mut().find(|p| p.id == post_id) else {
            debug!("add_comment: no post {}", post_id);
            return;
        };
        if let Some(existing) = post.comments_list.iter_mut().find(|c| c.id == comment.id) {
            *existing = comment;
            return;
        }
        match position {
            Some(pos) if pos < post.comments_list.len() => post.comments_list.insert(pos, comment),
            _ => post.comments_list.push(comment),
        }
        post.comments_count += 1;
    }

    fn update_comment(&mut self, post_id: &str, comment_id: &str, patch: &CommentPatch) {
        let comment = self
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .and_then(|p| p.comments_list.iter_mut().find(|c| c.id == comment_id));
        match comment {
            Some(comment) => comment.apply_patch(patch),
            None => debug!("update_comment: no comment {} on post {}", comment_id, post_id),
        }
    }

    fn remove_comment(&mut self, post_id: &str, comment_id: &str) {
        let Some(post) = self.posts.iter_mut().find(|p| p.id == post_id) else {
            debug!("remove_comment: no post {}", post_id);
            return;
        };
        let Some(pos) = post.comment_position(comment_id) else {
            debug!("remove_comment: no comment {} on post {}", comment_id, post_id);
            return;
        };
        post.comments_list.remove(pos);
        post.comments_count = post.comments_count.saturating_sub(1);
    }

    fn set_preferences(&mut self, patch: &PreferencesPatch) {
        self.preferences.apply_patch(patch);
    }

    fn hydrate(&mut self, cached: StoreSnapshot) {
        let is_loading = self.is_loading;
        let error = self.error.take();
        *self = cached;
        self.is_loading = is_loading;
        self.error = error;

        // Entities still waiting on the server when the snapshot was taken have no owner now
        let before = self.posts.len();
        self.posts.retain(|p| !TempIdGenerator::is_temporary(&p.id));
        let mut dropped = before - self.posts.len();
        for post in &mut self.posts {
            let before = post.comments_list.len();
            post.comments_list.retain(|c| !TempIdGenerator::is_temporary(&c.id));
            let gone = before - post.comments_list.len();
            post.comments_count = post.comments_count.saturating_sub(gone as u64);
            dropped += gone;
        }
        for user in self.users.iter_mut().chain(self.current_user.as_mut()) {
            let before = user.connections.len();
            user.connections.retain(|c| !TempIdGenerator::is_temporary(&c.id));
            dropped += before - user.connections.len();
        }
        if dropped > 0 {
            debug!("hydrate: dropped {} unconfirmed entities", dropped);
        }

        derived::resync_graph(
            &mut self.network,
            &self.posts,
            &self.users,
            self.current_user.as_ref(),
        );
        let selection = self.selected_post_id.take();
        self.set_selected_post(selection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, NetworkEdge, NetworkNode, UserConnection};
    use chrono::Utc;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", id),
            avatar: None,
            bio: None,
            subtitle: None,
            join_date: None,
            role: "user".to_string(),
            created_at: Utc::now(),
            connections: Vec::new(),
        }
    }

    fn post(id: &str, weight: f64) -> Post {
        Post {
            id: id.to_string(),
            author_id: "u1".to_string(),
            content: format!("post {}", id),
            created_at: Utc::now(),
            likes: 5,
            comments_count: 0,
            comments_list: Vec::new(),
            weight,
            tags: vec!["general".to_string()],
            edited: false,
        }
    }

    fn comment(id: &str, post_id: &str) -> Comment {
        Comment {
            id: id.to_string(),
            post_id: post_id.to_string(),
            author_id: "u1".to_string(),
            content: format!("comment {}", id),
            created_at: Utc::now(),
            author: None,
        }
    }

    fn seeded() -> StoreSnapshot {
        StoreSnapshot::new()
            .apply(StoreMutation::SetAllUsers(vec![user("u1", "Ada")]))
            .apply(StoreMutation::add_post(post("p1", 8.0)))
            .apply(StoreMutation::add_post(post("p2", 2.0)))
    }

    fn assert_pointers_coherent(state: &StoreSnapshot) {
        if let (Some(selected), Some(viewed)) = (state.selected_post(), state.viewed_post()) {
            assert_eq!(selected, viewed);
            assert_eq!(Some(selected), state.post(&selected.id));
        }
    }

    fn assert_graph_matches_posts(state: &StoreSnapshot) {
        assert_eq!(state.network().nodes().len(), state.posts().len());
        for p in state.posts() {
            assert!(state.network().contains_node(&p.id), "missing node {}", p.id);
        }
    }

    #[test]
    fn test_apply_leaves_previous_snapshot_untouched() {
        let before = seeded();
        let after = before.apply(StoreMutation::RemovePost { id: "p1".to_string() });
        assert!(before.post("p1").is_some());
        assert!(after.post("p1").is_none());
    }

    #[test]
    fn test_add_post_derives_node() {
        let state = seeded();
        let node = state.network().node("p1").unwrap();
        assert_eq!(node.label, "Ada");
        assert_eq!(node.value, 8.0);
        assert_eq!(node.group.as_deref(), Some("general"));
        assert_graph_matches_posts(&state);
    }

    #[test]
    fn test_select_uses_canonical_post_and_is_idempotent() {
        let state = seeded();
        let once = state.apply(StoreMutation::SetSelectedPost(Some("p1".to_string())));
        let twice = once.apply(StoreMutation::SetSelectedPost(Some("p1".to_string())));
        assert_eq!(once, twice);
        assert_eq!(once.selected_post().unwrap().content, "post p1");

        let unknown = once.apply(StoreMutation::SetSelectedPost(Some("nope".to_string())));
        assert!(unknown.selected_post().is_none());
        assert!(unknown.viewed_post().is_none());
    }

    #[test]
    fn test_weight_update_while_selected_updates_node() {
        let state = seeded()
            .apply(StoreMutation::SetSelectedPost(Some("p1".to_string())))
            .apply(StoreMutation::UpdatePost {
                id: "p1".to_string(),
                patch: PostPatch {
                    weight: Some(15.0),
                    ..PostPatch::default()
                },
            });

        assert_eq!(state.network().node("p1").unwrap().value, 15.0);
        assert_eq!(state.selected_post().unwrap().weight, 15.0);
        assert_eq!(state.viewed_post().unwrap().weight, 15.0);
        assert_pointers_coherent(&state);
    }

    #[test]
    fn test_update_keeps_comments_unless_replaced() {
        let state = seeded()
            .apply(StoreMutation::add_comment("p1", comment("c1", "p1")))
            .apply(StoreMutation::UpdatePost {
                id: "p1".to_string(),
                patch: PostPatch {
                    content: Some("new".to_string()),
                    ..PostPatch::default()
                },
            });
        let p1 = state.post("p1").unwrap();
        assert_eq!(p1.content, "new");
        assert_eq!(p1.comments_list.len(), 1);
    }

    #[test]
    fn test_remove_post_prunes_node_edges_and_selection() {
        let state = seeded()
            .apply(StoreMutation::SetNetworkGraph(NetworkGraph::new(
                vec![
                    NetworkNode { id: "p1".into(), label: "Ada".into(), value: 8.0, group: None },
                    NetworkNode { id: "p2".into(), label: "Ada".into(), value: 2.0, group: None },
                ],
                vec![NetworkEdge { from: "p1".into(), to: "p2".into(), value: 1.0, title: None }],
            )))
            .apply(StoreMutation::SetSelectedPost(Some("p1".to_string())));

        let placement = state.post_placement("p1").unwrap();
        let removed = state.apply(StoreMutation::RemovePost { id: "p1".to_string() });
        assert!(removed.network().node("p1").is_none());
        assert!(removed.network().edges().is_empty());
        assert!(removed.selected_post().is_none());
        assert_graph_matches_posts(&removed);

        // Re-adding with the recorded placement restores order, node and edges.
        let restored = removed.apply(StoreMutation::AddPost {
            post: state.post("p1").unwrap().clone(),
            placement: Some(placement),
        });
        assert_eq!(restored.posts(), state.posts());
        assert_eq!(restored.network(), state.network());
    }

    #[test]
    fn test_comment_count_tracks_list() {
        let mut state = seeded();
        for id in ["c1", "c2", "c3"] {
            state = state.apply(StoreMutation::add_comment("p1", comment(id, "p1")));
        }
        state = state.apply(StoreMutation::UpdateComment {
            post_id: "p1".to_string(),
            comment_id: "c2".to_string(),
            patch: CommentPatch {
                content: Some("edited".to_string()),
                author: None,
            },
        });
        state = state.apply(StoreMutation::RemoveComment {
            post_id: "p1".to_string(),
            comment_id: "c1".to_string(),
        });
        // Removing an unknown comment changes nothing.
        state = state.apply(StoreMutation::RemoveComment {
            post_id: "p1".to_string(),
            comment_id: "c1".to_string(),
        });

        let p1 = state.post("p1").unwrap();
        assert_eq!(p1.comments_count, 2);
        assert_eq!(p1.comments_list.len(), 2);
        assert_eq!(p1.comment("c2").unwrap().content, "edited");
    }

    #[test]
    fn test_comment_count_clamps_at_zero() {
        let mut p = post("p9", 1.0);
        p.comments_list = vec![comment("c1", "p9")];
        p.comments_count = 0;
        let state = StoreSnapshot::new()
            .apply(StoreMutation::add_post(p))
            .apply(StoreMutation::RemoveComment {
                post_id: "p9".to_string(),
                comment_id: "c1".to_string(),
            });
        assert_eq!(state.post("p9").unwrap().comments_count, 0);
    }

    #[test]
    fn test_update_user_updates_current_and_labels() {
        let state = seeded()
            .apply(StoreMutation::SetUser(Some(user("u1", "Ada"))))
            .apply(StoreMutation::UpdateUser {
                id: "u1".to_string(),
                patch: UserPatch {
                    name: Some("Ada Lovelace".to_string()),
                    ..UserPatch::default()
                },
            });
        assert_eq!(state.current_user().unwrap().name, "Ada Lovelace");
        assert_eq!(state.user("u1").unwrap().name, "Ada Lovelace");
        assert_eq!(state.network().node("p1").unwrap().label, "Ada Lovelace");

        let unchanged = state.apply(StoreMutation::UpdateUser {
            id: "ghost".to_string(),
            patch: UserPatch::default(),
        });
        assert_eq!(unchanged, state);
    }

    #[test]
    fn test_set_all_posts_resyncs_graph_and_clears_stale_selection() {
        let state = seeded()
            .apply(StoreMutation::SetSelectedPost(Some("p2".to_string())))
            .apply(StoreMutation::SetAllPosts(vec![post("p1", 8.0), post("p3", 1.0)]));
        assert_graph_matches_posts(&state);
        assert!(state.selected_post().is_none());
    }

    #[test]
    fn test_hydrate_keeps_flags() {
        let cached = seeded().apply(StoreMutation::SetLoading(true));
        let live = StoreSnapshot::new().apply(StoreMutation::SetError(Some("boom".to_string())));
        let state = live.apply(StoreMutation::Hydrate(Box::new(cached)));
        assert_eq!(state.posts().len(), 2);
        assert!(!state.is_loading());
        assert_eq!(state.error(), Some("boom"));
    }

    #[test]
    fn test_snapshot_serializes_plainly() {
        let state = seeded().apply(StoreMutation::SetSelectedPost(Some("p1".to_string())));
        let json = serde_json::to_string(&state).unwrap();
        let back: StoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.network().node_position("p2"), Some(1));
    }

    #[test]
    fn test_set_user_relabels_authored_nodes() {
        let state = StoreSnapshot::new()
            .apply(StoreMutation::SetUser(Some(user("u1", "Ada"))))
            .apply(StoreMutation::add_post(post("p1", 8.0)))
            .apply(StoreMutation::UpdateUser {
                id: "u1".to_string(),
                patch: UserPatch {
                    name: Some("Eve".to_string()),
                    ..UserPatch::default()
                },
            });
        assert_eq!(state.network().node("p1").unwrap().label, "Eve");

        let restored = state.apply(StoreMutation::SetUser(Some(user("u1", "Ada"))));
        assert_eq!(restored.current_user().unwrap().name, "Ada");
        assert_eq!(restored.network().node("p1").unwrap().label, "Ada");
    }

    #[test]
    fn test_set_network_graph_follows_posts() {
        let stale = NetworkGraph::new(
            vec![
                NetworkNode { id: "p1".into(), label: "Ada".into(), value: 1.0, group: None },
                NetworkNode { id: "gone".into(), label: "Ada".into(), value: 1.0, group: None },
            ],
            vec![
                NetworkEdge { from: "p1".into(), to: "gone".into(), value: 1.0, title: None },
                NetworkEdge { from: "p1".into(), to: "p2".into(), value: 2.0, title: None },
            ],
        );
        let state = seeded().apply(StoreMutation::SetNetworkGraph(stale));

        assert_graph_matches_posts(&state);
        assert_eq!(state.network().node("p1").unwrap().value, 8.0);
        assert!(state.network().contains_node("p2"));
        assert_eq!(state.network().edges().len(), 1);
        assert_eq!(state.network().edges()[0].value, 2.0);
    }

    #[test]
    fn test_hydrate_drops_unconfirmed_entities() {
        let pending = post("temp-1-0000abcd", 3.0);
        let mut me = user("u1", "Ada");
        me.connections = vec![UserConnection {
            id: "temp-3-0000abcd".to_string(),
            user_id: "u1".to_string(),
            connected_user_id: "u2".to_string(),
            status: ConnectionStatus::Pending,
            created_at: Utc::now(),
        }];
        let cached = seeded()
            .apply(StoreMutation::SetUser(Some(me)))
            .apply(StoreMutation::add_post(pending))
            .apply(StoreMutation::add_comment("p1", comment("c1", "p1")))
            .apply(StoreMutation::add_comment("p1", comment("temp-2-0000abcd", "p1")))
            .apply(StoreMutation::SetSelectedPost(Some("temp-1-0000abcd".to_string())));

        let state = StoreSnapshot::new().apply(StoreMutation::Hydrate(Box::new(cached)));
        let ids: Vec<&str> = state.posts().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        let p1 = state.post("p1").unwrap();
        assert_eq!(p1.comments_count, 1);
        assert!(p1.comment("c1").is_some());
        assert!(state.current_user().unwrap().connections.is_empty());
        assert!(state.selected_post().is_none());
        assert_graph_matches_posts(&state);
    }
}
