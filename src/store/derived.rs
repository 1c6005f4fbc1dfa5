// Derived-view maintenance - keeps network nodes in step with posts and their authors
// The graph is never the source of truth; these helpers only patch it from post data

use crate::models::{NetworkGraph, NetworkNode, Post, PostChanges, User};

pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Display name for an author id, looked up in the loaded users then the current user
pub fn author_label(author_id: &str, users: &[User], current_user: Option<&User>) -> String {
    users
        .iter()
        .chain(current_user)
        .find(|user| user.id == author_id)
        .map(|user| user.name.clone())
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
}

pub fn derive_node(post: &Post, users: &[User], current_user: Option<&User>) -> NetworkNode {
    NetworkNode {
        id: post.id.clone(),
        label: author_label(&post.author_id, users, current_user),
        value: post.weight,
        group: post.group().map(str::to_string),
    }
}

/// Patch the single node backing `post`. Only the fields named in `changes` are
/// recomputed; a missing node is derived from scratch.
pub fn refresh_node(
    graph: &mut NetworkGraph,
    post: &Post,
    users: &[User],
    current_user: Option<&User>,
    changes: PostChanges,
) {
    let label = changes
        .author
        .then(|| author_label(&post.author_id, users, current_user));

    match graph.node_mut(&post.id) {
        Some(node) => {
            if let Some(label) = label {
                node.label = label;
            }
            if changes.weight {
                node.value = post.weight;
            }
            if changes.tags {
                node.group = post.group().map(str::to_string);
            }
        }
        None => graph.upsert_node(derive_node(post, users, current_user), None),
    }
}

/// An author was renamed: relabel the nodes of their posts
pub fn relabel_author(graph: &mut NetworkGraph, posts: &[Post], author_id: &str, name: &str) -> usize {
    let mut relabeled = 0;
    for post in posts.iter().filter(|p| p.author_id == author_id) {
        if let Some(node) = graph.node_mut(&post.id) {
            if node.label != name {
                node.label = name.to_string();
                relabeled += 1;
            }
        }
    }
    relabeled
}

/// After a bulk user refresh: resolve labels for every post whose author is loaded
pub fn relabel_all(
    graph: &mut NetworkGraph,
    posts: &[Post],
    users: &[User],
    current_user: Option<&User>,
) {
    for post in posts {
        let label = author_label(&post.author_id, users, current_user);
        if label == UNKNOWN_AUTHOR {
            continue;
        }
        if let Some(node) = graph.node_mut(&post.id) {
            node.label = label;
        }
    }
}

/// Recompute a node's value and group from its post. The label is only replaced
/// when the author resolves, so a server-supplied name survives until users load.
fn sync_node(node: &mut NetworkNode, post: &Post, users: &[User], current_user: Option<&User>) {
    let label = author_label(&post.author_id, users, current_user);
    if label != UNKNOWN_AUTHOR {
        node.label = label;
    }
    node.value = post.weight;
    node.group = post.group().map(str::to_string);
}

/// After a bulk post refresh or a graph replace: refresh nodes that still have a
/// post, derive the missing ones, drop orphans together with their edges.
pub fn resync_graph(
    graph: &mut NetworkGraph,
    posts: &[Post],
    users: &[User],
    current_user: Option<&User>,
) -> (usize, usize) {
    let mut added = 0;
    for post in posts {
        match graph.node_mut(&post.id) {
            Some(node) => sync_node(node, post, users, current_user),
            None => {
                graph.upsert_node(derive_node(post, users, current_user), None);
                added += 1;
            }
        }
    }
    // Edges into freshly derived nodes survive the prune.
    let removed = graph.retain_nodes(|node| posts.iter().any(|p| p.id == node.id));
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn post(id: &str, author: &str, weight: f64) -> Post {
        Post {
            id: id.to_string(),
            author_id: author.to_string(),
            content: "c".to_string(),
            created_at: Utc::now(),
            likes: 0,
            comments_count: 0,
            comments_list: Vec::new(),
            weight,
            tags: vec!["science".to_string()],
            edited: false,
        }
    }

    #[test]
    fn test_derive_node_uses_author_and_first_tag() {
        let users = vec![user("u1", "Ada")];
        let node = derive_node(&post("p1", "u1", 3.0), &users, None);
        assert_eq!(node.label, "Ada");
        assert_eq!(node.value, 3.0);
        assert_eq!(node.group.as_deref(), Some("science"));

        let orphan = derive_node(&post("p2", "ghost", 1.0), &users, None);
        assert_eq!(orphan.label, UNKNOWN_AUTHOR);
    }

    #[test]
    fn test_current_user_resolves_label() {
        let me = user("me", "Grace");
        assert_eq!(author_label("me", &[], Some(&me)), "Grace");
    }

    #[test]
    fn test_resync_adds_and_prunes() {
        let users = vec![user("u1", "Ada")];
        let posts = vec![post("p1", "u1", 1.0), post("p2", "u1", 2.0)];
        let mut graph = NetworkGraph::new(
            vec![derive_node(&post("stale", "u1", 1.0), &users, None)],
            Vec::new(),
        );

        let (added, removed) = resync_graph(&mut graph, &posts, &users, None);
        assert_eq!((added, removed), (2, 1));
        assert!(graph.contains_node("p1"));
        assert!(graph.contains_node("p2"));
        assert!(!graph.contains_node("stale"));
    }

    #[test]
    fn test_resync_refreshes_existing_nodes() {
        let users = vec![user("u1", "Ada")];
        let mut graph = NetworkGraph::new(
            vec![derive_node(&post("p1", "u1", 8.0), &users, None)],
            Vec::new(),
        );
        let mut refreshed = post("p1", "u2", 15.0);
        refreshed.tags = vec!["history".to_string()];

        let renamed = vec![user("u1", "Ada"), user("u2", "Grace")];
        let (added, removed) = resync_graph(&mut graph, &[refreshed], &renamed, None);
        assert_eq!((added, removed), (0, 0));
        let node = graph.node("p1").unwrap();
        assert_eq!(node.value, 15.0);
        assert_eq!(node.group.as_deref(), Some("history"));
        assert_eq!(node.label, "Grace");
    }

    #[test]
    fn test_resync_keeps_label_until_author_is_known() {
        let mut graph = NetworkGraph::new(
            vec![NetworkNode {
                id: "p1".to_string(),
                label: "Ada".to_string(),
                value: 1.0,
                group: None,
            }],
            Vec::new(),
        );
        resync_graph(&mut graph, &[post("p1", "u1", 3.0)], &[], None);
        let node = graph.node("p1").unwrap();
        assert_eq!(node.label, "Ada");
        assert_eq!(node.value, 3.0);
    }
}
