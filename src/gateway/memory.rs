// In-memory stored-procedure backend - serves the procedures from process memory
// Used by the demo server and tests; responses can be scripted per procedure

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use super::params::{
    AcceptConnectionParams, AddCommentParams, AddPostParams, CommentRefParams,
    ConnectedUserParams, GetPostParams, GetPreferencesParams, GetUserParams, PostRefParams,
    UpdateCommentParams, UpdateNetworkDataParams, UpdatePostParams, UpdatePreferencesParams,
    UpdateUserParams,
};
use super::{Procedure, RemoteProcedureGateway, RpcResponse};
use crate::error::{AppError, AppResult};
use crate::models::{
    Comment, ConnectionStatus, NetworkEdge, NetworkGraph, NetworkNode, Post, Preferences,
    PreferencesPatch, User, UserConnection,
};

#[derive(Debug, Default)]
struct BackendState {
    users: Vec<User>,
    posts: Vec<Post>,
    network: NetworkGraph,
    preferences: HashMap<String, Preferences>,
}

impl BackendState {
    fn author_name(&self, user_id: &str) -> String {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn user_mut(&mut self, user_id: &str) -> AppResult<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    fn post_mut(&mut self, post_id: &str) -> AppResult<&mut Post> {
        self.posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))
    }

    fn comment_location(&self, comment_id: &str) -> Option<(usize, usize)> {
        self.posts.iter().enumerate().find_map(|(post_pos, post)| {
            post.comment_position(comment_id)
                .map(|comment_pos| (post_pos, comment_pos))
        })
    }
}

/// Stored-procedure backend held in memory
#[derive(Debug)]
pub struct InMemoryGateway {
    state: RwLock<BackendState>,
    current_user_id: String,
    next_id: AtomicU64,
    scripted: Mutex<HashMap<Procedure, VecDeque<RpcResponse>>>,
    calls: Mutex<Vec<Procedure>>,
    latency: Duration,
}

impl InMemoryGateway {
    /// Empty backend acting on behalf of `current_user_id`
    pub fn new(current_user_id: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(BackendState::default()),
            current_user_id: current_user_id.into(),
            next_id: AtomicU64::new(100),
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Small social network signed in as `user-001`
    pub fn seeded() -> Self {
        let joined = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).single().unwrap_or_else(Utc::now);
        let user = |id: &str, name: &str, role: &str| User {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            avatar: None,
            bio: None,
            subtitle: None,
            join_date: Some(joined.format("%Y-%m-%d").to_string()),
            role: role.to_string(),
            created_at: joined,
            connections: Vec::new(),
        };

        let mut john = user("user-001", "John Doe", "admin");
        john.bio = Some("Researching civic technology".to_string());
        john.connections = vec![UserConnection {
            id: "conn-001".to_string(),
            user_id: "user-003".to_string(),
            connected_user_id: "user-001".to_string(),
            status: ConnectionStatus::Pending,
            created_at: joined,
        }];
        let users = vec![
            john,
            user("user-002", "Jane Smith", "moderator"),
            user("user-003", "Robert Johnson", "user"),
        ];

        let post = |id: &str, author: &str, content: &str, likes: u64, weight: f64, tags: &[&str]| Post {
            id: id.to_string(),
            author_id: author.to_string(),
            content: content.to_string(),
            created_at: joined,
            likes,
            comments_count: 0,
            comments_list: Vec::new(),
            weight,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            edited: false,
        };
        let mut first = post(
            "post-001",
            "user-001",
            "Digital participation is reshaping local democracy.",
            24,
            8.0,
            &["research", "civic engagement"],
        );
        first.comments_list = vec![Comment {
            id: "comment-001".to_string(),
            post_id: "post-001".to_string(),
            author_id: "user-002".to_string(),
            content: "Great summary of the field.".to_string(),
            created_at: joined,
            author: None,
        }];
        first.comments_count = 1;
        let posts = vec![
            first,
            post("post-002", "user-002", "Community moderation notes for this week.", 18, 5.0, &["community"]),
            post("post-003", "user-003", "Open data sets worth exploring.", 7, 3.0, &["data", "research"]),
        ];

        let nodes = posts
            .iter()
            .map(|p| NetworkNode {
                id: p.id.clone(),
                label: users
                    .iter()
                    .find(|u| u.id == p.author_id)
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                value: p.weight,
                group: p.group().map(str::to_string),
            })
            .collect();
        let edges = vec![
            NetworkEdge {
                from: "post-001".to_string(),
                to: "post-003".to_string(),
                value: 2.0,
                title: Some("research".to_string()),
            },
            NetworkEdge {
                from: "post-002".to_string(),
                to: "post-001".to_string(),
                value: 1.0,
                title: None,
            },
        ];

        Self::new("user-001")
            .with_users(users)
            .with_posts(posts)
            .with_network(NetworkGraph::new(nodes, edges))
    }

    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.state.get_mut().users = users;
        self
    }

    pub fn with_posts(mut self, posts: Vec<Post>) -> Self {
        self.state.get_mut().posts = posts;
        self
    }

    pub fn with_network(mut self, network: NetworkGraph) -> Self {
        self.state.get_mut().network = network;
        self
    }

    /// Delay applied to every call before it is served
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    /// Return `response` for the next call of `procedure` instead of serving it
    pub async fn script(&self, procedure: Procedure, response: RpcResponse) {
        self.scripted
            .lock()
            .await
            .entry(procedure)
            .or_default()
            .push_back(response);
    }

    pub async fn fail_next(&self, procedure: Procedure, message: impl Into<String>) {
        self.script(procedure, RpcResponse::failure(message)).await;
    }

    pub async fn calls(&self) -> Vec<Procedure> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, procedure: Procedure) -> usize {
        self.calls.lock().await.iter().filter(|p| **p == procedure).count()
    }

    pub async fn server_post(&self, post_id: &str) -> Option<Post> {
        self.state.read().await.posts.iter().find(|p| p.id == post_id).cloned()
    }

    pub async fn server_user(&self, user_id: &str) -> Option<User> {
        self.state.read().await.users.iter().find(|u| u.id == user_id).cloned()
    }

    fn issue_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn take_scripted(&self, procedure: Procedure) -> Option<RpcResponse> {
        self.scripted
            .lock()
            .await
            .get_mut(&procedure)
            .and_then(VecDeque::pop_front)
    }

    async fn serve(&self, procedure: Procedure, params: Value) -> AppResult<Value> {
        if procedure.is_read() {
            let state = self.state.read().await;
            return self.serve_read(&state, procedure, params);
        }
        let mut state = self.state.write().await;
        self.serve_write(&mut state, procedure, params)
    }

    fn serve_read(&self, state: &BackendState, procedure: Procedure, params: Value) -> AppResult<Value> {
        match procedure {
            Procedure::GetUser => {
                let p: GetUserParams = parse(procedure, params)?;
                let user = state
                    .users
                    .iter()
                    .find(|u| u.id == p.user_id)
                    .ok_or_else(|| AppError::NotFound(format!("User {} not found", p.user_id)))?;
                Ok(serde_json::to_value(user)?)
            }
            Procedure::GetUsers => Ok(serde_json::to_value(&state.users)?),
            Procedure::GetPosts => Ok(serde_json::to_value(&state.posts)?),
            Procedure::GetPost => {
                let p: GetPostParams = parse(procedure, params)?;
                let post = state
                    .posts
                    .iter()
                    .find(|post| post.id == p.post_id)
                    .ok_or_else(|| AppError::NotFound(format!("Post {} not found", p.post_id)))?;
                Ok(serde_json::to_value(post)?)
            }
            Procedure::GetNetworkData => Ok(serde_json::to_value(&state.network)?),
            Procedure::GetUserPreferences => {
                let p: GetPreferencesParams = parse(procedure, params)?;
                let user_id = p.p_user_id.unwrap_or_else(|| self.current_user_id.clone());
                let prefs = state.preferences.get(&user_id).copied().unwrap_or_default();
                Ok(serde_json::to_value(prefs)?)
            }
            other => Err(AppError::Internal(format!("{} is not a read procedure", other))),
        }
    }

    fn serve_write(
        &self,
        state: &mut BackendState,
        procedure: Procedure,
        params: Value,
    ) -> AppResult<Value> {
        match procedure {
            Procedure::UpdateUser => {
                let p: UpdateUserParams = parse(procedure, params)?;
                let user = state.user_mut(&p.p_user_id)?;
                if let Some(name) = p.p_name {
                    user.name = name;
                }
                if let Some(email) = p.p_email {
                    user.email = email;
                }
                if let Some(avatar) = p.p_avatar {
                    user.avatar = Some(avatar).filter(|a| !a.is_empty());
                }
                if let Some(bio) = p.p_bio {
                    user.bio = Some(bio).filter(|b| !b.is_empty());
                }
                if let Some(subtitle) = p.p_subtitle {
                    user.subtitle = Some(subtitle).filter(|s| !s.is_empty());
                }
                let user = user.clone();
                let label = user.name.clone();
                for post in state.posts.iter().filter(|p| p.author_id == user.id) {
                    if let Some(node) = state.network.node_mut(&post.id) {
                        node.label = label.clone();
                    }
                }
                Ok(serde_json::to_value(user)?)
            }
            Procedure::AddPost => {
                let p: AddPostParams = parse(procedure, params)?;
                let post = Post {
                    id: self.issue_id("post"),
                    author_id: self.current_user_id.clone(),
                    content: p.p_content,
                    created_at: Utc::now(),
                    likes: 0,
                    comments_count: 0,
                    comments_list: Vec::new(),
                    weight: p.p_weight.unwrap_or(1.0),
                    tags: p.p_tags.unwrap_or_default(),
                    edited: false,
                };
                let node = NetworkNode {
                    id: post.id.clone(),
                    label: state.author_name(&post.author_id),
                    value: post.weight,
                    group: post.group().map(str::to_string),
                };
                state.network.upsert_node(node, None);
                state.posts.push(post.clone());
                Ok(serde_json::to_value(post)?)
            }
            Procedure::UpdatePost => {
                let p: UpdatePostParams = parse(procedure, params)?;
                let post = state.post_mut(&p.p_post_id)?;
                if let Some(content) = p.p_content {
                    post.content = content;
                }
                if let Some(weight) = p.p_weight {
                    post.weight = weight;
                }
                if let Some(tags) = p.p_tags {
                    post.tags = tags;
                }
                post.edited = true;
                let post = post.clone();
                if let Some(node) = state.network.node_mut(&post.id) {
                    node.value = post.weight;
                    node.group = post.group().map(str::to_string);
                }
                Ok(serde_json::to_value(post)?)
            }
            Procedure::LikePost => {
                let p: PostRefParams = parse(procedure, params)?;
                let post = state.post_mut(&p.p_post_id)?;
                post.likes += 1;
                Ok(serde_json::to_value(&*post)?)
            }
            Procedure::RemovePost => {
                let p: PostRefParams = parse(procedure, params)?;
                let before = state.posts.len();
                state.posts.retain(|post| post.id != p.p_post_id);
                state.network.remove_node(&p.p_post_id);
                Ok(Value::Bool(state.posts.len() < before))
            }
            Procedure::AddComment => {
                let p: AddCommentParams = parse(procedure, params)?;
                let comment = Comment {
                    id: self.issue_id("comment"),
                    post_id: p.p_post_id.clone(),
                    author_id: self.current_user_id.clone(),
                    content: p.p_content,
                    created_at: Utc::now(),
                    author: None,
                };
                let post = state.post_mut(&p.p_post_id)?;
                post.comments_list.push(comment.clone());
                post.comments_count += 1;
                Ok(serde_json::to_value(comment)?)
            }
            Procedure::UpdateComment => {
                let p: UpdateCommentParams = parse(procedure, params)?;
                let (post_pos, comment_pos) = state.comment_location(&p.p_comment_id).ok_or_else(|| {
                    AppError::NotFound(format!("Comment {} not found", p.p_comment_id))
                })?;
                let comment = &mut state.posts[post_pos].comments_list[comment_pos];
                comment.content = p.p_content;
                Ok(serde_json::to_value(&*comment)?)
            }
            Procedure::RemoveComment => {
                let p: CommentRefParams = parse(procedure, params)?;
                match state.comment_location(&p.p_comment_id) {
                    Some((post_pos, comment_pos)) => {
                        let post = &mut state.posts[post_pos];
                        post.comments_list.remove(comment_pos);
                        post.comments_count = post.comments_count.saturating_sub(1);
                        Ok(Value::Bool(true))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
            Procedure::UpdateNetworkData => {
                let p: UpdateNetworkDataParams = parse(procedure, params)?;
                state.network = NetworkGraph::new(p.p_nodes, p.p_edges);
                Ok(serde_json::to_value(&state.network)?)
            }
            Procedure::UpdateUserPreferences => {
                let p: UpdatePreferencesParams = parse(procedure, params)?;
                let prefs = state
                    .preferences
                    .entry(self.current_user_id.clone())
                    .or_default();
                prefs.apply_patch(&PreferencesPatch::from(&p));
                Ok(serde_json::to_value(*prefs)?)
            }
            Procedure::AddConnection => {
                let p: ConnectedUserParams = parse(procedure, params)?;
                if !state.users.iter().any(|u| u.id == p.p_connected_user_id) {
                    return Err(AppError::NotFound(format!(
                        "User {} not found",
                        p.p_connected_user_id
                    )));
                }
                let connection = UserConnection {
                    id: self.issue_id("conn"),
                    user_id: self.current_user_id.clone(),
                    connected_user_id: p.p_connected_user_id.clone(),
                    status: ConnectionStatus::Pending,
                    created_at: Utc::now(),
                };
                let me = state.user_mut(&self.current_user_id)?;
                if me.connection_to(&p.p_connected_user_id).is_some() {
                    return Ok(Value::Bool(false));
                }
                me.connections.push(connection);
                Ok(Value::Bool(true))
            }
            Procedure::AcceptConnection => {
                let p: AcceptConnectionParams = parse(procedure, params)?;
                let me = state.user_mut(&self.current_user_id)?;
                let pending = me.connections.iter_mut().find(|conn| {
                    conn.user_id == p.p_user_id && conn.status == ConnectionStatus::Pending
                });
                match pending {
                    Some(conn) => {
                        conn.status = ConnectionStatus::Accepted;
                        Ok(Value::Bool(true))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
            Procedure::RemoveConnection => {
                let p: ConnectedUserParams = parse(procedure, params)?;
                let me = state.user_mut(&self.current_user_id)?;
                let before = me.connections.len();
                me.connections
                    .retain(|conn| conn.connected_user_id != p.p_connected_user_id);
                Ok(Value::Bool(me.connections.len() < before))
            }
            other => Err(AppError::Internal(format!("{} is not a write procedure", other))),
        }
    }
}

fn parse<P: DeserializeOwned>(procedure: Procedure, params: Value) -> AppResult<P> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Validation(format!("invalid {} parameters: {}", procedure, e)))
}

#[async_trait]
impl RemoteProcedureGateway for InMemoryGateway {
    #[instrument(skip(self, params), fields(procedure = %procedure))]
    async fn call(&self, procedure: Procedure, params: Value) -> RpcResponse {
        self.calls.lock().await.push(procedure);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(response) = self.take_scripted(procedure).await {
            debug!("Serving scripted response for {}", procedure);
            return response;
        }

        match self.serve(procedure, params).await {
            Ok(data) => RpcResponse::ok(data),
            Err(e) => RpcResponse::failure(e.message()),
        }
    }

    fn gateway_name(&self) -> &'static str {
        "InMemoryGateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::params::encode;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_post_issues_server_id() {
        let gateway = InMemoryGateway::seeded();
        let params = encode(&AddPostParams {
            p_content: "hello".to_string(),
            p_weight: None,
            p_tags: Some(vec!["rust".to_string()]),
        })
        .unwrap();

        let post: Post = gateway
            .call(Procedure::AddPost, params)
            .await
            .decode_required(Procedure::AddPost)
            .unwrap();
        assert!(post.id.starts_with("post-"));
        assert_eq!(post.author_id, "user-001");
        assert_eq!(post.weight, 1.0);
        assert!(gateway.server_post(&post.id).await.is_some());
    }

    #[tokio::test]
    async fn test_scripted_failure_is_served_once() {
        let gateway = InMemoryGateway::seeded();
        gateway.fail_next(Procedure::LikePost, "network error").await;
        let params = json!({"p_post_id": "post-001"});

        let first = gateway.call(Procedure::LikePost, params.clone()).await;
        assert_eq!(first.error.unwrap().message, "network error");

        let second: Post = gateway
            .call(Procedure::LikePost, params)
            .await
            .decode_required(Procedure::LikePost)
            .unwrap();
        assert_eq!(second.likes, 25);
        assert_eq!(gateway.call_count(Procedure::LikePost).await, 2);
    }

    #[tokio::test]
    async fn test_remove_comment_acknowledges() {
        let gateway = InMemoryGateway::seeded();
        let params = json!({"p_comment_id": "comment-001"});
        let first = gateway.call(Procedure::RemoveComment, params.clone()).await;
        assert_eq!(first.data, Some(json!(true)));
        let second = gateway.call(Procedure::RemoveComment, params).await;
        assert_eq!(second.data, Some(json!(false)));
        assert_eq!(gateway.server_post("post-001").await.unwrap().comments_count, 0);
    }

    #[tokio::test]
    async fn test_bad_params_fail_cleanly() {
        let gateway = InMemoryGateway::seeded();
        let response = gateway.call(Procedure::GetPost, json!({"wrong": 1})).await;
        assert!(response.is_failure());
    }

    #[tokio::test]
    async fn test_accept_pending_connection() {
        let gateway = InMemoryGateway::seeded();
        let response = gateway
            .call(Procedure::AcceptConnection, json!({"p_user_id": "user-003"}))
            .await;
        assert_eq!(response.data, Some(json!(true)));
        let me = gateway.server_user("user-001").await.unwrap();
        assert_eq!(me.connections[0].status, ConnectionStatus::Accepted);
    }
}
