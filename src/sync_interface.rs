// Sync Interface - HTTP surface over the session client
// Reads the store, runs coordinator operations, controls selection, refresh, sync and cache

use axum::{
    extract::{Path as AxumPath, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    models::{
        AcceptConnectionRequest, CommentUpdateRequest, ConnectionRequest, NetworkDataUpdateRequest,
        NewCommentRequest, NewPostRequest, PostUpdateRequest, PreferencesUpdateRequest,
        UserUpdateRequest,
    },
};

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<Json<Value>> {
    Ok(Json(serde_json::to_value(value)?))
}

#[derive(Deserialize)]
pub struct InitializeRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct PostEditBody {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct CommentBody {
    pub content: String,
}

#[derive(Deserialize)]
pub struct UserEditBody {
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

#[derive(Deserialize)]
pub struct SelectionRequest {
    pub post_id: Option<String>,
}

#[derive(Deserialize)]
pub struct StartSyncRequest {
    pub interval_ms: Option<u64>,
}

// HTTP Handlers

pub async fn get_state_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    to_json(&*state.client.snapshot())
}

pub async fn get_stats_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let client = &state.client;
    Ok(Json(json!({
        "coordinators": client.statuses(),
        "gateway": state.gateway.stats().await,
        "in_flight": client.context().loading().in_flight(),
        "locked_keys": client.context().locks().active_keys(),
        "initialized": client.is_initialized(),
        "sync_enabled": client.is_sync_enabled(),
    })))
}

pub async fn initialize_handler(
    State(state): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> Result<Json<Value>, AppError> {
    let summary = state.client.initialize(&req.user_id).await?;
    Ok(Json(json!({
        "initialized": state.client.is_initialized(),
        "summary": summary,
    })))
}

pub async fn add_post_handler(
    State(state): State<AppState>,
    Json(req): Json<NewPostRequest>,
) -> Result<Json<Value>, AppError> {
    let post = state.client.posts().add_post(req).await?;
    to_json(&post)
}

pub async fn get_post_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, AppError> {
    let post = state
        .client
        .posts()
        .fetch_post(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))?;
    to_json(&post)
}

pub async fn update_post_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<PostEditBody>,
) -> Result<Json<Value>, AppError> {
    let request = PostUpdateRequest {
        post_id: id,
        content: body.content,
        weight: body.weight,
        tags: body.tags,
    };
    let post = state.client.posts().update_post(request).await?;
    to_json(&post)
}

pub async fn like_post_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, AppError> {
    let post = state.client.posts().like_post(&id).await?;
    to_json(&post)
}

pub async fn remove_post_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, AppError> {
    state.client.posts().remove_post(&id).await?;
    Ok(Json(json!({ "removed": id })))
}

pub async fn refresh_posts_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let posts = state.client.posts().fetch_posts().await?;
    to_json(&posts)
}

pub async fn select_post_handler(
    State(state): State<AppState>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<Value>, AppError> {
    state.client.posts().select_post(req.post_id);
    let snapshot = state.client.snapshot();
    Ok(Json(json!({ "selected_post": snapshot.selected_post() })))
}

pub async fn add_comment_handler(
    State(state): State<AppState>,
    AxumPath(post_id): AxumPath<String>,
    Json(body): Json<CommentBody>,
) -> Result<Json<Value>, AppError> {
    let request = NewCommentRequest {
        post_id,
        content: body.content,
    };
    let comment = state.client.comments().add_comment(request).await?;
    to_json(&comment)
}

pub async fn update_comment_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<CommentBody>,
) -> Result<Json<Value>, AppError> {
    let request = CommentUpdateRequest {
        comment_id: id,
        content: body.content,
    };
    let comment = state.client.comments().update_comment(request).await?;
    to_json(&comment)
}

pub async fn remove_comment_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, AppError> {
    state.client.comments().remove_comment(&id).await?;
    Ok(Json(json!({ "removed": id })))
}

pub async fn get_user_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, AppError> {
    let user = state
        .client
        .users()
        .fetch_user(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
    to_json(&user)
}

pub async fn update_user_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<UserEditBody>,
) -> Result<Json<Value>, AppError> {
    let request = UserUpdateRequest {
        user_id: id,
        name: body.name,
        email: body.email,
        avatar: body.avatar,
        bio: body.bio,
        subtitle: body.subtitle,
    };
    let user = state.client.users().update_user(request).await?;
    to_json(&user)
}

pub async fn refresh_users_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let users = state.client.users().fetch_all_users().await?;
    to_json(&users)
}

pub async fn add_connection_handler(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<Value>, AppError> {
    let target = req.connected_user_id.clone();
    state.client.connections().add_connection(req).await?;
    Ok(Json(json!({ "requested": target })))
}

pub async fn accept_connection_handler(
    State(state): State<AppState>,
    Json(req): Json<AcceptConnectionRequest>,
) -> Result<Json<Value>, AppError> {
    let requester = req.user_id.clone();
    state.client.connections().accept_connection(req).await?;
    Ok(Json(json!({ "accepted": requester })))
}

pub async fn remove_connection_handler(
    State(state): State<AppState>,
    AxumPath(user_id): AxumPath<String>,
) -> Result<Json<Value>, AppError> {
    let request = ConnectionRequest {
        connected_user_id: user_id.clone(),
    };
    state.client.connections().remove_connection(request).await?;
    Ok(Json(json!({ "removed": user_id })))
}

pub async fn update_network_handler(
    State(state): State<AppState>,
    Json(req): Json<NetworkDataUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let graph = state.client.network().update_network_data(req).await?;
    to_json(&graph)
}

pub async fn refresh_network_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let graph = state.client.network().fetch_network_data().await?;
    to_json(&graph)
}

pub async fn update_preferences_handler(
    State(state): State<AppState>,
    Json(req): Json<PreferencesUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let preferences = state.client.preferences().update_preferences(req).await?;
    to_json(&preferences)
}

pub async fn refresh_preferences_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let preferences = state.client.preferences().fetch_preferences(None).await?;
    to_json(&preferences)
}

pub async fn clear_error_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.client.store().set_error(None);
    Ok(Json(json!({ "error": null })))
}

pub async fn start_sync_handler(
    State(state): State<AppState>,
    Json(req): Json<StartSyncRequest>,
) -> Result<Json<Value>, AppError> {
    let interval = req
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.sync_interval());
    state.client.start_sync(interval)?;
    Ok(Json(json!({
        "sync_enabled": true,
        "interval_ms": interval.as_millis() as u64,
    })))
}

pub async fn stop_sync_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.client.stop_sync();
    Ok(Json(json!({ "sync_enabled": false })))
}

pub async fn sync_now_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let ran = state.client.sync_now().await?;
    Ok(Json(json!({ "synced": ran })))
}

pub async fn save_cache_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let id = state.cache.save(&state.client.snapshot()).await?;
    Ok(Json(json!({ "saved": id })))
}

pub async fn clear_cache_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.cache.clear().await?;
    Ok(Json(json!({ "cleared": true })))
}

// Create sync router
pub fn create_sync_router(state: AppState) -> Router {
    Router::new()
        // Store reads
        .route("/state", get(get_state_handler))
        .route("/stats", get(get_stats_handler))
        .route("/initialize", post(initialize_handler))
        .route("/error", delete(clear_error_handler))

        // Posts and selection
        .route("/posts", post(add_post_handler))
        .route("/posts/refresh", post(refresh_posts_handler))
        .route("/posts/{id}", get(get_post_handler))
        .route("/posts/{id}", put(update_post_handler))
        .route("/posts/{id}", delete(remove_post_handler))
        .route("/posts/{id}/like", post(like_post_handler))
        .route("/selection", put(select_post_handler))

        // Comments
        .route("/posts/{id}/comments", post(add_comment_handler))
        .route("/comments/{id}", put(update_comment_handler))
        .route("/comments/{id}", delete(remove_comment_handler))

        // Users and connections
        .route("/users/refresh", post(refresh_users_handler))
        .route("/users/{id}", get(get_user_handler))
        .route("/users/{id}", put(update_user_handler))
        .route("/connections", post(add_connection_handler))
        .route("/connections/accept", post(accept_connection_handler))
        .route("/connections/{user_id}", delete(remove_connection_handler))

        // Network graph and preferences
        .route("/network", put(update_network_handler))
        .route("/network/refresh", post(refresh_network_handler))
        .route("/preferences", put(update_preferences_handler))
        .route("/preferences/refresh", post(refresh_preferences_handler))

        // Background sync and snapshot cache
        .route("/sync/start", post(start_sync_handler))
        .route("/sync/stop", post(stop_sync_handler))
        .route("/sync/now", post(sync_now_handler))
        .route("/cache", post(save_cache_handler))
        .route("/cache", delete(clear_cache_handler))

        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::{InMemoryGateway, InstrumentedGateway, Procedure, RpcResponse};
    use crate::persistence::SnapshotCache;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app() -> (Router, AppState, Arc<InMemoryGateway>) {
        let backend = Arc::new(InMemoryGateway::seeded());
        let gateway = Arc::new(InstrumentedGateway::new(backend.clone()));
        let cache = SnapshotCache::new_in_memory(Duration::from_secs(3600))
            .await
            .unwrap();
        let state = AppState::from_parts(Store::new(), gateway, cache, Config::default());
        (create_sync_router(state.clone()), state, backend)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_initialize_then_read_state() {
        let (router, _state, _backend) = app().await;
        let (status, body) = send(
            &router,
            "POST",
            "/initialize",
            Some(json!({ "user_id": "user-001" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["initialized"], json!(true));

        let (status, state) = send(&router, "GET", "/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state["posts"].as_array().unwrap().len(), 3);
        assert_eq!(state["current_user"]["id"], json!("user-001"));
    }

    #[tokio::test]
    async fn test_add_post_returns_server_copy() {
        let (router, _state, _backend) = app().await;
        send(&router, "POST", "/initialize", Some(json!({ "user_id": "user-001" }))).await;

        let (status, post) = send(
            &router,
            "POST",
            "/posts",
            Some(json!({ "content": "Hello from the API", "weight": 2.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(post["id"].as_str().unwrap().starts_with("post-"));
        assert_eq!(post["weight"], json!(2.0));
    }

    #[tokio::test]
    async fn test_remote_failure_maps_to_bad_gateway() {
        let (router, state, backend) = app().await;
        send(&router, "POST", "/initialize", Some(json!({ "user_id": "user-001" }))).await;
        backend
            .script(Procedure::LikePost, RpcResponse::failure("network error"))
            .await;

        let (status, body) = send(&router, "POST", "/posts/post-001/like", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], json!("network error"));
        assert_eq!(state.client.snapshot().post("post-001").unwrap().likes, 24);
    }

    #[tokio::test]
    async fn test_unknown_post_is_not_found() {
        let (router, _state, _backend) = app().await;
        let (status, _) = send(
            &router,
            "PUT",
            "/posts/post-404",
            Some(json!({ "weight": 3.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_selection_and_stats() {
        let (router, _state, _backend) = app().await;
        send(&router, "POST", "/posts/refresh", None).await;

        let (_, body) = send(
            &router,
            "PUT",
            "/selection",
            Some(json!({ "post_id": "post-002" })),
        )
        .await;
        assert_eq!(body["selected_post"]["id"], json!("post-002"));

        let (status, stats) = send(&router, "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["gateway"]["total_calls"], json!(1));
        assert_eq!(stats["in_flight"], json!(0));
    }

    #[tokio::test]
    async fn test_cache_save_and_clear() {
        let (router, state, _backend) = app().await;
        send(&router, "POST", "/posts/refresh", None).await;

        let (status, _) = send(&router, "POST", "/cache", None).await;
        assert_eq!(status, StatusCode::OK);
        let cached = state.cache.load().await.unwrap().unwrap();
        assert_eq!(cached.snapshot.posts().len(), 3);

        send(&router, "DELETE", "/cache", None).await;
        assert!(state.cache.load().await.unwrap().is_none());
    }
}
