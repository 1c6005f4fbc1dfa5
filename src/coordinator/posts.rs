// Post coordinator - add, update, like and remove posts optimistically; fetch the feed

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::{
    backfill, decode_patch, ensure_server_id, post_key, CoordinatorContext, CoordinatorStatus,
    OptimisticMutation, StatusReport,
};
use crate::error::{AppError, AppResult};
use crate::gateway::params::{
    encode, AddPostParams, GetPostParams, PostRefParams, UpdatePostParams,
};
use crate::gateway::{Procedure, RpcResponse};
use crate::models::{NewPostRequest, Post, PostPatch, PostUpdateRequest};
use crate::store::{PostPlacement, StoreMutation, StoreSnapshot};

pub(crate) const DEFAULT_POST_WEIGHT: f64 = 1.0;

fn post_not_found(post_id: &str) -> AppError {
    AppError::NotFound(format!("Post {} not found", post_id))
}

fn locate<'a>(state: &'a StoreSnapshot, post_id: &str) -> AppResult<&'a Post> {
    state.post(post_id).ok_or_else(|| post_not_found(post_id))
}

/// The post with `patch` applied, as the store will hold it
fn patched(state: &StoreSnapshot, post_id: &str, patch: &PostPatch) -> AppResult<Post> {
    let mut post = locate(state, post_id)?.clone();
    post.apply_patch(patch);
    Ok(post)
}

struct AddPost {
    request: NewPostRequest,
    temp_id: String,
    optimistic: Option<Post>,
}

impl OptimisticMutation for AddPost {
    type Output = Post;

    fn name(&self) -> &'static str {
        "add_post"
    }

    fn lock_key(&self) -> String {
        post_key(&self.temp_id)
    }

    fn procedure(&self) -> Procedure {
        Procedure::AddPost
    }

    fn params(&self) -> AppResult<Value> {
        encode(&AddPostParams::from(&self.request))
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let author = state
            .current_user()
            .ok_or_else(|| AppError::Validation("adding a post requires a signed-in user".to_string()))?;

        let post = Post {
            id: self.temp_id.clone(),
            author_id: author.id.clone(),
            content: self.request.content.clone(),
            created_at: Utc::now(),
            likes: 0,
            comments_count: 0,
            comments_list: Vec::new(),
            weight: self.request.weight.unwrap_or(DEFAULT_POST_WEIGHT),
            tags: self.request.tags.clone().unwrap_or_default(),
            edited: false,
        };
        self.optimistic = Some(post.clone());
        Ok(vec![StoreMutation::add_post(post)])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, Post)> {
        let data: Value = response.decode_required(Procedure::AddPost)?;
        let optimistic = self
            .optimistic
            .as_ref()
            .ok_or_else(|| AppError::Internal("add_post reconciled before prepare".to_string()))?;
        let post = backfill(optimistic, data, Procedure::AddPost)?;
        ensure_server_id(&post.id, Procedure::AddPost)?;

        // The confirmed post takes the temporary one's place in the feed.
        let placement = state.post_position(&self.temp_id).map(|position| PostPlacement {
            position,
            node: None,
        });
        let mut mutations = vec![
            StoreMutation::RemovePost {
                id: self.temp_id.clone(),
            },
            StoreMutation::AddPost {
                post: post.clone(),
                placement,
            },
        ];
        if state.selected_post_id() == Some(self.temp_id.as_str()) {
            mutations.push(StoreMutation::SetSelectedPost(Some(post.id.clone())));
        }
        Ok((mutations, post))
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        vec![StoreMutation::RemovePost {
            id: self.temp_id.clone(),
        }]
    }
}

/// Shared by `update_post` and `like_post`: patch a post, confirm with the server's copy
struct PatchPost {
    name: &'static str,
    procedure: Procedure,
    post_id: String,
    params: Value,
    /// Builds the optimistic patch from the current post
    change: fn(&Post, &PostUpdateRequest) -> PostPatch,
    request: PostUpdateRequest,
    snapshot: Option<Post>,
}

fn edit_change(_: &Post, request: &PostUpdateRequest) -> PostPatch {
    PostPatch {
        content: request.content.clone(),
        weight: request.weight,
        tags: request.tags.clone(),
        edited: Some(true),
        ..PostPatch::default()
    }
}

fn like_change(post: &Post, _: &PostUpdateRequest) -> PostPatch {
    PostPatch {
        likes: Some(post.likes + 1),
        ..PostPatch::default()
    }
}

impl OptimisticMutation for PatchPost {
    type Output = Post;

    fn name(&self) -> &'static str {
        self.name
    }

    fn lock_key(&self) -> String {
        post_key(&self.post_id)
    }

    fn procedure(&self) -> Procedure {
        self.procedure
    }

    fn params(&self) -> AppResult<Value> {
        Ok(self.params.clone())
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let post = locate(state, &self.post_id)?;
        let patch = (self.change)(post, &self.request);
        self.snapshot = Some(post.clone());
        Ok(vec![StoreMutation::UpdatePost {
            id: self.post_id.clone(),
            patch,
        }])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, Post)> {
        match decode_patch::<PostPatch>(response, self.procedure)? {
            Some(server) => {
                let post = patched(state, &self.post_id, &server)?;
                let mutation = StoreMutation::UpdatePost {
                    id: self.post_id.clone(),
                    patch: server,
                };
                Ok((vec![mutation], post))
            }
            None => Ok((Vec::new(), locate(state, &self.post_id)?.clone())),
        }
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        self.snapshot
            .iter()
            .map(|post| StoreMutation::UpdatePost {
                id: post.id.clone(),
                patch: PostPatch::from(post),
            })
            .collect()
    }
}

struct RemovePost {
    post_id: String,
    snapshot: Option<(Post, PostPlacement, bool)>,
}

impl OptimisticMutation for RemovePost {
    type Output = ();

    fn name(&self) -> &'static str {
        "remove_post"
    }

    fn lock_key(&self) -> String {
        post_key(&self.post_id)
    }

    fn procedure(&self) -> Procedure {
        Procedure::RemovePost
    }

    fn params(&self) -> AppResult<Value> {
        encode(&PostRefParams {
            p_post_id: self.post_id.clone(),
        })
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let post = locate(state, &self.post_id)?.clone();
        let placement = state
            .post_placement(&self.post_id)
            .ok_or_else(|| post_not_found(&self.post_id))?;
        let was_selected = state.selected_post_id() == Some(self.post_id.as_str());
        self.snapshot = Some((post, placement, was_selected));
        Ok(vec![StoreMutation::RemovePost {
            id: self.post_id.clone(),
        }])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        _state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, ())> {
        response.acknowledge(Procedure::RemovePost)?;
        Ok((Vec::new(), ()))
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        let Some((post, placement, was_selected)) = &self.snapshot else {
            return Vec::new();
        };
        let mut mutations = vec![StoreMutation::AddPost {
            post: post.clone(),
            placement: Some(placement.clone()),
        }];
        if *was_selected {
            mutations.push(StoreMutation::SetSelectedPost(Some(post.id.clone())));
        }
        mutations
    }
}

#[derive(Debug)]
pub struct PostCoordinator {
    ctx: Arc<CoordinatorContext>,
    status: Arc<CoordinatorStatus>,
}

impl PostCoordinator {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(CoordinatorStatus::new("posts")),
        }
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    /// Publish a post. It appears at once under a temporary id, then is swapped
    /// for the server's copy.
    #[instrument(skip(self, request))]
    pub async fn add_post(&self, request: NewPostRequest) -> AppResult<Post> {
        if let Err(e) = request.validate() {
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = AddPost {
            request,
            temp_id: self.ctx.temp_ids.next_id(),
            optimistic: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    #[instrument(skip(self, request), fields(post_id = %request.post_id))]
    pub async fn update_post(&self, request: PostUpdateRequest) -> AppResult<Post> {
        if let Err(e) = request.validate() {
            return Err(self.ctx.reject(&self.status, e));
        }
        let params = encode(&UpdatePostParams::from(&request))?;
        let mutation = PatchPost {
            name: "update_post",
            procedure: Procedure::UpdatePost,
            post_id: request.post_id.clone(),
            params,
            change: edit_change,
            request,
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    /// Increment the like counter; does not mark the post edited
    #[instrument(skip(self))]
    pub async fn like_post(&self, post_id: &str) -> AppResult<Post> {
        let params = encode(&PostRefParams {
            p_post_id: post_id.to_string(),
        })?;
        let mutation = PatchPost {
            name: "like_post",
            procedure: Procedure::LikePost,
            post_id: post_id.to_string(),
            params,
            change: like_change,
            request: PostUpdateRequest::new(post_id),
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    #[instrument(skip(self))]
    pub async fn remove_post(&self, post_id: &str) -> AppResult<()> {
        let mutation = RemovePost {
            post_id: post_id.to_string(),
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    /// Replace the feed with the server's posts. Posts still waiting for
    /// confirmation stay at the end of the feed.
    #[instrument(skip(self))]
    pub async fn fetch_posts(&self) -> AppResult<Vec<Post>> {
        let posts = self
            .ctx
            .fetch(
                &self.status,
                Procedure::GetPosts,
                Value::Object(Default::default()),
                |posts: &Vec<Post>, state| {
                    let mut merged = posts.clone();
                    merged.extend(
                        state
                            .posts()
                            .iter()
                            .filter(|p| crate::core::TempIdGenerator::is_temporary(&p.id))
                            .cloned(),
                    );
                    vec![StoreMutation::SetAllPosts(merged)]
                },
            )
            .await?;
        Ok(posts.unwrap_or_default())
    }

    /// Load one post and make it the selected post
    #[instrument(skip(self))]
    pub async fn fetch_post(&self, post_id: &str) -> AppResult<Option<Post>> {
        let params = encode(&GetPostParams {
            post_id: post_id.to_string(),
        })?;
        self.ctx
            .fetch(&self.status, Procedure::GetPost, params, |post: &Post, state| {
                let upsert = if state.post(&post.id).is_some() {
                    StoreMutation::UpdatePost {
                        id: post.id.clone(),
                        patch: PostPatch::from(post),
                    }
                } else {
                    StoreMutation::add_post(post.clone())
                };
                vec![upsert, StoreMutation::SetSelectedPost(Some(post.id.clone()))]
            })
            .await
    }

    /// Select an already loaded post; unknown ids clear the selection
    pub fn select_post(&self, post_id: Option<String>) {
        self.ctx.store.set_selected_post(post_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::store::Store;

    async fn coordinator() -> (PostCoordinator, Arc<InMemoryGateway>, Store) {
        let gateway = Arc::new(InMemoryGateway::seeded());
        let store = Store::new();
        let ctx = Arc::new(CoordinatorContext::new(store.clone(), gateway.clone()));
        let posts = PostCoordinator::new(ctx);
        posts.fetch_posts().await.unwrap();
        (posts, gateway, store)
    }

    #[tokio::test]
    async fn test_update_unknown_post_makes_no_call() {
        let (posts, gateway, store) = coordinator().await;
        let err = posts
            .update_post(PostUpdateRequest::new("missing").content("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(gateway.call_count(Procedure::UpdatePost).await, 0);
        assert_eq!(store.snapshot().error(), Some("Post missing not found"));
        assert_eq!(posts.status().rejected, 1);
    }

    #[tokio::test]
    async fn test_update_post_confirms_server_copy() {
        let (posts, _gateway, store) = coordinator().await;
        let post = posts
            .update_post(PostUpdateRequest::new("post-002").content("revised").weight(9.0))
            .await
            .unwrap();
        assert_eq!(post.content, "revised");
        assert!(post.edited);

        let state = store.snapshot();
        assert_eq!(state.post("post-002").unwrap().weight, 9.0);
        assert_eq!(state.network().node("post-002").unwrap().value, 9.0);
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn test_like_does_not_mark_edited() {
        let (posts, _gateway, store) = coordinator().await;
        let liked = posts.like_post("post-003").await.unwrap();
        assert_eq!(liked.likes, 8);
        assert!(!store.snapshot().post("post-003").unwrap().edited);
    }

    #[tokio::test]
    async fn test_remove_post_rollback_restores_position() {
        let (posts, gateway, store) = coordinator().await;
        let before = store.snapshot();
        gateway.fail_next(Procedure::RemovePost, "offline").await;

        let err = posts.remove_post("post-002").await.unwrap_err();
        assert_eq!(err, AppError::RemoteFailure("offline".to_string()));

        let after = store.snapshot();
        assert_eq!(after.posts(), before.posts());
        assert_eq!(after.network(), before.network());
        assert_eq!(posts.status().error.as_deref(), Some("offline"));
    }

    #[tokio::test]
    async fn test_negative_acknowledgement_rolls_back() {
        let (posts, gateway, store) = coordinator().await;
        gateway
            .script(Procedure::RemovePost, RpcResponse::ok(Value::Bool(false)))
            .await;
        assert!(posts.remove_post("post-001").await.is_err());
        assert!(store.snapshot().post("post-001").is_some());
    }

    #[tokio::test]
    async fn test_fetch_post_selects_it() {
        let (posts, _gateway, store) = coordinator().await;
        let fetched = posts.fetch_post("post-003").await.unwrap().unwrap();
        let state = store.snapshot();
        assert_eq!(state.selected_post().unwrap(), &fetched);
        assert_eq!(state.viewed_post().unwrap().id, "post-003");
    }
}
