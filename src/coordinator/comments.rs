// Comment coordinator - optimistic comment add / edit / delete inside a post's thread

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::{
    backfill, decode_patch, ensure_server_id, post_key, CoordinatorContext, CoordinatorStatus,
    OptimisticMutation, StatusReport,
};
use crate::error::{AppError, AppResult};
use crate::gateway::params::{encode, AddCommentParams, CommentRefParams, UpdateCommentParams};
use crate::gateway::{Procedure, RpcResponse};
use crate::models::{
    Comment, CommentAuthor, CommentPatch, CommentUpdateRequest, NewCommentRequest, User,
};
use crate::store::{StoreMutation, StoreSnapshot};

fn comment_not_found(comment_id: &str) -> AppError {
    AppError::NotFound(format!("Comment {} not found", comment_id))
}

fn author_card(user: &User) -> CommentAuthor {
    CommentAuthor {
        id: user.id.clone(),
        name: user.name.clone(),
        avatar: user.avatar.clone(),
    }
}

/// Post id owning `comment_id` and the comment's position in its thread
fn locate(state: &StoreSnapshot, comment_id: &str) -> AppResult<(String, usize, Comment)> {
    let post = state
        .post_with_comment(comment_id)
        .ok_or_else(|| comment_not_found(comment_id))?;
    let position = post
        .comment_position(comment_id)
        .ok_or_else(|| comment_not_found(comment_id))?;
    Ok((post.id.clone(), position, post.comments_list[position].clone()))
}

struct AddComment {
    request: NewCommentRequest,
    temp_id: String,
    optimistic: Option<Comment>,
}

impl OptimisticMutation for AddComment {
    type Output = Comment;

    fn name(&self) -> &'static str {
        "add_comment"
    }

    fn lock_key(&self) -> String {
        post_key(&self.request.post_id)
    }

    fn procedure(&self) -> Procedure {
        Procedure::AddComment
    }

    fn params(&self) -> AppResult<Value> {
        encode(&AddCommentParams::from(&self.request))
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let author = state.current_user().ok_or_else(|| {
            AppError::Validation("commenting requires a signed-in user".to_string())
        })?;
        if state.post(&self.request.post_id).is_none() {
            return Err(AppError::NotFound(format!(
                "Post {} not found",
                self.request.post_id
            )));
        }

        let comment = Comment {
            id: self.temp_id.clone(),
            post_id: self.request.post_id.clone(),
            author_id: author.id.clone(),
            content: self.request.content.clone(),
            created_at: Utc::now(),
            author: Some(author_card(author)),
        };
        self.optimistic = Some(comment.clone());
        Ok(vec![StoreMutation::add_comment(
            self.request.post_id.clone(),
            comment,
        )])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, Comment)> {
        let data: Value = response.decode_required(Procedure::AddComment)?;
        let optimistic = self.optimistic.as_ref().ok_or_else(|| {
            AppError::Internal("add_comment reconciled before prepare".to_string())
        })?;
        // The server omits the author card; the optimistic one fills it in.
        let comment = backfill(optimistic, data, Procedure::AddComment)?;
        ensure_server_id(&comment.id, Procedure::AddComment)?;

        let position = state
            .post(&self.request.post_id)
            .and_then(|post| post.comment_position(&self.temp_id));
        let mutations = vec![
            StoreMutation::RemoveComment {
                post_id: self.request.post_id.clone(),
                comment_id: self.temp_id.clone(),
            },
            StoreMutation::AddComment {
                post_id: self.request.post_id.clone(),
                comment: comment.clone(),
                position,
            },
        ];
        Ok((mutations, comment))
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        vec![StoreMutation::RemoveComment {
            post_id: self.request.post_id.clone(),
            comment_id: self.temp_id.clone(),
        }]
    }
}

struct UpdateComment {
    request: CommentUpdateRequest,
    /// Owning post as seen when the request was made; used for the lock key
    post_hint: Option<String>,
    snapshot: Option<(String, Comment)>,
}

impl OptimisticMutation for UpdateComment {
    type Output = Comment;

    fn name(&self) -> &'static str {
        "update_comment"
    }

    fn lock_key(&self) -> String {
        match &self.post_hint {
            Some(post_id) => post_key(post_id),
            None => format!("comment:{}", self.request.comment_id),
        }
    }

    fn procedure(&self) -> Procedure {
        Procedure::UpdateComment
    }

    fn params(&self) -> AppResult<Value> {
        encode(&UpdateCommentParams::from(&self.request))
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let (post_id, _, comment) = locate(state, &self.request.comment_id)?;
        self.snapshot = Some((post_id.clone(), comment));
        Ok(vec![StoreMutation::UpdateComment {
            post_id,
            comment_id: self.request.comment_id.clone(),
            patch: CommentPatch {
                content: Some(self.request.content.clone()),
                author: None,
            },
        }])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, Comment)> {
        let server = decode_patch::<CommentPatch>(response, Procedure::UpdateComment)?;
        let (post_id, _, mut comment) = locate(state, &self.request.comment_id)?;
        let Some(patch) = server else {
            return Ok((Vec::new(), comment));
        };
        comment.apply_patch(&patch);
        let mutation = StoreMutation::UpdateComment {
            post_id,
            comment_id: self.request.comment_id.clone(),
            patch,
        };
        Ok((vec![mutation], comment))
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        self.snapshot
            .iter()
            .map(|(post_id, comment)| StoreMutation::UpdateComment {
                post_id: post_id.clone(),
                comment_id: comment.id.clone(),
                patch: CommentPatch::from(comment),
            })
            .collect()
    }
}

struct RemoveComment {
    comment_id: String,
    post_hint: Option<String>,
    snapshot: Option<(String, usize, Comment)>,
}

impl OptimisticMutation for RemoveComment {
    type Output = ();

    fn name(&self) -> &'static str {
        "remove_comment"
    }

    fn lock_key(&self) -> String {
        match &self.post_hint {
            Some(post_id) => post_key(post_id),
            None => format!("comment:{}", self.comment_id),
        }
    }

    fn procedure(&self) -> Procedure {
        Procedure::RemoveComment
    }

    fn params(&self) -> AppResult<Value> {
        encode(&CommentRefParams {
            p_comment_id: self.comment_id.clone(),
        })
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let (post_id, position, comment) = locate(state, &self.comment_id)?;
        self.snapshot = Some((post_id.clone(), position, comment));
        Ok(vec![StoreMutation::RemoveComment {
            post_id,
            comment_id: self.comment_id.clone(),
        }])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        _state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, ())> {
        response.acknowledge(Procedure::RemoveComment)?;
        Ok((Vec::new(), ()))
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        self.snapshot
            .iter()
            .map(|(post_id, position, comment)| StoreMutation::AddComment {
                post_id: post_id.clone(),
                comment: comment.clone(),
                position: Some(*position),
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct CommentCoordinator {
    ctx: Arc<CoordinatorContext>,
    status: Arc<CoordinatorStatus>,
}

impl CommentCoordinator {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(CoordinatorStatus::new("comments")),
        }
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    fn owning_post(&self, comment_id: &str) -> Option<String> {
        self.ctx
            .store
            .snapshot()
            .post_with_comment(comment_id)
            .map(|post| post.id.clone())
    }

    #[instrument(skip(self, request), fields(post_id = %request.post_id))]
    pub async fn add_comment(&self, request: NewCommentRequest) -> AppResult<Comment> {
        if let Err(e) = request.validate() {
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = AddComment {
            request,
            temp_id: self.ctx.temp_ids.next_id(),
            optimistic: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    #[instrument(skip(self, request), fields(comment_id = %request.comment_id))]
    pub async fn update_comment(&self, request: CommentUpdateRequest) -> AppResult<Comment> {
        if let Err(e) = request.validate() {
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = UpdateComment {
            post_hint: self.owning_post(&request.comment_id),
            request,
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    #[instrument(skip(self))]
    pub async fn remove_comment(&self, comment_id: &str) -> AppResult<()> {
        let mutation = RemoveComment {
            comment_id: comment_id.to_string(),
            post_hint: self.owning_post(comment_id),
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{PostCoordinator, UserCoordinator};
    use crate::gateway::InMemoryGateway;
    use crate::store::Store;

    async fn setup() -> (CommentCoordinator, Arc<InMemoryGateway>, Store) {
        let gateway = Arc::new(InMemoryGateway::seeded());
        let store = Store::new();
        let ctx = Arc::new(CoordinatorContext::new(store.clone(), gateway.clone()));
        UserCoordinator::new(ctx.clone()).fetch_user("user-001").await.unwrap();
        PostCoordinator::new(ctx.clone()).fetch_posts().await.unwrap();
        (CommentCoordinator::new(ctx), gateway, store)
    }

    #[tokio::test]
    async fn test_add_comment_backfills_author() {
        let (comments, _gateway, store) = setup().await;
        let comment = comments
            .add_comment(NewCommentRequest {
                post_id: "post-002".to_string(),
                content: "Nice".to_string(),
            })
            .await
            .unwrap();

        assert!(comment.id.starts_with("comment-"));
        assert_eq!(comment.author.as_ref().unwrap().name, "John Doe");
        let post = store.snapshot().post("post-002").cloned().unwrap();
        assert_eq!(post.comments_count, 1);
        assert_eq!(post.comments_list, vec![comment]);
    }

    #[tokio::test]
    async fn test_failed_add_leaves_no_trace() {
        let (comments, gateway, store) = setup().await;
        let before = store.snapshot().post("post-001").cloned().unwrap();
        gateway.fail_next(Procedure::AddComment, "network error").await;

        let result = comments
            .add_comment(NewCommentRequest {
                post_id: "post-001".to_string(),
                content: "Hi".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.snapshot().post("post-001").unwrap(), &before);
    }

    #[tokio::test]
    async fn test_update_comment_rollback_restores_content() {
        let (comments, gateway, store) = setup().await;
        gateway.fail_next(Procedure::UpdateComment, "denied").await;

        let result = comments
            .update_comment(CommentUpdateRequest {
                comment_id: "comment-001".to_string(),
                content: "rewritten".to_string(),
            })
            .await;
        assert!(result.is_err());
        let state = store.snapshot();
        let comment = state.post("post-001").unwrap().comment("comment-001").unwrap();
        assert_eq!(comment.content, "Great summary of the field.");
        assert_eq!(state.error(), Some("denied"));
    }

    #[tokio::test]
    async fn test_remove_unknown_comment_is_not_found() {
        let (comments, gateway, _store) = setup().await;
        let err = comments.remove_comment("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(gateway.call_count(Procedure::RemoveComment).await, 0);
    }
}
