// User coordinator - profile edits with rollback, plus user fetches

use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::{
    decode_patch, user_key, CoordinatorContext, CoordinatorStatus, OptimisticMutation,
    StatusReport,
};
use crate::error::{AppError, AppResult};
use crate::gateway::params::{encode, GetUserParams, UpdateUserParams};
use crate::gateway::{Procedure, RpcResponse};
use crate::models::{User, UserPatch, UserUpdateRequest};
use crate::store::{StoreMutation, StoreSnapshot};

/// Empty strings clear optional profile fields
fn optional_field(value: &Option<String>) -> Option<Option<String>> {
    value
        .as_ref()
        .map(|v| Some(v.clone()).filter(|v| !v.is_empty()))
}

impl From<&UserUpdateRequest> for UserPatch {
    fn from(request: &UserUpdateRequest) -> Self {
        Self {
            name: request.name.clone(),
            email: request.email.clone(),
            avatar: optional_field(&request.avatar),
            bio: optional_field(&request.bio),
            subtitle: optional_field(&request.subtitle),
            ..UserPatch::default()
        }
    }
}

struct UpdateUser {
    request: UserUpdateRequest,
    /// Listed copy and signed-in copy, captured separately so both restore exactly
    snapshot: Option<(Option<User>, Option<User>)>,
}

impl OptimisticMutation for UpdateUser {
    type Output = User;

    fn name(&self) -> &'static str {
        "update_user"
    }

    fn lock_key(&self) -> String {
        user_key(&self.request.user_id)
    }

    fn procedure(&self) -> Procedure {
        Procedure::UpdateUser
    }

    fn params(&self) -> AppResult<Value> {
        encode(&UpdateUserParams::from(&self.request))
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let id = &self.request.user_id;
        let listed = state.user(id).cloned();
        let current = state.current_user().filter(|u| &u.id == id).cloned();
        if listed.is_none() && current.is_none() {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        self.snapshot = Some((listed, current));
        Ok(vec![StoreMutation::UpdateUser {
            id: id.clone(),
            patch: UserPatch::from(&self.request),
        }])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, User)> {
        let id = &self.request.user_id;
        let mut user = state
            .user(id)
            .or_else(|| state.current_user().filter(|u| &u.id == id))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        match decode_patch::<UserPatch>(response, Procedure::UpdateUser)? {
            Some(patch) => {
                user.apply_patch(&patch);
                let mutation = StoreMutation::UpdateUser {
                    id: id.clone(),
                    patch,
                };
                Ok((vec![mutation], user))
            }
            None => Ok((Vec::new(), user)),
        }
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        let Some((listed, current)) = &self.snapshot else {
            return Vec::new();
        };
        let mut mutations = Vec::new();
        if let Some(user) = listed {
            mutations.push(StoreMutation::UpdateUser {
                id: user.id.clone(),
                patch: UserPatch::from(user),
            });
        }
        if let Some(user) = current {
            mutations.push(StoreMutation::SetUser(Some(user.clone())));
        }
        mutations
    }
}

#[derive(Debug)]
pub struct UserCoordinator {
    ctx: Arc<CoordinatorContext>,
    status: Arc<CoordinatorStatus>,
}

impl UserCoordinator {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(CoordinatorStatus::new("users")),
        }
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn update_user(&self, request: UserUpdateRequest) -> AppResult<User> {
        if let Err(e) = request.validate() {
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = UpdateUser {
            request,
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    /// Load a user and make them the signed-in user
    #[instrument(skip(self))]
    pub async fn fetch_user(&self, user_id: &str) -> AppResult<Option<User>> {
        let params = encode(&GetUserParams {
            user_id: user_id.to_string(),
        })?;
        self.ctx
            .fetch(&self.status, Procedure::GetUser, params, |user: &User, _| {
                vec![StoreMutation::SetUser(Some(user.clone()))]
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn fetch_all_users(&self) -> AppResult<Vec<User>> {
        let users = self
            .ctx
            .fetch(
                &self.status,
                Procedure::GetUsers,
                Value::Object(Default::default()),
                |users: &Vec<User>, _| vec![StoreMutation::SetAllUsers(users.clone())],
            )
            .await?;
        Ok(users.unwrap_or_default())
    }
}
