// Preferences coordinator - optimistic preference changes and preference fetch

use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::{decode_patch, CoordinatorContext, CoordinatorStatus, OptimisticMutation, StatusReport};
use crate::error::{AppError, AppResult};
use crate::gateway::params::{encode, GetPreferencesParams, UpdatePreferencesParams};
use crate::gateway::{Procedure, RpcResponse};
use crate::models::{Preferences, PreferencesPatch, PreferencesUpdateRequest};
use crate::store::{StoreMutation, StoreSnapshot};

const PREFERENCES_KEY: &str = "preferences";

struct ChangePreferences {
    patch: PreferencesPatch,
    snapshot: Option<Preferences>,
}

impl OptimisticMutation for ChangePreferences {
    type Output = Preferences;

    fn name(&self) -> &'static str {
        "update_user_preferences"
    }

    fn lock_key(&self) -> String {
        PREFERENCES_KEY.to_string()
    }

    fn procedure(&self) -> Procedure {
        Procedure::UpdateUserPreferences
    }

    fn params(&self) -> AppResult<Value> {
        encode(&UpdatePreferencesParams::from(&self.patch))
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        self.snapshot = Some(*state.preferences());
        Ok(vec![StoreMutation::SetPreferences(self.patch)])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, Preferences)> {
        match decode_patch::<PreferencesPatch>(response, Procedure::UpdateUserPreferences)? {
            Some(server) => {
                let mut confirmed = *state.preferences();
                confirmed.apply_patch(&server);
                Ok((vec![StoreMutation::SetPreferences(server)], confirmed))
            }
            None => Ok((Vec::new(), *state.preferences())),
        }
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        self.snapshot
            .iter()
            .map(|prefs| StoreMutation::SetPreferences(PreferencesPatch::from(*prefs)))
            .collect()
    }
}

#[derive(Debug)]
pub struct PreferencesCoordinator {
    ctx: Arc<CoordinatorContext>,
    status: Arc<CoordinatorStatus>,
}

impl PreferencesCoordinator {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(CoordinatorStatus::new("preferences")),
        }
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    #[instrument(skip(self))]
    pub async fn update_preferences(
        &self,
        request: PreferencesUpdateRequest,
    ) -> AppResult<Preferences> {
        if request.is_empty() {
            let e = AppError::Validation("preferences update changes no fields".to_string());
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = ChangePreferences {
            patch: request,
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    /// Load preferences; `None` means the signed-in user
    #[instrument(skip(self))]
    pub async fn fetch_preferences(&self, user_id: Option<&str>) -> AppResult<Option<Preferences>> {
        let params = encode(&GetPreferencesParams {
            p_user_id: user_id.map(str::to_string),
        })?;
        self.ctx
            .fetch(
                &self.status,
                Procedure::GetUserPreferences,
                params,
                |prefs: &Preferences, _| {
                    vec![StoreMutation::SetPreferences(PreferencesPatch::from(*prefs))]
                },
            )
            .await
    }
}
