// Optimistic Mutation Coordinator - apply locally, call the server, confirm or roll back
// Every entity coordinator describes its mutation; `CoordinatorContext::execute` runs the protocol

pub mod comments;
pub mod connections;
pub mod network;
pub mod posts;
pub mod preferences;
pub mod users;

pub use comments::CommentCoordinator;
pub use connections::ConnectionCoordinator;
pub use network::NetworkCoordinator;
pub use posts::PostCoordinator;
pub use preferences::PreferencesCoordinator;
pub use users::UserCoordinator;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::core::{KeyedLocks, TempIdGenerator};
use crate::error::{AppError, AppResult};
use crate::gateway::{Procedure, RemoteProcedureGateway, RpcResponse};
use crate::store::{Store, StoreMutation, StoreSnapshot};

/// One optimistic mutation, described as data. The protocol itself lives in
/// `CoordinatorContext::execute`.
pub trait OptimisticMutation: Send {
    type Output: Send;

    fn name(&self) -> &'static str;

    /// Mutations sharing a key run one at a time
    fn lock_key(&self) -> String;

    fn procedure(&self) -> Procedure;

    fn params(&self) -> AppResult<Value>;

    /// Check preconditions against `state`, capture the rollback snapshot and
    /// return the optimistic mutations. Runs atomically with their application.
    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>>;

    /// Turn the server response into confirming mutations. An error here rolls back.
    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, Self::Output)>;

    /// Mutations restoring the state captured by `prepare`
    fn rollback(&self) -> Vec<StoreMutation>;
}

/// Per-coordinator loading flag, error field and counters
#[derive(Debug)]
pub struct CoordinatorStatus {
    name: &'static str,
    in_flight: AtomicUsize,
    error: Mutex<Option<String>>,
    applied: AtomicU64,
    confirmed: AtomicU64,
    rolled_back: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub name: String,
    pub is_loading: bool,
    pub error: Option<String>,
    pub applied: u64,
    pub confirmed: u64,
    pub rolled_back: u64,
    pub rejected: u64,
}

impl CoordinatorStatus {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            in_flight: AtomicUsize::new(0),
            error: Mutex::new(None),
            applied: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_error(&self, error: Option<String>) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            name: self.name.to_string(),
            is_loading: self.is_loading(),
            error: self.error(),
            applied: self.applied.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Global loading flag: set while any coordinator operation is in flight.
/// The counter only moves inside a store transition, so the flag always matches it.
#[derive(Debug, Default)]
pub struct LoadingTracker {
    in_flight: AtomicUsize,
}

impl LoadingTracker {
    fn shift(&self, store: &Store, starting: bool) {
        let outcome: AppResult<()> = store.transact(|_| {
            let remaining = if starting {
                self.in_flight.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
            };
            Ok((vec![StoreMutation::SetLoading(remaining > 0)], ()))
        });
        if let Err(e) = outcome {
            warn!("loading flag update failed: {}", e);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Clears both loading flags when the operation ends, including when its future is dropped
struct LoadingGuard<'a> {
    store: &'a Store,
    tracker: &'a LoadingTracker,
    status: &'a CoordinatorStatus,
}

impl<'a> LoadingGuard<'a> {
    fn begin(store: &'a Store, tracker: &'a LoadingTracker, status: &'a CoordinatorStatus) -> Self {
        status.in_flight.fetch_add(1, Ordering::SeqCst);
        tracker.shift(store, true);
        Self {
            store,
            tracker,
            status,
        }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.status.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.tracker.shift(self.store, false);
    }
}

/// Restores the snapshot if the protocol task dies between the optimistic apply and reconciliation
struct PendingRollback<'a> {
    store: &'a Store,
    operation: &'static str,
    mutations: Option<Vec<StoreMutation>>,
}

impl PendingRollback<'_> {
    fn disarm(&mut self) -> Vec<StoreMutation> {
        self.mutations.take().unwrap_or_default()
    }
}

impl Drop for PendingRollback<'_> {
    fn drop(&mut self) {
        if let Some(mutations) = self.mutations.take() {
            warn!("{} ended before the server answered; rolling back", self.operation);
            self.store.dispatch_all(mutations);
        }
    }
}

/// Everything the coordinators share: the store, the gateway and the protocol plumbing
#[derive(Debug)]
pub struct CoordinatorContext {
    pub store: Store,
    pub gateway: Arc<dyn RemoteProcedureGateway>,
    pub temp_ids: TempIdGenerator,
    locks: KeyedLocks,
    loading: LoadingTracker,
}

impl CoordinatorContext {
    pub fn new(store: Store, gateway: Arc<dyn RemoteProcedureGateway>) -> Self {
        Self {
            store,
            gateway,
            temp_ids: TempIdGenerator::new(),
            locks: KeyedLocks::new(),
            loading: LoadingTracker::default(),
        }
    }

    pub fn loading(&self) -> &LoadingTracker {
        &self.loading
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Run one optimistic mutation through the full protocol. The protocol runs in
    /// its own task: a caller that stops waiting does not cancel the remote call,
    /// and confirmation or rollback still happens.
    #[instrument(skip(self, status, mutation), fields(operation = mutation.name()))]
    pub async fn execute<M>(
        self: &Arc<Self>,
        status: &Arc<CoordinatorStatus>,
        mutation: M,
    ) -> AppResult<M::Output>
    where
        M: OptimisticMutation + 'static,
        M::Output: 'static,
    {
        let operation = mutation.name();
        let ctx = Arc::clone(self);
        let status = Arc::clone(status);
        let task = tokio::spawn(
            async move { ctx.run_protocol(&status, mutation).await }.in_current_span(),
        );
        task.await.map_err(|e| {
            error!("{} task failed: {}", operation, e);
            AppError::Internal(format!("{} did not complete: {}", operation, e))
        })?
    }

    async fn run_protocol<M: OptimisticMutation>(
        &self,
        status: &CoordinatorStatus,
        mut mutation: M,
    ) -> AppResult<M::Output> {
        let operation = mutation.name();
        let params = match mutation.params() {
            Ok(params) => params,
            Err(e) => return Err(self.reject(status, e)),
        };

        let _key = self.locks.acquire(&mutation.lock_key()).await;
        let _loading = LoadingGuard::begin(&self.store, &self.loading, status);
        status.set_error(None);

        // 1-4. Precondition, snapshot, synthesis and optimistic apply in one transition
        let prepared = self
            .store
            .transact(|state| mutation.prepare(state).map(|mutations| (mutations, ())));
        if let Err(e) = prepared {
            return Err(self.reject(status, e));
        }
        status.applied.fetch_add(1, Ordering::Relaxed);
        let mut pending = PendingRollback {
            store: &self.store,
            operation,
            mutations: Some(mutation.rollback()),
        };
        debug!("{} applied optimistically", operation);

        // 5. Remote invocation
        let procedure = mutation.procedure();
        let response = self.gateway.call(procedure, params).await;

        // 6. Confirm with server data
        let rollback = pending.disarm();
        let confirmed = self
            .store
            .transact(|state| mutation.reconcile(response, state));

        match confirmed {
            Ok(output) => {
                status.confirmed.fetch_add(1, Ordering::Relaxed);
                info!("{} confirmed by {}", operation, procedure);
                Ok(output)
            }
            // 7. Roll back and surface the failure
            Err(e) => {
                status.rolled_back.fetch_add(1, Ordering::Relaxed);
                warn!("{} rolled back: {}", operation, e);
                let message = e.message().to_string();
                let mut restore = rollback;
                restore.push(StoreMutation::SetError(Some(message.clone())));
                self.store.dispatch_all(restore);
                status.set_error(Some(message));
                Err(e)
            }
        }
        // 8. Loading flags clear when `_loading` drops
    }

    /// Non-optimistic read: call, decode and apply. Failures are recorded, nothing to undo.
    #[instrument(skip(self, status, params, apply), fields(procedure = %procedure))]
    pub async fn fetch<T, F>(
        &self,
        status: &CoordinatorStatus,
        procedure: Procedure,
        params: Value,
        apply: F,
    ) -> AppResult<Option<T>>
    where
        T: DeserializeOwned + Send,
        F: FnOnce(&T, &StoreSnapshot) -> Vec<StoreMutation> + Send,
    {
        let _loading = LoadingGuard::begin(&self.store, &self.loading, status);
        status.set_error(None);

        let response = self.gateway.call(procedure, params).await;
        let applied = self.store.transact(|state| {
            let decoded: Option<T> = response.decode(procedure)?;
            let mutations = match &decoded {
                Some(value) => apply(value, state),
                None => Vec::new(),
            };
            Ok((mutations, decoded))
        });

        match applied {
            Ok(decoded) => {
                status.confirmed.fetch_add(1, Ordering::Relaxed);
                if decoded.is_none() {
                    debug!("{} returned no data", procedure);
                }
                Ok(decoded)
            }
            Err(e) => {
                warn!("{} failed: {}", procedure, e);
                Err(self.record_error(status, e))
            }
        }
    }

    /// Failure before any optimistic apply
    fn reject(&self, status: &CoordinatorStatus, error: AppError) -> AppError {
        status.rejected.fetch_add(1, Ordering::Relaxed);
        debug!("rejected: {}", error);
        self.record_error(status, error)
    }

    fn record_error(&self, status: &CoordinatorStatus, error: AppError) -> AppError {
        let message = error.message().to_string();
        status.set_error(Some(message.clone()));
        self.store.set_error(Some(message));
        error
    }
}

/// Overlay the server's object onto the optimistic value so omitted (or null)
/// fields keep their local values, then decode.
pub(crate) fn backfill<T>(optimistic: &T, server: Value, procedure: Procedure) -> AppResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(optimistic)?;
    match (merged.as_object_mut(), server) {
        (Some(base), Value::Object(fields)) => {
            for (key, value) in fields {
                if !value.is_null() {
                    base.insert(key, value);
                }
            }
        }
        (_, other) => {
            return Err(AppError::RemoteFailure(format!(
                "malformed {} response: expected an object, got {}",
                procedure, other
            )))
        }
    }
    serde_json::from_value(merged)
        .map_err(|e| AppError::RemoteFailure(format!("malformed {} response: {}", procedure, e)))
}

/// Server-issued ids must never fall in the temporary namespace
pub(crate) fn ensure_server_id(id: &str, procedure: Procedure) -> AppResult<()> {
    if TempIdGenerator::is_temporary(id) {
        return Err(AppError::RemoteFailure(format!(
            "{} returned reserved temporary id {}",
            procedure, id
        )));
    }
    Ok(())
}

/// Decode an optional server patch; `None` keeps the optimistic value as confirmed
pub(crate) fn decode_patch<P: DeserializeOwned>(
    response: RpcResponse,
    procedure: Procedure,
) -> AppResult<Option<P>> {
    response.decode(procedure)
}

pub(crate) fn post_key(post_id: &str) -> String {
    format!("post:{}", post_id)
}

pub(crate) fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}
