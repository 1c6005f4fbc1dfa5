// Connection coordinator - request, accept and drop connections of the signed-in user
// Every mutation rewrites the user's connection list and restores it on failure

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::{
    ensure_server_id, user_key, CoordinatorContext, CoordinatorStatus, OptimisticMutation,
    StatusReport,
};
use crate::error::{AppError, AppResult};
use crate::gateway::params::{encode, AcceptConnectionParams, ConnectedUserParams};
use crate::gateway::{Procedure, RpcResponse};
use crate::models::{
    AcceptConnectionRequest, ConnectionRequest, ConnectionStatus, User, UserConnection, UserPatch,
};
use crate::store::{StoreMutation, StoreSnapshot};

fn signed_in(state: &StoreSnapshot) -> AppResult<&User> {
    state
        .current_user()
        .ok_or_else(|| AppError::Validation("connections require a signed-in user".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionChange {
    Request,
    Accept,
    Remove,
}

impl ConnectionChange {
    fn procedure(self) -> Procedure {
        match self {
            ConnectionChange::Request => Procedure::AddConnection,
            ConnectionChange::Accept => Procedure::AcceptConnection,
            ConnectionChange::Remove => Procedure::RemoveConnection,
        }
    }
}

struct ChangeConnections {
    change: ConnectionChange,
    /// Target of a request or removal; the requester for an accept
    other_user_id: String,
    /// Signed-in user at the time of the call, used for the lock key
    user_hint: Option<String>,
    temp_id: String,
    snapshot: Option<(String, Vec<UserConnection>)>,
}

impl ChangeConnections {
    /// Connection list after the optimistic change, or the reason it cannot apply
    fn changed(&self, user: &User, state: &StoreSnapshot) -> AppResult<Vec<UserConnection>> {
        let mut connections = user.connections.clone();
        match self.change {
            ConnectionChange::Request => {
                if state.user(&self.other_user_id).is_none() {
                    return Err(AppError::NotFound(format!(
                        "User {} not found",
                        self.other_user_id
                    )));
                }
                connections.push(UserConnection {
                    id: self.temp_id.clone(),
                    user_id: user.id.clone(),
                    connected_user_id: self.other_user_id.clone(),
                    status: ConnectionStatus::Pending,
                    created_at: Utc::now(),
                });
            }
            ConnectionChange::Accept => {
                let pending = connections
                    .iter_mut()
                    .find(|c| c.user_id == self.other_user_id && c.status == ConnectionStatus::Pending)
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "Connection request from {} not found",
                            self.other_user_id
                        ))
                    })?;
                pending.status = ConnectionStatus::Accepted;
            }
            ConnectionChange::Remove => {
                if user.connection_to(&self.other_user_id).is_none() {
                    return Err(AppError::NotFound(format!(
                        "Connection to {} not found",
                        self.other_user_id
                    )));
                }
                connections.retain(|c| c.connected_user_id != self.other_user_id);
            }
        }
        Ok(connections)
    }
}

impl OptimisticMutation for ChangeConnections {
    type Output = ();

    fn name(&self) -> &'static str {
        self.change.procedure().as_str()
    }

    fn lock_key(&self) -> String {
        match &self.user_hint {
            Some(user_id) => user_key(user_id),
            None => "user:anonymous".to_string(),
        }
    }

    fn procedure(&self) -> Procedure {
        self.change.procedure()
    }

    fn params(&self) -> AppResult<Value> {
        match self.change {
            ConnectionChange::Accept => encode(&AcceptConnectionParams {
                p_user_id: self.other_user_id.clone(),
            }),
            ConnectionChange::Request | ConnectionChange::Remove => encode(&ConnectedUserParams {
                p_connected_user_id: self.other_user_id.clone(),
            }),
        }
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        let user = signed_in(state)?;
        let connections = self.changed(user, state)?;
        self.snapshot = Some((user.id.clone(), user.connections.clone()));
        Ok(vec![StoreMutation::UpdateUser {
            id: user.id.clone(),
            patch: UserPatch::connections(connections),
        }])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, ())> {
        let procedure = self.change.procedure();
        let Some(payload) = response.acknowledge(procedure)? else {
            return Ok((Vec::new(), ()));
        };
        if self.change != ConnectionChange::Request {
            return Ok((Vec::new(), ()));
        }

        // A request may be acknowledged with the stored connection row.
        let confirmed: UserConnection = serde_json::from_value(payload).map_err(|e| {
            AppError::RemoteFailure(format!("malformed {} response: {}", procedure, e))
        })?;
        ensure_server_id(&confirmed.id, procedure)?;
        let user = signed_in(state)?;
        let connections = user
            .connections
            .iter()
            .map(|c| if c.id == self.temp_id { confirmed.clone() } else { c.clone() })
            .collect();
        let mutation = StoreMutation::UpdateUser {
            id: user.id.clone(),
            patch: UserPatch::connections(connections),
        };
        Ok((vec![mutation], ()))
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        self.snapshot
            .iter()
            .map(|(user_id, connections)| StoreMutation::UpdateUser {
                id: user_id.clone(),
                patch: UserPatch::connections(connections.clone()),
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct ConnectionCoordinator {
    ctx: Arc<CoordinatorContext>,
    status: Arc<CoordinatorStatus>,
}

impl ConnectionCoordinator {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(CoordinatorStatus::new("connections")),
        }
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    async fn run(&self, change: ConnectionChange, other_user_id: String) -> AppResult<()> {
        if other_user_id.trim().is_empty() {
            let e = AppError::Validation("user id is required".to_string());
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = ChangeConnections {
            change,
            other_user_id,
            user_hint: self.ctx.store.snapshot().current_user().map(|u| u.id.clone()),
            temp_id: self.ctx.temp_ids.next_id(),
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    /// Send a pending connection request from the signed-in user
    #[instrument(skip(self, request), fields(target = %request.connected_user_id))]
    pub async fn add_connection(&self, request: ConnectionRequest) -> AppResult<()> {
        self.run(ConnectionChange::Request, request.connected_user_id)
            .await
    }

    /// Accept the pending request `request.user_id` sent to the signed-in user
    #[instrument(skip(self, request), fields(requester = %request.user_id))]
    pub async fn accept_connection(&self, request: AcceptConnectionRequest) -> AppResult<()> {
        self.run(ConnectionChange::Accept, request.user_id).await
    }

    #[instrument(skip(self, request), fields(target = %request.connected_user_id))]
    pub async fn remove_connection(&self, request: ConnectionRequest) -> AppResult<()> {
        self.run(ConnectionChange::Remove, request.connected_user_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::UserCoordinator;
    use crate::gateway::InMemoryGateway;
    use crate::store::Store;
    use serde_json::json;

    async fn setup() -> (ConnectionCoordinator, Arc<InMemoryGateway>, Store) {
        let gateway = Arc::new(InMemoryGateway::seeded());
        let store = Store::new();
        let ctx = Arc::new(CoordinatorContext::new(store.clone(), gateway.clone()));
        let users = UserCoordinator::new(ctx.clone());
        users.fetch_user("user-001").await.unwrap();
        users.fetch_all_users().await.unwrap();
        (ConnectionCoordinator::new(ctx), gateway, store)
    }

    fn my_connections(store: &Store) -> Vec<UserConnection> {
        store.snapshot().current_user().unwrap().connections.clone()
    }

    #[tokio::test]
    async fn test_accept_pending_request() {
        let (connections, _gateway, store) = setup().await;
        connections
            .accept_connection(AcceptConnectionRequest {
                user_id: "user-003".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(my_connections(&store)[0].status, ConnectionStatus::Accepted);
    }

    #[tokio::test]
    async fn test_request_keeps_pending_entry_on_plain_ack() {
        let (connections, _gateway, store) = setup().await;
        connections
            .add_connection(ConnectionRequest {
                connected_user_id: "user-002".to_string(),
            })
            .await
            .unwrap();
        let conn = my_connections(&store)
            .into_iter()
            .find(|c| c.connected_user_id == "user-002")
            .unwrap();
        assert_eq!(conn.status, ConnectionStatus::Pending);
    }

    #[tokio::test]
    async fn test_request_adopts_server_row() {
        let (connections, gateway, store) = setup().await;
        gateway
            .script(
                Procedure::AddConnection,
                RpcResponse::ok(json!({
                    "id": "conn-900",
                    "user_id": "user-001",
                    "connected_user_id": "user-002",
                    "status": "pending",
                    "created_at": "2024-06-01T12:00:00Z"
                })),
            )
            .await;
        connections
            .add_connection(ConnectionRequest {
                connected_user_id: "user-002".to_string(),
            })
            .await
            .unwrap();
        assert!(my_connections(&store).iter().any(|c| c.id == "conn-900"));
    }

    #[tokio::test]
    async fn test_rejected_request_restores_list() {
        let (connections, gateway, store) = setup().await;
        let before = my_connections(&store);
        gateway
            .script(Procedure::AddConnection, RpcResponse::ok(json!(false)))
            .await;
        let err = connections
            .add_connection(ConnectionRequest {
                connected_user_id: "user-002".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteFailure(_)));
        assert_eq!(my_connections(&store), before);
    }

    #[tokio::test]
    async fn test_remove_without_connection_is_not_found() {
        let (connections, gateway, _store) = setup().await;
        let err = connections
            .remove_connection(ConnectionRequest {
                connected_user_id: "user-002".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(gateway.call_count(Procedure::RemoveConnection).await, 0);
    }
}
