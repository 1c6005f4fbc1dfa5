// Network-data coordinator - wholesale graph replacement with rollback, plus graph fetch

use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::{decode_patch, CoordinatorContext, CoordinatorStatus, OptimisticMutation, StatusReport};
use crate::error::AppResult;
use crate::gateway::params::{encode, UpdateNetworkDataParams};
use crate::gateway::{Procedure, RpcResponse};
use crate::models::{NetworkDataUpdateRequest, NetworkGraph};
use crate::store::{StoreMutation, StoreSnapshot};

const NETWORK_KEY: &str = "network";

struct ReplaceGraph {
    request: NetworkDataUpdateRequest,
    snapshot: Option<NetworkGraph>,
}

impl OptimisticMutation for ReplaceGraph {
    type Output = NetworkGraph;

    fn name(&self) -> &'static str {
        "update_network_data"
    }

    fn lock_key(&self) -> String {
        NETWORK_KEY.to_string()
    }

    fn procedure(&self) -> Procedure {
        Procedure::UpdateNetworkData
    }

    fn params(&self) -> AppResult<Value> {
        encode(&UpdateNetworkDataParams::from(&self.request))
    }

    fn prepare(&mut self, state: &StoreSnapshot) -> AppResult<Vec<StoreMutation>> {
        self.snapshot = Some(state.network().clone());
        let graph = NetworkGraph::new(self.request.nodes.clone(), self.request.edges.clone());
        Ok(vec![StoreMutation::SetNetworkGraph(graph)])
    }

    fn reconcile(
        &mut self,
        response: RpcResponse,
        state: &StoreSnapshot,
    ) -> AppResult<(Vec<StoreMutation>, NetworkGraph)> {
        match decode_patch::<NetworkGraph>(response, Procedure::UpdateNetworkData)? {
            Some(graph) => Ok((vec![StoreMutation::SetNetworkGraph(graph.clone())], graph)),
            None => Ok((Vec::new(), state.network().clone())),
        }
    }

    fn rollback(&self) -> Vec<StoreMutation> {
        self.snapshot
            .iter()
            .map(|graph| StoreMutation::SetNetworkGraph(graph.clone()))
            .collect()
    }
}

#[derive(Debug)]
pub struct NetworkCoordinator {
    ctx: Arc<CoordinatorContext>,
    status: Arc<CoordinatorStatus>,
}

impl NetworkCoordinator {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(CoordinatorStatus::new("network")),
        }
    }

    pub fn status(&self) -> StatusReport {
        self.status.report()
    }

    #[instrument(skip(self, request), fields(nodes = request.nodes.len(), edges = request.edges.len()))]
    pub async fn update_network_data(
        &self,
        request: NetworkDataUpdateRequest,
    ) -> AppResult<NetworkGraph> {
        if let Err(e) = request.validate() {
            return Err(self.ctx.reject(&self.status, e));
        }
        let mutation = ReplaceGraph {
            request,
            snapshot: None,
        };
        self.ctx.execute(&self.status, mutation).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_network_data(&self) -> AppResult<Option<NetworkGraph>> {
        self.ctx
            .fetch(
                &self.status,
                Procedure::GetNetworkData,
                Value::Object(Default::default()),
                |graph: &NetworkGraph, _| vec![StoreMutation::SetNetworkGraph(graph.clone())],
            )
            .await
    }
}
