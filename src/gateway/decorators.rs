// Gateway Decorators - pluggable features composed around any gateway
// InstrumentedGateway records per-procedure stats, TimeoutGateway bounds call latency

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::{Procedure, RemoteProcedureGateway, RpcResponse};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureStats {
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub per_procedure: HashMap<String, ProcedureStats>,
}

/// Metrics decorator - traces every call and keeps call/failure/latency counters
#[derive(Debug)]
pub struct InstrumentedGateway {
    inner: Arc<dyn RemoteProcedureGateway>,
    stats: RwLock<GatewayStats>,
}

impl InstrumentedGateway {
    pub fn new(inner: Arc<dyn RemoteProcedureGateway>) -> Self {
        Self {
            inner,
            stats: RwLock::new(GatewayStats::default()),
        }
    }

    pub async fn stats(&self) -> GatewayStats {
        self.stats.read().await.clone()
    }

    async fn record_call(&self, procedure: Procedure, elapsed: Duration, success: bool) {
        let mut stats = self.stats.write().await;
        stats.total_calls += 1;
        if !success {
            stats.failed_calls += 1;
        }

        let entry = stats
            .per_procedure
            .entry(procedure.as_str().to_string())
            .or_default();
        entry.calls += 1;
        if !success {
            entry.failures += 1;
        }
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        entry.avg_latency_ms =
            (entry.avg_latency_ms * (entry.calls - 1) as f64 + elapsed_ms) / entry.calls as f64;
    }
}

#[async_trait]
impl RemoteProcedureGateway for InstrumentedGateway {
    #[instrument(skip(self, params), fields(procedure = %procedure, gateway = self.inner.gateway_name()))]
    async fn call(&self, procedure: Procedure, params: Value) -> RpcResponse {
        let start = Instant::now();
        let response = self.inner.call(procedure, params).await;
        let elapsed = start.elapsed();

        match &response.error {
            Some(error) => warn!("{} failed after {:?}: {}", procedure, elapsed, error.message),
            None => debug!("{} succeeded in {:?}", procedure, elapsed),
        }
        self.record_call(procedure, elapsed, !response.is_failure()).await;
        response
    }

    fn gateway_name(&self) -> &'static str {
        "InstrumentedGateway"
    }
}

/// Timeout decorator - an elapsed call becomes a failed response.
/// The inner call is dropped, so the server may still have applied it.
#[derive(Debug)]
pub struct TimeoutGateway {
    inner: Arc<dyn RemoteProcedureGateway>,
    timeout: Duration,
}

impl TimeoutGateway {
    pub fn new(inner: Arc<dyn RemoteProcedureGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl RemoteProcedureGateway for TimeoutGateway {
    async fn call(&self, procedure: Procedure, params: Value) -> RpcResponse {
        match tokio::time::timeout(self.timeout, self.inner.call(procedure, params)).await {
            Ok(response) => response,
            Err(_) => {
                warn!("{} timed out after {:?}", procedure, self.timeout);
                RpcResponse::failure(format!(
                    "{} timed out after {}ms",
                    procedure,
                    self.timeout.as_millis()
                ))
            }
        }
    }

    fn gateway_name(&self) -> &'static str {
        "TimeoutGateway"
    }
}
