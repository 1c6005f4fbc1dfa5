// Remote Procedure Gateway - opaque `call(procedure, params) -> {data, error}` boundary
// Implementations: in-memory backend, plus decorators for instrumentation and timeouts

pub mod decorators;
pub mod memory;
pub mod params;

pub use decorators::{GatewayStats, InstrumentedGateway, TimeoutGateway};
pub use memory::InMemoryGateway;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{AppError, AppResult};

/// Stored procedures the client knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Procedure {
    GetUser,
    GetUsers,
    UpdateUser,
    GetPosts,
    GetPost,
    AddPost,
    UpdatePost,
    LikePost,
    RemovePost,
    AddComment,
    UpdateComment,
    RemoveComment,
    GetNetworkData,
    UpdateNetworkData,
    GetUserPreferences,
    UpdateUserPreferences,
    AddConnection,
    AcceptConnection,
    RemoveConnection,
}

impl Procedure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Procedure::GetUser => "get_user",
            Procedure::GetUsers => "get_users",
            Procedure::UpdateUser => "update_user",
            Procedure::GetPosts => "get_posts",
            Procedure::GetPost => "get_post",
            Procedure::AddPost => "add_post",
            Procedure::UpdatePost => "update_post",
            Procedure::LikePost => "like_post",
            Procedure::RemovePost => "remove_post",
            Procedure::AddComment => "add_comment",
            Procedure::UpdateComment => "update_comment",
            Procedure::RemoveComment => "remove_comment",
            Procedure::GetNetworkData => "get_network_data",
            Procedure::UpdateNetworkData => "update_network_data",
            Procedure::GetUserPreferences => "get_user_preferences",
            Procedure::UpdateUserPreferences => "update_user_preferences",
            Procedure::AddConnection => "add_connection",
            Procedure::AcceptConnection => "accept_connection",
            Procedure::RemoveConnection => "remove_connection",
        }
    }

    /// Read-only procedures never change server state
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Procedure::GetUser
                | Procedure::GetUsers
                | Procedure::GetPosts
                | Procedure::GetPost
                | Procedure::GetNetworkData
                | Procedure::GetUserPreferences
        )
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

/// Result envelope of a remote call. Any non-null `error` means failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(RpcError::new(message)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Payload of a successful call; `None` when the server returned null
    pub fn into_data(self) -> AppResult<Option<Value>> {
        if let Some(error) = self.error {
            return Err(AppError::RemoteFailure(error.message));
        }
        Ok(self.data.filter(|value| !value.is_null()))
    }

    /// Decode the payload into `T`. Undecodable payloads are remote failures.
    pub fn decode<T: DeserializeOwned>(self, procedure: Procedure) -> AppResult<Option<T>> {
        match self.into_data()? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                AppError::RemoteFailure(format!("malformed {} response: {}", procedure, e))
            }),
            None => Ok(None),
        }
    }

    /// Like `decode`, but a null payload is also a failure
    pub fn decode_required<T: DeserializeOwned>(self, procedure: Procedure) -> AppResult<T> {
        self.decode(procedure)?
            .ok_or_else(|| AppError::RemoteFailure(format!("{} returned no data", procedure)))
    }

    /// Boolean acknowledgement. `true` succeeds with no payload, `false` or null
    /// fail, any other value is handed back for the caller to decode.
    pub fn acknowledge(self, procedure: Procedure) -> AppResult<Option<Value>> {
        match self.into_data()? {
            Some(Value::Bool(true)) => Ok(None),
            Some(Value::Bool(false)) | None => Err(AppError::RemoteFailure(format!(
                "{} was not acknowledged",
                procedure
            ))),
            Some(other) => Ok(Some(other)),
        }
    }
}

/// Transport to the remote stored procedures. Implementations report every
/// failure through the response envelope rather than an `Err`.
#[async_trait]
pub trait RemoteProcedureGateway: Send + Sync + fmt::Debug {
    async fn call(&self, procedure: Procedure, params: Value) -> RpcResponse;

    /// Name used in logs
    fn gateway_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_wins_over_data() {
        let response = RpcResponse {
            data: Some(json!({"id": "p1"})),
            error: Some(RpcError::new("network error")),
        };
        assert_eq!(
            response.into_data(),
            Err(AppError::RemoteFailure("network error".to_string()))
        );
    }

    #[test]
    fn test_acknowledge() {
        assert_eq!(RpcResponse::ok(json!(true)).acknowledge(Procedure::RemovePost), Ok(None));
        assert!(RpcResponse::ok(json!(false)).acknowledge(Procedure::RemovePost).is_err());
        assert!(RpcResponse::empty().acknowledge(Procedure::RemovePost).is_err());
        assert_eq!(
            RpcResponse::ok(json!({"id": "c1"})).acknowledge(Procedure::AddConnection),
            Ok(Some(json!({"id": "c1"})))
        );
    }

    #[test]
    fn test_undecodable_payload_is_remote_failure() {
        let result: AppResult<Option<Vec<String>>> =
            RpcResponse::ok(json!({"not": "a list"})).decode(Procedure::GetUsers);
        assert!(matches!(result, Err(AppError::RemoteFailure(_))));

        let required: AppResult<Vec<String>> =
            RpcResponse::ok(Value::Null).decode_required(Procedure::GetUsers);
        assert!(required.is_err());
    }

    #[test]
    fn test_procedure_wire_names() {
        assert_eq!(Procedure::GetUserPreferences.to_string(), "get_user_preferences");
        assert_eq!(
            serde_json::to_value(Procedure::AcceptConnection).unwrap(),
            json!("accept_connection")
        );
        assert!(Procedure::GetPosts.is_read());
        assert!(!Procedure::LikePost.is_read());
    }
}
