/// Pasarela - resilient, JWT-authenticated client core for ArangoDB clusters
///
/// Pasarela sits between application code and a multi-node cluster:
/// 1. Node selection: ordered failover with a per-node failure cooldown
/// 2. Authentication: one shared JWT per process, renewed on demand with
///    at most one login in flight, optionally cached on disk across restarts
/// 3. Safety: destructive operations gated centrally before reaching the network
///
/// Application code only ever holds a [`Pasarela`] client or a
/// [`DatabaseHandle`]; every call goes through one [`RequestDispatcher`].
pub mod auth;
pub mod cluster;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod safety;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testutil;

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::utils::path_segment;

pub use auth::{AuthManager, AuthMode, AuthToken, Credentials, TokenCacheMode, TokenPolicy, TokenStore};
pub use cluster::{ClusterConfig, ClusterTopology};
pub use config::Config;
pub use database::{CollectionInfo, DatabaseHandle, Document, ReadOutcome};
pub use dispatch::{Operation, RequestDispatcher};
pub use error::{ConfigError, PasarelaError, PasarelaResult, TransportError};
pub use safety::{Capability, OperationKind, SafetyGuard, SafetyPolicy};
pub use transport::{HttpTransport, Method, Request, Response, Transport};

/// Database every server-level call is addressed to
pub const SYSTEM_DATABASE: &str = "_system";

/// Server identification returned by `ping`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerVersion {
    pub server: String,
    pub version: String,
    #[serde(default)]
    pub license: Option<String>,
}

#[derive(Deserialize)]
struct DatabaseList {
    result: Vec<String>,
}

/// Client entry point: one shared dispatcher plus a default database
#[derive(Clone)]
pub struct Pasarela {
    dispatcher: Arc<RequestDispatcher>,
    default_database: String,
}

impl Pasarela {
    /// Build a client with the reqwest transport
    pub fn from_config(config: &Config) -> PasarelaResult<Self> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a client on top of an arbitrary transport
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> PasarelaResult<Self> {
        config.validate()?;
        let cluster = config.cluster_config()?;

        let topology = Arc::new(ClusterTopology::new(cluster, config.failure_cooldown())?);
        let auth = AuthManager::new(
            config.credentials(),
            config.token_policy(),
            config.token_store(),
            topology.clone(),
            transport.clone(),
        );
        let guard = SafetyGuard::new(config.safety);

        tracing::info!(
            nodes = topology.len(),
            auth_mode = %auth.mode(),
            token_cache = %auth.store_mode(),
            database = %config.database,
            "Pasarela client initialized"
        );

        Ok(Self {
            dispatcher: Arc::new(RequestDispatcher::new(topology, auth, guard, transport)),
            default_database: config.database.clone(),
        })
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    pub fn database<S: Into<String>>(&self, name: S) -> DatabaseHandle {
        DatabaseHandle::new(name, self.dispatcher.clone())
    }

    pub fn default_database(&self) -> DatabaseHandle {
        self.database(self.default_database.clone())
    }

    async fn system(&self, kind: OperationKind, request: Request) -> PasarelaResult<Response> {
        self.dispatcher
            .execute(Operation::new(SYSTEM_DATABASE, kind, request))
            .await
    }

    /// Round trip to the cluster, authenticating if needed
    pub async fn ping(&self) -> PasarelaResult<ServerVersion> {
        let response = self
            .system(OperationKind::Read, Request::get("/_api/version"))
            .await?;
        if !response.is_success() {
            return Err(response.into_backend_error());
        }
        response.parse()
    }

    /// Databases the current user can access
    pub async fn list_databases(&self) -> PasarelaResult<Vec<String>> {
        let response = self
            .system(OperationKind::Read, Request::get("/_api/database/user"))
            .await?;
        if !response.is_success() {
            return Err(response.into_backend_error());
        }
        Ok(response.parse::<DatabaseList>()?.result)
    }

    /// Create a database. Returns `false` if it already existed.
    pub async fn create_database(&self, name: &str) -> PasarelaResult<bool> {
        let request = Request::post("/_api/database").with_json(json!({ "name": name }));
        let response = self.system(OperationKind::Admin, request).await?;
        match response.status {
            200 | 201 => {
                tracing::info!(database = %name, "Created database");
                Ok(true)
            }
            409 => Ok(false),
            _ => Err(response.into_backend_error()),
        }
    }

    /// Drop a database; subject to the safety policy.
    /// Returns `false` if it did not exist.
    pub async fn drop_database(&self, name: &str) -> PasarelaResult<bool> {
        let request = Request::delete(format!("/_api/database/{}", path_segment(name)));
        let response = self.system(OperationKind::DropDatabase, request).await?;
        match response.status {
            200 | 202 => {
                tracing::warn!(database = %name, "Dropped database");
                Ok(true)
            }
            404 => Ok(false),
            _ => Err(response.into_backend_error()),
        }
    }
}
