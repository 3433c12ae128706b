/// Shared test helpers, available to all `#[cfg(test)]` modules in the crate
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::{AuthManager, AuthMode, Credentials, TokenPolicy, TokenStore};
use crate::cluster::{ClusterConfig, ClusterTopology};
use crate::error::TransportError;
use crate::transport::{Method, Request, Response, Transport};

type Handler = dyn Fn(&str, &Request) -> Result<Response, TransportError> + Send + Sync;

/// One request as seen by the scripted transport
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub node: String,
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
}

/// Transport whose answers come from a closure; records every call
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Request) -> Result<Response, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep before answering, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, node: &str, request: &Request) -> Result<Response, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            node: node.to_string(),
            method: request.method,
            path: request.path.clone(),
            authorization: request.header("Authorization").map(String::from),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(node, request)
    }
}

/// A successful login response carrying `jwt`
pub fn login_ok(jwt: &str) -> Result<Response, TransportError> {
    Ok(Response::json(200, &json!({ "jwt": jwt })))
}

/// Login handler that issues `jwt-1`, `jwt-2`, ... on successive logins
pub fn numbered_logins() -> impl Fn() -> String + Send + Sync {
    let counter = Arc::new(AtomicUsize::new(0));
    move || format!("jwt-{}", counter.fetch_add(1, Ordering::SeqCst) + 1)
}

/// A syntactically valid JWT whose payload carries `exp`
pub fn jwt_expiring_at(exp: u64) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "iss": "arangodb" }).to_string())
    )
}

pub fn refused(node: &str) -> Result<Response, TransportError> {
    Err(TransportError::ConnectionRefused {
        node: node.to_string(),
    })
}

pub fn topology(nodes: &[&str]) -> Arc<ClusterTopology> {
    let config = ClusterConfig::new(nodes.iter().copied()).unwrap();
    Arc::new(ClusterTopology::new(config, Duration::from_secs(30)).unwrap())
}

pub fn jwt_credentials() -> Credentials {
    Credentials::new("root", "secret", AuthMode::Jwt)
}

pub fn auth_manager(
    transport: Arc<ScriptedTransport>,
    topology: Arc<ClusterTopology>,
    store: TokenStore,
) -> AuthManager {
    AuthManager::new(
        jwt_credentials(),
        TokenPolicy::default(),
        store,
        topology,
        transport,
    )
}
