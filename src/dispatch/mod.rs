/// Request dispatch: safety check, credential, node selection, bounded retries
///
/// Per logical call the dispatcher retries an auth rejection at most once
/// (against the same node, with a renewed token) and fails over across at
/// most as many node attempts as there are configured nodes. The two budgets
/// are independent, so a call issues at most `nodes + 1` requests.
use std::collections::HashSet;
use std::sync::Arc;

use crate::auth::{AuthManager, Credential};
use crate::cluster::ClusterTopology;
use crate::error::{PasarelaError, PasarelaResult, TransportError};
use crate::safety::{OperationKind, SafetyGuard};
use crate::transport::{Request, Response, Transport};
use crate::utils::path_segment;

/// One logical operation against one database
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub database: String,
    pub kind: OperationKind,
    /// Request with a database-relative path, e.g. `/_api/collection`
    pub request: Request,
}

impl Operation {
    pub fn new<S: Into<String>>(database: S, kind: OperationKind, request: Request) -> Self {
        Self {
            database: database.into(),
            kind,
            request,
        }
    }

    /// Request as sent on the wire: path scoped under `/_db/<database>`
    fn to_wire(&self, credential: &Credential) -> Request {
        let mut request = self.request.clone();
        request.path = format!("/_db/{}{}", path_segment(&self.database), self.request.path);
        if let Some(authorization) = credential.authorization() {
            request.set_header("Authorization", authorization);
        }
        request
    }
}

/// Why a single attempt against a node did not produce a result
enum AttemptFailure {
    AuthRejected,
    Node(String),
}

/// Shared by every `DatabaseHandle`; holds no per-call state
#[derive(Clone)]
pub struct RequestDispatcher {
    topology: Arc<ClusterTopology>,
    auth: AuthManager,
    guard: SafetyGuard,
    transport: Arc<dyn Transport>,
}

impl RequestDispatcher {
    pub fn new(
        topology: Arc<ClusterTopology>,
        auth: AuthManager,
        guard: SafetyGuard,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            topology,
            auth,
            guard,
            transport,
        }
    }

    pub fn topology(&self) -> &Arc<ClusterTopology> {
        &self.topology
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.guard
    }

    /// Execute one logical operation.
    ///
    /// Any response that is neither an auth rejection nor a 5xx is returned
    /// to the caller as-is, including 4xx statuses; interpreting those is
    /// the caller's business.
    pub async fn execute(&self, operation: Operation) -> PasarelaResult<Response> {
        // Denied destructive operations never reach the network
        self.guard.check_allowed(operation.kind)?;

        let mut credential = self.auth.current_token().await?;
        let mut excluded: HashSet<String> = HashSet::new();
        let mut node = self.topology.next_candidate(&excluded)?;
        let mut node_attempts = 0usize;
        let mut auth_retried = false;

        loop {
            let request = operation.to_wire(&credential);
            let failure = match self.transport.send(&node, &request).await {
                Ok(response) if response.is_auth_rejected() => AttemptFailure::AuthRejected,
                Ok(response) if response.is_server_error() => {
                    AttemptFailure::Node(format!("status {}", response.status))
                }
                Ok(response) => {
                    self.topology.report_success(&node);
                    tracing::debug!(
                        node = %node,
                        database = %operation.database,
                        kind = %operation.kind,
                        status = response.status,
                        "Operation completed"
                    );
                    return Ok(response);
                }
                Err(TransportError::InvalidRequest(message)) => {
                    return Err(PasarelaError::Transport(TransportError::InvalidRequest(message)));
                }
                Err(e) => AttemptFailure::Node(e.to_string()),
            };

            match failure {
                AttemptFailure::AuthRejected => {
                    let rejected = match (&credential, auth_retried) {
                        (Credential::Bearer(token), false) => token.clone(),
                        _ => {
                            return Err(PasarelaError::auth_failed(format!(
                                "request to {} rejected with 401",
                                node
                            )))
                        }
                    };
                    auth_retried = true;
                    tracing::info!(node = %node, database = %operation.database, "Token rejected, renewing and retrying once");
                    self.auth.invalidate_if_current(&rejected).await;
                    credential = self.auth.current_token().await?;
                }
                AttemptFailure::Node(reason) => {
                    node_attempts += 1;
                    tracing::warn!(
                        node = %node,
                        database = %operation.database,
                        attempt = node_attempts,
                        reason = %reason,
                        "Node attempt failed"
                    );
                    self.topology.report_failure(&node);
                    if node_attempts >= self.topology.len() {
                        tracing::error!(
                            database = %operation.database,
                            attempts = node_attempts,
                            "All cluster nodes failed"
                        );
                        return Err(PasarelaError::ClusterUnavailable {
                            attempts: node_attempts,
                        });
                    }
                    excluded.insert(node);
                    node = self.topology.next_candidate(&excluded)?;
                }
            }
        }
    }
}
