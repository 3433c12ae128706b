/// Authentication: JWT acquisition, caching and single-flight renewal
///
/// `AuthManager` is an explicitly owned, cheaply cloneable handle. Every
/// dispatcher shares one instance per process; there is no global.
pub mod store;
pub mod token;

pub use store::{CacheEntry, DiskTokenStore, MemoryTokenStore, TokenCacheMode, TokenStore, TokenStoreError};
pub use token::{AuthMode, AuthToken, Credential, Credentials};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cluster::ClusterTopology;
use crate::error::{PasarelaError, PasarelaResult, TransportError};
use crate::transport::{Request, Transport};
use crate::utils::unix_now;

/// Login endpoint, relative to a node base URL
pub const LOGIN_PATH: &str = "/_open/auth";

/// How long tokens live and how early they are renewed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Used when the issued JWT carries no `exp` claim
    pub default_ttl: Duration,
    /// Tokens are renewed once `now >= expiry - refresh_margin`
    pub refresh_margin: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            refresh_margin: Duration::from_secs(60),
        }
    }
}

/// Outcome of a failed login, shared by every waiter of that login
#[derive(Debug, Clone)]
enum LoginFailure {
    Rejected(String),
    Unavailable { attempts: usize },
    Transport(TransportError),
}

impl From<LoginFailure> for PasarelaError {
    fn from(failure: LoginFailure) -> Self {
        match failure {
            LoginFailure::Rejected(reason) => PasarelaError::auth_failed(reason),
            LoginFailure::Unavailable { attempts } => PasarelaError::ClusterUnavailable { attempts },
            LoginFailure::Transport(e) => PasarelaError::Transport(e),
        }
    }
}

type PendingLogin = Shared<BoxFuture<'static, Result<AuthToken, LoginFailure>>>;

#[derive(Default)]
struct AuthState {
    token: Option<AuthToken>,
    pending: Option<PendingLogin>,
    /// The persisted cache is consulted only for the first acquisition
    store_checked: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    jwt: String,
}

struct AuthInner {
    credentials: Credentials,
    fingerprint: String,
    policy: TokenPolicy,
    store: TokenStore,
    topology: Arc<ClusterTopology>,
    transport: Arc<dyn Transport>,
    state: Mutex<AuthState>,
    logins: AtomicU64,
}

/// Hands out the credential for each request and renews JWTs
#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<AuthInner>,
}

impl AuthManager {
    pub fn new(
        credentials: Credentials,
        policy: TokenPolicy,
        store: TokenStore,
        topology: Arc<ClusterTopology>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let fingerprint = credentials.fingerprint();
        Self {
            inner: Arc::new(AuthInner {
                credentials,
                fingerprint,
                policy,
                store,
                topology,
                transport,
                state: Mutex::new(AuthState::default()),
                logins: AtomicU64::new(0),
            }),
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.inner.credentials.mode
    }

    pub fn policy(&self) -> TokenPolicy {
        self.inner.policy
    }

    pub fn store_mode(&self) -> TokenCacheMode {
        self.inner.store.mode()
    }

    /// Number of login calls issued by this manager
    pub fn login_count(&self) -> u64 {
        self.inner.logins.load(Ordering::SeqCst)
    }

    /// Credential for the next request.
    ///
    /// In JWT mode a usable token is returned as-is. Otherwise all concurrent
    /// callers attach to the same in-flight renewal and observe its outcome.
    /// Non-JWT modes never touch the network.
    pub async fn current_token(&self) -> PasarelaResult<Credential> {
        match self.inner.credentials.mode {
            AuthMode::None => return Ok(Credential::Anonymous),
            AuthMode::Basic => return Ok(Credential::Basic(self.inner.credentials.basic_header())),
            AuthMode::Jwt => {}
        }

        let pending = {
            let mut state = self.inner.lock_state();
            if let Some(token) = &state.token {
                if token.is_usable(self.inner.policy.refresh_margin) {
                    return Ok(Credential::Bearer(token.clone()));
                }
                tracing::debug!("Auth token is within its refresh margin, renewing");
            }

            match &state.pending {
                Some(pending) => pending.clone(),
                None => {
                    let check_store = !state.store_checked;
                    state.store_checked = true;
                    let pending = Arc::clone(&self.inner).renew(check_store).boxed().shared();
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        pending
            .await
            .map(Credential::Bearer)
            .map_err(PasarelaError::from)
    }

    /// Drop the current token from memory and the persisted cache.
    /// The next `current_token` logs in again.
    pub async fn invalidate(&self) {
        {
            let mut state = self.inner.lock_state();
            state.token = None;
            state.store_checked = true;
        }
        self.inner.clear_store().await;
    }

    /// Invalidate only if `rejected` is still the current token.
    ///
    /// Concurrent requests rejected with the same stale token therefore cause
    /// a single renewal. Returns whether anything was cleared.
    pub async fn invalidate_if_current(&self, rejected: &AuthToken) -> bool {
        let cleared = {
            let mut state = self.inner.lock_state();
            if state.token.as_ref() == Some(rejected) {
                state.token = None;
                state.store_checked = true;
                true
            } else {
                false
            }
        };

        if cleared {
            tracing::info!("Auth token rejected by the cluster, invalidated");
            self.inner.clear_store().await;
        }
        cleared
    }
}

impl AuthInner {
    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Body of the shared renewal future. Stores its own outcome so it does
    /// not matter which waiter drives it to completion.
    async fn renew(self: Arc<Self>, check_store: bool) -> Result<AuthToken, LoginFailure> {
        let outcome = self.obtain(check_store).await;

        let mut state = self.lock_state();
        state.pending = None;
        if let Ok(token) = &outcome {
            state.token = Some(token.clone());
        }
        outcome
    }

    async fn obtain(&self, check_store: bool) -> Result<AuthToken, LoginFailure> {
        if check_store {
            if let Some(token) = self.store.load(&self.fingerprint).await {
                if token.is_usable(self.policy.refresh_margin) {
                    tracing::info!(
                        cache = %self.store.mode(),
                        expires_at = token.expires_at(),
                        "Reusing cached auth token"
                    );
                    return Ok(token);
                }
                tracing::debug!("Cached auth token expired");
            }
        }

        let token = self.login().await?;
        if let Err(e) = self.store.save(&self.fingerprint, &token).await {
            tracing::warn!(error = %e, "Failed to persist auth token");
        }
        Ok(token)
    }

    /// One login, failing over across nodes on node-level errors only
    async fn login(&self) -> Result<AuthToken, LoginFailure> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let request = Request::post(LOGIN_PATH).with_json(json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
        }));

        let mut excluded = HashSet::new();
        let attempts = self.topology.len();

        for attempt in 1..=attempts {
            let node = self
                .topology
                .next_candidate(&excluded)
                .map_err(|_| LoginFailure::Unavailable { attempts: attempt - 1 })?;

            let reason = match self.transport.send(&node, &request).await {
                Ok(response) if response.is_success() => {
                    match serde_json::from_slice::<LoginResponse>(&response.body) {
                        Ok(body) => {
                            self.topology.report_success(&node);
                            return Ok(self.issue(&node, body.jwt));
                        }
                        Err(e) => format!("malformed login response: {}", e),
                    }
                }
                Ok(response) if matches!(response.status, 401 | 403) => {
                    tracing::error!(
                        node = %node,
                        status = response.status,
                        username = %self.credentials.username,
                        "Login rejected"
                    );
                    return Err(LoginFailure::Rejected(format!(
                        "login rejected with status {}: {}",
                        response.status,
                        response.error_message()
                    )));
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) if e.is_node_failure() => e.to_string(),
                Err(e) => return Err(LoginFailure::Transport(e)),
            };

            tracing::warn!(node = %node, reason = %reason, attempt, "Login failed on node");
            self.topology.report_failure(&node);
            excluded.insert(node);
        }

        Err(LoginFailure::Unavailable { attempts })
    }

    fn issue(&self, node: &str, jwt: String) -> AuthToken {
        let token = AuthToken::from_jwt(jwt, unix_now(), self.policy.default_ttl);
        if Duration::from_secs(token.ttl_secs) <= self.policy.refresh_margin {
            tracing::warn!(
                ttl_secs = token.ttl_secs,
                refresh_margin_secs = self.policy.refresh_margin.as_secs(),
                "Issued token lifetime does not exceed the refresh margin, renewing at half its lifetime"
            );
        }
        tracing::info!(
            node = %node,
            username = %self.credentials.username,
            ttl_secs = token.ttl_secs,
            "Obtained new auth token"
        );
        token
    }

    async fn clear_store(&self) {
        if let Err(e) = self.store.clear(&self.fingerprint).await {
            tracing::warn!(error = %e, "Failed to clear persisted auth token");
        }
    }
}
