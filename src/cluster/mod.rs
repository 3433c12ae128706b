/// Cluster topology: the candidate coordinator nodes and their recent health
///
/// Nodes are tried in configured order. A node that fails is put into a
/// cooldown window during which it is tried only after every healthy node;
/// it is never removed permanently since the backend may recover.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{ConfigError, PasarelaError, PasarelaResult};

/// Default time a failed node is deprioritized for
pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(30);

/// Ordered, de-duplicated set of node base URLs. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    nodes: Vec<String>,
}

impl ClusterConfig {
    /// Build from a list of base URLs, keeping the first occurrence of duplicates.
    /// An empty list is accepted here; the topology rejects it.
    pub fn new<I, S>(endpoints: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();

        for endpoint in endpoints {
            let endpoint = normalize_endpoint(endpoint.as_ref());
            if endpoint.is_empty() {
                continue;
            }
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid cluster endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
            if seen.insert(endpoint.clone()) {
                nodes.push(endpoint);
            }
        }

        Ok(Self { nodes })
    }

    /// Parse a comma separated endpoint list, e.g. `http://a:8529,http://b:8529`
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        Self::new(list.split(','))
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

/// Ephemeral per-node failure record
#[derive(Debug, Clone, Copy)]
pub struct NodeHealth {
    pub last_failure: Instant,
    pub consecutive_failures: u32,
}

impl NodeHealth {
    fn is_cooling(&self, now: Instant, cooldown: Duration) -> bool {
        now.saturating_duration_since(self.last_failure) < cooldown
    }
}

/// Failover-ordered view of the cluster shared by every dispatcher call
#[derive(Debug)]
pub struct ClusterTopology {
    config: ClusterConfig,
    cooldown: Duration,
    health: Mutex<HashMap<String, NodeHealth>>,
}

impl ClusterTopology {
    /// Fails with `NoNodesConfigured` when the endpoint list is empty
    pub fn new(config: ClusterConfig, cooldown: Duration) -> PasarelaResult<Self> {
        if config.is_empty() {
            return Err(PasarelaError::NoNodesConfigured);
        }

        Ok(Self {
            config,
            cooldown,
            health: Mutex::new(HashMap::new()),
        })
    }

    /// Configured nodes in preference order
    pub fn nodes(&self) -> &[String] {
        self.config.nodes()
    }

    pub fn len(&self) -> usize {
        self.config.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Start (or restart) the cooldown window for `node`
    pub fn report_failure(&self, node: &str) {
        self.report_failure_at(node, Instant::now());
    }

    pub(crate) fn report_failure_at(&self, node: &str, now: Instant) {
        let mut health = self.lock_health();
        let entry = health.entry(node.to_string()).or_insert(NodeHealth {
            last_failure: now,
            consecutive_failures: 0,
        });
        entry.last_failure = now;
        entry.consecutive_failures += 1;

        tracing::warn!(
            node = %node,
            consecutive_failures = entry.consecutive_failures,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "Node marked as failed"
        );
    }

    /// Forget any failure history for `node`
    pub fn report_success(&self, node: &str) {
        if self.lock_health().remove(node).is_some() {
            tracing::info!(node = %node, "Node recovered");
        }
    }

    /// Pick the next node to try.
    ///
    /// Prefers nodes outside `exclude` that are not cooling down, in configured
    /// order. When none qualify, degrades to the least recently failed node
    /// (non-excluded nodes first) instead of failing.
    pub fn next_candidate(&self, exclude: &HashSet<String>) -> PasarelaResult<String> {
        self.next_candidate_at(exclude, Instant::now())
    }

    pub(crate) fn next_candidate_at(
        &self,
        exclude: &HashSet<String>,
        now: Instant,
    ) -> PasarelaResult<String> {
        let nodes = self.config.nodes();
        if nodes.is_empty() {
            return Err(PasarelaError::NoNodesConfigured);
        }

        let health = self.lock_health();
        let cooling = |node: &String| {
            health
                .get(node)
                .map(|h| h.is_cooling(now, self.cooldown))
                .unwrap_or(false)
        };

        if let Some(node) = nodes.iter().find(|n| !exclude.contains(*n) && !cooling(*n)) {
            return Ok(node.clone());
        }

        let last_failure = |node: &&String| health.get(*node).map(|h| h.last_failure);
        let fallback = nodes
            .iter()
            .filter(|n| !exclude.contains(*n))
            .min_by_key(last_failure)
            .or_else(|| nodes.iter().min_by_key(last_failure));

        match fallback {
            Some(node) => {
                tracing::debug!(node = %node, "All candidates excluded or cooling down, degrading");
                Ok(node.clone())
            }
            None => Err(PasarelaError::NoNodesConfigured),
        }
    }

    /// Snapshot of the failure record for a node
    pub fn health_of(&self, node: &str) -> Option<NodeHealth> {
        self.lock_health().get(node).copied()
    }

    /// Whether `node` is currently deprioritized
    pub fn is_cooling_down(&self, node: &str) -> bool {
        let now = Instant::now();
        self.health_of(node)
            .map(|h| h.is_cooling(now, self.cooldown))
            .unwrap_or(false)
    }

    /// Total consecutive failures currently recorded across all nodes
    pub fn recorded_failures(&self) -> u32 {
        self.lock_health()
            .values()
            .map(|h| h.consecutive_failures)
            .sum()
    }

    // Health updates are best-effort; a poisoned lock still holds usable data.
    fn lock_health(&self) -> std::sync::MutexGuard<'_, HashMap<String, NodeHealth>> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }
}
