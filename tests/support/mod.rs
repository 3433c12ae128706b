//! In-process cluster double shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pasarela::{Config, Method, Request, Response, Transport, TransportError};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub const LOGIN_PATH: &str = "/_open/auth";

/// How a fake node answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeBehavior {
    Healthy,
    Refused,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub node: String,
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct ClusterState {
    behavior: HashMap<String, NodeBehavior>,
    issued: u32,
    accepted: HashSet<String>,
    /// Tokens the server will reject once, as if they had just expired
    expire_next: u32,
    documents: HashMap<String, serde_json::Value>,
    seen: Vec<SeenRequest>,
}

/// A fake cluster: issues numbered tokens, serves documents from memory
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    latency: Duration,
}

impl FakeCluster {
    pub fn new(nodes: &[&str]) -> Self {
        let behavior = nodes
            .iter()
            .map(|n| (n.to_string(), NodeBehavior::Healthy))
            .collect();
        Self {
            state: Mutex::new(ClusterState {
                behavior,
                ..Default::default()
            }),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_behavior(&self, node: &str, behavior: NodeBehavior) {
        self.state
            .lock()
            .unwrap()
            .behavior
            .insert(node.to_string(), behavior);
    }

    /// Reject the next authenticated request with 401 and forget its token
    pub fn expire_tokens_once(&self) {
        self.state.lock().unwrap().expire_next += 1;
    }

    /// Accept `token` without it having been issued by a login
    pub fn accept_token(&self, token: &str) {
        self.state.lock().unwrap().accepted.insert(token.to_string());
    }

    pub fn logins(&self) -> usize {
        self.count(|r| r.path == LOGIN_PATH)
    }

    pub fn requests_to(&self, node: &str) -> usize {
        self.count(|r| r.node == node)
    }

    pub fn non_login_requests(&self) -> usize {
        self.count(|r| r.path != LOGIN_PATH)
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().unwrap().seen.len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.state.lock().unwrap().seen.clone()
    }

    fn count<F: Fn(&SeenRequest) -> bool>(&self, filter: F) -> usize {
        self.state.lock().unwrap().seen.iter().filter(|r| filter(r)).count()
    }

    fn answer(&self, node: &str, request: &Request) -> Result<Response, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.seen.push(SeenRequest {
            node: node.to_string(),
            method: request.method,
            path: request.path.clone(),
            authorization: request.header("Authorization").map(String::from),
        });

        match state.behavior.get(node).copied() {
            Some(NodeBehavior::Healthy) => {}
            Some(NodeBehavior::Unavailable) => return Ok(Response::new(503, b"shutting down".to_vec())),
            Some(NodeBehavior::Refused) | None => {
                return Err(TransportError::ConnectionRefused {
                    node: node.to_string(),
                })
            }
        }

        if request.path == LOGIN_PATH {
            let body = request.body.clone().unwrap_or_default();
            if body["username"] != "root" || body["password"] != "secret" {
                return Ok(Response::json(401, &json!({"errorMessage": "Wrong credentials"})));
            }
            state.issued += 1;
            let jwt = format!("token-{}", state.issued);
            state.accepted.insert(jwt.clone());
            return Ok(Response::json(200, &json!({ "jwt": jwt })));
        }

        let token = request
            .header("Authorization")
            .and_then(|h| h.strip_prefix("bearer "))
            .unwrap_or_default()
            .to_string();
        if !state.accepted.contains(&token) {
            return Ok(Response::json(401, &json!({"errorMessage": "not authorized"})));
        }
        if state.expire_next > 0 {
            state.expire_next -= 1;
            state.accepted.remove(&token);
            return Ok(Response::json(401, &json!({"errorMessage": "token expired"})));
        }

        Ok(route(&mut state.documents, request))
    }
}

fn route(documents: &mut HashMap<String, serde_json::Value>, request: &Request) -> Response {
    let path = request.path.as_str();
    if path.ends_with("/_api/version") {
        return Response::json(200, &json!({"server": "arango", "version": "3.11.4"}));
    }
    if let Some(rest) = path.split("/_api/document/").nth(1) {
        return match request.method {
            Method::Post => {
                let body = request.body.clone().unwrap_or_default();
                let key = body["_key"].as_str().unwrap_or("generated").to_string();
                documents.insert(format!("{}/{}", rest, key), body);
                Response::json(201, &json!({"_key": key, "_rev": "r1"})).with_header("etag", "\"r1\"")
            }
            Method::Get => match documents.get(rest) {
                Some(doc) => Response::json(200, doc).with_header("etag", "\"r1\""),
                None => Response::json(404, &json!({"errorMessage": "document not found"})),
            },
            _ => Response::new(405, vec![]),
        };
    }
    if path.contains("/_api/collection/") && request.method == Method::Delete {
        return Response::json(200, &json!({"id": "1"}));
    }
    Response::json(404, &json!({"errorMessage": "unknown route"}))
}

#[async_trait]
impl Transport for FakeCluster {
    async fn send(&self, node: &str, request: &Request) -> Result<Response, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.answer(node, request)
    }
}

/// Config pointing at `nodes` with credentials the fake cluster accepts
pub fn cluster_config(nodes: &[&str]) -> Config {
    let mut config = Config::default();
    config.cluster.endpoints = nodes.iter().map(|n| n.to_string()).collect();
    config.auth.password = "secret".to_string();
    config.database = "app".to_string();
    config
}

pub fn disk_cached(mut config: Config, dir: &Path) -> Config {
    config.auth.cache = pasarela::TokenCacheMode::Disk;
    config.auth.cache_dir = Some(dir.to_path_buf());
    config
}
