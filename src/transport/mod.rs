/// Transport capability: send one HTTP request to one node
///
/// The dispatcher and the auth manager only ever talk to the cluster through
/// the `Transport` trait, so tests can substitute a scripted transport.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{PasarelaError, PasarelaResult, TransportError};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A node-independent request; the node base URL is supplied at send time
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl Request {
    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get<P: Into<String>>(path: P) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post<P: Into<String>>(path: P) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put<P: Into<String>>(path: P) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete<P: Into<String>>(path: P) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace any existing header with the same (case-insensitive) name
    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        self.headers.push((key, value.into()));
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Full URL for `node`
    pub fn url_for(&self, node: &str) -> String {
        format!("{}{}", node.trim_end_matches('/'), self.path)
    }
}

/// Status, headers (lowercased names) and raw body
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string().into_bytes());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    pub fn with_header<K: AsRef<str>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Token missing, expired or invalid
    pub fn is_auth_rejected(&self) -> bool {
        self.status == 401
    }

    /// 5xx: the node (not the request) is at fault
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> PasarelaResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Backend-reported error message, falling back to the raw body
    pub fn error_message(&self) -> String {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Turn an unexpected status into a `Backend` error
    pub fn into_backend_error(self) -> PasarelaError {
        PasarelaError::backend(self.status, self.error_message())
    }
}

/// Send one request to one node. Implementations must bound every call
/// with a timeout; retries and failover are the dispatcher's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, node: &str, request: &Request) -> Result<Response, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> PasarelaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PasarelaError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(node: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                node: node.to_string(),
            }
        } else if err.is_connect() {
            TransportError::ConnectionRefused {
                node: node.to_string(),
            }
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Network {
                node: node.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, node: &str, request: &Request) -> Result<Response, TransportError> {
        let url = request.url_for(node);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %request.method, node = %node, path = %request.path, "Sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(node, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(node, e))?
            .to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
