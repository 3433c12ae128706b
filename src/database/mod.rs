/// Database handles: the façade callers hold
///
/// A handle is a database name plus a shared dispatcher. It owns no mutable
/// state, so it is cheap to clone and hand to every subsystem.
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::dispatch::{Operation, RequestDispatcher};
use crate::error::{PasarelaError, PasarelaResult};
use crate::safety::OperationKind;
use crate::transport::{Request, Response};
use crate::utils::path_segment;

/// A document with its revision metadata split from the body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub key: Option<String>,
    pub rev: Option<String>,
    pub etag: Option<String>,
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn set<V: Into<Value>>(&mut self, field: &str, value: V) {
        self.body.insert(field.to_string(), value.into());
    }

    /// Body plus `_key`, as sent to the server
    fn to_payload(&self) -> Value {
        let mut payload = self.body.clone();
        if let Some(key) = &self.key {
            payload.insert("_key".to_string(), Value::String(key.clone()));
        }
        Value::Object(payload)
    }

    /// Parse a full document response, stripping system attributes
    fn from_response(response: &Response) -> PasarelaResult<Self> {
        let mut body: Map<String, Value> = response.parse()?;
        let key = take_string(&mut body, "_key");
        let rev = take_string(&mut body, "_rev");
        body.remove("_id");

        Ok(Self {
            key,
            rev,
            etag: response.header("etag").map(String::from),
            body,
        })
    }

    /// Apply the metadata of a create/replace acknowledgement
    fn apply_ack(&mut self, response: &Response) -> PasarelaResult<()> {
        let ack: DocumentAck = response.parse()?;
        if ack.key.is_some() {
            self.key = ack.key;
        }
        self.rev = ack.rev;
        self.etag = response.header("etag").map(String::from);
        Ok(())
    }
}

fn document_path(collection: &str, key: &str) -> String {
    format!("/_api/document/{}/{}", path_segment(collection), path_segment(key))
}

fn take_string(body: &mut Map<String, Value>, field: &str) -> Option<String> {
    match body.remove(field) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

#[derive(Deserialize)]
struct DocumentAck {
    #[serde(rename = "_key")]
    key: Option<String>,
    #[serde(rename = "_rev")]
    rev: Option<String>,
}

/// Result of a conditional read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(Document),
    /// The supplied etag is still current (304)
    NotModified,
    Missing,
}

/// Collection properties as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<u32>,
    #[serde(rename = "type", default)]
    pub collection_type: Option<u32>,
}

/// Handle bound to one logical database
#[derive(Clone)]
pub struct DatabaseHandle {
    name: String,
    dispatcher: Arc<RequestDispatcher>,
}

impl DatabaseHandle {
    pub fn new<S: Into<String>>(name: S, dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            name: name.into(),
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issue an arbitrary database-scoped request
    pub async fn execute(&self, kind: OperationKind, request: Request) -> PasarelaResult<Response> {
        self.dispatcher
            .execute(Operation::new(self.name.clone(), kind, request))
            .await
    }

    /// Create a collection. Returns `false` if it already existed.
    pub async fn create_collection(&self, collection: &str) -> PasarelaResult<bool> {
        let request = Request::post("/_api/collection").with_json(json!({ "name": collection }));
        let response = self.execute(OperationKind::Admin, request).await?;
        match response.status {
            200 | 201 => {
                tracing::info!(database = %self.name, collection = %collection, "Created collection");
                Ok(true)
            }
            409 => Ok(false),
            _ => Err(response.into_backend_error()),
        }
    }

    pub async fn read_collection(&self, collection: &str) -> PasarelaResult<Option<CollectionInfo>> {
        let request = Request::get(format!("/_api/collection/{}", path_segment(collection)));
        let response = self.execute(OperationKind::Read, request).await?;
        match response.status {
            200 => Ok(Some(response.parse()?)),
            404 => Ok(None),
            _ => Err(response.into_backend_error()),
        }
    }

    /// Drop a collection; subject to the safety policy.
    /// Returns `false` if it did not exist.
    pub async fn drop_collection(&self, collection: &str) -> PasarelaResult<bool> {
        let request = Request::delete(format!("/_api/collection/{}", path_segment(collection)));
        let response = self.execute(OperationKind::DropCollection, request).await?;
        match response.status {
            200 | 202 => {
                tracing::warn!(database = %self.name, collection = %collection, "Dropped collection");
                Ok(true)
            }
            404 => Ok(false),
            _ => Err(response.into_backend_error()),
        }
    }

    /// Insert `document`, filling in its key, revision and etag
    pub async fn create_document(
        &self,
        collection: &str,
        document: &mut Document,
        overwrite: bool,
    ) -> PasarelaResult<()> {
        let request = Request::post(format!("/_api/document/{}", path_segment(collection)))
            .with_query("overwrite", overwrite.to_string())
            .with_json(document.to_payload());
        let response = self.execute(OperationKind::Write, request).await?;
        match response.status {
            201 | 202 => document.apply_ack(&response),
            _ => Err(response.into_backend_error()),
        }
    }

    /// Read a document; with `if_none_match` a current etag yields `NotModified`
    pub async fn read_document(
        &self,
        collection: &str,
        key: &str,
        if_none_match: Option<&str>,
    ) -> PasarelaResult<ReadOutcome> {
        let mut request = Request::get(document_path(collection, key));
        if let Some(etag) = if_none_match {
            request = request.with_header("If-None-Match", etag);
        }

        let response = self.execute(OperationKind::Read, request).await?;
        match response.status {
            200 => Ok(ReadOutcome::Found(Document::from_response(&response)?)),
            304 => Ok(ReadOutcome::NotModified),
            404 => Ok(ReadOutcome::Missing),
            _ => Err(response.into_backend_error()),
        }
    }

    /// Replace a document. When it carries an etag the write is conditional
    /// and a concurrent change yields `Ok(false)` instead of overwriting.
    pub async fn replace_document(&self, collection: &str, document: &mut Document) -> PasarelaResult<bool> {
        let key = document
            .key
            .clone()
            .ok_or_else(|| PasarelaError::internal("replace_document requires a document key"))?;

        let mut request = Request::put(document_path(collection, &key))
            .with_json(document.to_payload());
        if let Some(etag) = &document.etag {
            request = request.with_header("If-Match", etag.clone());
        }

        let response = self.execute(OperationKind::Write, request).await?;
        match response.status {
            201 | 202 => {
                document.apply_ack(&response)?;
                Ok(true)
            }
            412 => Ok(false),
            _ => Err(response.into_backend_error()),
        }
    }

    /// Delete a document. A missing document counts as deleted;
    /// a failed `if_match` precondition yields `Ok(false)`.
    pub async fn delete_document(
        &self,
        collection: &str,
        key: &str,
        if_match: Option<&str>,
    ) -> PasarelaResult<bool> {
        let mut request = Request::delete(document_path(collection, key));
        if let Some(etag) = if_match {
            request = request.with_header("If-Match", etag);
        }

        let response = self.execute(OperationKind::Write, request).await?;
        match response.status {
            200 | 202 | 404 => Ok(true),
            412 => Ok(false),
            _ => Err(response.into_backend_error()),
        }
    }
}
