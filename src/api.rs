//! Document store API client.
//!
//! Provides authenticated HTTP access to the managed backend: point
//! reads, merge writes, deletes, and sub-collection listing over the
//! `orders`, `customers/{uid}/cart`, and `contactMessages` collections,
//! plus the admin-gated push callables
//! and the asset-host image upload. The client never issues
//! multi-document transactions.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::errors::ClientError;
use crate::storage;

/// Default timeout for store requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the store base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> ClientError {
    if err.is_connect() {
        return ClientError::TransientWrite(format!("Cannot reach the store at {url}"));
    }
    if err.is_timeout() {
        return ClientError::TransientWrite(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return ClientError::Validation(format!("Invalid store URL: {url}"));
    }
    ClientError::TransientWrite(format!("Network error communicating with {url}: {err}"))
}

async fn error_from_response(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&body_text)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| default_status_detail(status));
    ClientError::from_status(status.as_u16(), format!("{detail} (HTTP {})", status.as_u16()))
}

fn default_status_detail(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "unauthenticated".to_string(),
        403 => "permission-denied".to_string(),
        404 => "document not found".to_string(),
        412 => "failed-precondition".to_string(),
        s if s >= 500 => "internal".to_string(),
        s => format!("unexpected response (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct StoreClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl StoreClient {
    pub fn new(store_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::TransientWrite(format!("http client: {e}")))?;
        Ok(Self {
            base_url: normalize_store_url(store_url),
            api_key: api_key.trim().to_string(),
            http,
        })
    }

    /// Build a client from the credentials in the OS keyring.
    pub fn from_storage() -> Result<Self, ClientError> {
        let url = storage::store_url()
            .ok_or_else(|| ClientError::Validation("Store URL is not configured".into()))?;
        let key = storage::store_api_key()
            .ok_or_else(|| ClientError::Validation("Store API key is not configured".into()))?;
        Self::new(&url, &key)
    }

    fn document_url(&self, path: &str) -> String {
        format!("{}/api/documents/{}", self.base_url, path.trim_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        let mut req = self
            .http
            .request(method, url)
            .header("X-Store-API-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .query(query);
        if let Some(token) = storage::session_token() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        // Return the JSON body, or null for empty 204 responses.
        let body_text = resp.text().await.unwrap_or_default();
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ClientError::TransientWrite(format!("Invalid JSON from store: {e}")))
    }

    // -- Documents ---------------------------------------------------------

    /// Point read. 404 maps to `NotFound`.
    pub async fn get_document(&self, path: &str) -> Result<Value, ClientError> {
        self.request(Method::GET, &self.document_url(path), None, &[])
            .await
    }

    /// Create (or fully set) a document at the given path.
    pub async fn create_document(&self, path: &str, doc: &Value) -> Result<(), ClientError> {
        self.request(Method::PUT, &self.document_url(path), Some(doc), &[])
            .await?;
        Ok(())
    }

    /// Merge-write the given fields into a document.
    pub async fn patch_document(&self, path: &str, fields: &Value) -> Result<(), ClientError> {
        self.patch_document_if(path, fields, None).await
    }

    /// Merge-write with an optional optimistic-concurrency precondition:
    /// the write is rejected with `failed-precondition` (HTTP 412) when
    /// the document's `updatedAt` no longer matches the snapshot we
    /// read from.
    pub async fn patch_document_if(
        &self,
        path: &str,
        fields: &Value,
        expected_updated_at: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut query: Vec<(&str, &str)> = vec![("merge", "true")];
        if let Some(expected) = expected_updated_at {
            query.push(("ifUpdatedAt", expected));
        }
        self.request(Method::PATCH, &self.document_url(path), Some(fields), &query)
            .await?;
        Ok(())
    }

    pub async fn delete_document(&self, path: &str) -> Result<(), ClientError> {
        self.request(Method::DELETE, &self.document_url(path), None, &[])
            .await?;
        Ok(())
    }

    /// List the documents of a collection or sub-collection.
    pub async fn list_documents(&self, path: &str) -> Result<Vec<Value>, ClientError> {
        let body = self
            .request(Method::GET, &self.document_url(path), None, &[("list", "true")])
            .await?;
        Ok(body
            .get("documents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_else(|| body.as_array().cloned().unwrap_or_default()))
    }

    // -- Callables ---------------------------------------------------------

    /// Send a push message to one user. Admin-gated on the server: fails
    /// with `unauthenticated` / `permission-denied` for ordinary callers,
    /// which is why every call site treats it as best-effort.
    pub async fn send_push_to_user(
        &self,
        user_id: &str,
        title: &str,
        body: &str,
        data: Value,
    ) -> Result<(), ClientError> {
        let payload = serde_json::json!({
            "userId": user_id,
            "title": title,
            "body": body,
            "data": data,
        });
        self.request(
            Method::POST,
            &format!("{}/api/messaging/send-to-user", self.base_url),
            Some(&payload),
            &[],
        )
        .await?;
        Ok(())
    }

    /// Send a push message to a topic (e.g. the staff channel).
    pub async fn send_push_to_topic(
        &self,
        topic: &str,
        title: &str,
        body: &str,
        data: Value,
    ) -> Result<(), ClientError> {
        let payload = serde_json::json!({
            "topic": topic,
            "title": title,
            "body": body,
            "data": data,
        });
        self.request(
            Method::POST,
            &format!("{}/api/messaging/send-to-topic", self.base_url),
            Some(&payload),
            &[],
        )
        .await?;
        Ok(())
    }

    // -- Contact form ------------------------------------------------------

    pub async fn submit_contact_message(
        &self,
        name: &str,
        email: &str,
        message: &str,
    ) -> Result<(), ClientError> {
        if name.trim().is_empty() || email.trim().is_empty() || message.trim().is_empty() {
            return Err(ClientError::Validation("All fields are required".into()));
        }
        let doc = serde_json::json!({
            "name": name.trim(),
            "email": email.trim(),
            "message": message.trim(),
            "createdAt": chrono::Utc::now().to_rfc3339(),
        });
        self.create_document(
            &format!("contactMessages/{}", uuid::Uuid::new_v4()),
            &doc,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Asset host upload
// ---------------------------------------------------------------------------

/// Upload an image to the third-party asset host and return its secure
/// URL. No app-level retry; the caller decides whether to resubmit.
pub async fn upload_image(
    upload_url: &str,
    bytes: Vec<u8>,
    filename: &str,
) -> Result<String, ClientError> {
    let client = Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| ClientError::Upload(format!("http client: {e}")))?;

    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp = client
        .post(upload_url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| ClientError::Upload(format!("asset host unreachable: {e}")))?;

    if !resp.status().is_success() {
        return Err(ClientError::Upload(format!(
            "asset host rejected the upload (HTTP {})",
            resp.status().as_u16()
        )));
    }

    let body: Value = resp
        .json()
        .await
        .map_err(|e| ClientError::Upload(format!("invalid asset host response: {e}")))?;
    let url = body
        .get("secure_url")
        .or_else(|| body.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Upload("asset host response is missing the URL".into()))?;

    info!(filename, "image uploaded");
    Ok(url.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================
