//! REST client for a Confluent-compatible schema registry.

use crate::{SchemaError, SchemaRegistry, SchemaResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// [`SchemaRegistry`] backed by a registry service over HTTP.
///
/// Speaks the Confluent REST surface: definitions are posted to
/// `/subjects/{subject}/versions` and resolved from `/schemas/ids/{id}`.
/// Transport failures and server faults surface as
/// [`SchemaError::RegistryUnavailable`] so callers can retry them.
pub struct HttpSchemaRegistry {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSchemaRegistry {
    /// Create a client for the registry at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Registry root, e.g. `http://localhost:9981`
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn unavailable(status: reqwest::StatusCode, body: &str) -> SchemaError {
        SchemaError::RegistryUnavailable(format!(
            "registry returned {}: {}",
            status,
            error_message(body)
        ))
    }
}

/// Pull the human-readable message out of a registry error body, if it
/// is the JSON shape the registry normally sends.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn register(&self, subject: &str, definition: &str) -> SchemaResult<u32> {
        let url = format!("{}/subjects/{}/versions", self.base_url, subject);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, REGISTRY_CONTENT_TYPE)
            .json(&RegisterRequest { schema: definition })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SchemaError::RegistryUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: RegisterResponse = response
                .json()
                .await
                .map_err(|e| SchemaError::RegistryUnavailable(e.to_string()))?;
            debug!(subject = %subject, schema_id = body.id, "Registered schema");
            return Ok(body.id);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(Self::unavailable(status, &body))
        } else {
            Err(SchemaError::SchemaInvalid(format!(
                "registry returned {}: {}",
                status,
                error_message(&body)
            )))
        }
    }

    async fn fetch(&self, id: u32) -> SchemaResult<String> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let response = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SchemaError::RegistryUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SchemaError::SchemaNotFound(id));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::unavailable(status, &body));
        }

        let body: SchemaResponse = response
            .json()
            .await
            .map_err(|e| SchemaError::RegistryUnavailable(e.to_string()))?;
        Ok(body.schema)
    }
}
