//! Receipt verification: resolve a decoded QR payload to receipt data.
//!
//! The service takes the raw QR string plus an API token and answers with
//! arbitrary JSON. Failures are never fatal: a payload that cannot be
//! resolved is logged and the next one is tried, and if none resolves the
//! orchestrator falls through to OCR.

use crate::config::IngestConfig;
use crate::error::{IngestError, QrError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolves a QR payload against an external verification service.
#[async_trait]
pub trait ReceiptLookup: Send + Sync {
    async fn lookup(&self, qr_payload: &str) -> Result<Value, QrError>;
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    token: &'a str,
    qrraw: &'a str,
}

/// JSON-over-HTTP verification client.
#[derive(Debug, Clone)]
pub struct HttpReceiptLookup {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpReceiptLookup {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }

    /// Build from the lookup section of the config.
    ///
    /// A missing token is not an error here: the service answers with an
    /// error body, which is not usable, and the pipeline moves on to OCR.
    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        if config.api_token.is_none() {
            warn!("API_TOKEN is not set; receipt lookups will be unauthenticated");
        }
        Self::new(
            config.lookup_url.clone(),
            config.api_token.clone().unwrap_or_default(),
            config.lookup_timeout_secs,
        )
    }
}

#[async_trait]
impl ReceiptLookup for HttpReceiptLookup {
    async fn lookup(&self, qr_payload: &str) -> Result<Value, QrError> {
        let fail = |detail: String| QrError::Lookup {
            payload: qr_payload.to_string(),
            detail,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&LookupRequest {
                token: &self.token,
                qrraw: qr_payload,
            })
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        debug!("Lookup answered HTTP {}", status);

        // The body is returned whatever the status; usability is judged on content.
        response
            .json::<Value>()
            .await
            .map_err(|e| fail(format!("HTTP {status}: body is not JSON: {e}")))
    }
}

/// Whether a lookup response carries anything worth returning.
///
/// `null`, `false`, `0`, `""`, `[]` and `{}` are treated as no answer.
pub fn is_usable(response: &Value) -> bool {
    match response {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Look payloads up in order and return the first usable response.
///
/// Later payloads are not looked up once one succeeds.
pub async fn resolve_first(lookup: &dyn ReceiptLookup, payloads: &[String]) -> Option<Value> {
    for (i, payload) in payloads.iter().enumerate() {
        match lookup.lookup(payload).await {
            Ok(response) if is_usable(&response) => {
                info!("QR payload {}/{} resolved", i + 1, payloads.len());
                return Some(response);
            }
            Ok(_) => warn!("QR payload {}/{}: empty lookup response", i + 1, payloads.len()),
            Err(e) => warn!("{}", e),
        }
    }
    None
}
