//! HTTP access to the controller.
//!
//! The controller's web server emits hand-built JSON that is occasionally
//! malformed (dangling commas, truncated file dumps). Payloads are repaired
//! here, so everything above this module only sees parsed JSON or an error.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ControllerError;
use crate::models::{ControllerState, InfoPayload};

// ---

/// Which live readings to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// The single current reading.
    Current,
    /// Every record buffered since the controller last flushed its log.
    SinceLast,
}

/// Remote operations the sync engine needs from the controller.
pub trait Controller: Send + Sync + 'static {
    // ---
    /// Full state: configuration, storage, sensors and the file index.
    fn fetch_state(&self) -> impl Future<Output = Result<ControllerState, ControllerError>> + Send;

    /// Raw records of one log file, oldest first.
    fn fetch_file(&self, name: &str) -> impl Future<Output = Result<Vec<Value>, ControllerError>> + Send;

    fn fetch_info(&self, mode: FetchMode) -> impl Future<Output = Result<InfoPayload, ControllerError>> + Send;

    /// Returns whether the controller actually removed the file.
    fn delete_file(&self, name: &str) -> impl Future<Output = Result<bool, ControllerError>> + Send;
}

/// [`Controller`] over the controller's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpController {
    client: reqwest::Client,
    base_url: String,
}

impl HttpController {
    // ---
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControllerError> {
        // ---
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ControllerError::NoBaseUrl);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ControllerError::Transport {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self { client, base_url })
    }

    async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ControllerError> {
        // ---
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Fetching {} {:?}", url, query);

        let transport = |source| ControllerError::Transport {
            url: url.clone(),
            source,
        };

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(transport)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ControllerError> {
        // ---
        let text = self.get_text(path, query).await?;
        parse_lenient(&text)
    }
}

#[derive(Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    d: Value,
}

impl Controller for HttpController {
    // ---
    async fn fetch_state(&self) -> Result<ControllerState, ControllerError> {
        self.get_json("/conf", &[]).await
    }

    async fn fetch_file(&self, name: &str) -> Result<Vec<Value>, ControllerError> {
        // ---
        let text = self.get_text("/data", &[("f", name)]).await?;
        extract_records(&text)
    }

    async fn fetch_info(&self, mode: FetchMode) -> Result<InfoPayload, ControllerError> {
        // ---
        let query: &[(&str, &str)] = match mode {
            FetchMode::Current => &[("cur", "1")],
            FetchMode::SinceLast => &[("last", "1")],
        };
        self.get_json("/info", query).await
    }

    async fn delete_file(&self, name: &str) -> Result<bool, ControllerError> {
        // ---
        let response: DeleteResponse = self.get_json("/data", &[("d", name)]).await?;
        Ok(match response.d {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        })
    }
}

// ---

fn record_pattern() -> &'static Regex {
    // ---
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[-?\d+(?:,\s*-?\d+)*(?:,\s*"\w+")?\]"#).expect("record pattern is valid")
    })
}

fn dangling_comma() -> &'static Regex {
    // ---
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r",\s*([,\]}])").expect("comma pattern is valid"))
}

/// Pull every record-shaped array out of a raw log file dump.
///
/// Anything between records (truncated lines, stray separators) is dropped.
pub fn extract_records(text: &str) -> Result<Vec<Value>, ControllerError> {
    // ---
    record_pattern()
        .find_iter(text)
        .map(|m| serde_json::from_str(m.as_str()).map_err(|e| ControllerError::Payload(e.to_string())))
        .collect()
}

/// Parse JSON after removing dangling commas.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, ControllerError> {
    // ---
    let mut cleaned = text.to_string();
    loop {
        let next = dangling_comma().replace_all(&cleaned, "$1").into_owned();
        if next == cleaned {
            break;
        }
        cleaned = next;
    }
    serde_json::from_str(&cleaned).map_err(|e| ControllerError::Payload(e.to_string()))
}
