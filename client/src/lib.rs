//! HTTP client for the pricing API.
//!
//! # Endpoints
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | POST | `/pricing/programs` | eligibility prefetch and run start |
//! | POST | `/pricing/dispatch-one` | one pricing computation per program |
//! | GET | `/brokers/{id}/custom-settings` | program-visibility allow-list |
//! | GET/PUT | `/scenarios/{loan_id}` | scenario persistence |
//!
//! Dispatch responses are returned as raw [`serde_json::Value`]: the payload
//! shape varies (default vs bridge) and is discriminated by
//! `ratesheet_types::is_bridge_payload` at the parsing layer, not here.
//! Scenario payloads are likewise opaque to this crate; the engine owns
//! their shape.
//!
//! All calls go through [`retry::send_with_retry`]: transient statuses and
//! connection errors are retried with exponential backoff and down-jitter,
//! with a consistent idempotency key across attempts.

pub mod retry;

use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use ratesheet_types::{BrokerId, LoanId, LoanInputSnapshot, ProgramDescriptor, ProgramId};

use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared connection-pooled client. Base URLs vary per deployment, so unlike
/// TLS policy this cannot be baked in; the pool settings can.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build pooled HTTP client: {e}. Using defaults.");
                reqwest::Client::new()
            })
    })
}

/// API endpoint and credential bundle.
#[derive(Clone)]
pub struct ApiConfig {
    base_url: String,
    auth_token: Option<String>,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            auth_token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

// Manual Debug impl to prevent leaking the auth token in logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &if self.auth_token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

/// Errors from pricing API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("transport error calling {endpoint}: {detail}")]
    Transport {
        endpoint: &'static str,
        detail: String,
    },
    #[error("failed to decode {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ProgramsResponse {
    #[serde(default)]
    programs: Vec<ProgramDescriptor>,
}

/// Broker custom settings; currently only the program-visibility map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomSettings {
    #[serde(default)]
    program_visibility: std::collections::BTreeMap<String, bool>,
}

impl CustomSettings {
    /// Fail closed: a program is visible only with an explicit `true` entry.
    #[must_use]
    pub fn is_visible(&self, program: &ProgramId) -> bool {
        self.program_visibility
            .get(program.as_str())
            .copied()
            .unwrap_or(false)
    }

    #[must_use]
    pub fn from_visibility(entries: std::collections::BTreeMap<String, bool>) -> Self {
        Self {
            program_visibility: entries,
        }
    }
}

/// Concrete reqwest-backed pricing API client.
#[derive(Debug, Clone)]
pub struct HttpPricingApi {
    config: ApiConfig,
    retry: RetryConfig,
}

impl HttpPricingApi {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = http_client().request(method, url);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute(
        &self,
        endpoint: &'static str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        match send_with_retry(build, &self.retry).await {
            RetryOutcome::Success(response) => Ok(response),
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let body = read_error_body(response).await;
                Err(ApiError::Http {
                    endpoint,
                    status,
                    body,
                })
            }
            RetryOutcome::ConnectionError { attempts, source } => Err(ApiError::Transport {
                endpoint,
                detail: format!("connection error after {attempts} attempts: {source}"),
            }),
            RetryOutcome::NonRetryable(source) => Err(ApiError::Transport {
                endpoint,
                detail: source.to_string(),
            }),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let body = response.text().await.map_err(|e| ApiError::Transport {
            endpoint,
            detail: format!("failed to read response body: {e}"),
        })?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode { endpoint, source })
    }

    /// `POST /pricing/programs`: the program list eligible for `snapshot`.
    ///
    /// Used both for best-effort prefetch and as the authoritative list at
    /// run start. Response order is significant; it fixes slot positions.
    pub async fn fetch_programs(
        &self,
        snapshot: &LoanInputSnapshot,
    ) -> Result<Vec<ProgramDescriptor>, ApiError> {
        const ENDPOINT: &str = "/pricing/programs";
        let url = self.config.endpoint(ENDPOINT);
        let body = serde_json::json!({ "inputValues": snapshot.input_values_by_id() });
        let response = self
            .execute(ENDPOINT, || {
                self.request(reqwest::Method::POST, &url).json(&body)
            })
            .await?;
        let parsed: ProgramsResponse = Self::decode(ENDPOINT, response).await?;
        Ok(parsed.programs)
    }

    /// `POST /pricing/dispatch-one`: one pricing computation for one program.
    ///
    /// Returns the raw result JSON; shape discrimination and matrix parsing
    /// happen in `ratesheet-types`. `data` carries request context that is
    /// opaque to pricing itself (actor identity, loan id).
    pub async fn dispatch_program(
        &self,
        program: &ProgramId,
        snapshot: &LoanInputSnapshot,
        data: Value,
    ) -> Result<Value, ApiError> {
        const ENDPOINT: &str = "/pricing/dispatch-one";
        let url = self.config.endpoint(ENDPOINT);
        let body = serde_json::json!({
            "programId": program,
            "inputValuesById": snapshot.input_values_by_id(),
            "data": data,
        });
        let response = self
            .execute(ENDPOINT, || {
                self.request(reqwest::Method::POST, &url).json(&body)
            })
            .await?;
        Self::decode(ENDPOINT, response).await
    }

    /// `GET /brokers/{id}/custom-settings`: the program-visibility allow-list.
    pub async fn fetch_custom_settings(
        &self,
        broker: &BrokerId,
    ) -> Result<CustomSettings, ApiError> {
        const ENDPOINT: &str = "/brokers/{id}/custom-settings";
        let url = self
            .config
            .endpoint(&format!("/brokers/{}/custom-settings", broker.as_str()));
        let response = self
            .execute(ENDPOINT, || self.request(reqwest::Method::GET, &url))
            .await?;
        Self::decode(ENDPOINT, response).await
    }

    /// `GET /scenarios/{loan_id}`: a persisted scenario payload.
    pub async fn load_scenario(&self, loan: &LoanId) -> Result<Value, ApiError> {
        const ENDPOINT: &str = "/scenarios/{loan_id}";
        let url = self
            .config
            .endpoint(&format!("/scenarios/{}", loan.as_str()));
        let response = self
            .execute(ENDPOINT, || self.request(reqwest::Method::GET, &url))
            .await?;
        Self::decode(ENDPOINT, response).await
    }

    /// `PUT /scenarios/{loan_id}`: persist a scenario payload.
    pub async fn save_scenario(&self, loan: &LoanId, payload: &Value) -> Result<(), ApiError> {
        const ENDPOINT: &str = "/scenarios/{loan_id} (save)";
        let url = self
            .config
            .endpoint(&format!("/scenarios/{}", loan.as_str()));
        self.execute(ENDPOINT, || {
            self.request(reqwest::Method::PUT, &url).json(payload)
        })
        .await?;
        Ok(())
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(mut body) => {
            if body.len() > MAX_ERROR_BODY_BYTES {
                body.truncate(MAX_ERROR_BODY_BYTES);
                body.push_str("... [truncated]");
            }
            body
        }
        Err(e) => format!("<unreadable body: {e}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slashes_are_trimmed() {
        let config = ApiConfig::new("http://pricing.internal/", None);
        assert_eq!(
            config.endpoint("/pricing/programs"),
            "http://pricing.internal/pricing/programs"
        );
    }

    #[test]
    fn debug_masks_auth_token() {
        let config = ApiConfig::new("http://pricing.internal", Some("secret".to_string()));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn visibility_is_fail_closed() {
        let mut entries = std::collections::BTreeMap::new();
        entries.insert("visible".to_string(), true);
        entries.insert("hidden".to_string(), false);
        let settings = CustomSettings::from_visibility(entries);
        assert!(settings.is_visible(&ProgramId::new("visible")));
        assert!(!settings.is_visible(&ProgramId::new("hidden")));
        assert!(!settings.is_visible(&ProgramId::new("missing")));
    }
}
