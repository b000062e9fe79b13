use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::PlannerConfig;

const PLAN_PATH: &str = "/v1/ai/plan";
const MAX_RETRIES: usize = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// Wait suggested when a 429 carries no usable hint
pub const DEFAULT_RETRY_SECONDS: u64 = 45;

// ==================== Request / Response ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanTarget {
    pub success_rate: f64,
    pub minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanContext {
    pub weak_families: Vec<String>,
    pub need_items: usize,
    pub learner_name: String,
    pub max_addend: u8,
}

/// Body of `POST {base}/v1/ai/plan`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub user_id: String,
    pub grade: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastery: Option<BTreeMap<String, f64>>,
    pub target: PlanTarget,
    pub context: PlanContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Loosely typed plan as returned by the remote planner
///
/// Items stay raw JSON; they go through the sanitizer before use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePlan {
    pub plan_id: Option<String>,
    pub source: Option<String>,
    pub items: Vec<Value>,
}

impl RemotePlan {
    /// Accepts both `{plan: {items}}` and a bare `{items}` body
    pub fn from_body(body: &Value) -> Self {
        let plan = match body.get("plan") {
            Some(plan) if plan.get("items").is_some_and(Value::is_array) => plan,
            _ => body,
        };
        let text = |key: &str| {
            plan.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            plan_id: text("planId").or_else(|| text("plan_id")),
            source: text("source").or_else(|| text("model")),
            items: plan
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Ready(RemotePlan),
    RateLimited { retry_in_seconds: u64 },
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("remote planner not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

// ==================== Client ====================

#[derive(Clone)]
pub struct RemotePlanner {
    config: PlannerConfig,
    client: reqwest::Client,
}

impl RemotePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn is_available(&self) -> bool {
        self.config.is_available()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Ask the remote planner for a plan
    ///
    /// Network errors and 5xx responses are retried with exponential
    /// backoff; a 429 is returned immediately as [`PlanOutcome::RateLimited`].
    pub async fn request_plan(&self, request: &PlanRequest) -> Result<PlanOutcome, PlannerError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .filter(|url| self.config.enabled && !url.trim().is_empty())
            .ok_or(PlannerError::NotConfigured)?;
        let url = format!("{}{PLAN_PATH}", base.trim().trim_end_matches('/'));

        let mut payload = request.clone();
        if payload.model.is_none() {
            payload.model = Some(self.config.model.clone());
        }

        let mut retry = 0;
        loop {
            let err = match self.client.post(&url).json(&payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let header = resp
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let body: Option<Value> = resp.json().await.ok();
                        let retry_in_seconds = retry_after_seconds(header.as_deref(), body.as_ref());
                        warn!(retry_in_seconds, "remote planner rate limited");
                        return Ok(PlanOutcome::RateLimited { retry_in_seconds });
                    }
                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        let body: Value = serde_json::from_slice(&bytes)?;
                        let plan = RemotePlan::from_body(&body);
                        debug!(items = plan.items.len(), "remote plan received");
                        return Ok(PlanOutcome::Ready(plan));
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let err = PlannerError::HttpStatus { status, body };
                    if !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => PlannerError::Request(e),
            };

            if retry >= MAX_RETRIES {
                return Err(err);
            }
            let backoff = Duration::from_millis(BASE_BACKOFF_MS * (1 << retry));
            warn!(retry, error = %err, "remote planner request failed, retrying");
            sleep(backoff).await;
            retry += 1;
        }
    }
}

/// Larger of the `Retry-After` header and the body's `retry_in_seconds`,
/// or [`DEFAULT_RETRY_SECONDS`] when neither is positive
pub fn retry_after_seconds(header: Option<&str>, body: Option<&Value>) -> u64 {
    let from_header = header
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(0.0);
    let from_body = body
        .and_then(|b| b.get("retry_in_seconds"))
        .and_then(galaxy_algo::to_number)
        .filter(|v| *v > 0.0)
        .unwrap_or(0.0);
    let seconds = from_header.max(from_body).ceil();
    if seconds > 0.0 {
        seconds as u64
    } else {
        DEFAULT_RETRY_SECONDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_after_prefers_larger_hint() {
        assert_eq!(retry_after_seconds(Some("10"), Some(&json!({"retry_in_seconds": 30}))), 30);
        assert_eq!(retry_after_seconds(Some("60"), Some(&json!({"retry_in_seconds": "5"}))), 60);
        assert_eq!(retry_after_seconds(None, Some(&json!({"retry_in_seconds": 12.2}))), 13);
    }

    #[test]
    fn test_retry_after_default() {
        assert_eq!(retry_after_seconds(None, None), DEFAULT_RETRY_SECONDS);
        assert_eq!(retry_after_seconds(Some("soon"), Some(&json!({}))), DEFAULT_RETRY_SECONDS);
        assert_eq!(retry_after_seconds(Some("0"), Some(&json!({"retry_in_seconds": -4}))), DEFAULT_RETRY_SECONDS);
    }

    #[test]
    fn test_remote_plan_shapes() {
        let nested = json!({"plan": {"planId": "p1", "source": "gemini", "items": [{"a": 1, "b": 2}]}});
        let plan = RemotePlan::from_body(&nested);
        assert_eq!(plan.plan_id.as_deref(), Some("p1"));
        assert_eq!(plan.source.as_deref(), Some("gemini"));
        assert_eq!(plan.items.len(), 1);

        let flat = json!({"plan_id": "p2", "items": [{"a": 1, "b": 2}, {"a": 3, "b": 3}]});
        let plan = RemotePlan::from_body(&flat);
        assert_eq!(plan.plan_id.as_deref(), Some("p2"));
        assert_eq!(plan.items.len(), 2);

        assert!(RemotePlan::from_body(&json!({"plan": "nope"})).items.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_planner_errors() {
        let planner = RemotePlanner::new(PlannerConfig::default());
        let request = PlanRequest {
            user_id: "u".into(),
            grade: "K".into(),
            mastery: None,
            target: PlanTarget { success_rate: 0.85, minutes: 10 },
            context: PlanContext {
                weak_families: vec![],
                need_items: 10,
                learner_name: "Kid".into(),
                max_addend: 3,
            },
            model: None,
        };
        assert!(matches!(
            planner.request_plan(&request).await,
            Err(PlannerError::NotConfigured)
        ));
    }
}
