use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde_json::{json, Value};
use tracing::warn;

use crate::exception::{EngineError, EngineResult};

use super::token::TokenManager;
use super::transport::GraphQlTransport;

/// GraphQL client for the upstream v2 API.
///
/// Retries transient failures (network, 5xx, 429) on a 250ms/1s/4s/8s
/// schedule, honors `Retry-After` on 429, and re-authenticates exactly once
/// on a 401 before giving up.
pub struct GqlClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<TokenManager>,
}

impl GqlClient {
    pub fn new(http: reqwest::Client, base_url: &str, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            endpoint: format!("{}/api/v2/client", base_url.trim_end_matches('/')),
            tokens,
        }
    }

    pub async fn query(&self, query: &str, variables: Value) -> EngineResult<Value> {
        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_multiplier(4.0)
            .with_randomization_factor(0.2)
            .with_max_interval(Duration::from_secs(8))
            .with_max_elapsed_time(Some(Duration::from_secs(15)))
            .build();

        let reauthed = AtomicBool::new(false);

        backoff::future::retry(schedule, || {
            let variables = variables.clone();
            let reauthed = &reauthed;
            async move {
                match self.attempt(query, variables).await {
                    Ok(data) => Ok(data),
                    Err(Attempt::Unauthorized) => {
                        if reauthed.swap(true, Ordering::SeqCst) {
                            Err(backoff::Error::Permanent(EngineError::Unauthorized(
                                "upstream rejected a freshly acquired token".into(),
                            )))
                        } else {
                            warn!("upstream returned 401; invalidating token and retrying once");
                            self.tokens.invalidate().await;
                            Err(backoff::Error::Transient {
                                err: EngineError::Unauthorized("401 from upstream".into()),
                                retry_after: Some(Duration::ZERO),
                            })
                        }
                    }
                    Err(Attempt::RateLimited(retry_after)) => Err(backoff::Error::Transient {
                        err: EngineError::RateLimited {
                            retry_after_secs: retry_after.map(|d| d.as_secs()),
                        },
                        retry_after,
                    }),
                    Err(Attempt::Transient(err)) => {
                        warn!("upstream request failed, will retry: {}", err);
                        Err(backoff::Error::Transient {
                            err,
                            retry_after: None,
                        })
                    }
                    Err(Attempt::Permanent(err)) => Err(backoff::Error::Permanent(err)),
                }
            }
        })
        .await
    }

    async fn attempt(&self, query: &str, variables: Value) -> Result<Value, Attempt> {
        let bearer = self
            .tokens
            .bearer()
            .await
            .map_err(|err| match err {
                EngineError::Unauthorized(_) => Attempt::Permanent(err),
                _ => Attempt::Transient(err),
            })?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| Attempt::Transient(EngineError::from(e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Attempt::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(Attempt::RateLimited(retry_after));
        }
        if status.is_server_error() {
            return Err(Attempt::Transient(EngineError::UpstreamUnavailable(
                format!("upstream returned {}", status),
            )));
        }
        if !status.is_success() {
            return Err(Attempt::Permanent(EngineError::UpstreamUnavailable(
                format!("upstream returned {}", status),
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Attempt::Transient(EngineError::from(e)))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                let message = first
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown GraphQL error")
                    .to_string();
                let path = first.get("path").and_then(Value::as_array).map(|parts| {
                    parts
                        .iter()
                        .map(|p| match p {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(".")
                });
                return Err(Attempt::Permanent(EngineError::UpstreamQuery {
                    message,
                    path,
                }));
            }
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}

enum Attempt {
    Unauthorized,
    RateLimited(Option<Duration>),
    Transient(EngineError),
    Permanent(EngineError),
}

#[async_trait]
impl GraphQlTransport for GqlClient {
    async fn execute(&self, query: &'static str, variables: Value) -> EngineResult<Value> {
        self.query(query, variables).await
    }
}
