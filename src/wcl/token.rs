use std::time::{Duration, Instant};

use backoff::ExponentialBackoffBuilder;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::exception::{EngineError, EngineResult};

/// OAuth2 client credentials, immutable after startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
struct Token {
    bearer: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Owns the process-wide bearer token for the upstream API.
///
/// `bearer()` returns a token with at least `refresh_margin` of lifetime
/// left, refreshing synchronously otherwise. The async mutex is held across
/// the refresh, so concurrent callers share a single in-flight refresh.
pub struct TokenManager {
    http: reqwest::Client,
    oauth_url: String,
    credentials: Credentials,
    refresh_margin: Duration,
    state: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: Credentials,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            http,
            oauth_url: format!("{}/oauth/token", base_url.trim_end_matches('/')),
            credentials,
            refresh_margin,
            state: Mutex::new(None),
        }
    }

    pub async fn bearer(&self) -> EngineResult<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.as_ref() {
            if token.expires_at > Instant::now() + self.refresh_margin {
                return Ok(token.bearer.clone());
            }
        }

        let token = self.refresh().await?;
        let bearer = token.bearer.clone();
        *state = Some(token);
        Ok(bearer)
    }

    /// Drop the cached token so the next caller refreshes. Used by the client
    /// after an upstream 401.
    pub async fn invalidate(&self) {
        self.state.lock().await.take();
    }

    async fn refresh(&self) -> EngineResult<Token> {
        // 100ms, 400ms, 1.6s (jittered): three attempts before giving up.
        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_multiplier(4.0)
            .with_randomization_factor(0.2)
            .with_max_interval(Duration::from_millis(1_600))
            .with_max_elapsed_time(Some(Duration::from_millis(2_500)))
            .build();

        let result = backoff::future::retry(schedule, || async {
            self.request_token().await.map_err(|err| match err {
                EngineError::Unauthorized(_) => backoff::Error::Permanent(err),
                _ => {
                    warn!("token refresh attempt failed: {}", err);
                    backoff::Error::Transient {
                        err,
                        retry_after: None,
                    }
                }
            })
        })
        .await;

        match result {
            Ok(token) => {
                debug!("acquired fresh bearer token");
                Ok(token)
            }
            Err(EngineError::Unauthorized(msg)) => Err(EngineError::Unauthorized(msg)),
            Err(err) => Err(EngineError::TokenAcquireFailed(err.to_string())),
        }
    }

    async fn request_token(&self) -> EngineResult<Token> {
        let response = self
            .http
            .post(&self.oauth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized(format!(
                "identity endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(EngineError::UpstreamUnavailable(format!(
                "identity endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("malformed token response: {}", e)))?;
        Ok(Token {
            bearer: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }
}
