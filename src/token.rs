//! Bearer token cache backed by an OAuth client-credentials exchange.
//!
//! The cache owns at most one token. A token is handed out only while
//! `now < expires_at`, and `expires_at` is pulled in by a safety margin so a
//! caller never receives a token that is about to lapse.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token as reported by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

pub trait TokenExchange: Send + Sync {
    fn exchange(&self) -> impl Future<Output = GatewayResult<IssuedToken>> + Send;
}

/// Client-credentials grant against the identity provider's token endpoint.
pub struct ClientCredentials {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    scope: String,
    timeout: Duration,
}

impl ClientCredentials {
    pub fn new(http: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            http,
            endpoint: config.token_endpoint(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            timeout: config.upstream_timeout(),
        }
    }
}

impl TokenExchange for ClientCredentials {
    async fn exchange(&self) -> GatewayResult<IssuedToken> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|error| GatewayError::Auth {
                status: None,
                body: error.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| GatewayError::Auth {
            status: Some(status.as_u16()),
            body: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(GatewayError::Auth {
                status: Some(status.as_u16()),
                body,
            });
        }

        serde_json::from_str::<IssuedToken>(&body).map_err(|error| GatewayError::Auth {
            status: Some(status.as_u16()),
            body: format!("malformed token response: {error}"),
        })
    }
}

pub struct TokenCache<E = ClientCredentials> {
    exchange: E,
    margin: chrono::Duration,
    cached: RwLock<Option<AccessToken>>,
    refresh: Mutex<()>,
}

impl<E: TokenExchange> TokenCache<E> {
    pub fn new(exchange: E, margin: chrono::Duration) -> Self {
        Self {
            exchange,
            margin,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    async fn current(&self) -> Option<AccessToken> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh(Utc::now()))
            .cloned()
    }

    /// Returns the cached token, exchanging for a new one when it is stale.
    ///
    /// Refreshes are single-flight: callers arriving during a refresh wait
    /// for it and reuse its result. A failed exchange leaves the cache as it
    /// was.
    pub async fn get_token(&self) -> GatewayResult<AccessToken> {
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let _refreshing = self.refresh.lock().await;
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let issued = self.exchange.exchange().await?;
        let now = Utc::now();
        let expires_at = self.expiry_for(now, issued.expires_in)?;

        let token = AccessToken {
            value: issued.access_token,
            expires_at,
        };
        *self.cached.write().await = Some(token.clone());
        tracing::debug!(expires_at = %token.expires_at, "refreshed access token");
        Ok(token)
    }

    /// `now + expires_in - margin`, refusing lifetimes that would leave the
    /// token stale on arrival or that overflow the clock.
    fn expiry_for(&self, now: DateTime<Utc>, expires_in: i64) -> GatewayResult<DateTime<Utc>> {
        let lifetime = chrono::TimeDelta::try_seconds(expires_in)
            .and_then(|issued| issued.checked_sub(&self.margin))
            .ok_or_else(|| GatewayError::Auth {
                status: None,
                body: format!("token lifetime out of range: expires_in={expires_in}"),
            })?;

        if lifetime <= chrono::TimeDelta::zero() {
            tracing::warn!(expires_in, "issued token lifetime is within the refresh margin");
            return Err(GatewayError::Auth {
                status: None,
                body: "token lifetime shorter than refresh margin".to_string(),
            });
        }

        now.checked_add_signed(lifetime).ok_or_else(|| GatewayError::Auth {
            status: None,
            body: format!("token lifetime out of range: expires_in={expires_in}"),
        })
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}
