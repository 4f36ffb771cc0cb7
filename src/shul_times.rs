use std::time::Duration;

use chrono::{NaiveDate, Utc};
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// Client for the upstream prayer-times (shul times) JSON API.
pub struct ShulTimes {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

/// Normalizes an optional `YYYY-MM-DD` query value, defaulting to today (UTC).
pub fn resolve_date(date: Option<&str>) -> GatewayResult<String> {
    match date.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(Utc::now().format("%Y-%m-%d").to_string()),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|parsed| parsed.format("%Y-%m-%d").to_string())
            .map_err(|_| GatewayError::validation(format!("Invalid date `{value}`, expected YYYY-MM-DD"))),
    }
}

impl ShulTimes {
    pub fn new(http: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }

    pub async fn fetch(&self, date: &str) -> GatewayResult<Value> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .header(ACCEPT, "application/json")
            .query(&[("date", date)])
            .send()
            .await
            .map_err(GatewayError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream(Some(status.as_u16()), body));
        }

        response.json::<Value>().await.map_err(|error| {
            GatewayError::upstream(
                Some(status.as_u16()),
                format!("malformed shul times response: {error}"),
            )
        })
    }
}
