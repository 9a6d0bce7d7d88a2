//! Fitbit body-log client.
//!
//! Every request carries the current access token; a 401 response triggers a
//! transparent refresh-token exchange followed by a single retry. Observers
//! registered on the client are notified once per rotation with the new token
//! pair so the caller can persist it. A 429 surfaces as `Error::RateLimited`
//! immediately: the quota resets on a wall-clock boundary that a short-lived
//! process cannot usefully wait for.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::sync::BodyLogDestination;

const API_BASE: &str = "https://api.fitbit.com";
const TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

/// A current access/refresh token pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Hook invoked exactly once per token rotation, with the new pair.
pub trait TokenObserver: Send + Sync {
    fn on_rotation(&self, tokens: &TokenPair);
}

/// Observer that records the most recent rotation for later persistence.
#[derive(Debug, Default)]
pub struct RotatedTokenCell {
    cell: std::sync::Mutex<Option<TokenPair>>,
}

impl RotatedTokenCell {
    /// Returns the rotated pair, if any rotation happened, clearing the cell.
    pub fn take(&self) -> Option<TokenPair> {
        self.cell.lock().unwrap().take()
    }
}

impl TokenObserver for RotatedTokenCell {
    fn on_rotation(&self, tokens: &TokenPair) {
        *self.cell.lock().unwrap() = Some(tokens.clone());
    }
}

/// One prior body-log entry, as returned by the weight-log lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct WeightLogEntry {
    #[serde(default)]
    pub bmi: f64,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub fat: f64,
    #[serde(rename = "logId", default)]
    pub log_id: i64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Deserialize)]
struct WeightLogResponse {
    #[serde(default)]
    weight: Vec<WeightLogEntry>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
}

/// Client for the Fitbit body-log endpoints.
pub struct FitbitClient {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    tokens: Mutex<TokenPair>,
    observer: Option<Arc<dyn TokenObserver>>,
}

impl FitbitClient {
    pub fn new(client_id: String, client_secret: String, tokens: TokenPair) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
            client_id,
            client_secret,
            tokens: Mutex::new(tokens),
            observer: None,
        }
    }

    /// Point both the API and the token endpoint at a local test server.
    #[cfg(test)]
    fn with_base_url(mut self, base: String) -> Self {
        self.token_url = format!("{base}/oauth2/token");
        self.api_base = base;
        self
    }

    pub fn with_token_observer(mut self, observer: Arc<dyn TokenObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Prior entries logged for the given calendar date. A non-empty result
    /// means the day is already synced.
    pub async fn existing_weight_logs(&self, date: NaiveDate) -> Result<Vec<WeightLogEntry>> {
        let url = format!(
            "{}/1/user/-/body/log/weight/date/{}.json",
            self.api_base,
            date.format("%Y-%m-%d")
        );
        let response = self.send_authorized(|| self.http.get(&url)).await?;
        let response = check_status(response).await?;
        let parsed: WeightLogResponse = response.json().await?;
        Ok(parsed.weight)
    }

    pub async fn create_weight_log(&self, weight: f64, instant: DateTime<Utc>) -> Result<()> {
        let url = format!("{}/1/user/-/body/log/weight.json", self.api_base);
        let query = log_query("weight", weight, instant);
        let response = self.send_authorized(|| self.http.post(&url).query(&query)).await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn create_fat_log(&self, fat: f64, instant: DateTime<Utc>) -> Result<()> {
        let url = format!("{}/1/user/-/body/log/fat.json", self.api_base);
        let query = log_query("fat", fat, instant);
        let response = self.send_authorized(|| self.http.post(&url).query(&query)).await?;
        check_status(response).await?;
        Ok(())
    }

    /// Send a request with the current access token. On a 401, refresh the
    /// token pair and retry the request once.
    async fn send_authorized(
        &self,
        make: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let access_token = self.tokens.lock().await.access_token.clone();
        let response = make().bearer_auth(&access_token).send().await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        log::info!("Fitbit access token rejected, refreshing");
        let access_token = self.refresh_tokens().await?;
        Ok(make().bearer_auth(&access_token).send().await?)
    }

    /// Exchange the stored refresh token for a new pair and notify the
    /// observer. Returns the new access token.
    async fn refresh_tokens(&self) -> Result<String> {
        let mut tokens = self.tokens.lock().await;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens.refresh_token.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DestinationApi {
                status: status.as_u16(),
                body,
            });
        }

        let refreshed: RefreshResponse = response.json().await?;
        tokens.access_token = refreshed.access_token;
        tokens.refresh_token = refreshed.refresh_token;
        let pair = tokens.clone();
        drop(tokens);

        log::info!("Fitbit token pair rotated");
        if let Some(observer) = &self.observer {
            observer.on_rotation(&pair);
        }
        Ok(pair.access_token)
    }
}

#[async_trait::async_trait]
impl BodyLogDestination for FitbitClient {
    async fn existing_weight_logs(&self, date: NaiveDate) -> Result<Vec<WeightLogEntry>> {
        FitbitClient::existing_weight_logs(self, date).await
    }

    async fn create_weight_log(&self, weight: f64, instant: DateTime<Utc>) -> Result<()> {
        FitbitClient::create_weight_log(self, weight, instant).await
    }

    async fn create_fat_log(&self, fat: f64, instant: DateTime<Utc>) -> Result<()> {
        FitbitClient::create_fat_log(self, fat, instant).await
    }
}

fn log_query(field: &'static str, value: f64, instant: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        (field, format!("{value:.2}")),
        ("date", instant.format("%Y-%m-%d").to_string()),
        ("time", instant.format("%H:%M:%S").to_string()),
    ]
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::DestinationApi {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
