use crate::config::{env_parse, Settings};
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{InsiderTransaction, MarketSnapshot, SuperinvestorHoldings};
use crate::normalize::LookbackWindow;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_MAX_CALLS_PER_MINUTE: usize = 75;

#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}

#[async_trait::async_trait]
pub trait InsiderActivityProvider: Send + Sync {
    /// Transactions dated inside `window`. No activity is an empty list, not an error.
    async fn insider_transactions(
        &self,
        symbol: &str,
        window: LookbackWindow,
    ) -> Result<Vec<InsiderTransaction>>;
}

#[async_trait::async_trait]
pub trait SuperinvestorProvider: Send + Sync {
    /// `None` when no tracked fund reports the ticker.
    async fn superinvestor_holdings(&self, symbol: &str) -> Result<Option<SuperinvestorHoldings>>;
}

/// One JSON HTTP service serving all three data feeds.
#[derive(Debug, Clone)]
pub struct HttpJsonDataProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct InsiderResponse {
    #[serde(default)]
    transactions: Vec<InsiderTransaction>,
}

impl HttpJsonDataProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs =
            env_parse::<u64>("DATA_PROVIDER_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = env_parse::<u32>("DATA_PROVIDER_RETRIES")?.unwrap_or(DEFAULT_RETRIES);
        let max_calls = env_parse::<usize>("DATA_PROVIDER_MAX_CALLS_PER_MINUTE")?
            .unwrap_or(DEFAULT_MAX_CALLS_PER_MINUTE);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries: retries.max(1),
            limiter: Arc::new(RateLimiter::per_minute(max_calls)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    /// `Ok(None)` on HTTP 404.
    async fn fetch_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        self.limiter.acquire().await;

        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .context("data provider request failed")?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read provider response")?;
        if !status.is_success() {
            anyhow::bail!("data provider HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<T>(&text)
            .with_context(|| format!("provider response for {path} has unexpected shape: {text}"))?;
        Ok(Some(parsed))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(path, query).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, path, ?backoff, error = %err, "data provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonDataProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        self.fetch::<MarketSnapshot>(&format!("/v1/market/{symbol}"), &[])
            .await?
            .with_context(|| format!("no market data for {symbol}"))
    }
}

#[async_trait::async_trait]
impl InsiderActivityProvider for HttpJsonDataProvider {
    async fn insider_transactions(
        &self,
        symbol: &str,
        window: LookbackWindow,
    ) -> Result<Vec<InsiderTransaction>> {
        let query = [
            ("since", window.since.to_string()),
            ("until", window.until.to_string()),
        ];
        let res = self
            .fetch::<InsiderResponse>(&format!("/v1/insider/{symbol}"), &query)
            .await?;
        Ok(res.map(|r| r.transactions).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl SuperinvestorProvider for HttpJsonDataProvider {
    async fn superinvestor_holdings(&self, symbol: &str) -> Result<Option<SuperinvestorHoldings>> {
        self.fetch::<SuperinvestorHoldings>(&format!("/v1/superinvestors/{symbol}"), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::TransactionType;
    use serde_json::json;

    #[test]
    fn parses_insider_response_shape() {
        let v = json!({
            "transactions": [
                {"date": "2026-09-10", "value": 125000.0, "type": "buy"},
                {"date": "2026-09-12", "value": 40000.0, "type": "sell"}
            ]
        });
        let parsed: InsiderResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.transactions.len(), 2);
        assert_eq!(parsed.transactions[1].kind, TransactionType::Sell);
    }

    #[test]
    fn empty_insider_response_defaults_to_no_transactions() {
        let parsed: InsiderResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.transactions.is_empty());
    }

    #[test]
    fn rejects_non_numeric_holdings() {
        let v = json!({"funds_holding": "many", "net_change": 2});
        assert!(serde_json::from_value::<SuperinvestorHoldings>(v).is_err());
    }

    #[test]
    fn joins_base_url_and_path() {
        let provider = HttpJsonDataProvider {
            http: reqwest::Client::new(),
            base_url: "https://data.example.com/".to_string(),
            api_key: None,
            retries: 1,
            limiter: Arc::new(RateLimiter::per_minute(10)),
        };
        assert_eq!(
            provider.url("/v1/market/AAPL"),
            "https://data.example.com/v1/market/AAPL"
        );
    }
}
