use crate::ingest::provider::{InsiderActivityProvider, MarketDataProvider, SuperinvestorProvider};
use crate::ingest::types::{InsiderTransaction, MarketSnapshot, SuperinvestorHoldings};
use crate::llm::{AiThesis, Provider, ThesisProvider, ThesisRequest};
use crate::normalize::LookbackWindow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Canned payloads for every collaborator, keyed by symbol. Used for dry runs and demos.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureProvider {
    pub symbols: BTreeMap<String, FixtureTicker>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureTicker {
    pub market: Option<MarketSnapshot>,
    #[serde(default)]
    pub insider: Vec<InsiderTransaction>,
    #[serde(default)]
    pub superinvestor: Option<SuperinvestorHoldings>,
    #[serde(default)]
    pub thesis: Option<AiThesis>,
}

impl FixtureProvider {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        let mut parsed: Self = serde_json::from_str(&text)
            .with_context(|| format!("fixture {} is not valid JSON", path.display()))?;
        parsed.symbols = parsed
            .symbols
            .into_iter()
            .map(|(k, v)| (k.trim().to_ascii_uppercase(), v))
            .collect();
        Ok(parsed)
    }

    pub fn universe(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }

    fn ticker(&self, symbol: &str) -> Result<&FixtureTicker> {
        self.symbols
            .get(symbol)
            .with_context(|| format!("fixture has no entry for {symbol}"))
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for FixtureProvider {
    fn provider_name(&self) -> &'static str {
        "fixture"
    }

    async fn market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        self.ticker(symbol)?
            .market
            .clone()
            .with_context(|| format!("fixture has no market data for {symbol}"))
    }
}

#[async_trait::async_trait]
impl InsiderActivityProvider for FixtureProvider {
    async fn insider_transactions(
        &self,
        symbol: &str,
        window: LookbackWindow,
    ) -> Result<Vec<InsiderTransaction>> {
        Ok(self
            .ticker(symbol)?
            .insider
            .iter()
            .filter(|tx| window.contains(tx.date))
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl SuperinvestorProvider for FixtureProvider {
    async fn superinvestor_holdings(&self, symbol: &str) -> Result<Option<SuperinvestorHoldings>> {
        Ok(self.ticker(symbol)?.superinvestor)
    }
}

#[async_trait::async_trait]
impl ThesisProvider for FixtureProvider {
    fn provider(&self) -> Provider {
        Provider::Fixture
    }

    async fn generate_thesis(&self, request: ThesisRequest) -> Result<AiThesis> {
        let symbol = request.summary.symbol.as_str();
        self.ticker(symbol)?
            .thesis
            .clone()
            .with_context(|| format!("fixture has no thesis for {symbol}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixture() -> FixtureProvider {
        serde_json::from_value(json!({
            "symbols": {
                "AAA": {
                    "market": {
                        "current_price": 70.0, "52w_high": 100.0, "52w_low": 60.0,
                        "market_cap": 5.0e9, "profitable": true, "debt_ratio": 0.3
                    },
                    "insider": [
                        {"date": "2026-09-01", "value": 200000.0, "type": "buy"},
                        {"date": "2024-01-01", "value": 900000.0, "type": "buy"}
                    ],
                    "superinvestor": {"funds_holding": 6, "net_change": 3},
                    "thesis": {"subscore": 8.0, "narrative": "Solid.", "reasons": []}
                },
                "NOPE": {}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn serves_all_collaborators_from_one_file() {
        let f = fixture();
        assert_eq!(f.universe(), vec!["AAA", "NOPE"]);

        let snap = f.market_snapshot("AAA").await.unwrap();
        assert_eq!(snap.market_cap, Some(5.0e9));

        let window = LookbackWindow::ending_at(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(), 180);
        let txs = f.insider_transactions("AAA", window).await.unwrap();
        assert_eq!(txs.len(), 1);

        let holdings = f.superinvestor_holdings("AAA").await.unwrap().unwrap();
        assert_eq!(holdings.net_change, 3);
    }

    #[tokio::test]
    async fn unknown_symbol_and_missing_market_are_errors() {
        let f = fixture();
        assert!(f.market_snapshot("ZZZ").await.is_err());
        assert!(f.market_snapshot("NOPE").await.is_err());
        assert!(f.superinvestor_holdings("NOPE").await.unwrap().is_none());
    }
}
