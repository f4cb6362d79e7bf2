use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Market-data provider payload. Price fields and market cap are required downstream; they are
/// optional here so that a partial provider response can be reported as missing data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub current_price: Option<f64>,
    #[serde(rename = "52w_high", alias = "high_52w")]
    pub high_52w: Option<f64>,
    #[serde(rename = "52w_low", alias = "low_52w")]
    pub low_52w: Option<f64>,
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub profitable: bool,
    #[serde(default)]
    pub debt_ratio: Option<f64>,
}

impl MarketSnapshot {
    /// Percent drop from the 52-week high, bounded to [0, 100]. `None` when prices are unusable.
    pub fn drop_from_high_pct(&self) -> Option<f64> {
        let current = self.current_price.filter(|v| v.is_finite() && *v >= 0.0)?;
        let high = self.high_52w.filter(|v| v.is_finite() && *v > 0.0)?;
        Some(((high - current) / high * 100.0).clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsiderTransaction {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperinvestorHoldings {
    pub funds_holding: u32,
    /// Funds that added or increased minus funds that reduced or exited.
    pub net_change: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_provider_field_names() {
        let v = json!({
            "current_price": 70.0,
            "52w_high": 100.0,
            "52w_low": 65.0,
            "market_cap": 2.5e9,
            "profitable": true,
            "debt_ratio": 0.4
        });
        let snap: MarketSnapshot = serde_json::from_value(v).unwrap();
        assert_eq!(snap.high_52w, Some(100.0));
        assert_eq!(snap.low_52w, Some(65.0));
        assert_eq!(snap.drop_from_high_pct(), Some(30.0));
    }

    #[test]
    fn missing_debt_ratio_is_allowed() {
        let v = json!({
            "current_price": 10.0,
            "52w_high": 20.0,
            "52w_low": 9.0,
            "market_cap": 1.0e10,
            "profitable": true
        });
        let snap: MarketSnapshot = serde_json::from_value(v).unwrap();
        assert_eq!(snap.debt_ratio, None);
    }

    #[test]
    fn drop_is_bounded_when_price_exceeds_stale_high() {
        let snap = MarketSnapshot {
            current_price: Some(110.0),
            high_52w: Some(100.0),
            ..Default::default()
        };
        assert_eq!(snap.drop_from_high_pct(), Some(0.0));
    }

    #[test]
    fn insider_transaction_type_is_lowercase() {
        let v = json!({"date": "2026-09-01", "value": 250000.0, "type": "buy"});
        let tx: InsiderTransaction = serde_json::from_value(v).unwrap();
        assert_eq!(tx.kind, TransactionType::Buy);
    }
}
