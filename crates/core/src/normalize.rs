use crate::domain::signal::{
    AiAssessment, Fundamentals, InsiderActivity, PriceMetrics, SuperinvestorActivity,
    TickerSignalRecord,
};
use crate::error::PipelineError;
use crate::ingest::types::{
    InsiderTransaction, MarketSnapshot, SuperinvestorHoldings, TransactionType,
};
use chrono::{Duration, NaiveDate};

/// Raw collaborator payloads gathered for one ticker.
#[derive(Debug, Clone)]
pub struct RawTickerPayload {
    pub symbol: String,
    pub market: MarketSnapshot,
    pub insider_transactions: Vec<InsiderTransaction>,
    pub superinvestor: Option<SuperinvestorHoldings>,
}

/// Inclusive date window for insider transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl LookbackWindow {
    pub fn ending_at(until: NaiveDate, days: i64) -> Self {
        Self {
            since: until - Duration::days(days),
            until,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        (self.since..=self.until).contains(&date)
    }
}

struct RequiredMarket {
    current_price: f64,
    high_52w: f64,
    low_52w: f64,
    drop_from_high_pct: f64,
    market_cap: f64,
}

fn required_market(symbol: &str, m: &MarketSnapshot) -> Result<RequiredMarket, PipelineError> {
    let missing = |field: &'static str| PipelineError::MissingData {
        symbol: symbol.to_string(),
        field,
    };

    let current_price = m
        .current_price
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| missing("current_price"))?;
    let high_52w = m
        .high_52w
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| missing("52w_high"))?;
    let low_52w = m
        .low_52w
        .filter(|v| v.is_finite() && *v > 0.0 && *v <= high_52w)
        .ok_or_else(|| missing("52w_low"))?;
    let drop_from_high_pct = m
        .drop_from_high_pct()
        .ok_or_else(|| missing("52w_high"))?;
    let market_cap = m
        .market_cap
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| missing("market_cap"))?;

    Ok(RequiredMarket {
        current_price,
        high_52w,
        low_52w,
        drop_from_high_pct,
        market_cap,
    })
}

/// Fails with [`PipelineError::MissingData`] when price history or market cap is absent or
/// unusable. Run before the eligibility gate so absent data is not reported as a gate rejection.
pub fn check_required_fields(symbol: &str, market: &MarketSnapshot) -> Result<(), PipelineError> {
    required_market(symbol, market).map(|_| ())
}

/// Builds the typed signal record. Price history and market cap are required; absent insider or
/// superinvestor data is encoded as zero activity. The AI assessment starts out unavailable and
/// is attached later with [`TickerSignalRecord::with_ai`].
pub fn normalize(
    payload: &RawTickerPayload,
    window: LookbackWindow,
) -> Result<TickerSignalRecord, PipelineError> {
    let symbol = payload.symbol.as_str();
    let m = &payload.market;
    let RequiredMarket {
        current_price,
        high_52w,
        low_52w,
        drop_from_high_pct,
        market_cap,
    } = required_market(symbol, m)?;
    let above_low_pct = ((current_price - low_52w) / low_52w * 100.0).max(0.0);

    let debt_ratio = match m.debt_ratio {
        None => None,
        Some(v) if v.is_finite() && v >= 0.0 => Some(v),
        Some(_) => {
            return Err(PipelineError::MissingData {
                symbol: symbol.to_string(),
                field: "debt_ratio",
            })
        }
    };

    Ok(TickerSignalRecord {
        symbol: symbol.to_string(),
        price_metrics: PriceMetrics {
            current_price,
            high_52w,
            low_52w,
            drop_from_high_pct,
            above_low_pct,
        },
        fundamentals: Fundamentals {
            market_cap,
            profitable: m.profitable,
            debt_ratio,
        },
        insider_activity: aggregate_insider(&payload.insider_transactions, window),
        superinvestor_activity: payload
            .superinvestor
            .map(|h| SuperinvestorActivity {
                funds_holding: h.funds_holding,
                net_change: h.net_change,
            })
            .unwrap_or_default(),
        ai: AiAssessment::unavailable(),
    })
}

fn aggregate_insider(txs: &[InsiderTransaction], window: LookbackWindow) -> InsiderActivity {
    let mut out = InsiderActivity::default();
    for tx in txs {
        if !window.contains(tx.date) || !tx.value.is_finite() {
            continue;
        }
        // Some feeds sign sales negatively; magnitude is what counts.
        let value = tx.value.abs();
        if value == 0.0 {
            continue;
        }
        match tx.kind {
            TransactionType::Buy => {
                out.buy_value += value;
                out.buy_count += 1;
            }
            TransactionType::Sell => {
                out.sell_value += value;
                out.sell_count += 1;
            }
        }
    }
    out
}
