use serde::{Deserialize, Serialize};

/// Normalized signals for one candidate, built fresh each run and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSignalRecord {
    pub symbol: String,
    pub price_metrics: PriceMetrics,
    pub fundamentals: Fundamentals,
    pub insider_activity: InsiderActivity,
    pub superinvestor_activity: SuperinvestorActivity,
    pub ai: AiAssessment,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceMetrics {
    pub current_price: f64,
    pub high_52w: f64,
    pub low_52w: f64,
    /// Always within [0, 100].
    pub drop_from_high_pct: f64,
    /// Distance above the 52-week low, in percent.
    pub above_low_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub market_cap: f64,
    pub profitable: bool,
    pub debt_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InsiderActivity {
    pub buy_value: f64,
    pub sell_value: f64,
    pub buy_count: u32,
    pub sell_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperinvestorActivity {
    pub funds_holding: u32,
    pub net_change: i32,
}

impl SuperinvestorActivity {
    /// Net accumulation floored at zero.
    pub fn net_accumulation(&self) -> u32 {
        self.net_change.max(0) as u32
    }
}

/// Externally supplied qualitative assessment. `available == false` means the thesis provider
/// failed and the subscore is a stand-in zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAssessment {
    pub subscore: f64,
    pub narrative: Option<String>,
    pub reasons: Vec<String>,
    pub available: bool,
}

impl AiAssessment {
    pub fn unavailable() -> Self {
        Self {
            subscore: 0.0,
            narrative: None,
            reasons: Vec::new(),
            available: false,
        }
    }
}

impl Default for AiAssessment {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// Compact view of a record handed to the AI-thesis provider.
#[derive(Debug, Clone, Serialize)]
pub struct SignalSummary {
    pub symbol: String,
    pub price_metrics: PriceMetrics,
    pub fundamentals: Fundamentals,
    pub insider_activity: InsiderActivity,
    pub superinvestor_activity: SuperinvestorActivity,
}

impl TickerSignalRecord {
    pub fn summary(&self) -> SignalSummary {
        SignalSummary {
            symbol: self.symbol.clone(),
            price_metrics: self.price_metrics,
            fundamentals: self.fundamentals,
            insider_activity: self.insider_activity,
            superinvestor_activity: self.superinvestor_activity,
        }
    }

    pub fn with_ai(mut self, ai: AiAssessment) -> Self {
        self.ai = ai;
        self
    }
}
