use crate::config::env_parse;
use crate::ingest::types::MarketSnapshot;
use std::collections::BTreeSet;
use std::fmt;

/// Fundamental/price filter applied before scoring. Tickers that fail it never reach the scorer.
#[derive(Debug, Clone)]
pub struct EligibilityGate {
    pub min_market_cap: f64,

    /// Hard cutoff; a ticker with an unknown debt ratio passes.
    pub max_debt_ratio: f64,

    /// Minimum percent below the 52-week high to be considered "near the low".
    pub min_drop_from_high_pct: f64,

    pub require_profitable: bool,
}

impl Default for EligibilityGate {
    fn default() -> Self {
        Self {
            min_market_cap: 1_000_000_000.0,
            max_debt_ratio: 2.0,
            min_drop_from_high_pct: 25.0,
            require_profitable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    MarketCapTooLow { market_cap: Option<f64>, min: f64 },
    Unprofitable,
    DebtTooHigh { debt_ratio: f64, max: f64 },
    InsufficientDrop { drop_pct: Option<f64>, min: f64 },
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::MarketCapTooLow { market_cap, min } => match market_cap {
                Some(mc) => write!(f, "market cap {mc:.0} below minimum {min:.0}"),
                None => write!(f, "market cap unknown (minimum {min:.0})"),
            },
            GateRejection::Unprofitable => f.write_str("not profitable"),
            GateRejection::DebtTooHigh { debt_ratio, max } => {
                write!(f, "debt ratio {debt_ratio:.2} above cutoff {max:.2}")
            }
            GateRejection::InsufficientDrop { drop_pct, min } => match drop_pct {
                Some(d) => write!(f, "only {d:.1}% below 52-week high (minimum {min:.1}%)"),
                None => write!(f, "price history unusable (minimum drop {min:.1}%)"),
            },
        }
    }
}

impl EligibilityGate {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Some(v) = env_parse::<f64>("MIN_MARKET_CAP")? {
            out.min_market_cap = v;
        }
        if let Some(v) = env_parse::<f64>("MAX_DEBT_RATIO")? {
            out.max_debt_ratio = v;
        }
        if let Some(v) = env_parse::<f64>("MIN_DROP_FROM_HIGH_PCT")? {
            out.min_drop_from_high_pct = v;
        }
        if let Some(v) = env_parse::<bool>("REQUIRE_PROFITABLE")? {
            out.require_profitable = v;
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.min_market_cap.is_finite() && self.min_market_cap >= 0.0,
            "MIN_MARKET_CAP must be a non-negative number (got {})",
            self.min_market_cap
        );
        anyhow::ensure!(
            self.max_debt_ratio.is_finite() && self.max_debt_ratio >= 0.0,
            "MAX_DEBT_RATIO must be a non-negative number (got {})",
            self.max_debt_ratio
        );
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.min_drop_from_high_pct),
            "MIN_DROP_FROM_HIGH_PCT must be within 0..=100 (got {})",
            self.min_drop_from_high_pct
        );
        Ok(())
    }

    pub fn check(&self, snap: &MarketSnapshot) -> Result<(), GateRejection> {
        let drop_pct = snap.drop_from_high_pct();
        match drop_pct {
            Some(d) if d >= self.min_drop_from_high_pct => {}
            _ => {
                return Err(GateRejection::InsufficientDrop {
                    drop_pct,
                    min: self.min_drop_from_high_pct,
                })
            }
        }

        match snap.market_cap {
            Some(mc) if mc >= self.min_market_cap => {}
            market_cap => {
                return Err(GateRejection::MarketCapTooLow {
                    market_cap,
                    min: self.min_market_cap,
                })
            }
        }

        if self.require_profitable && !snap.profitable {
            return Err(GateRejection::Unprofitable);
        }

        if let Some(debt_ratio) = snap.debt_ratio {
            if debt_ratio > self.max_debt_ratio {
                return Err(GateRejection::DebtTooHigh {
                    debt_ratio,
                    max: self.max_debt_ratio,
                });
            }
        }

        Ok(())
    }
}

/// Trims, upper-cases and deduplicates symbols. The result is sorted so that a run never depends
/// on the order the universe was listed in.
pub fn normalize_universe<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    symbols
        .into_iter()
        .map(|s| s.as_ref().trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            current_price: Some(70.0),
            high_52w: Some(100.0),
            low_52w: Some(65.0),
            market_cap: Some(5.0e9),
            profitable: true,
            debt_ratio: Some(0.8),
        }
    }

    #[test]
    fn accepts_fundamentally_eligible_ticker() {
        assert_eq!(EligibilityGate::default().check(&snapshot()), Ok(()));
    }

    #[test]
    fn rejects_small_caps_and_unknown_caps() {
        let gate = EligibilityGate::default();
        let mut snap = snapshot();
        snap.market_cap = Some(5.0e8);
        assert!(matches!(
            gate.check(&snap),
            Err(GateRejection::MarketCapTooLow { .. })
        ));
        snap.market_cap = None;
        assert!(matches!(
            gate.check(&snap),
            Err(GateRejection::MarketCapTooLow { market_cap: None, .. })
        ));
    }

    #[test]
    fn rejects_unprofitable_unless_disabled() {
        let mut snap = snapshot();
        snap.profitable = false;
        assert_eq!(
            EligibilityGate::default().check(&snap),
            Err(GateRejection::Unprofitable)
        );

        let lenient = EligibilityGate {
            require_profitable: false,
            ..Default::default()
        };
        assert_eq!(lenient.check(&snap), Ok(()));
    }

    #[test]
    fn debt_cutoff_is_hard_but_unknown_debt_passes() {
        let gate = EligibilityGate::default();
        let mut snap = snapshot();
        snap.debt_ratio = Some(2.5);
        assert!(matches!(gate.check(&snap), Err(GateRejection::DebtTooHigh { .. })));
        snap.debt_ratio = None;
        assert_eq!(gate.check(&snap), Ok(()));
    }

    #[test]
    fn requires_minimum_drop_from_high() {
        let gate = EligibilityGate::default();
        let mut snap = snapshot();
        snap.current_price = Some(90.0);
        assert!(matches!(
            gate.check(&snap),
            Err(GateRejection::InsufficientDrop { .. })
        ));
        snap.current_price = Some(75.0);
        assert_eq!(gate.check(&snap), Ok(()));
    }

    #[test]
    fn universe_is_trimmed_deduplicated_and_sorted() {
        let out = normalize_universe(["msft ", "AAPL", "", "aapl", "BRK-B"]);
        assert_eq!(out, vec!["AAPL", "BRK-B", "MSFT"]);
    }
}
