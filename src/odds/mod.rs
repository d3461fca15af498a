//! Pari-mutuel odds engine.
//!
//! Turns live pool totals into the payout multiplier shown next to each
//! side. Pure arithmetic: no I/O, no errors. Every degenerate input
//! (empty pool, zero side, NaN, infinities) degrades to a fixed fallback
//! multiplier rather than failing.

pub mod pool;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use pool::PoolTotals;

use crate::types::{MatchStatus, Selection};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// House commission taken from the pool before redistribution.
pub const DEFAULT_COMMISSION: f64 = 0.05;

/// Multiplier shown when the pool cannot produce a meaningful value.
pub const FALLBACK_ODDS: f64 = 1.9;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OddsConfig {
    #[serde(default = "default_commission")]
    pub commission: f64,
    #[serde(default = "default_fallback")]
    pub fallback: f64,
}

fn default_commission() -> f64 {
    DEFAULT_COMMISSION
}

fn default_fallback() -> f64 {
    FALLBACK_ODDS
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            commission: DEFAULT_COMMISSION,
            fallback: FALLBACK_ODDS,
        }
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// How odds are presented to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OddsFormat {
    /// Percentage of stake returned (decimal odds × 100, `%` suffix).
    #[default]
    #[serde(alias = "percent")]
    Decimal,
    HongKong,
    Malay,
}

impl fmt::Display for OddsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OddsFormat::Decimal => write!(f, "decimal"),
            OddsFormat::HongKong => write!(f, "hong-kong"),
            OddsFormat::Malay => write!(f, "malay"),
        }
    }
}

impl std::str::FromStr for OddsFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "decimal" | "percent" | "percentage" => Ok(OddsFormat::Decimal),
            "hong-kong" | "hongkong" | "hk" => Ok(OddsFormat::HongKong),
            "malay" | "my" => Ok(OddsFormat::Malay),
            _ => Err(anyhow::anyhow!("Unknown odds format: {s}")),
        }
    }
}

/// A formatted odds value ready for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OddsDisplay {
    pub value: f64,
    pub suffix: &'static str,
    pub decimals: usize,
}

impl fmt::Display for OddsDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}{}", self.decimals, self.value, self.suffix)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct OddsEngine {
    config: OddsConfig,
}

impl OddsEngine {
    pub fn new(config: OddsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OddsConfig {
        &self.config
    }

    /// Decimal payout multiplier for one side of the pool.
    ///
    /// `combined * (1 - commission) / side`, or the fallback when either
    /// input is zero, negative or non-finite.
    pub fn decimal_odds(&self, side_total: f64, combined_pool: f64) -> f64 {
        let usable = side_total.is_finite()
            && combined_pool.is_finite()
            && side_total > 0.0
            && combined_pool > 0.0;
        if !usable {
            return self.config.fallback;
        }

        let odds = combined_pool * (1.0 - self.config.commission) / side_total;
        if odds.is_finite() && odds > 0.0 {
            odds
        } else {
            self.config.fallback
        }
    }

    /// Render a decimal multiplier in the requested format.
    pub fn format(&self, decimal: f64, format: OddsFormat) -> OddsDisplay {
        match format {
            OddsFormat::Decimal => OddsDisplay {
                value: decimal * 100.0,
                suffix: "%",
                decimals: 1,
            },
            OddsFormat::HongKong => OddsDisplay {
                value: (decimal - 1.0).max(0.0),
                suffix: " HK",
                decimals: 2,
            },
            OddsFormat::Malay => OddsDisplay {
                value: malay_from_hk(decimal - 1.0),
                suffix: " MY",
                decimals: 2,
            },
        }
    }

    /// Display value for one side, straight from pool totals.
    pub fn display(&self, side_total: f64, combined_pool: f64, format: OddsFormat) -> OddsDisplay {
        self.format(self.decimal_odds(side_total, combined_pool), format)
    }

    /// What a stake on this side would return if the pool closed now.
    ///
    /// Unlike [`decimal_odds`](Self::decimal_odds) this uses 0 for an empty
    /// pool: with nothing on the other side there is nothing to win yet.
    pub fn projected_return(&self, stake: f64, side_total: f64, combined_pool: f64) -> f64 {
        if !(side_total > 0.0 && combined_pool > 0.0) || !stake.is_finite() {
            return 0.0;
        }
        let odds = combined_pool * (1.0 - self.config.commission) / side_total;
        if odds.is_finite() {
            stake * odds
        } else {
            0.0
        }
    }

    /// Build the two-sided board for a match.
    ///
    /// A finished match shows an empty pool (every side falls back) unless
    /// the result is being revealed.
    pub fn board(
        &self,
        totals: &PoolTotals,
        status: MatchStatus,
        revealing_result: bool,
        format: OddsFormat,
    ) -> OddsBoard {
        let visible = status != MatchStatus::Finished || revealing_result;
        let shown = if visible { *totals } else { PoolTotals::default() };
        let combined = shown.two_sided_f64();

        OddsBoard {
            format,
            visible,
            meron_total: shown.side_f64(Selection::Meron),
            wala_total: shown.side_f64(Selection::Wala),
            draw_total: shown.side_f64(Selection::Draw),
            combined_pool: combined,
            meron: self.display(shown.side_f64(Selection::Meron), combined, format),
            wala: self.display(shown.side_f64(Selection::Wala), combined, format),
        }
    }
}

/// Malay odds from Hong-Kong odds: positive at or above evens, negative
/// reciprocal below, exactly 0 stays 0.
fn malay_from_hk(hk: f64) -> f64 {
    if hk == 0.0 {
        0.0
    } else if hk >= 1.0 {
        hk
    } else {
        -1.0 / hk
    }
}

/// Rendered odds for both sides of a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OddsBoard {
    pub format: OddsFormat,
    pub visible: bool,
    pub meron_total: f64,
    pub wala_total: f64,
    pub draw_total: f64,
    pub combined_pool: f64,
    pub meron: OddsDisplay,
    pub wala: OddsDisplay,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
