// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Ts = DateTime<Utc>;

/// One per-symbol market observation handed in by the data collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub symbol: String,
    pub timestamp: Ts,
    pub price: f64,
    pub volume: f64,
    pub technical_score: f64,
    pub sentiment_score: f64,
    pub sentiment_confidence: f64,
    pub news_count: u32,
}

impl Observation {
    /// Range checks for the fields produced upstream. Returns the name of the
    /// first offending field.
    pub fn invalid_field(&self) -> Option<&'static str> {
        if !(self.price.is_finite() && self.price > 0.0) { return Some("price"); }
        if !(self.volume.is_finite() && self.volume >= 0.0) { return Some("volume"); }
        if !(-1.0..=1.0).contains(&self.technical_score) { return Some("technical_score"); }
        if !(-1.0..=1.0).contains(&self.sentiment_score) { return Some("sentiment_score"); }
        if !(0.0..=1.0).contains(&self.sentiment_confidence) { return Some("sentiment_confidence"); }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime { Bullish, Bearish, Neutral }

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bullish => "BULLISH",
            Regime::Bearish => "BEARISH",
            Regime::Neutral => "NEUTRAL",
        }
    }
}

/// Market state for one evaluation cycle. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub timestamp: Ts,
    pub regime: Regime,
    pub breadth_score: f64,
    pub stress_score: f64,
    pub avg_return: f64,
    pub fresh_symbols: usize,
    pub degraded: bool,
}

impl MarketContext {
    pub fn degraded(timestamp: Ts, fresh_symbols: usize) -> Self {
        Self {
            timestamp,
            regime: Regime::Neutral,
            breadth_score: 0.0,
            stress_score: 0.0,
            avg_return: 0.0,
            fresh_symbols,
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action { Buy, Sell, Hold }

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self { Action::Buy => "BUY", Action::Sell => "SELL", Action::Hold => "HOLD" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timestamp: Ts,
    pub action: Action,
    pub confidence: f64,
    pub composite_score: f64,
    pub regime_adjusted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState { Flat, Open, Closing, Closed }

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason { StopLoss, ProfitTarget, SignalReversal }

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::ProfitTarget => "PROFIT_TARGET",
            ExitReason::SignalReversal => "SIGNAL_REVERSAL",
        }
    }
}

/// Simulated long position. Only `positions::PositionManager` mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub strategy_tag: String,
    pub state: PositionState,
    pub entry_price: f64,
    pub entry_time: Ts,
    pub quantity: f64,
    pub stop_loss_price: f64,
    pub target_price: f64,
    pub trailing_high_water_mark: f64,
    pub last_price: f64,
    /// Worst peak-to-trough move seen while held, as a fraction of the peak.
    pub max_drawdown: f64,
    pub exit_price: Option<f64>,
    pub exit_time: Option<Ts>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn is_live(&self) -> bool {
        !matches!(self.state, PositionState::Closed)
    }

    pub fn realized_return(&self) -> Option<f64> {
        self.exit_price.map(|px| (px - self.entry_price) / self.entry_price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub symbol: String,
    pub strategy_tag: String,
    pub entry_time: Ts,
    pub exit_time: Ts,
    pub realized_return: f64,
    pub holding_period_secs: i64,
    pub max_drawdown_during_hold: f64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason { MaxPositions, DuplicatePosition, LowConfidence }

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MaxPositions => "MAX_POSITIONS",
            RejectReason::DuplicatePosition => "DUPLICATE_POSITION",
            RejectReason::LowConfidence => "LOW_CONFIDENCE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionEvent {
    Opened { symbol: String, ts: Ts, price: f64, quantity: f64, stop_loss: f64, target: f64 },
    StopRaised { symbol: String, ts: Ts, from: f64, to: f64 },
    ExitTriggered { symbol: String, ts: Ts, reason: ExitReason, trigger_price: f64 },
    Closed { symbol: String, ts: Ts, exit_price: f64, reason: ExitReason, realized_return: f64 },
    Rejected { symbol: String, ts: Ts, reason: RejectReason, confidence: f64 },
}

impl PositionEvent {
    pub fn symbol(&self) -> &str {
        match self {
            PositionEvent::Opened { symbol, .. }
            | PositionEvent::StopRaised { symbol, .. }
            | PositionEvent::ExitTriggered { symbol, .. }
            | PositionEvent::Closed { symbol, .. }
            | PositionEvent::Rejected { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PositionEvent::Opened { .. } => "opened",
            PositionEvent::StopRaised { .. } => "stop_raised",
            PositionEvent::ExitTriggered { .. } => "exit_triggered",
            PositionEvent::Closed { .. } => "closed",
            PositionEvent::Rejected { .. } => "rejected",
        }
    }
}

// Append-only log entry (lihat recorder.rs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Context(MarketContext),
    Sig(Signal),
    Pos(PositionEvent),
    Perf(PerformanceRecord),
    Note(String),
}
