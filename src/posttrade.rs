// ===============================
// src/posttrade.rs (performance accountant)
// ===============================
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Action, ExitReason, PerformanceRecord, Position, PositionState, Signal};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub breakeven: u64,
    pub total_return: f64,
    pub mean_return: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A trade is a win above 0, a loss below 0, breakeven at exactly 0.
/// `win_ratio` is wins over all trades in the bucket.
pub struct WinLoss {
    pub wins: u64,
    pub losses: u64,
    pub breakeven: u64,
    pub win_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub signal_distribution: BTreeMap<Action, u64>,
    /// Mean confidence of BUY/SELL signals per strategy tag.
    pub avg_confidence_by_tag: BTreeMap<String, f64>,
    pub per_symbol: BTreeMap<String, SymbolStats>,
    pub by_exit_reason: BTreeMap<ExitReason, WinLoss>,
    pub trades: u64,
    /// Compounded over trades in close order.
    pub total_return: f64,
    /// Worst peak-to-trough of the compounded trade equity curve.
    pub max_drawdown: f64,
}

/// Append-only owner of PerformanceRecords. Reads closed positions, never
/// mutates them.
#[derive(Debug, Default)]
pub struct Accountant {
    records: Vec<PerformanceRecord>,
    signal_counts: BTreeMap<Action, u64>,
    confidence: BTreeMap<String, (f64, u64)>,
}

impl Accountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_signal(&mut self, sig: &Signal, strategy_tag: &str) {
        *self.signal_counts.entry(sig.action).or_insert(0) += 1;
        if sig.action != Action::Hold {
            let e = self.confidence.entry(strategy_tag.to_string()).or_insert((0.0, 0));
            e.0 += sig.confidence;
            e.1 += 1;
        }
    }

    /// Appends the record for a CLOSED position. Anything else is ignored.
    pub fn record_close(&mut self, pos: &Position) -> Option<PerformanceRecord> {
        if pos.state != PositionState::Closed {
            return None;
        }
        let (exit_price, exit_time, reason) = (pos.exit_price?, pos.exit_time?, pos.exit_reason?);
        let rec = PerformanceRecord {
            symbol: pos.symbol.clone(),
            strategy_tag: pos.strategy_tag.clone(),
            entry_time: pos.entry_time,
            exit_time,
            realized_return: (exit_price - pos.entry_price) / pos.entry_price,
            holding_period_secs: (exit_time - pos.entry_time).num_seconds(),
            max_drawdown_during_hold: pos.max_drawdown,
            exit_reason: reason,
        };
        info!(
            symbol = %rec.symbol,
            ret = rec.realized_return,
            hold_secs = rec.holding_period_secs,
            reason = reason.as_str(),
            "performance recorded"
        );
        self.records.push(rec.clone());
        Some(rec)
    }

    pub fn records(&self, symbol: Option<&str>) -> Vec<PerformanceRecord> {
        self.records
            .iter()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> PerformanceStats {
        let mut per_symbol: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut by_exit_reason: BTreeMap<ExitReason, WinLoss> = BTreeMap::new();
        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;
        let mut max_dd = 0.0_f64;

        for r in &self.records {
            per_symbol.entry(r.symbol.clone()).or_default().push(r.realized_return);
            let wl = by_exit_reason.entry(r.exit_reason).or_default();
            match outcome(r.realized_return) {
                Outcome::Win => wl.wins += 1,
                Outcome::Loss => wl.losses += 1,
                Outcome::Flat => wl.breakeven += 1,
            }

            equity *= 1.0 + r.realized_return;
            peak = peak.max(equity);
            max_dd = max_dd.max((peak - equity) / peak);
        }
        for wl in by_exit_reason.values_mut() {
            wl.win_ratio = wl.wins as f64 / (wl.wins + wl.losses + wl.breakeven) as f64;
        }

        PerformanceStats {
            signal_distribution: self.signal_counts.clone(),
            avg_confidence_by_tag: self
                .confidence
                .iter()
                .map(|(tag, (sum, n))| (tag.clone(), if *n > 0 { sum / *n as f64 } else { 0.0 }))
                .collect(),
            per_symbol: per_symbol.into_iter().map(|(s, rets)| (s, symbol_stats(&rets))).collect(),
            by_exit_reason,
            trades: self.records.len() as u64,
            total_return: equity - 1.0,
            max_drawdown: max_dd,
        }
    }
}

enum Outcome {
    Win,
    Loss,
    Flat,
}

fn outcome(ret: f64) -> Outcome {
    if ret > 0.0 {
        Outcome::Win
    } else if ret < 0.0 {
        Outcome::Loss
    } else {
        Outcome::Flat
    }
}

fn symbol_stats(rets: &[f64]) -> SymbolStats {
    let n = rets.len();
    if n == 0 {
        return SymbolStats::default();
    }
    let total: f64 = rets.iter().sum();
    let mean = total / n as f64;
    let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    let count = |o: fn(&Outcome) -> bool| rets.iter().filter(|r| o(&outcome(**r))).count() as u64;
    SymbolStats {
        trades: n as u64,
        wins: count(|o| matches!(o, Outcome::Win)),
        losses: count(|o| matches!(o, Outcome::Loss)),
        breakeven: count(|o| matches!(o, Outcome::Flat)),
        total_return: total,
        mean_return: mean,
        volatility: var.sqrt(),
    }
}
