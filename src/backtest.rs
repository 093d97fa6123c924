// ===============================
// src/backtest.rs
// ===============================
//
// Replays a recorded observation stream through the same Engine used live.
// Simulation time comes from the observations only:
//   - sort by (timestamp, symbol)
//   - all observations sharing a timestamp are one cycle
//   - basket symbols feed the regime classifier, `symbol` is traded
//
// Same input + same config -> byte-identical report JSON.
//
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::config::StrategyConfig;
use crate::domain::{Observation, PerformanceRecord, Position, PositionEvent, Regime, RejectReason};
use crate::engine::Engine;
use crate::posttrade::PerformanceStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub strategy_tag: String,
    pub cycles: u64,
    pub observations: u64,
    pub skipped_observations: u64,
    pub degraded_cycles: u64,
    pub regimes: BTreeMap<Regime, u64>,
    pub rejections: BTreeMap<RejectReason, u64>,
    pub stats: PerformanceStats,
    pub trades: Vec<PerformanceRecord>,
    /// Positions still OPEN/CLOSING when the data ran out; not force-closed.
    pub open_at_end: Vec<Position>,
}

impl BacktestReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub fn run_backtest(symbol: &str, observations: &[Observation], cfg: &StrategyConfig) -> BacktestReport {
    let mut relevant: Vec<&Observation> = observations
        .iter()
        .filter(|o| o.symbol == symbol || cfg.basket.iter().any(|b| *b == o.symbol))
        .collect();
    relevant.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.symbol.cmp(&b.symbol)));

    let mut engine = Engine::new(cfg.clone(), vec![symbol.to_string()]);
    let mut report = BacktestReport {
        symbol: symbol.to_string(),
        strategy_tag: cfg.strategy_tag.clone(),
        cycles: 0,
        observations: 0,
        skipped_observations: 0,
        degraded_cycles: 0,
        regimes: BTreeMap::new(),
        rejections: BTreeMap::new(),
        stats: PerformanceStats::default(),
        trades: Vec::new(),
        open_at_end: Vec::new(),
    };

    for group in relevant.chunk_by(|a, b| a.timestamp == b.timestamp) {
        let now = group[0].timestamp;
        let basket: Vec<Observation> = group
            .iter()
            .filter(|o| cfg.basket.iter().any(|b| *b == o.symbol))
            .map(|o| (*o).clone())
            .collect();
        let traded: Vec<Observation> = group.iter().filter(|o| o.symbol == symbol).map(|o| (*o).clone()).collect();

        let cycle = engine.process_cycle(now, &basket, &traded);
        report.cycles += 1;
        report.observations += traded.len() as u64;
        report.skipped_observations += (traded.len() - cycle.signals.len()) as u64;
        if cycle.context.degraded {
            report.degraded_cycles += 1;
        }
        *report.regimes.entry(cycle.context.regime).or_insert(0) += 1;
        for ev in &cycle.position_events {
            if let PositionEvent::Rejected { reason, .. } = ev {
                *report.rejections.entry(*reason).or_insert(0) += 1;
            }
        }
    }

    report.stats = engine.performance_stats();
    report.trades = engine.performance_summary(Some(symbol));
    report.open_at_end = engine.open_positions();
    info!(
        symbol,
        cycles = report.cycles,
        trades = report.stats.trades,
        total_return = report.stats.total_return,
        "backtest done"
    );
    report
}
