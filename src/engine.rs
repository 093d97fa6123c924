// ===============================
// src/engine.rs (cycle orchestrator)
// ===============================
//
// One cycle:
//   1) basket -> MarketContext          (barrier: nothing fuses before this)
//   2) per symbol, in symbol order:
//        validate -> fuse(obs, &ctx) -> positions.on_cycle -> accountant
//   3) invariant sweep over the live book
//
// The engine itself never reads the wall clock; `now` is handed in, which
// keeps live cycles and backtests on the same path.
//
use std::collections::BTreeMap;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::StrategyConfig;
use crate::domain::{Event, MarketContext, Observation, PerformanceRecord, Position, PositionEvent, Regime, Signal, Ts};
use crate::error::CoreError;
use crate::feed::MarketData;
use crate::fusion::FusionEngine;
use crate::gateway::{ExecReport, PaperBroker};
use crate::metrics::{DATA_UNAVAILABLE, OPEN_POSITIONS, POSITION_EVENTS, REGIME, REJECTED, SIGNALS_BY};
use crate::positions::PositionManager;
use crate::posttrade::{Accountant, PerformanceStats};
use crate::regime::RegimeClassifier;

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub context: MarketContext,
    pub signals: Vec<Signal>,
    pub position_events: Vec<PositionEvent>,
    pub fills: Vec<ExecReport>,
    pub records: Vec<PerformanceRecord>,
    pub issues: Vec<CoreError>,
}

impl CycleReport {
    /// Log lines for the recorder, in causal order.
    pub fn events(&self) -> Vec<Event> {
        let mut out = Vec::with_capacity(1 + self.signals.len() + self.position_events.len() + self.records.len());
        out.push(Event::Context(self.context.clone()));
        out.extend(self.signals.iter().cloned().map(Event::Sig));
        out.extend(self.position_events.iter().cloned().map(Event::Pos));
        out.extend(self.records.iter().cloned().map(Event::Perf));
        out.extend(self.issues.iter().map(|e| Event::Note(e.to_string())));
        out
    }

    pub fn has_fatal(&self) -> bool {
        self.issues.iter().any(CoreError::is_fatal)
    }
}

pub struct Engine {
    cfg: StrategyConfig,
    symbols: Vec<String>,
    classifier: RegimeClassifier,
    fusion: FusionEngine,
    positions: PositionManager,
    accountant: Accountant,
    broker: PaperBroker,
    last_seen: BTreeMap<String, Ts>,
    last_context: Option<MarketContext>,
}

impl Engine {
    pub fn new(cfg: StrategyConfig, symbols: Vec<String>) -> Self {
        let mut symbols = symbols;
        symbols.sort();
        symbols.dedup();
        Self {
            classifier: RegimeClassifier::new(cfg.regime.clone(), cfg.max_staleness_secs),
            fusion: FusionEngine::new(cfg.fusion.clone()),
            positions: PositionManager::new(cfg.strategy_tag.clone(), cfg.limits.clone()),
            accountant: Accountant::new(),
            broker: PaperBroker::new(),
            last_seen: BTreeMap::new(),
            last_context: None,
            symbols,
            cfg,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn last_context(&self) -> Option<&MarketContext> {
        self.last_context.as_ref()
    }

    /// Fetch from the collaborator, then process. Missing symbols are skipped.
    pub fn run_cycle<F: MarketData + ?Sized>(&mut self, feed: &mut F, now: Ts) -> CycleReport {
        let basket = feed.fetch_reference_basket(now);
        let mut observations = Vec::with_capacity(self.symbols.len());
        let mut issues = Vec::new();
        for sym in &self.symbols {
            match feed.fetch_observation(sym, now) {
                Some(o) => observations.push(o),
                None => {
                    warn!(symbol = %sym, "no observation, symbol skipped this cycle");
                    DATA_UNAVAILABLE.with_label_values(&[sym]).inc();
                    issues.push(CoreError::DataUnavailable { symbol: sym.clone(), ts: now });
                }
            }
        }
        let mut report = self.process_cycle(now, &basket, &observations);
        issues.append(&mut report.issues);
        report.issues = issues;
        report
    }

    pub fn process_cycle(&mut self, now: Ts, basket: &[Observation], observations: &[Observation]) -> CycleReport {
        let mut issues = Vec::new();

        let ctx = self.classifier.update(now, basket);
        if ctx.degraded {
            debug!(fresh = ctx.fresh_symbols, "context degraded, base thresholds in use");
            issues.push(CoreError::DegradedContext { fresh: ctx.fresh_symbols, quorum: self.cfg.regime.quorum });
        }
        publish_regime(ctx.regime);

        let mut ordered: Vec<&Observation> = observations.iter().collect();
        ordered.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.timestamp.cmp(&b.timestamp)));

        let mut signals = Vec::new();
        let mut position_events = Vec::new();
        let mut fills = Vec::new();
        let mut records = Vec::new();

        for obs in ordered {
            if let Err(e) = self.admit(obs, now) {
                warn!(symbol = %obs.symbol, issue = %e, "observation skipped");
                DATA_UNAVAILABLE.with_label_values(&[&obs.symbol]).inc();
                issues.push(e);
                continue;
            }
            self.last_seen.insert(obs.symbol.clone(), obs.timestamp);

            let sig = self.fusion.evaluate(obs, &ctx);
            SIGNALS_BY.with_label_values(&[sig.action.as_str()]).inc();
            self.accountant.record_signal(&sig, &self.cfg.strategy_tag);

            match self.positions.on_cycle(obs, &sig) {
                Ok(tr) => {
                    for ev in &tr.events {
                        POSITION_EVENTS.with_label_values(&[ev.kind()]).inc();
                        if let PositionEvent::Rejected { reason, .. } = ev {
                            REJECTED.with_label_values(&[reason.as_str()]).inc();
                        }
                        if let Some(er) = self.broker.on_event(ev) {
                            fills.push(er);
                        }
                    }
                    if let Some(pos) = tr.closed.as_ref() {
                        if let Some(rec) = self.accountant.record_close(pos) {
                            records.push(rec);
                        }
                    }
                    position_events.extend(tr.events);
                }
                Err(e) => {
                    error!(symbol = %obs.symbol, err = %e, "position invariant violated, symbol aborted");
                    debug_assert!(!e.is_fatal(), "{e}");
                    issues.push(e);
                }
            }
            signals.push(sig);
        }

        if let Err(e) = self.positions.check_invariants() {
            error!(err = %e, "position book invariant violated");
            debug_assert!(!e.is_fatal(), "{e}");
            issues.push(e);
        }
        OPEN_POSITIONS.set(self.positions.open_count() as i64);

        info!(
            regime = ctx.regime.as_str(),
            degraded = ctx.degraded,
            signals = signals.len(),
            events = position_events.len(),
            open = self.positions.open_count(),
            "cycle done"
        );
        self.last_context = Some(ctx.clone());
        CycleReport { context: ctx, signals, position_events, fills, records, issues }
    }

    /// Range, freshness and ordering checks for one observation.
    fn admit(&self, obs: &Observation, now: Ts) -> Result<(), CoreError> {
        if let Some(field) = obs.invalid_field() {
            return Err(CoreError::InvalidObservation { symbol: obs.symbol.clone(), field });
        }
        let too_old = now - obs.timestamp > Duration::seconds(self.cfg.max_staleness_secs);
        let replayed = self.last_seen.get(&obs.symbol).map_or(false, |last| obs.timestamp <= *last);
        if too_old || replayed || obs.timestamp > now {
            return Err(CoreError::StaleObservation { symbol: obs.symbol.clone(), observed: obs.timestamp, ts: now });
        }
        Ok(())
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.open_positions()
    }

    pub fn closed_positions(&self) -> &[Position] {
        self.positions.closed()
    }

    pub fn performance_summary(&self, symbol: Option<&str>) -> Vec<PerformanceRecord> {
        self.accountant.records(symbol)
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.accountant.stats()
    }
}

fn publish_regime(current: Regime) {
    for r in [Regime::Bullish, Regime::Bearish, Regime::Neutral] {
        REGIME.with_label_values(&[r.as_str()]).set(i64::from(r == current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::domain::{Action, PositionState, RejectReason};
    use crate::feed::ReplayFeed;
    use chrono::{TimeZone, Utc};

    fn t(i: i64) -> Ts {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap() + Duration::seconds(30 * i)
    }

    fn obs(sym: &str, i: i64, price: f64, tech: f64) -> Observation {
        Observation {
            symbol: sym.into(),
            timestamp: t(i),
            price,
            volume: 1_000.0,
            technical_score: tech,
            sentiment_score: tech,
            sentiment_confidence: 1.0,
            news_count: 2,
        }
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            basket: vec![],
            limits: Limits { max_open_positions: 1, ..Limits::default() },
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn missing_observation_is_reported_not_fatal() {
        let mut engine = Engine::new(cfg(), vec!["AAPL".into(), "MSFT".into()]);
        let mut feed = ReplayFeed::new(vec![obs("AAPL", 0, 100.0, 0.0)], vec![]);
        let report = engine.run_cycle(&mut feed, t(0));
        assert_eq!(report.signals.len(), 1);
        assert!(report.issues.iter().any(|e| matches!(e, CoreError::DataUnavailable { symbol, .. } if symbol == "MSFT")));
        assert!(report.issues.iter().any(|e| matches!(e, CoreError::DegradedContext { .. })));
        assert!(!report.has_fatal());
    }

    #[test]
    fn replayed_tick_is_skipped() {
        let mut engine = Engine::new(cfg(), vec!["AAPL".into()]);
        let mut feed = ReplayFeed::new(vec![obs("AAPL", 0, 100.0, 0.9)], vec![]);
        let first = engine.run_cycle(&mut feed, t(0));
        assert_eq!(first.signals[0].action, Action::Buy);
        // the feed has nothing newer, same tick comes back
        let second = engine.run_cycle(&mut feed, t(1));
        assert!(second.signals.is_empty());
        assert!(matches!(second.issues.as_slice(), [CoreError::StaleObservation { .. }, CoreError::DegradedContext { .. }]
            | [CoreError::DegradedContext { .. }, CoreError::StaleObservation { .. }]));
    }

    #[test]
    fn max_positions_rejection_is_observable() {
        let mut engine = Engine::new(cfg(), vec!["AAPL".into(), "MSFT".into()]);
        let report = engine.process_cycle(t(0), &[], &[obs("AAPL", 0, 100.0, 0.9), obs("MSFT", 0, 50.0, 0.9)]);
        assert_eq!(engine.open_positions().len(), 1);
        assert!(report.position_events.iter().any(|e| matches!(
            e,
            PositionEvent::Rejected { symbol, reason: RejectReason::MaxPositions, .. } if symbol == "MSFT"
        )));
        assert_eq!(report.fills.len(), 1);
    }

    #[test]
    fn closed_trade_reaches_the_accountant() {
        let mut engine = Engine::new(cfg(), vec!["AAPL".into()]);
        engine.process_cycle(t(0), &[], &[obs("AAPL", 0, 100.0, 0.9)]);
        engine.process_cycle(t(1), &[], &[obs("AAPL", 1, 120.0, 0.0)]);
        assert_eq!(engine.open_positions()[0].state, PositionState::Closing);
        let r = engine.process_cycle(t(2), &[], &[obs("AAPL", 2, 118.0, 0.0)]);
        assert_eq!(r.records.len(), 1);
        assert!((r.records[0].realized_return - 0.18).abs() < 1e-9);
        assert!(engine.open_positions().is_empty());
        assert_eq!(engine.performance_summary(Some("AAPL")).len(), 1);
        assert_eq!(engine.performance_stats().trades, 1);

        let events = r.events();
        assert!(matches!(events.first(), Some(Event::Context(_))));
        assert!(events.iter().any(|e| matches!(e, Event::Perf(_))));
    }
}
