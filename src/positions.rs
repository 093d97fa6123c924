// ===============================
// src/positions.rs (position state machine)
// ===============================
//
//   FLAT --BUY + risk ok--> OPEN --stop/target/reversal--> CLOSING --next tick--> CLOSED
//
// - FLAT is "no live position for the symbol" (no object in the book).
// - Exit precedence within one cycle: STOP_LOSS, PROFIT_TARGET, SIGNAL_REVERSAL.
// - CLOSING fills at the *next* observation for the symbol, never the
//   triggering one.
// - Stops only move up (trailing ratchet once past the activation margin).
//
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::Limits;
use crate::domain::{Action, ExitReason, Observation, Position, PositionEvent, PositionState, Signal};
use crate::error::CoreError;
use crate::risk::{self, BookView};

/// What one cycle did to one symbol.
#[derive(Debug, Default)]
pub struct Transition {
    pub events: Vec<PositionEvent>,
    /// Set when a CLOSING position was filled this cycle.
    pub closed: Option<Position>,
}

pub struct PositionManager {
    strategy_tag: String,
    limits: Limits,
    book: BTreeMap<String, Position>,
    archive: Vec<Position>,
}

impl PositionManager {
    pub fn new(strategy_tag: impl Into<String>, limits: Limits) -> Self {
        Self { strategy_tag: strategy_tag.into(), limits, book: BTreeMap::new(), archive: Vec::new() }
    }

    pub fn state_of(&self, symbol: &str) -> PositionState {
        self.book.get(symbol).map(|p| p.state).unwrap_or(PositionState::Flat)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.book.get(symbol)
    }

    /// Live (OPEN or CLOSING) positions ordered by symbol.
    pub fn open_positions(&self) -> Vec<Position> {
        self.book.values().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.book.len()
    }

    pub fn closed(&self) -> &[Position] {
        &self.archive
    }

    /// Advance one symbol by one cycle.
    pub fn on_cycle(&mut self, obs: &Observation, sig: &Signal) -> Result<Transition, CoreError> {
        if obs.symbol != sig.symbol {
            return Err(CoreError::InvariantViolation {
                symbol: obs.symbol.clone(),
                detail: format!("signal for {} applied to observation of {}", sig.symbol, obs.symbol),
            });
        }
        let mut tr = Transition::default();

        let state = self.state_of(&obs.symbol);
        match state {
            PositionState::Closing => {
                if let Some(mut pos) = self.book.remove(&obs.symbol) {
                    tr.events.push(fill_exit(&mut pos, obs)?);
                    self.archive.push(pos.clone());
                    tr.closed = Some(pos);
                }
            }
            PositionState::Open => {
                if let Some(pos) = self.book.get_mut(&obs.symbol) {
                    tr.events.extend(update_open(pos, obs, sig, &self.limits));
                }
            }
            PositionState::Flat => {}
            PositionState::Closed => {
                return Err(CoreError::InvariantViolation {
                    symbol: obs.symbol.clone(),
                    detail: "closed position still in the live book".into(),
                });
            }
        }

        if sig.action == Action::Buy {
            tr.events.push(self.try_open(obs, sig)?);
        }
        Ok(tr)
    }

    fn try_open(&mut self, obs: &Observation, sig: &Signal) -> Result<PositionEvent, CoreError> {
        let view = BookView { open_count: self.book.len(), symbol_live: self.book.contains_key(&obs.symbol) };
        match risk::check(sig, obs.price, &self.limits, view) {
            Ok(entry) => {
                if self.book.contains_key(&obs.symbol) {
                    return Err(CoreError::InvariantViolation {
                        symbol: obs.symbol.clone(),
                        detail: "second live position requested".into(),
                    });
                }
                let pos = Position {
                    symbol: obs.symbol.clone(),
                    strategy_tag: self.strategy_tag.clone(),
                    state: PositionState::Open,
                    entry_price: entry.price,
                    entry_time: obs.timestamp,
                    quantity: entry.quantity,
                    stop_loss_price: entry.stop_loss,
                    target_price: entry.target,
                    trailing_high_water_mark: entry.price,
                    last_price: entry.price,
                    max_drawdown: 0.0,
                    exit_price: None,
                    exit_time: None,
                    exit_reason: None,
                };
                info!(symbol = %obs.symbol, px = entry.price, qty = entry.quantity, stop = entry.stop_loss, target = entry.target, "OPEN");
                self.book.insert(obs.symbol.clone(), pos);
                Ok(PositionEvent::Opened {
                    symbol: obs.symbol.clone(),
                    ts: obs.timestamp,
                    price: entry.price,
                    quantity: entry.quantity,
                    stop_loss: entry.stop_loss,
                    target: entry.target,
                })
            }
            Err(e) => {
                warn!(symbol = %obs.symbol, reason = e.reason().as_str(), detail = %e, "REJECTED");
                Ok(PositionEvent::Rejected {
                    symbol: obs.symbol.clone(),
                    ts: obs.timestamp,
                    reason: e.reason(),
                    confidence: sig.confidence,
                })
            }
        }
    }

    /// At most one live position per symbol, keyed by its own symbol, and
    /// only OPEN/CLOSING states in the book.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        for (sym, pos) in &self.book {
            if &pos.symbol != sym || !matches!(pos.state, PositionState::Open | PositionState::Closing) {
                return Err(CoreError::InvariantViolation {
                    symbol: sym.clone(),
                    detail: format!("book entry in state {:?} for {}", pos.state, pos.symbol),
                });
            }
        }
        if let Some(p) = self.archive.iter().find(|p| p.state != PositionState::Closed) {
            return Err(CoreError::InvariantViolation {
                symbol: p.symbol.clone(),
                detail: "archived position not closed".into(),
            });
        }
        Ok(())
    }
}

fn update_open(pos: &mut Position, obs: &Observation, sig: &Signal, lim: &Limits) -> Vec<PositionEvent> {
    let mut events = Vec::new();
    let px = obs.price;
    pos.last_price = px;

    if px > pos.trailing_high_water_mark {
        pos.trailing_high_water_mark = px;
    }
    let dd = (pos.trailing_high_water_mark - px) / pos.trailing_high_water_mark;
    if dd > pos.max_drawdown {
        pos.max_drawdown = dd;
    }

    // trailing ratchet
    if pos.trailing_high_water_mark >= pos.entry_price * (1.0 + lim.trail_activation_pct) {
        let proposed = pos.trailing_high_water_mark * (1.0 - lim.trail_pct);
        if proposed > pos.stop_loss_price {
            debug!(symbol = %pos.symbol, from = pos.stop_loss_price, to = proposed, "stop raised");
            events.push(PositionEvent::StopRaised {
                symbol: pos.symbol.clone(),
                ts: obs.timestamp,
                from: pos.stop_loss_price,
                to: proposed,
            });
            pos.stop_loss_price = proposed;
        }
    }

    let reason = if px <= pos.stop_loss_price {
        Some(ExitReason::StopLoss)
    } else if px >= pos.target_price {
        Some(ExitReason::ProfitTarget)
    } else if sig.action == Action::Sell && sig.confidence >= lim.exit_confidence {
        Some(ExitReason::SignalReversal)
    } else {
        None
    };

    if let Some(reason) = reason {
        info!(symbol = %pos.symbol, reason = reason.as_str(), px, "exit triggered, fill on next tick");
        pos.state = PositionState::Closing;
        pos.exit_reason = Some(reason);
        events.push(PositionEvent::ExitTriggered {
            symbol: pos.symbol.clone(),
            ts: obs.timestamp,
            reason,
            trigger_price: px,
        });
    }
    events
}

fn fill_exit(pos: &mut Position, obs: &Observation) -> Result<PositionEvent, CoreError> {
    let reason = pos.exit_reason.ok_or_else(|| CoreError::InvariantViolation {
        symbol: pos.symbol.clone(),
        detail: "CLOSING position without exit reason".into(),
    })?;
    // the fill tick counts toward the hold: a gap through the stop lands here
    if obs.price > pos.trailing_high_water_mark {
        pos.trailing_high_water_mark = obs.price;
    }
    let dd = (pos.trailing_high_water_mark - obs.price) / pos.trailing_high_water_mark;
    pos.max_drawdown = pos.max_drawdown.max(dd);
    pos.state = PositionState::Closed;
    pos.exit_price = Some(obs.price);
    pos.exit_time = Some(obs.timestamp);
    pos.last_price = obs.price;
    let realized_return = (obs.price - pos.entry_price) / pos.entry_price;
    info!(symbol = %pos.symbol, px = obs.price, reason = reason.as_str(), ret = realized_return, "CLOSED");
    Ok(PositionEvent::Closed {
        symbol: pos.symbol.clone(),
        ts: obs.timestamp,
        exit_price: obs.price,
        reason,
        realized_return,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::{RejectReason, Ts};

    fn ts(i: i64) -> Ts {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap() + Duration::seconds(30 * i)
    }

    fn obs(sym: &str, i: i64, price: f64) -> Observation {
        Observation {
            symbol: sym.into(),
            timestamp: ts(i),
            price,
            volume: 500.0,
            technical_score: 0.0,
            sentiment_score: 0.0,
            sentiment_confidence: 0.0,
            news_count: 1,
        }
    }

    fn sig(sym: &str, i: i64, action: Action, confidence: f64) -> Signal {
        Signal {
            symbol: sym.into(),
            timestamp: ts(i),
            action,
            confidence,
            composite_score: 0.0,
            regime_adjusted: false,
        }
    }

    fn limits() -> Limits {
        Limits {
            max_open_positions: 2,
            entry_confidence: 0.1,
            exit_confidence: 0.2,
            stop_pct: 0.05,
            target_pct: 0.10,
            trail_activation_pct: 0.02,
            trail_pct: 0.05,
            trade_notional: 1_000.0,
        }
    }

    #[test]
    fn stop_loss_fills_on_the_following_tick() {
        let mut pm = PositionManager::new("t", limits());
        let prices = [100.0, 105.0, 90.0, 95.0];
        let mut fill = None;
        for (i, px) in prices.iter().enumerate() {
            let action = if i == 0 { Action::Buy } else { Action::Hold };
            let tr = pm.on_cycle(&obs("AAPL", i as i64, *px), &sig("AAPL", i as i64, action, 0.9)).unwrap();
            if let Some(p) = tr.closed {
                fill = Some((i, p));
            }
        }
        let (idx, pos) = fill.expect("position closed");
        assert_eq!(idx, 3);
        assert_eq!(pos.exit_price, Some(95.0));
        assert_eq!(pos.exit_time, Some(ts(3)));
        assert_eq!(pos.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(pm.state_of("AAPL"), PositionState::Flat);
    }

    #[test]
    fn gap_down_fill_is_part_of_the_drawdown() {
        let mut pm = PositionManager::new("t", limits());
        pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("AAPL", 0, Action::Buy, 0.9)).unwrap();
        pm.on_cycle(&obs("AAPL", 1, 94.0), &sig("AAPL", 1, Action::Hold, 0.0)).unwrap();
        assert!((pm.position("AAPL").unwrap().max_drawdown - 0.06).abs() < 1e-12);

        let tr = pm.on_cycle(&obs("AAPL", 2, 80.0), &sig("AAPL", 2, Action::Hold, 0.0)).unwrap();
        let pos = tr.closed.expect("filled");
        let ret = pos.realized_return().unwrap();
        assert!((ret + 0.2).abs() < 1e-12);
        assert!((pos.max_drawdown - 0.2).abs() < 1e-12);
        assert!(pos.max_drawdown >= -ret);
    }

    #[test]
    fn trailing_stop_only_ratchets_up() {
        let mut pm = PositionManager::new("t", limits());
        pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("AAPL", 0, Action::Buy, 0.9)).unwrap();
        pm.on_cycle(&obs("AAPL", 1, 101.0), &sig("AAPL", 1, Action::Hold, 0.0)).unwrap();
        assert_eq!(pm.position("AAPL").unwrap().stop_loss_price, 95.0);

        pm.on_cycle(&obs("AAPL", 2, 108.0), &sig("AAPL", 2, Action::Hold, 0.0)).unwrap();
        let raised = pm.position("AAPL").unwrap().stop_loss_price;
        assert!((raised - 102.6).abs() < 1e-9);

        pm.on_cycle(&obs("AAPL", 3, 104.0), &sig("AAPL", 3, Action::Hold, 0.0)).unwrap();
        let p = pm.position("AAPL").unwrap();
        assert_eq!(p.stop_loss_price, raised);
        assert_eq!(p.trailing_high_water_mark, 108.0);
        assert!((p.max_drawdown - 4.0 / 108.0).abs() < 1e-12);
    }

    #[test]
    fn stop_beats_reversal_in_the_same_cycle() {
        let mut pm = PositionManager::new("t", limits());
        pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("AAPL", 0, Action::Buy, 0.9)).unwrap();
        let tr = pm.on_cycle(&obs("AAPL", 1, 94.0), &sig("AAPL", 1, Action::Sell, 0.9)).unwrap();
        assert!(tr.events.iter().any(|e| matches!(e, PositionEvent::ExitTriggered { reason: ExitReason::StopLoss, .. })));
    }

    #[test]
    fn target_and_reversal_exits() {
        let mut pm = PositionManager::new("t", limits());
        pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("AAPL", 0, Action::Buy, 0.9)).unwrap();
        pm.on_cycle(&obs("AAPL", 1, 111.0), &sig("AAPL", 1, Action::Hold, 0.0)).unwrap();
        assert_eq!(pm.position("AAPL").unwrap().exit_reason, Some(ExitReason::ProfitTarget));

        pm.on_cycle(&obs("MSFT", 0, 50.0), &sig("MSFT", 0, Action::Buy, 0.9)).unwrap();
        // weak SELL is ignored, strong SELL exits
        pm.on_cycle(&obs("MSFT", 1, 50.5), &sig("MSFT", 1, Action::Sell, 0.1)).unwrap();
        assert_eq!(pm.state_of("MSFT"), PositionState::Open);
        pm.on_cycle(&obs("MSFT", 2, 50.2), &sig("MSFT", 2, Action::Sell, 0.5)).unwrap();
        assert_eq!(pm.state_of("MSFT"), PositionState::Closing);
        assert_eq!(pm.position("MSFT").unwrap().exit_reason, Some(ExitReason::SignalReversal));
    }

    #[test]
    fn max_positions_rejection_leaves_book_unchanged() {
        let mut pm = PositionManager::new("t", limits());
        pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("AAPL", 0, Action::Buy, 0.9)).unwrap();
        pm.on_cycle(&obs("MSFT", 0, 100.0), &sig("MSFT", 0, Action::Buy, 0.9)).unwrap();
        assert_eq!(pm.open_count(), 2);

        let tr = pm.on_cycle(&obs("NVDA", 0, 100.0), &sig("NVDA", 0, Action::Buy, 0.9)).unwrap();
        assert_eq!(pm.open_count(), 2);
        assert!(matches!(
            tr.events.as_slice(),
            [PositionEvent::Rejected { reason: RejectReason::MaxPositions, .. }]
        ));
    }

    #[test]
    fn repeated_buy_is_rejected_as_duplicate() {
        let mut pm = PositionManager::new("t", limits());
        pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("AAPL", 0, Action::Buy, 0.9)).unwrap();
        let tr = pm.on_cycle(&obs("AAPL", 1, 100.5), &sig("AAPL", 1, Action::Buy, 0.9)).unwrap();
        assert!(tr.events.iter().any(|e| matches!(e, PositionEvent::Rejected { reason: RejectReason::DuplicatePosition, .. })));
        assert_eq!(pm.open_count(), 1);
        assert!(pm.check_invariants().is_ok());
    }

    #[test]
    fn mismatched_signal_is_an_invariant_violation() {
        let mut pm = PositionManager::new("t", limits());
        let err = pm.on_cycle(&obs("AAPL", 0, 100.0), &sig("MSFT", 0, Action::Buy, 0.9)).unwrap_err();
        assert!(err.is_fatal());
    }
}
