// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;

use crate::config::Limits;
use crate::domain::{RejectReason, Signal};

/// Snapshot of the book the entry checks need.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookView {
    pub open_count: usize,
    pub symbol_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RiskError {
    #[error("symbol already has a live position")]
    DuplicatePosition,
    #[error("confidence {confidence:.3} below entry threshold {min:.3}")]
    LowConfidence { confidence: f64, min: f64 },
    #[error("max open positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },
}

impl RiskError {
    pub fn reason(&self) -> RejectReason {
        match self {
            RiskError::DuplicatePosition => RejectReason::DuplicatePosition,
            RiskError::LowConfidence { .. } => RejectReason::LowConfidence,
            RiskError::MaxPositions { .. } => RejectReason::MaxPositions,
        }
    }
}

/// Accepted entry, priced off the observation that carried the BUY.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOrder {
    pub price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub target: f64,
}

/// Pre-trade checks -> kalau lolos, Signal BUY jadi EntryOrder
pub fn check(sig: &Signal, price: f64, lim: &Limits, book: BookView) -> Result<EntryOrder, RiskError> {
    // 1) uniqueness per symbol
    if book.symbol_live {
        return Err(RiskError::DuplicatePosition);
    }

    // 2) signal quality
    if sig.confidence < lim.entry_confidence {
        return Err(RiskError::LowConfidence { confidence: sig.confidence, min: lim.entry_confidence });
    }

    // 3) portfolio-wide cap
    if book.open_count >= lim.max_open_positions {
        return Err(RiskError::MaxPositions { open: book.open_count, max: lim.max_open_positions });
    }

    Ok(EntryOrder {
        price,
        quantity: lim.trade_notional / price,
        stop_loss: price * (1.0 - lim.stop_pct),
        target: price * (1.0 + lim.target_pct),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Action;
    use chrono::Utc;

    fn buy(conf: f64) -> Signal {
        Signal {
            symbol: "MSFT".into(),
            timestamp: Utc::now(),
            action: Action::Buy,
            confidence: conf,
            composite_score: 0.8,
            regime_adjusted: false,
        }
    }

    #[test]
    fn accepted_entry_sets_stop_and_target() {
        let lim = Limits { stop_pct: 0.05, target_pct: 0.10, trade_notional: 1_000.0, ..Limits::default() };
        let e = check(&buy(0.5), 100.0, &lim, BookView::default()).unwrap();
        assert!((e.stop_loss - 95.0).abs() < 1e-9);
        assert!((e.target - 110.0).abs() < 1e-9);
        assert!((e.quantity - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rejections_carry_their_reason() {
        let lim = Limits { max_open_positions: 2, entry_confidence: 0.3, ..Limits::default() };
        let full = BookView { open_count: 2, symbol_live: false };
        assert_eq!(check(&buy(0.9), 10.0, &lim, full).unwrap_err().reason(), RejectReason::MaxPositions);
        assert_eq!(check(&buy(0.1), 10.0, &lim, BookView::default()).unwrap_err().reason(), RejectReason::LowConfidence);
        let live = BookView { open_count: 1, symbol_live: true };
        assert_eq!(check(&buy(0.9), 10.0, &lim, live).unwrap_err().reason(), RejectReason::DuplicatePosition);
    }
}
