// ===============================
// src/gateway.rs (paper broker)
// ===============================
//
// No routing, no venue: every Opened / Closed transition becomes one
// simulated fill at the price the position manager already decided.
//
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{PositionEvent, Ts};
use crate::metrics::EXECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self { Side::Buy => "buy", Side::Sell => "sell" }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecReport {
    pub cl_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub px: f64,
    pub ts: Ts,
}

#[derive(Debug, Default)]
pub struct PaperBroker {
    seq: u64,
    open_qty: ahash::AHashMap<String, f64>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated fill for a lifecycle event, if the event moves inventory.
    pub fn on_event(&mut self, ev: &PositionEvent) -> Option<ExecReport> {
        let (symbol, side, qty, px, ts) = match ev {
            PositionEvent::Opened { symbol, ts, price, quantity, .. } => {
                self.open_qty.insert(symbol.clone(), *quantity);
                (symbol, Side::Buy, *quantity, *price, *ts)
            }
            PositionEvent::Closed { symbol, ts, exit_price, .. } => {
                let qty = self.open_qty.remove(symbol).unwrap_or(0.0);
                (symbol, Side::Sell, qty, *exit_price, *ts)
            }
            _ => return None,
        };
        self.seq += 1;
        let er = ExecReport {
            cl_id: format!("PAPER-{}-{}", symbol, self.seq),
            symbol: symbol.clone(),
            side,
            qty,
            px,
            ts,
        };
        EXECS.with_label_values(&[side.as_str()]).inc();
        info!(cl_id = %er.cl_id, side = side.as_str(), qty, px, "FILLED (paper)");
        Some(er)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExitReason;
    use chrono::Utc;

    #[test]
    fn open_then_close_fills_same_quantity() {
        let mut b = PaperBroker::new();
        let now = Utc::now();
        let buy = b
            .on_event(&PositionEvent::Opened {
                symbol: "AAPL".into(),
                ts: now,
                price: 100.0,
                quantity: 12.5,
                stop_loss: 95.0,
                target: 110.0,
            })
            .unwrap();
        assert_eq!(buy.side, Side::Buy);

        let sell = b
            .on_event(&PositionEvent::Closed {
                symbol: "AAPL".into(),
                ts: now,
                exit_price: 104.0,
                reason: ExitReason::SignalReversal,
                realized_return: 0.04,
            })
            .unwrap();
        assert_eq!(sell.side, Side::Sell);
        assert_eq!(sell.qty, 12.5);
        assert_ne!(buy.cl_id, sell.cl_id);

        let none = b.on_event(&PositionEvent::StopRaised { symbol: "AAPL".into(), ts: now, from: 1.0, to: 2.0 });
        assert!(none.is_none());
    }
}
