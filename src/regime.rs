// ===============================
// src/regime.rs
// ===============================
//
// Market regime classifier.
//
// Input : observations of the reference basket (index-tracking symbols).
// Output: one MarketContext per cycle.
//
// - Per basket symbol we keep the last `lookback` prices; the short-horizon
//   return is last/first - 1 over that window.
// - avg return  = mean of fresh returns
// - stress      = dispersion (population std-dev) of fresh returns
// - breadth     = (advancers - decliners) / fresh
//
// Fewer than `quorum` fresh symbols -> NEUTRAL + degraded, never an error.
//
use std::collections::VecDeque;

use ahash::AHashMap as HashMap;
use chrono::Duration;
use tracing::debug;

use crate::config::RegimeCfg;
use crate::domain::{MarketContext, Observation, Regime, Ts};

struct PriceWindow {
    prices: VecDeque<f64>,
    last_ts: Ts,
}

pub struct RegimeClassifier {
    cfg: RegimeCfg,
    max_staleness: Duration,
    windows: HashMap<String, PriceWindow>,
}

impl RegimeClassifier {
    pub fn new(cfg: RegimeCfg, max_staleness_secs: i64) -> Self {
        Self { cfg, max_staleness: Duration::seconds(max_staleness_secs), windows: HashMap::new() }
    }

    /// Feed basket observations. Out-of-order or duplicate ticks are ignored.
    pub fn observe(&mut self, basket: &[Observation]) {
        for obs in basket {
            if obs.invalid_field().is_some() {
                debug!(symbol = %obs.symbol, "regime: skip invalid basket observation");
                continue;
            }
            let cap = self.cfg.lookback;
            let w = self.windows.entry(obs.symbol.clone()).or_insert_with(|| PriceWindow {
                prices: VecDeque::with_capacity(cap),
                last_ts: obs.timestamp,
            });
            if !w.prices.is_empty() && obs.timestamp <= w.last_ts {
                continue;
            }
            if w.prices.len() == cap {
                w.prices.pop_front();
            }
            w.prices.push_back(obs.price);
            w.last_ts = obs.timestamp;
        }
    }

    /// Short-horizon returns of the fresh basket symbols, ordered by symbol.
    pub fn fresh_returns(&self, now: Ts) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .windows
            .iter()
            .filter(|(_, w)| w.prices.len() >= 2 && now - w.last_ts <= self.max_staleness && w.last_ts <= now)
            .filter_map(|(sym, w)| {
                let first = *w.prices.front()?;
                let last = *w.prices.back()?;
                Some((sym.clone(), last / first - 1.0))
            })
            .collect();
        // urutan tetap supaya penjumlahan float deterministik
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn classify(&self, now: Ts) -> MarketContext {
        let returns: Vec<f64> = self.fresh_returns(now).into_iter().map(|(_, r)| r).collect();
        classify_returns(now, &returns, &self.cfg)
    }

    /// observe + classify, the per-cycle entry point.
    pub fn update(&mut self, now: Ts, basket: &[Observation]) -> MarketContext {
        self.observe(basket);
        self.classify(now)
    }
}

/// Pure classification over already computed returns.
pub fn classify_returns(now: Ts, returns: &[f64], cfg: &RegimeCfg) -> MarketContext {
    let n = returns.len();
    if n < cfg.quorum || n == 0 {
        return MarketContext::degraded(now, n);
    }
    let nf = n as f64;
    let avg = returns.iter().sum::<f64>() / nf;
    let var = returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / nf;
    let stress = var.sqrt();
    let adv = returns.iter().filter(|r| **r > 0.0).count() as f64;
    let dec = returns.iter().filter(|r| **r < 0.0).count() as f64;

    let regime = if avg <= -cfg.bear_return || stress >= cfg.stress_high {
        Regime::Bearish
    } else if avg >= cfg.bull_return {
        Regime::Bullish
    } else {
        Regime::Neutral
    };

    MarketContext {
        timestamp: now,
        regime,
        breadth_score: (adv - dec) / nf,
        stress_score: stress,
        avg_return: avg,
        fresh_symbols: n,
        degraded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn ts(min: i64) -> Ts {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn obs(sym: &str, min: i64, price: f64) -> Observation {
        Observation {
            symbol: sym.into(),
            timestamp: ts(min),
            price,
            volume: 1_000.0,
            technical_score: 0.0,
            sentiment_score: 0.0,
            sentiment_confidence: 0.0,
            news_count: 0,
        }
    }

    fn cfg() -> RegimeCfg {
        RegimeCfg { bull_return: 0.01, bear_return: 0.01, stress_high: 0.05, quorum: 3, lookback: 3 }
    }

    #[test]
    fn uniform_rally_is_bullish() {
        let ctx = classify_returns(ts(0), &[0.02, 0.025, 0.03], &cfg());
        assert_eq!(ctx.regime, Regime::Bullish);
        assert!(!ctx.degraded);
        assert_eq!(ctx.breadth_score, 1.0);
    }

    #[test]
    fn selloff_is_bearish() {
        let ctx = classify_returns(ts(0), &[-0.02, -0.01, -0.015], &cfg());
        assert_eq!(ctx.regime, Regime::Bearish);
        assert_eq!(ctx.breadth_score, -1.0);
    }

    #[test]
    fn high_dispersion_is_bearish_even_when_average_is_up() {
        let ctx = classify_returns(ts(0), &[0.15, -0.05, 0.02], &cfg());
        assert!(ctx.avg_return > 0.01);
        assert_eq!(ctx.regime, Regime::Bearish);
    }

    #[test]
    fn flat_market_is_neutral() {
        let ctx = classify_returns(ts(0), &[0.001, -0.002, 0.0], &cfg());
        assert_eq!(ctx.regime, Regime::Neutral);
    }

    #[test]
    fn below_quorum_is_degraded_neutral() {
        let ctx = classify_returns(ts(0), &[0.05, 0.05], &cfg());
        assert_eq!(ctx.regime, Regime::Neutral);
        assert!(ctx.degraded);
        assert_eq!(ctx.fresh_symbols, 2);
    }

    #[test]
    fn classifier_needs_history_then_uses_window() {
        let mut c = RegimeClassifier::new(cfg(), 300);
        let first = c.update(ts(0), &[obs("SPY", 0, 100.0), obs("QQQ", 0, 200.0), obs("DIA", 0, 50.0)]);
        assert!(first.degraded);

        let second = c.update(ts(1), &[obs("SPY", 1, 102.0), obs("QQQ", 1, 204.0), obs("DIA", 1, 51.0)]);
        assert!(!second.degraded);
        assert_eq!(second.regime, Regime::Bullish);
        assert!((second.avg_return - 0.02).abs() < 1e-9);
    }

    #[test]
    fn stale_basket_symbols_drop_out() {
        let mut c = RegimeClassifier::new(cfg(), 60);
        c.observe(&[obs("SPY", 0, 100.0), obs("QQQ", 0, 100.0), obs("DIA", 0, 100.0)]);
        c.observe(&[obs("SPY", 1, 101.0), obs("QQQ", 1, 101.0), obs("DIA", 1, 101.0)]);
        // 10 minutes later nothing is fresh
        let ctx = c.classify(ts(11));
        assert!(ctx.degraded);
        assert_eq!(ctx.fresh_symbols, 0);
    }

    #[test]
    fn duplicate_ticks_are_ignored() {
        let mut c = RegimeClassifier::new(cfg(), 300);
        c.observe(&[obs("SPY", 0, 100.0)]);
        c.observe(&[obs("SPY", 0, 150.0)]);
        c.observe(&[obs("SPY", 1, 101.0)]);
        let r = c.fresh_returns(ts(1));
        assert_eq!(r.len(), 1);
        assert!((r[0].1 - 0.01).abs() < 1e-9);
    }
}
