// ===============================
// src/fusion.rs
// ===============================
//
// Signal fusion: one Observation + the cycle's MarketContext -> one Signal.
//
//   composite = w_s * sentiment * confidence * d + w_t * technical
//   d = 1 when there is fresh news, `no_news_damping` otherwise
//
// Thresholds come from `threshold(regime, base)` and nowhere else.
// A degraded context always uses the base thresholds.
//
use crate::config::FusionCfg;
use crate::domain::{Action, MarketContext, Observation, Regime, Signal};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub buy: f64,
    pub sell: f64,
}

impl Thresholds {
    pub fn base(cfg: &FusionCfg) -> Self {
        Self { buy: cfg.buy_threshold, sell: cfg.sell_threshold }
    }
}

/// Regime adjustment of the base thresholds.
///
/// BEARISH raises both (stricter entries, earlier exits), BULLISH lowers the
/// buy side only, NEUTRAL leaves them alone. Negative deltas are treated as 0
/// so the buy side stays ordered BEARISH >= NEUTRAL >= BULLISH.
pub fn threshold(regime: Regime, base: Thresholds, cfg: &FusionCfg) -> Thresholds {
    match regime {
        Regime::Neutral => base,
        Regime::Bearish => {
            let buy = (base.buy + cfg.bear_buy_raise.max(0.0)).min(1.0).max(base.buy);
            let sell = (base.sell + cfg.bear_sell_raise.max(0.0)).min(buy).max(base.sell);
            Thresholds { buy, sell }
        }
        Regime::Bullish => {
            let buy = (base.buy - cfg.bull_buy_lower.max(0.0)).max(base.sell).min(base.buy);
            Thresholds { buy, sell: base.sell }
        }
    }
}

/// Weighted composite in [-1, 1].
pub fn composite(obs: &Observation, cfg: &FusionCfg) -> f64 {
    let (ws, wt) = cfg.weights();
    let damping = if obs.news_count == 0 { cfg.no_news_damping } else { 1.0 };
    let c = ws * obs.sentiment_score * obs.sentiment_confidence * damping + wt * obs.technical_score;
    c.clamp(-1.0, 1.0)
}

pub fn select_action(composite: f64, th: Thresholds) -> Action {
    if composite >= th.buy {
        Action::Buy
    } else if composite <= th.sell {
        Action::Sell
    } else {
        Action::Hold
    }
}

/// Distance past the threshold, rescaled so the threshold maps to 0 and the
/// extreme (+1 for BUY, -1 for SELL) maps to 1.
pub fn confidence(composite: f64, action: Action, th: Thresholds) -> f64 {
    let raw = match action {
        Action::Buy => {
            let span = 1.0 - th.buy;
            if span <= EPS { 1.0 } else { (composite - th.buy) / span }
        }
        Action::Sell => {
            let span = th.sell + 1.0;
            if span <= EPS { 1.0 } else { (th.sell - composite) / span }
        }
        Action::Hold => 0.0,
    };
    raw.clamp(0.0, 1.0)
}

pub struct FusionEngine {
    cfg: FusionCfg,
    base: Thresholds,
}

impl FusionEngine {
    pub fn new(cfg: FusionCfg) -> Self {
        let base = Thresholds::base(&cfg);
        Self { cfg, base }
    }

    pub fn thresholds_for(&self, ctx: &MarketContext) -> Thresholds {
        if ctx.degraded {
            self.base
        } else {
            threshold(ctx.regime, self.base, &self.cfg)
        }
    }

    pub fn evaluate(&self, obs: &Observation, ctx: &MarketContext) -> Signal {
        let th = self.thresholds_for(ctx);
        let c = composite(obs, &self.cfg);
        let action = select_action(c, th);
        Signal {
            symbol: obs.symbol.clone(),
            timestamp: obs.timestamp,
            action,
            confidence: confidence(c, action, th),
            composite_score: c,
            regime_adjusted: !ctx.degraded && ctx.regime != Regime::Neutral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cfg() -> FusionCfg {
        FusionCfg {
            w_sentiment: 0.6,
            w_technical: 0.4,
            no_news_damping: 0.5,
            buy_threshold: 0.5,
            sell_threshold: -0.3,
            bear_buy_raise: 0.2,
            bear_sell_raise: 0.1,
            bull_buy_lower: 0.1,
        }
    }

    fn obs(sent: f64, conf: f64, tech: f64, news: u32) -> Observation {
        Observation {
            symbol: "AAPL".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
            price: 180.0,
            volume: 10_000.0,
            technical_score: tech,
            sentiment_score: sent,
            sentiment_confidence: conf,
            news_count: news,
        }
    }

    fn ctx(regime: Regime, degraded: bool) -> MarketContext {
        MarketContext {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
            regime,
            breadth_score: 0.0,
            stress_score: 0.0,
            avg_return: 0.0,
            fresh_symbols: 4,
            degraded,
        }
    }

    #[test]
    fn no_news_composite_fixture() {
        let c = composite(&obs(0.8, 0.9, 0.1, 0), &cfg());
        assert!((c - 0.256).abs() < 1e-12, "got {c}");
    }

    #[test]
    fn fresh_news_is_not_damped() {
        let c = composite(&obs(0.8, 0.9, 0.1, 3), &cfg());
        assert!((c - (0.432 + 0.04)).abs() < 1e-12);
    }

    #[test]
    fn bearish_regime_turns_buy_into_hold() {
        let base = Thresholds::base(&cfg());
        let neutral = threshold(Regime::Neutral, base, &cfg());
        let bearish = threshold(Regime::Bearish, base, &cfg());
        assert_eq!(select_action(0.62, neutral), Action::Buy);
        assert!((bearish.buy - 0.7).abs() < 1e-12);
        assert_eq!(select_action(0.62, bearish), Action::Hold);
    }

    #[test]
    fn bearish_raises_sell_and_bullish_lowers_buy() {
        let base = Thresholds::base(&cfg());
        let bearish = threshold(Regime::Bearish, base, &cfg());
        let bullish = threshold(Regime::Bullish, base, &cfg());
        assert!((bearish.sell - -0.2).abs() < 1e-12);
        assert!((bullish.buy - 0.4).abs() < 1e-12);
        assert_eq!(bullish.sell, base.sell);
    }

    #[test]
    fn confidence_is_zero_at_threshold_and_one_at_extreme() {
        let th = Thresholds { buy: 0.5, sell: -0.3 };
        assert_eq!(confidence(0.5, Action::Buy, th), 0.0);
        assert_eq!(confidence(1.0, Action::Buy, th), 1.0);
        assert!((confidence(0.75, Action::Buy, th) - 0.5).abs() < 1e-12);
        assert_eq!(confidence(-0.3, Action::Sell, th), 0.0);
        assert_eq!(confidence(-1.0, Action::Sell, th), 1.0);
        assert_eq!(confidence(0.1, Action::Hold, th), 0.0);
    }

    #[test]
    fn degraded_context_uses_base_thresholds() {
        let engine = FusionEngine::new(cfg());
        let sig = engine.evaluate(&obs(0.9, 1.0, 0.6, 2), &ctx(Regime::Bearish, true));
        // composite = 0.54 + 0.24 = 0.78 -> BUY under base 0.5
        assert_eq!(sig.action, Action::Buy);
        assert!(!sig.regime_adjusted);
    }

    #[test]
    fn silent_symbol_still_gets_a_signal() {
        let engine = FusionEngine::new(cfg());
        let sig = engine.evaluate(&obs(0.0, 0.0, 0.0, 0), &ctx(Regime::Bullish, false));
        assert_eq!(sig.action, Action::Hold);
        assert_eq!(sig.confidence, 0.0);
        assert!(sig.regime_adjusted);
    }

    #[test]
    fn bearish_regime_cuts_buy_frequency() {
        use crate::feed::{MarketData, MockFeed};
        use chrono::Duration;

        let basket: Vec<String> = ["SPY", "QQQ", "DIA", "IWM"].iter().map(|s| s.to_string()).collect();
        let mut feed = MockFeed::new(11, basket).with_gap_prob(0.0);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let sample: Vec<Observation> = (0..500)
            .flat_map(|i| feed.fetch_reference_basket(t0 + Duration::seconds(30 * i)))
            .collect();

        let engine = FusionEngine::new(cfg());
        let buys = |regime| {
            let c = ctx(regime, false);
            sample.iter().filter(|o| engine.evaluate(o, &c).action == Action::Buy).count()
        };
        let neutral = buys(Regime::Neutral);
        let bearish = buys(Regime::Bearish);

        assert!(neutral >= 20, "too few BUYs to compare: {neutral}");
        // raising buy from 0.5 to 0.7 should remove well over a third of entries
        assert!(bearish * 10 <= neutral * 7, "neutral={neutral} bearish={bearish}");
        assert!(buys(Regime::Bullish) >= neutral);
    }
}
