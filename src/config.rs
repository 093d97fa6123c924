// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : regime_paper — regime-aware signal fusion & paper-trading core
Module  : config.rs
Version : 0.1.0
Author  : regime_paper contributors
License : MIT (see LICENSE)

Summary : Classifies the market regime from a reference basket, fuses
          sentiment + technical scores into BUY/SELL/HOLD signals with
          regime-adjusted thresholds, runs simulated positions through a
          stop/target/trailing lifecycle, and accounts performance both live
          (polling) and in deterministic backtests.
=============================================================================
*/
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ===== CLI =====
#[derive(Debug, Parser)]
#[command(name = "regime_paper", about = "Regime-aware signal fusion and paper trading")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll all symbols on POLL_SECS during the session (default)
    Run,
    /// Run a single cycle now and print the report as JSON (for cron)
    Cycle,
    /// Replay a JSONL file of observations for one symbol
    Backtest {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        symbol: String,
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Sumber observasi
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Replay,
}

impl FeedMode {
    pub fn from_env(key: &str, default_mode: FeedMode) -> FeedMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"   => FeedMode::Mock,
            "replay" => FeedMode::Replay,
            _ => default_mode,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub symbols: Vec<String>,
    pub basket: Vec<String>,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // feed
    pub feed_mode: FeedMode,
    pub replay_file: Option<String>,
    pub mock_seed: u64,

    // cadence
    pub poll_secs: u64,
    pub session_open: NaiveTime,
    pub session_close: NaiveTime,
}

/// Regime classifier tunables (τ_bull, τ_bear, σ_high, quorum).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegimeCfg {
    pub bull_return: f64,
    pub bear_return: f64,
    pub stress_high: f64,
    pub quorum: usize,
    pub lookback: usize,
}

impl Default for RegimeCfg {
    fn default() -> Self {
        Self { bull_return: 0.01, bear_return: 0.01, stress_high: 0.03, quorum: 3, lookback: 5 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionCfg {
    pub w_sentiment: f64,
    pub w_technical: f64,
    pub no_news_damping: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub bear_buy_raise: f64,
    pub bear_sell_raise: f64,
    pub bull_buy_lower: f64,
}

impl Default for FusionCfg {
    fn default() -> Self {
        Self {
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
}

impl FusionCfg {
    /// Weights rescaled so they sum to 1.
    pub fn weights(&self) -> (f64, f64) {
        let total = self.w_sentiment + self.w_technical;
        if total <= 0.0 {
            return (0.5, 0.5);
        }
        (self.w_sentiment / total, self.w_technical / total)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub max_open_positions: usize,
    pub entry_confidence: f64,
    pub exit_confidence: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub trail_activation_pct: f64,
    pub trail_pct: f64,
    pub trade_notional: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_open_positions: 5,
            entry_confidence: 0.1,
            exit_confidence: 0.2,
            stop_pct: 0.05,
            target_pct: 0.10,
            trail_activation_pct: 0.02,
            trail_pct: 0.05,
            trade_notional: 10_000.0,
        }
    }
}

/// Everything the decision path needs. Shared by live cycles and backtests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_tag: String,
    pub basket: Vec<String>,
    pub max_staleness_secs: i64,
    pub regime: RegimeCfg,
    pub fusion: FusionCfg,
    pub limits: Limits,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strategy_tag: "fusion_v1".to_string(),
            basket: vec!["SPY".into(), "QQQ".into(), "DIA".into(), "IWM".into()],
            max_staleness_secs: 120,
            regime: RegimeCfg::default(),
            fusion: FusionCfg::default(),
            limits: Limits::default(),
        }
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.into() }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.fusion;
        if f.w_sentiment < 0.0 || f.w_technical < 0.0 || f.w_sentiment + f.w_technical <= 0.0 {
            return Err(invalid("FUSION_W_SENTIMENT", "weights must be non-negative with a positive sum"));
        }
        if !(0.0..=1.0).contains(&f.no_news_damping) {
            return Err(invalid("FUSION_NO_NEWS_DAMPING", "must be within [0, 1]"));
        }
        if f.buy_threshold <= f.sell_threshold {
            return Err(invalid("FUSION_BUY_THRESHOLD", "must be above FUSION_SELL_THRESHOLD"));
        }
        if f.bear_buy_raise < 0.0 || f.bear_sell_raise < 0.0 || f.bull_buy_lower < 0.0 {
            return Err(invalid("FUSION_BEAR_BUY_RAISE", "regime deltas must be non-negative"));
        }

        let r = &self.regime;
        if r.quorum == 0 {
            return Err(invalid("REGIME_QUORUM", "must be at least 1"));
        }
        if r.lookback < 2 {
            return Err(invalid("REGIME_LOOKBACK", "needs at least two prices"));
        }
        if r.bull_return < 0.0 || r.bear_return < 0.0 || r.stress_high <= 0.0 {
            return Err(invalid("REGIME_STRESS_HIGH", "regime thresholds must be positive"));
        }

        let l = &self.limits;
        for (key, v) in [
            ("RISK_STOP_PCT", l.stop_pct),
            ("RISK_TRAIL_PCT", l.trail_pct),
        ] {
            if !(v > 0.0 && v < 1.0) {
                return Err(invalid(key, "must be within (0, 1)"));
            }
        }
        if l.target_pct <= 0.0 || l.trail_activation_pct < 0.0 {
            return Err(invalid("RISK_TARGET_PCT", "must be positive"));
        }
        for (key, v) in [
            ("RISK_ENTRY_CONFIDENCE", l.entry_confidence),
            ("RISK_EXIT_CONFIDENCE", l.exit_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(key, "must be within [0, 1]"));
            }
        }
        if l.trade_notional <= 0.0 {
            return Err(invalid("RISK_TRADE_NOTIONAL", "must be positive"));
        }
        if self.max_staleness_secs <= 0 {
            return Err(invalid("MAX_STALENESS_SECS", "must be positive"));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
}

fn env_time(key: &'static str, default: NaiveTime) -> Result<NaiveTime, ConfigError> {
    match env::var(key) {
        Ok(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| invalid(key, e.to_string())),
        Err(_) => Ok(default),
    }
}

pub fn load() -> Result<(Args, StrategyConfig), ConfigError> {
    let _ = dotenv();

    let d = StrategyConfig::default();

    // SYMBOLS=AAPL,MSFT,NVDA  BASKET=SPY,QQQ,DIA,IWM
    let symbols = env_list("SYMBOLS").unwrap_or_else(|| vec!["AAPL".into(), "MSFT".into()]);
    let basket = env_list("BASKET").unwrap_or(d.basket);

    let session_open = env_time("SESSION_OPEN_UTC", NaiveTime::from_hms_opt(13, 30, 0).unwrap_or_default())?;
    let session_close = env_time("SESSION_CLOSE_UTC", NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default())?;

    let args = Args {
        symbols,
        basket: basket.clone(),
        record_file: env::var("RECORD_FILE").ok(),
        metrics_port: env_or("METRICS_PORT", 9898),
        feed_mode: FeedMode::from_env("FEED_MODE", FeedMode::Mock),
        replay_file: env::var("REPLAY_FILE").ok(),
        mock_seed: env_or("MOCK_SEED", 7),
        poll_secs: env_or("POLL_SECS", 30u64).max(1),
        session_open,
        session_close,
    };

    // ===== Strategy tunables =====
    let dr = d.regime;
    let df = d.fusion;
    let dl = d.limits;
    let cfg = StrategyConfig {
        strategy_tag: env::var("STRATEGY_TAG").unwrap_or(d.strategy_tag),
        basket,
        max_staleness_secs: env_or("MAX_STALENESS_SECS", d.max_staleness_secs),
        regime: RegimeCfg {
            bull_return: env_or("REGIME_BULL_RETURN", dr.bull_return),
            bear_return: env_or("REGIME_BEAR_RETURN", dr.bear_return),
            stress_high: env_or("REGIME_STRESS_HIGH", dr.stress_high),
            quorum: env_or("REGIME_QUORUM", dr.quorum),
            lookback: env_or("REGIME_LOOKBACK", dr.lookback),
        },
        fusion: FusionCfg {
            w_sentiment: env_or("FUSION_W_SENTIMENT", df.w_sentiment),
            w_technical: env_or("FUSION_W_TECHNICAL", df.w_technical),
            no_news_damping: env_or("FUSION_NO_NEWS_DAMPING", df.no_news_damping),
            buy_threshold: env_or("FUSION_BUY_THRESHOLD", df.buy_threshold),
            sell_threshold: env_or("FUSION_SELL_THRESHOLD", df.sell_threshold),
            bear_buy_raise: env_or("FUSION_BEAR_BUY_RAISE", df.bear_buy_raise),
            bear_sell_raise: env_or("FUSION_BEAR_SELL_RAISE", df.bear_sell_raise),
            bull_buy_lower: env_or("FUSION_BULL_BUY_LOWER", df.bull_buy_lower),
        },
        limits: Limits {
            max_open_positions: env_or("RISK_MAX_OPEN_POSITIONS", dl.max_open_positions),
            entry_confidence: env_or("RISK_ENTRY_CONFIDENCE", dl.entry_confidence),
            exit_confidence: env_or("RISK_EXIT_CONFIDENCE", dl.exit_confidence),
            stop_pct: env_or("RISK_STOP_PCT", dl.stop_pct),
            target_pct: env_or("RISK_TARGET_PCT", dl.target_pct),
            trail_activation_pct: env_or("RISK_TRAIL_ACTIVATION_PCT", dl.trail_activation_pct),
            trail_pct: env_or("RISK_TRAIL_PCT", dl.trail_pct),
            trade_notional: env_or("RISK_TRADE_NOTIONAL", dl.trade_notional),
        },
    };
    cfg.validate()?;

    if args.feed_mode == FeedMode::Replay && args.replay_file.is_none() {
        return Err(invalid("REPLAY_FILE", "required when FEED_MODE=replay"));
    }
    Ok((args, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(StrategyConfig::default().validate().is_ok());
    }

    #[test]
    fn weights_are_normalised() {
        let f = FusionCfg { w_sentiment: 3.0, w_technical: 1.0, ..FusionCfg::default() };
        let (ws, wt) = f.weights();
        assert!((ws - 0.75).abs() < 1e-12);
        assert!((wt - 0.25).abs() < 1e-12);
    }

    #[test]
    fn crossed_thresholds_rejected() {
        let mut cfg = StrategyConfig::default();
        cfg.fusion.buy_threshold = -0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_regime_delta_rejected() {
        let mut cfg = StrategyConfig::default();
        cfg.fusion.bull_buy_lower = -0.1;
        assert!(cfg.validate().is_err());
    }
}
