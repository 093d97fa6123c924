// ===============================
// src/feed.rs
// ===============================
//
// Observation sources (collaborator side of the core):
// - MockFeed   : seeded random walk, market drift shared by all symbols so
//                the basket actually trends / sells off now and then
// - ReplayFeed : JSONL file of Observations, latest tick at or before `ts`
//
// The core never waits on these; a None simply skips the symbol this cycle.
//
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap as HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::domain::{Observation, Ts};

pub trait MarketData {
    fn fetch_observation(&mut self, symbol: &str, ts: Ts) -> Option<Observation>;
    fn fetch_reference_basket(&mut self, ts: Ts) -> Vec<Observation>;
}

impl<T: MarketData + ?Sized> MarketData for Box<T> {
    fn fetch_observation(&mut self, symbol: &str, ts: Ts) -> Option<Observation> {
        (**self).fetch_observation(symbol, ts)
    }

    fn fetch_reference_basket(&mut self, ts: Ts) -> Vec<Observation> {
        (**self).fetch_reference_basket(ts)
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("line {line}: {source}")]
    Parse { line: usize, source: serde_json::Error },
}

/// Random-walk generator.
pub struct MockFeed {
    rng: StdRng,
    basket: Vec<String>,
    prices: HashMap<String, f64>,
    drift: f64,
    /// Probability a fetch comes back empty.
    gap_prob: f64,
}

impl MockFeed {
    pub fn new(seed: u64, basket: Vec<String>) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), basket, prices: HashMap::new(), drift: 0.0, gap_prob: 0.02 }
    }

    pub fn with_gap_prob(mut self, p: f64) -> Self {
        self.gap_prob = p.clamp(0.0, 1.0);
        self
    }

    fn step(&mut self, symbol: &str, ts: Ts) -> Observation {
        let noise: f64 = self.rng.gen_range(-0.004..=0.004);
        let ret = self.drift + noise;
        let px = self.prices.entry(symbol.to_string()).or_insert(100.0);
        *px = (*px * (1.0 + ret)).max(1.0);
        let price = *px;

        // skor "model" mengikuti arah return + noise
        let tech = (ret * 150.0 + self.rng.gen_range(-0.3..=0.3)).clamp(-1.0, 1.0);
        let sent = (self.drift * 200.0 + self.rng.gen_range(-0.5..=0.5)).clamp(-1.0, 1.0);
        Observation {
            symbol: symbol.to_string(),
            timestamp: ts,
            price,
            volume: self.rng.gen_range(1_000.0..50_000.0),
            technical_score: tech,
            sentiment_score: sent,
            sentiment_confidence: self.rng.gen_range(0.2..=1.0),
            news_count: self.rng.gen_range(0..4),
        }
    }
}

impl MarketData for MockFeed {
    fn fetch_observation(&mut self, symbol: &str, ts: Ts) -> Option<Observation> {
        if self.rng.gen_bool(self.gap_prob) {
            return None;
        }
        Some(self.step(symbol, ts))
    }

    fn fetch_reference_basket(&mut self, ts: Ts) -> Vec<Observation> {
        // basket dipanggil sekali per cycle -> update drift pasar di sini
        self.drift = (self.drift * 0.9 + self.rng.gen_range(-0.002..=0.002)).clamp(-0.01, 0.01);
        let basket = self.basket.clone();
        let mut out = Vec::with_capacity(basket.len());
        for s in &basket {
            if self.rng.gen_bool(self.gap_prob) {
                continue;
            }
            out.push(self.step(s, ts));
        }
        out
    }
}

/// Replays recorded observations.
pub struct ReplayFeed {
    basket: Vec<String>,
    by_symbol: BTreeMap<String, Vec<Observation>>,
}

impl ReplayFeed {
    pub fn new(observations: Vec<Observation>, basket: Vec<String>) -> Self {
        let mut by_symbol: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for o in observations {
            by_symbol.entry(o.symbol.clone()).or_default().push(o);
        }
        for v in by_symbol.values_mut() {
            v.sort_by_key(|o| o.timestamp);
        }
        Self { basket, by_symbol }
    }

    pub fn from_file(path: &Path, basket: Vec<String>) -> Result<Self, FeedError> {
        Ok(Self::new(load_observations(path)?, basket))
    }

    fn latest(&self, symbol: &str, ts: Ts) -> Option<Observation> {
        let v = self.by_symbol.get(symbol)?;
        let idx = v.partition_point(|o| o.timestamp <= ts);
        idx.checked_sub(1).map(|i| v[i].clone())
    }
}

impl MarketData for ReplayFeed {
    fn fetch_observation(&mut self, symbol: &str, ts: Ts) -> Option<Observation> {
        self.latest(symbol, ts)
    }

    fn fetch_reference_basket(&mut self, ts: Ts) -> Vec<Observation> {
        self.basket.iter().filter_map(|s| self.latest(s, ts)).collect()
    }
}

/// One JSON Observation per line; blank lines are skipped.
pub fn load_observations(path: &Path) -> Result<Vec<Observation>, FeedError> {
    let file = File::open(path).map_err(|source| FeedError::Io { path: path.display().to_string(), source })?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| FeedError::Io { path: path.display().to_string(), source })?;
        if line.trim().is_empty() {
            continue;
        }
        let obs = serde_json::from_str(&line).map_err(|source| FeedError::Parse { line: i + 1, source })?;
        out.push(obs);
    }
    Ok(out)
}
