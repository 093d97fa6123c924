// ===============================
// src/lib.rs
// ===============================
pub mod domain;
pub mod error;
pub mod config;
pub mod metrics;
pub mod recorder;
pub mod feed;
pub mod regime;
pub mod fusion;
pub mod risk;
pub mod positions;
pub mod posttrade;
pub mod gateway;      // paper broker (no routing)
pub mod engine;
pub mod backtest;
pub mod scheduler;
