// ===============================
// src/main.rs
// ===============================
/*
 # polling loop (mock feed), metrics on :9898
 RUST_LOG=info cargo run -- run

 # satu cycle untuk cron, output JSON
 cargo run -- cycle

 # replay
 cargo run -- backtest --input data/aapl.jsonl --symbol AAPL --output out/aapl_report.json

 curl -s localhost:9898/metrics | egrep '^(market_regime|signals_total_by|entries_rejected_total)'
*/
/*
=============================================================================
Project : regime_paper — regime-aware signal fusion & paper-trading core
Module  : main.rs
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
use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::{sync::mpsc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use regime_paper::config::{self, Args, Cli, Command, FeedMode};
use regime_paper::domain::Event;
use regime_paper::engine::Engine;
use regime_paper::feed::{self, MarketData, MockFeed, ReplayFeed};
use regime_paper::scheduler::{Scheduler, Session};
use regime_paper::{backtest, metrics, recorder};

fn build_feed(args: &Args) -> anyhow::Result<Box<dyn MarketData + Send>> {
    Ok(match args.feed_mode {
        FeedMode::Mock => Box::new(MockFeed::new(args.mock_seed, args.basket.clone())),
        FeedMode::Replay => {
            let path = args.replay_file.as_deref().context("REPLAY_FILE missing")?;
            Box::new(ReplayFeed::from_file(Path::new(path), args.basket.clone())?)
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // ---- Load config & limits ----
    let (args, cfg) = config::load()?;
    info!(
        symbols = ?args.symbols,
        basket = ?args.basket,
        feed_mode = ?args.feed_mode,
        strategy = %cfg.strategy_tag,
        poll_secs = args.poll_secs,
        "startup config"
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Backtest { input, symbol, output } => {
            let observations = feed::load_observations(&input)?;
            let report = backtest::run_backtest(&symbol.to_ascii_uppercase(), &observations, &cfg);
            let json = report.to_json()?;
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
                    info!(path = %path.display(), "backtest report written");
                }
                None => println!("{json}"),
            }
        }

        Command::Cycle => {
            let mut feed = build_feed(&args)?;
            let mut engine = Engine::new(cfg, args.symbols.clone());
            let report = engine.run_cycle(&mut feed, Utc::now());
            println!("{}", serde_json::to_string_pretty(&report)?);

            // cron cycles tetap masuk ke event log
            if let Some(path) = args.record_file.clone() {
                recorder::record_batch(report.events(), path).await?;
            }
        }

        Command::Run => {
            // ---- Metrics ----
            metrics::init();
            if let Err(e) = metrics::serve_metrics(args.metrics_port) {
                error!(?e, port = args.metrics_port, "metrics server not started");
            }

            // ---- Recorder (optional) ----
            let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
            let rec_handle = args.record_file.clone().map(|path| tokio::spawn(recorder::run(rec_rx, path)));

            let feed = build_feed(&args)?;
            let engine = Engine::new(cfg, args.symbols.clone());
            let session = Session { open: args.session_open, close: args.session_close };
            let mut sched = Scheduler::new(engine, feed, session, Duration::from_secs(args.poll_secs));
            if rec_handle.is_some() {
                sched = sched.with_recorder(rec_tx);
            }

            let engine = sched
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;

            let stats = engine.performance_stats();
            info!(
                trades = stats.trades,
                total_return = stats.total_return,
                max_drawdown = stats.max_drawdown,
                open = engine.open_positions().len(),
                "session summary"
            );

            if let Some(h) = rec_handle {
                match h.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(?e, "recorder stopped with error"),
                    Err(e) => error!(?e, "recorder task panicked"),
                }
            }
        }
    }
    Ok(())
}
