// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::io::{Read, Write as _};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{info, warn};

// one registry for the whole process; init() wires the statics into it
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Cycle --------
pub static CYCLES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("cycles_total", "completed evaluation cycles").unwrap());

pub static CYCLES_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("cycles_skipped_total", "polling ticks skipped because a cycle overran").unwrap()
});

pub static CYCLE_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new("cycle_latency_ms", "wall time of one cycle (ms)")).unwrap()
});

pub static DATA_UNAVAILABLE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("data_unavailable_total", "symbols skipped for missing/stale/invalid data"),
        &["symbol"],
    )
    .unwrap()
});

pub static REGIME: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("market_regime", "1 for the current regime"), &["regime"]).unwrap()
});

// -------- Decisions --------
pub static SIGNALS_BY: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("signals_total_by", "fused signals (labels: action)"), &["action"]).unwrap()
});

pub static POSITION_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("position_events_total", "position lifecycle events"), &["kind"]).unwrap()
});

pub static REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("entries_rejected_total", "BUY signals rejected by risk"), &["reason"]).unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("open_positions", "live (OPEN/CLOSING) positions").unwrap());

pub static EXECS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("paper_fills_total", "simulated fills"), &["side"]).unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(CYCLES.clone())),
        REGISTRY.register(Box::new(CYCLES_SKIPPED.clone())),
        REGISTRY.register(Box::new(CYCLE_LATENCY_MS.clone())),
        REGISTRY.register(Box::new(DATA_UNAVAILABLE.clone())),
        REGISTRY.register(Box::new(REGIME.clone())),
        REGISTRY.register(Box::new(SIGNALS_BY.clone())),
        REGISTRY.register(Box::new(POSITION_EVENTS.clone())),
        REGISTRY.register(Box::new(REJECTED.clone())),
        REGISTRY.register(Box::new(OPEN_POSITIONS.clone())),
        REGISTRY.register(Box::new(EXECS.clone())),
    ] {
        if let Err(e) = m {
            warn!(?e, "metric registration failed");
        }
    }
}

/// Prometheus text exposition of everything registered.
pub fn render() -> Vec<u8> {
    let mut out = Vec::new();
    if TextEncoder::new().encode(&REGISTRY.gather(), &mut out).is_err() || out.is_empty() {
        out = b"# no metrics\n".to_vec();
    }
    out
}

fn respond(stream: &mut TcpStream, status: &str, body: &[u8]) -> std::io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}

// GET /metrics (or /) -> exposition, anything else -> 404
fn serve_one(mut stream: TcpStream) -> std::io::Result<()> {
    let mut req = [0u8; 1024];
    let n = stream.read(&mut req)?;
    let path = std::str::from_utf8(&req[..n])
        .ok()
        .and_then(|head| head.split_whitespace().nth(1))
        .unwrap_or("/");
    match path {
        "/" | "/metrics" => respond(&mut stream, "200 OK", &render()),
        _ => respond(&mut stream, "404 Not Found", b"not found\n"),
    }
}

/// Binds `0.0.0.0:port` and answers scrapes on a plain OS thread, off the
/// tokio runtime.
pub fn serve_metrics(port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!(port, "metrics listening");
    thread::spawn(move || {
        for conn in listener.incoming() {
            let res = conn.and_then(serve_one);
            if let Err(e) = res {
                warn!(?e, "metrics scrape failed");
            }
        }
    });
    Ok(())
}
