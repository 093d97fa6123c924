// ===============================
// src/scheduler.rs
// ===============================
//
// Two cadences around Engine::run_cycle:
// - polling : every POLL_SECS while the session is open
// - batch   : daily open routine on session open, daily close routine
//             (final cycle + day summary) on session close
//
// A cycle always runs to completion inside the loop body, so two cycles never
// interleave. Overruns skip ticks (MissedTickBehavior::Skip), they are never
// queued.
//
use std::future::Future;
use std::time::Instant;

use chrono::{Datelike, NaiveTime, Utc, Weekday};
use tokio::{
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::domain::{Event, Ts};
use crate::engine::{CycleReport, Engine};
use crate::feed::MarketData;
use crate::metrics::{CYCLES, CYCLES_SKIPPED, CYCLE_LATENCY_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Session {
    /// Weekdays only; a close earlier than open wraps past midnight UTC.
    pub fn is_open(&self, now: Ts) -> bool {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = now.time();
        if self.open <= self.close {
            t >= self.open && t < self.close
        } else {
            t >= self.open || t < self.close
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    DailyOpen,
    DailyClose,
}

#[derive(Debug, Default)]
pub struct TickOutcome {
    pub routine: Option<Routine>,
    pub report: Option<CycleReport>,
    /// Poll ticks this cycle ate into.
    pub overrun_ticks: u64,
}

pub struct Scheduler<F: MarketData> {
    engine: Engine,
    feed: F,
    session: Session,
    poll: Duration,
    rec_tx: Option<mpsc::Sender<Event>>,
    in_session: bool,
}

impl<F: MarketData> Scheduler<F> {
    pub fn new(engine: Engine, feed: F, session: Session, poll: Duration) -> Self {
        Self { engine, feed, session, poll, rec_tx: None, in_session: false }
    }

    pub fn with_recorder(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.rec_tx = Some(tx);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// One cycle right now, outside any session logic (cron / batch use).
    pub fn run_once(&mut self, now: Ts) -> CycleReport {
        self.cycle(now)
    }

    /// Handles one timer tick at `now`.
    pub fn on_tick(&mut self, now: Ts) -> TickOutcome {
        let open = self.session.is_open(now);
        let mut out = TickOutcome::default();

        match (self.in_session, open) {
            (false, true) => {
                info!(date = %now.date_naive(), symbols = ?self.engine.symbols(), "daily open");
                self.note(format!("daily open {}", now.date_naive()));
                out.routine = Some(Routine::DailyOpen);
            }
            (true, false) => {
                // final cycle of the day, then the summary
                let started = Instant::now();
                out.report = Some(self.cycle(now));
                out.overrun_ticks = self.overrun(started);
                self.daily_close(now);
                out.routine = Some(Routine::DailyClose);
                self.in_session = false;
                return out;
            }
            _ => {}
        }
        self.in_session = open;

        if open {
            let started = Instant::now();
            out.report = Some(self.cycle(now));
            out.overrun_ticks = self.overrun(started);
        }
        out
    }

    /// Poll until `shutdown` resolves, then hand the engine back.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Engine {
        let mut tick = interval(self.poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(poll_secs = self.poll.as_secs(), open = %self.session.open, close = %self.session.close, "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler: shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    self.on_tick(Utc::now());
                }
            }
        }
        self.engine
    }

    fn cycle(&mut self, now: Ts) -> CycleReport {
        let started = Instant::now();
        let report = self.engine.run_cycle(&mut self.feed, now);
        CYCLES.inc();
        CYCLE_LATENCY_MS.observe(started.elapsed().as_secs_f64() * 1_000.0);
        if let Some(tx) = &self.rec_tx {
            for ev in report.events() {
                if tx.try_send(ev).is_err() {
                    warn!("recorder channel full or closed, event dropped");
                    break;
                }
            }
        }
        report
    }

    fn overrun(&self, started: Instant) -> u64 {
        let elapsed = started.elapsed();
        let skipped = skipped_ticks(elapsed, self.poll);
        if skipped == 0 {
            return 0;
        }
        CYCLES_SKIPPED.inc_by(skipped);
        warn!(elapsed_ms = elapsed.as_millis() as u64, skipped, "cycle overran poll interval, ticks skipped");
        skipped
    }

    fn daily_close(&mut self, now: Ts) {
        let today = now.date_naive();
        let todays: Vec<_> = self
            .engine
            .performance_summary(None)
            .into_iter()
            .filter(|r| r.exit_time.date_naive() == today)
            .collect();
        let wins = todays.iter().filter(|r| r.realized_return > 0.0).count();
        let sum: f64 = todays.iter().map(|r| r.realized_return).sum();
        info!(
            date = %today,
            trades = todays.len(),
            wins,
            sum_return = sum,
            open = self.engine.open_positions().len(),
            "daily close"
        );
        self.note(format!("daily close {today}: trades={} wins={wins} sum_return={sum:.5}", todays.len()));
    }

    fn note(&self, msg: String) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(Event::Note(msg));
        }
    }
}

/// Whole poll periods a cycle of length `elapsed` swallowed. Those ticks are
/// dropped, the next cycle starts on the following tick boundary.
pub fn skipped_ticks(elapsed: Duration, poll: Duration) -> u64 {
    if elapsed <= poll {
        return 0;
    }
    (elapsed.as_millis() / poll.as_millis().max(1)) as u64
}
