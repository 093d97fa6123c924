// ===============================
// src/recorder.rs
// ===============================
//
// Append-only JSONL log: contexts, signals, position events, performance
// records. One Event per line, never rewritten.
// - BufWriter, flush tiap 1s dan/atau tiap FLUSH_EVERY_N_EVENTS event
// - parent directory dibuat otomatis
// - write error -> reopen sekali, lalu drop event itu
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` agar aktif (lihat main.rs).
//
use std::path::Path;

use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder io on {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("recorder line {line}: {source}")]
    Decode { line: usize, source: serde_json::Error },
}

async fn open_writer(path: &str) -> Result<BufWriter<tokio::fs::File>, RecorderError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| RecorderError::Io { path: path.to_string(), source })?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<tokio::fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) -> Result<(), RecorderError> {
    info!(%path, "recorder: started");
    let mut writer = open_writer(&path).await?;

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    // channel closed: flush dan keluar
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    return Ok(());
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    writer = open_writer(&path).await?;
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }
                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

/// One-shot append of a finished batch (cron `cycle`): same writer as `run`,
/// returns once everything is flushed.
pub async fn record_batch(events: Vec<Event>, path: String) -> Result<(), RecorderError> {
    let (tx, rx) = mpsc::channel::<Event>(events.len().max(1));
    for ev in events {
        // capacity covers the whole batch, so this never blocks
        if tx.try_send(ev).is_err() {
            error!("recorder: batch channel rejected an event");
        }
    }
    drop(tx);
    run(rx, path).await
}

/// Reads a log written by `run` back into memory.
pub async fn read_events(path: &str) -> Result<Vec<Event>, RecorderError> {
    let file = fs::File::open(path)
        .await
        .map_err(|source| RecorderError::Io { path: path.to_string(), source })?;
    let mut lines = BufReader::new(file).lines();
    let mut out = Vec::new();
    let mut n = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|source| RecorderError::Io { path: path.to_string(), source })?
    {
        n += 1;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line).map_err(|source| RecorderError::Decode { line: n, source })?);
    }
    Ok(out)
}
