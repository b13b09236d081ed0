//! Offset-tracking reader over the active period log file.
//!
//! The tailer keeps a byte offset per file. Each read goes from that
//! offset to the current end of file, splits complete lines, parses
//! them as JSON, and passes every candidate through the [`Validator`].
//! The offset then moves past the last newline read, whether or not
//! the lines parsed; a trailing fragment with no newline yet stays
//! invisible until a later read.
//!
//! # Modes
//!
//! - **Polling**: while the active file does not exist (or cannot be
//!   watched), check for it every `missing_poll_secs`.
//! - **Change notification**: once the file exists, a filesystem watch
//!   triggers each read.
//!
//! A separate interval checks for period rollover. On rollover the old
//! file is drained one last time, its watch is dropped, and the new file
//! is tailed from offset 0.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use hookscope_types::Event;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::TailerConfig;
use crate::stats::IngestStats;
use crate::validator::Validator;

/// Errors from a single tail read or watch setup.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// Opening, seeking, or reading the log file failed.
    #[error("log file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registering the filesystem watch failed.
    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result of one read from a log file.
#[derive(Debug, Default)]
pub struct TailBatch {
    /// Records that passed validation, in file order.
    pub events: Vec<Event>,
    /// Complete non-empty lines read.
    pub lines: usize,
    /// Lines that were not valid JSON.
    pub malformed: usize,
    /// Records rejected by the validator.
    pub rejected: usize,
}

/// Source of the current period's date.
pub type Today = fn() -> NaiveDate;

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Tails per-period log files and emits validated batches.
pub struct LogTailer {
    config: TailerConfig,
    offsets: HashMap<PathBuf, u64>,
    validator: Validator,
    stats: Arc<IngestStats>,
    today: Today,
}

impl LogTailer {
    /// Create a tailer with no tracked files.
    pub fn new(config: TailerConfig, stats: Arc<IngestStats>) -> Self {
        Self {
            config,
            offsets: HashMap::new(),
            validator: Validator::new(Arc::clone(&stats)),
            stats,
            today: local_today,
        }
    }

    /// Replace the local-date clock used to pick the active file.
    #[must_use]
    pub fn with_today(mut self, today: Today) -> Self {
        self.today = today;
        self
    }

    /// Log file for the period containing `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        let name = self
            .config
            .file_pattern
            .replace("{date}", &date.format("%Y-%m-%d").to_string());
        self.config.log_dir.join(name)
    }

    /// Log file for the current period.
    pub fn active_path(&self) -> PathBuf {
        self.path_for((self.today)())
    }

    /// Tracked byte offset for `path` (0 if never read).
    pub fn offset(&self, path: &Path) -> u64 {
        self.offsets.get(path).copied().unwrap_or(0)
    }

    /// Read everything appended to `path` since the last read.
    pub fn read_new(&mut self, path: &Path) -> Result<TailBatch, TailError> {
        self.read_new_at(path, Utc::now().timestamp_millis())
    }

    /// [`read_new`](Self::read_new) with an explicit clock for validation.
    pub fn read_new_at(&mut self, path: &Path, now_ms: i64) -> Result<TailBatch, TailError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut offset = self.offset(path);
        if len < offset {
            info!(path = %path.display(), offset, len, "log file shrank, restarting from 0");
            offset = 0;
        }
        if len == offset {
            self.offsets.insert(path.to_path_buf(), offset);
            return Ok(TailBatch::default());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.take(len.saturating_sub(offset)).read_to_end(&mut buf)?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            // Only a partial line so far.
            self.offsets.insert(path.to_path_buf(), offset);
            return Ok(TailBatch::default());
        };
        let consumed = u64::try_from(last_newline.saturating_add(1)).unwrap_or(u64::MAX);
        self.offsets
            .insert(path.to_path_buf(), offset.saturating_add(consumed));

        let mut batch = TailBatch::default();
        let complete = buf.get(..last_newline).unwrap_or_default();
        for raw in complete.split(|&b| b == b'\n') {
            let line = raw.trim_ascii();
            if line.is_empty() {
                continue;
            }
            batch.lines = batch.lines.saturating_add(1);
            match serde_json::from_slice::<Value>(line) {
                Ok(record) => match self.validator.admit(&record, now_ms) {
                    Some(event) => batch.events.push(event),
                    None => batch.rejected = batch.rejected.saturating_add(1),
                },
                Err(e) => {
                    batch.malformed = batch.malformed.saturating_add(1);
                    self.stats.record_malformed();
                    debug!(path = %path.display(), error = %e, "skipping malformed line");
                }
            }
        }
        self.stats
            .record_lines(u64::try_from(batch.lines).unwrap_or(u64::MAX));

        Ok(batch)
    }

    /// Tail the active file until `shutdown` flips to `true` or the
    /// receiving end of `tx` is dropped.
    pub async fn run(mut self, tx: mpsc::Sender<Vec<Event>>, mut shutdown: watch::Receiver<bool>) {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();
        let mut current = self.active_path();
        let mut watcher: Option<RecommendedWatcher> = None;

        let mut poll = tokio::time::interval(self.config.missing_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut rollover = tokio::time::interval(self.config.rollover_check());
        rollover.set_missed_tick_behavior(MissedTickBehavior::Skip);
        rollover.tick().await;

        info!(path = %current.display(), "tailer started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(()) = notify_rx.recv() => {
                    while notify_rx.try_recv().is_ok() {}
                    if !self.drain(&current, &tx, &mut watcher).await {
                        break;
                    }
                }
                _ = poll.tick(), if watcher.is_none() => {
                    if !current.exists() {
                        continue;
                    }
                    // Watch before reading so nothing appended in between is missed.
                    match watch_file(&current, notify_tx.clone()) {
                        Ok(w) => {
                            info!(path = %current.display(), "log file present, watching for changes");
                            watcher = Some(w);
                        }
                        Err(e) => {
                            warn!(path = %current.display(), error = %e, "cannot watch log file, staying in polling mode");
                        }
                    }
                    if !self.drain(&current, &tx, &mut watcher).await {
                        break;
                    }
                }
                _ = rollover.tick() => {
                    let next = self.active_path();
                    if next == current {
                        continue;
                    }
                    info!(from = %current.display(), to = %next.display(), "log period rolled over");
                    if !self.drain(&current, &tx, &mut watcher).await {
                        break;
                    }
                    watcher = None;
                    self.offsets.remove(&current);
                    current = next;
                    poll.reset_immediately();
                }
            }
        }

        info!("tailer stopped");
    }

    /// Read `path` and forward accepted events. Returns `false` once the
    /// receiver is gone.
    async fn drain(
        &mut self,
        path: &Path,
        tx: &mpsc::Sender<Vec<Event>>,
        watcher: &mut Option<RecommendedWatcher>,
    ) -> bool {
        match self.read_new(path) {
            Ok(batch) => {
                if batch.malformed > 0 || batch.rejected > 0 {
                    debug!(
                        path = %path.display(),
                        accepted = batch.events.len(),
                        malformed = batch.malformed,
                        rejected = batch.rejected,
                        "read batch with skipped lines"
                    );
                }
                if !batch.events.is_empty() && tx.send(batch.events).await.is_err() {
                    return false;
                }
            }
            Err(TailError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "log file disappeared, back to polling");
                *watcher = None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "log read failed");
            }
        }
        true
    }
}

/// Watch a single file, signalling `tx` on every change.
fn watch_file(path: &Path, tx: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher, TailError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event)
                if matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) =>
            {
                // Receiver gone means the tailer stopped.
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "file watch error"),
        }
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
