//! Background worker
//!
//! One thread per engine. It runs compaction requests queued by flushes and,
//! when configured, flushes a non-empty MemTable on a fixed interval.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::Inner;

/// Work items for the background thread
#[derive(Debug)]
pub(crate) enum Task {
    /// Compact a column until no level is over its trigger
    Compact(String),
    /// Exit the loop
    Shutdown,
}

/// Handle to the background thread
pub(crate) struct Worker {
    tx: Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn channel() -> (Sender<Task>, Receiver<Task>) {
        channel::unbounded()
    }

    pub(crate) fn spawn(
        inner: Arc<Inner>,
        tx: Sender<Task>,
        rx: Receiver<Task>,
        flush_interval: Option<Duration>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("columnlsm-worker".into())
            .spawn(move || run(inner, rx, flush_interval))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Ask the thread to stop and wait for it
    pub(crate) fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Task::Shutdown);
        if handle.join().is_err() {
            tracing::error!("background worker panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inner: Arc<Inner>, rx: Receiver<Task>, flush_interval: Option<Duration>) {
    tracing::debug!(?flush_interval, "background worker started");
    event_loop(
        &rx,
        flush_interval,
        |column| {
            if let Err(e) = inner.compact_pending(column) {
                tracing::error!(%column, error = %e, "background compaction failed");
            }
        },
        || {
            if let Err(e) = inner.flush_if_dirty() {
                tracing::error!(error = %e, "periodic flush failed");
            }
        },
    );
    tracing::debug!("background worker stopped");
}

/// Dispatch tasks until `Shutdown`, firing `on_flush` on a fixed schedule
///
/// The flush deadline is only moved forward when it fires, so a steady
/// stream of tasks cannot postpone it.
fn event_loop(
    rx: &Receiver<Task>,
    flush_interval: Option<Duration>,
    mut on_compact: impl FnMut(&str),
    mut on_flush: impl FnMut(),
) {
    let next_flush = || flush_interval.map(|interval| Instant::now() + interval);
    let mut flush_at = next_flush();
    loop {
        let task = match flush_at {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match task {
            Ok(Task::Compact(column)) => on_compact(&column),
            Ok(Task::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                on_flush();
                flush_at = next_flush();
            }
        }
    }
}
