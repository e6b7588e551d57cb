use crate::app::{BrowserSignal, SessionIndex};
use crate::domain::{DateDimension, SessionSummary};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub(crate) const FLUSH_LIMIT: usize = 50;
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Identity of one per-day enrichment snapshot. Every dimension the cached
/// id-set depends on is part of the key, so a filter change can never hit a
/// stale entry.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct SnapshotKey {
    pub dimension: DateDimension,
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub path_filter: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub(crate) struct EnrichmentTask {
    pub id: String,
    pub path: PathBuf,
}

/// Owning-context bookkeeping for one in-flight enrichment pass. Results
/// buffer here and are flushed into the live summary set at `FLUSH_LIMIT`
/// items or `FLUSH_INTERVAL`, whichever comes first.
#[derive(Debug)]
pub(crate) struct EnrichmentPass {
    pub generation: u64,
    pub key: SnapshotKey,
    pub requested: BTreeSet<String>,
    pub expected: usize,
    pub received: usize,
    pub completed: BTreeSet<String>,
    pub buffer: Vec<SessionSummary>,
    pub last_flush: Instant,
    pub cancel: Arc<AtomicBool>,
}

impl EnrichmentPass {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.expected
    }

    pub fn flush_due(&self, now: Instant) -> bool {
        !self.buffer.is_empty()
            && (self.buffer.len() >= FLUSH_LIMIT
                || now.duration_since(self.last_flush) >= FLUSH_INTERVAL)
    }
}

pub(crate) fn pool_width() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(2)
}

/// Spawns a bounded pool of worker threads draining a shared task queue.
/// Each worker re-parses one session per task and reports over `tx`; the
/// cancel flag is checked before every task, not just at startup.
pub(crate) fn spawn_enrichment_pass(
    index: Arc<dyn SessionIndex>,
    tasks: Vec<EnrichmentTask>,
    generation: u64,
    key: SnapshotKey,
    tx: Sender<BrowserSignal>,
    now: Instant,
) -> EnrichmentPass {
    let requested: BTreeSet<String> = tasks.iter().map(|task| task.id.clone()).collect();
    let expected = tasks.len();
    let cancel = Arc::new(AtomicBool::new(false));

    let queue: Arc<Mutex<VecDeque<EnrichmentTask>>> = Arc::new(Mutex::new(tasks.into()));
    let width = pool_width().min(expected.max(1));
    for _ in 0..width {
        let queue = Arc::clone(&queue);
        let index = Arc::clone(&index);
        let cancel = Arc::clone(&cancel);
        let tx = tx.clone();
        std::thread::spawn(move || {
            loop {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                let task = {
                    let Ok(mut queue) = queue.lock() else {
                        return;
                    };
                    queue.pop_front()
                };
                let Some(task) = task else {
                    return;
                };
                let summary = index.enrich(&task.path);
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                let _ = tx.send(BrowserSignal::Enriched {
                    generation,
                    id: task.id,
                    summary,
                });
            }
        });
    }

    EnrichmentPass {
        generation,
        key,
        requested,
        expected,
        received: 0,
        completed: BTreeSet::new(),
        buffer: Vec::new(),
        last_flush: now,
        cancel,
    }
}
