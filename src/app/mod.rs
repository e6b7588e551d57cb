mod debounce;
mod enrichment;

use crate::domain::{
    DateDimension, DaySection, FilterState, PathNode, Project, SessionSummary, SortOrder,
    apply_filters, build_path_tree, group_by_day, local_date,
};
use crate::infra::{Annotations, apply_annotations};
use enrichment::{EnrichmentPass, EnrichmentTask, SnapshotKey, spawn_enrichment_pass};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use time::{Date, Month, UtcOffset};

pub use debounce::Debouncer;

const FILTER_REFRESH_DEBOUNCE: Duration = Duration::from_millis(10);
const DIR_REFRESH_DEBOUNCE: Duration = Duration::from_millis(400);
const DIR_REFRESH_MAX_DELAY: Duration = Duration::from_secs(2);
const HEARTBEAT_TTL: Duration = Duration::from_secs(3);
const HEARTBEAT_PRUNE_INTERVAL: Duration = Duration::from_secs(1);
const PULSE_MIN_INTERVAL: Duration = Duration::from_millis(400);
const PULSE_DISPLAY_CAP: usize = 200;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshScope {
    All,
    Day(Date, DateDimension),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefreshOutput {
    pub summaries: Vec<SessionSummary>,
    pub warnings: usize,
}

/// Session index collaborator: enumeration, per-file parsing, histograms,
/// and full-text containment. Implementations run on worker threads, so
/// everything takes `&self`.
pub trait SessionIndex: Send + Sync {
    fn refresh(&self, scope: RefreshScope) -> Result<RefreshOutput, String>;
    fn enrich(&self, path: &Path) -> Option<SessionSummary>;
    fn day_counts(&self, year: i32, month: Month, dimension: DateDimension)
    -> BTreeMap<u8, usize>;
    fn working_dirs(&self) -> BTreeMap<PathBuf, usize>;
    fn file_contains(&self, path: &Path, term: &str) -> bool;
    fn count_all(&self) -> usize;
    fn invalidate(&self, path: &Path);
    fn invalidate_all(&self);
}

#[derive(Debug)]
pub(crate) enum BrowserSignal {
    Refreshed {
        generation: u64,
        result: Result<RefreshOutput, String>,
        working_dirs: Option<BTreeMap<PathBuf, usize>>,
    },
    Enriched {
        generation: u64,
        id: String,
        summary: Option<SessionSummary>,
    },
    FullTextScanned {
        scan_id: u64,
        ids: BTreeSet<String>,
    },
    PulseChecked {
        pulse_id: u64,
        mtimes: Vec<(String, i64)>,
    },
}

/// Live, queryable view over all known session summaries.
///
/// All state mutation happens on the caller's thread: background work
/// (refresh, enrichment, full-text scans, mtime pulses) runs on worker
/// threads that hand immutable results back over a channel, and `tick`
/// drains and applies them. Superseded work is discarded by generation or
/// sequence comparison, never by relying on cancellation alone.
pub struct SessionBrowser {
    index: Arc<dyn SessionIndex>,
    offset: UtcOffset,

    filter: FilterState,
    projects: Vec<Project>,
    annotations: Annotations,

    summaries: BTreeMap<String, SessionSummary>,
    visible: Vec<SessionSummary>,
    sections: Vec<DaySection>,
    path_tree: Option<PathNode>,
    error: Option<String>,
    warnings: usize,

    tx: Sender<BrowserSignal>,
    rx: Receiver<BrowserSignal>,

    generation: u64,
    refresh_in_flight: bool,

    enrichment: Option<EnrichmentPass>,
    snapshots: BTreeMap<SnapshotKey, BTreeSet<String>>,

    fulltext_seq: u64,
    fulltext_cancel: Option<Arc<AtomicBool>>,
    fulltext_ids: Option<BTreeSet<String>>,

    heartbeats: BTreeMap<String, Instant>,
    last_prune: Instant,

    pulse_seq: u64,
    pulse_in_flight: bool,
    pulse_cancel: Option<Arc<AtomicBool>>,
    last_pulse: Option<Instant>,
    known_mtimes: BTreeMap<String, i64>,

    filter_debounce: Debouncer,
    dir_debounce: Debouncer,
}

impl SessionBrowser {
    pub fn new(index: Arc<dyn SessionIndex>) -> Self {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Self::with_offset(index, offset)
    }

    pub fn with_offset(index: Arc<dyn SessionIndex>, offset: UtcOffset) -> Self {
        let (tx, rx) = channel();
        Self {
            index,
            offset,
            filter: FilterState::default(),
            projects: Vec::new(),
            annotations: Annotations::default(),
            summaries: BTreeMap::new(),
            visible: Vec::new(),
            sections: Vec::new(),
            path_tree: None,
            error: None,
            warnings: 0,
            tx,
            rx,
            generation: 0,
            refresh_in_flight: false,
            enrichment: None,
            snapshots: BTreeMap::new(),
            fulltext_seq: 0,
            fulltext_cancel: None,
            fulltext_ids: None,
            heartbeats: BTreeMap::new(),
            last_prune: Instant::now(),
            pulse_seq: 0,
            pulse_in_flight: false,
            pulse_cancel: None,
            last_pulse: None,
            known_mtimes: BTreeMap::new(),
            filter_debounce: Debouncer::new(FILTER_REFRESH_DEBOUNCE),
            dir_debounce: Debouncer::with_max_delay(DIR_REFRESH_DEBOUNCE, DIR_REFRESH_MAX_DELAY),
        }
    }

    pub fn visible(&self) -> &[SessionSummary] {
        &self.visible
    }

    pub fn sections(&self) -> &[DaySection] {
        &self.sections
    }

    pub fn path_tree(&self) -> Option<&PathNode> {
        self.path_tree.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.heartbeats.contains_key(session_id)
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.refresh_in_flight
    }

    pub fn enrichment_in_flight(&self) -> bool {
        self.enrichment.is_some()
    }

    pub fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
        self.reapply();
    }

    pub fn set_annotations(&mut self, annotations: Annotations) {
        self.annotations = annotations;
        let mut all: Vec<SessionSummary> = self.summaries.values().cloned().collect();
        apply_annotations(&mut all, &self.annotations);
        self.summaries = all.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.reapply();
    }

    pub fn select_path(&mut self, path: Option<PathBuf>) {
        self.filter.select_path(path);
        self.reapply();
    }

    pub fn select_project(&mut self, project: Option<String>) {
        self.filter.select_project(project);
        self.reapply();
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.filter.sort = order;
        self.reapply();
    }

    /// Day changes refresh on a short debounce so rapid successive filter
    /// taps coalesce into one refresh.
    pub fn select_day(&mut self, day: Option<Date>, now: Instant) {
        if self.filter.day == day {
            return;
        }
        self.filter.day = day;
        self.reapply();
        self.filter_debounce.trigger(now);
    }

    pub fn set_date_dimension(&mut self, dimension: DateDimension, now: Instant) {
        if self.filter.dimension == dimension {
            return;
        }
        self.filter.dimension = dimension;
        // The loaded day's identity depends on the dimension; cached
        // enrichment snapshots are no longer trustworthy.
        self.snapshots.clear();
        self.reapply();
        self.filter_debounce.trigger(now);
    }

    /// Immediately reapplies cheap metadata matching, then cancels any
    /// in-flight full-text scan and starts a new one. Only the most recent
    /// scan's result set is ever merged.
    pub fn set_search_text(&mut self, text: &str, _now: Instant) {
        if self.filter.search == text {
            return;
        }
        self.filter.search = text.to_string();
        self.fulltext_ids = None;
        self.reapply();
        self.restart_fulltext_scan();
    }

    /// Cancels any in-flight content scan and starts a fresh one over the
    /// currently known files. Also re-run after a refresh, since the file
    /// set under an active search term may have changed.
    fn restart_fulltext_scan(&mut self) {
        if let Some(cancel) = self.fulltext_cancel.take() {
            cancel.store(true, Ordering::Relaxed);
        }
        self.fulltext_seq += 1;

        let term = self.filter.search.trim().to_string();
        if term.is_empty() {
            return;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.fulltext_cancel = Some(Arc::clone(&cancel));
        let scan_id = self.fulltext_seq;
        let files: Vec<(String, PathBuf)> = self
            .summaries
            .values()
            .map(|summary| (summary.id.clone(), summary.log_path.clone()))
            .collect();
        let index = Arc::clone(&self.index);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let mut ids = BTreeSet::new();
            for (id, path) in files {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                if index.file_contains(&path, &term) {
                    ids.insert(id);
                }
            }
            if !cancel.load(Ordering::Relaxed) {
                let _ = tx.send(BrowserSignal::FullTextScanned { scan_id, ids });
            }
        });
    }

    /// Directory-change notifications force a debounced refresh and drop
    /// all enrichment snapshots: the file set underneath may have changed.
    pub fn notify_directory_changed(&mut self, now: Instant) {
        self.snapshots.clear();
        self.index.invalidate_all();
        self.dir_debounce.trigger(now);
    }

    /// Forced refresh, bypassing the debouncers.
    pub fn request_refresh(&mut self, now: Instant) {
        self.start_refresh(now);
    }

    /// Drives all time-based behavior: due debouncers, pending background
    /// results, enrichment flushes, heartbeat pruning, and the quick pulse.
    pub fn tick(&mut self, now: Instant) {
        let mut want_refresh = false;
        if self.filter_debounce.due(now) {
            want_refresh = true;
        }
        if self.dir_debounce.due(now) {
            want_refresh = true;
        }
        if want_refresh {
            self.start_refresh(now);
        }

        while let Ok(signal) = self.rx.try_recv() {
            self.handle_signal(signal, now);
        }

        if self
            .enrichment
            .as_ref()
            .is_some_and(|pass| pass.flush_due(now))
        {
            self.flush_enrichment(now);
        }

        if now.duration_since(self.last_prune) >= HEARTBEAT_PRUNE_INTERVAL {
            self.last_prune = now;
            self.prune_heartbeats(now);
        }

        self.maybe_pulse(now);
    }

    fn start_refresh(&mut self, _now: Instant) {
        self.generation += 1;
        if let Some(pass) = self.enrichment.take() {
            pass.cancel();
        }
        // A full refresh supersedes any in-flight pulse; its stat results
        // would describe the pre-refresh visible set.
        self.cancel_pulse();
        self.refresh_in_flight = true;

        let scope = match self.filter.day {
            Some(day) => RefreshScope::Day(day, self.filter.dimension),
            None => RefreshScope::All,
        };
        let generation = self.generation;
        let index = Arc::clone(&self.index);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let result = index.refresh(scope);
            let working_dirs = result.is_ok().then(|| index.working_dirs());
            let _ = tx.send(BrowserSignal::Refreshed {
                generation,
                result,
                working_dirs,
            });
        });
    }

    fn handle_signal(&mut self, signal: BrowserSignal, now: Instant) {
        match signal {
            BrowserSignal::Refreshed {
                generation,
                result,
                working_dirs,
            } => self.apply_refresh(generation, result, working_dirs, now),
            BrowserSignal::Enriched {
                generation,
                id,
                summary,
            } => self.apply_enriched(generation, id, summary, now),
            BrowserSignal::FullTextScanned { scan_id, ids } => {
                if scan_id == self.fulltext_seq {
                    self.fulltext_ids = Some(ids);
                    self.reapply();
                }
            }
            BrowserSignal::PulseChecked { pulse_id, mtimes } => {
                self.pulse_in_flight = false;
                self.pulse_cancel = None;
                if pulse_id != self.pulse_seq {
                    return;
                }
                for (id, mtime) in mtimes {
                    let advanced = self
                        .known_mtimes
                        .get(&id)
                        .is_some_and(|known| mtime > *known);
                    if advanced {
                        self.heartbeats.insert(id.clone(), now);
                    }
                    self.known_mtimes.insert(id, mtime);
                }
            }
        }
    }

    fn apply_refresh(
        &mut self,
        generation: u64,
        result: Result<RefreshOutput, String>,
        working_dirs: Option<BTreeMap<PathBuf, usize>>,
        now: Instant,
    ) {
        // A later forced refresh supersedes this result entirely.
        if generation != self.generation {
            return;
        }
        self.refresh_in_flight = false;

        let output = match result {
            Ok(output) => output,
            Err(message) => {
                // Non-fatal: the prior summary set stays on display.
                self.error = Some(message);
                return;
            }
        };
        self.error = None;
        self.warnings = output.warnings;

        let mut incoming = output.summaries;
        apply_annotations(&mut incoming, &self.annotations);

        for summary in &incoming {
            let advanced = match self.summaries.get(&summary.id) {
                None => true,
                Some(prior) => summary.last_updated > prior.last_updated,
            };
            if advanced {
                self.heartbeats.insert(summary.id.clone(), now);
            }
        }

        self.summaries = incoming
            .into_iter()
            .map(|summary| (summary.id.clone(), summary))
            .collect();

        if let Some(dirs) = working_dirs {
            let mut inputs: Vec<PathBuf> = Vec::new();
            for (dir, count) in dirs {
                for _ in 0..count {
                    inputs.push(dir.clone());
                }
            }
            self.path_tree = build_path_tree(&inputs);
        }

        self.reapply();
        if !self.filter.search.trim().is_empty() {
            self.restart_fulltext_scan();
        }
        self.maybe_start_enrichment(now);
    }

    /// Enrichment covers the loaded calendar day. A snapshot keyed by
    /// (dimension, year, month, day, path filter) that already recorded the
    /// exact candidate id set skips the pass outright.
    fn maybe_start_enrichment(&mut self, now: Instant) {
        let Some(day) = self.filter.day else {
            return;
        };

        let key = SnapshotKey {
            dimension: self.filter.dimension,
            year: day.year(),
            month: u8::from(day.month()),
            day: day.day(),
            path_filter: self.filter.path().cloned(),
        };

        let candidates: Vec<&SessionSummary> = self
            .summaries
            .values()
            .filter(|summary| {
                let ts = crate::domain::dimension_timestamp(summary, self.filter.dimension);
                local_date(ts, self.offset) == day
            })
            .filter(|summary| match self.filter.path() {
                Some(prefix) => crate::domain::path_is_under(
                    &crate::domain::canonicalize_path(&summary.cwd),
                    prefix,
                ),
                None => true,
            })
            .collect();

        let ids: BTreeSet<String> = candidates.iter().map(|s| s.id.clone()).collect();
        if self.snapshots.get(&key) == Some(&ids) {
            return;
        }
        if candidates.is_empty() {
            self.snapshots.insert(key, ids);
            return;
        }

        if let Some(pass) = self.enrichment.take() {
            pass.cancel();
        }

        let tasks: Vec<EnrichmentTask> = candidates
            .iter()
            .map(|summary| EnrichmentTask {
                id: summary.id.clone(),
                path: summary.log_path.clone(),
            })
            .collect();
        self.enrichment = Some(spawn_enrichment_pass(
            Arc::clone(&self.index),
            tasks,
            self.generation,
            key,
            self.tx.clone(),
            now,
        ));
    }

    fn apply_enriched(
        &mut self,
        generation: u64,
        id: String,
        summary: Option<SessionSummary>,
        now: Instant,
    ) {
        // Stale generations are dropped even if cancellation signaling
        // raced with the worker's send.
        if generation != self.generation {
            return;
        }
        let Some(pass) = self.enrichment.as_mut() else {
            return;
        };
        if pass.generation != generation || !pass.requested.contains(&id) {
            return;
        }

        pass.received += 1;
        if let Some(mut enriched) = summary {
            apply_annotations(std::slice::from_mut(&mut enriched), &self.annotations);
            pass.completed.insert(id);
            pass.buffer.push(enriched);
        }
        // A failed task is simply not recorded as enriched; the next
        // trigger retries it.

        let complete = pass.is_complete();
        if pass.buffer.len() >= enrichment::FLUSH_LIMIT || complete {
            self.flush_enrichment(now);
        }
        if complete {
            if let Some(pass) = self.enrichment.take() {
                self.snapshots.insert(pass.key, pass.completed);
            }
        }
    }

    fn flush_enrichment(&mut self, now: Instant) {
        let drained = match self.enrichment.as_mut() {
            Some(pass) => {
                pass.last_flush = now;
                std::mem::take(&mut pass.buffer)
            }
            None => return,
        };
        if drained.is_empty() {
            return;
        }
        for summary in drained {
            self.summaries.insert(summary.id.clone(), summary);
        }
        self.reapply();
    }

    fn prune_heartbeats(&mut self, now: Instant) {
        self.heartbeats
            .retain(|_, beat| now.duration_since(*beat) < HEARTBEAT_TTL);
    }

    fn cancel_pulse(&mut self) {
        if let Some(cancel) = self.pulse_cancel.take() {
            cancel.store(true, Ordering::Relaxed);
        }
        if self.pulse_in_flight {
            self.pulse_in_flight = false;
            // Guards the race where the worker sent just before the flag
            // landed; the stale id check in handle_signal rejects it.
            self.pulse_seq += 1;
        }
    }

    /// Throttled out-of-band mtime check for the displayed sessions only.
    /// Cheap liveness signal between full refreshes.
    fn maybe_pulse(&mut self, now: Instant) {
        if self.pulse_in_flight || self.visible.is_empty() {
            return;
        }
        if self
            .last_pulse
            .is_some_and(|last| now.duration_since(last) < PULSE_MIN_INTERVAL)
        {
            return;
        }
        self.last_pulse = Some(now);
        self.pulse_in_flight = true;
        self.pulse_seq += 1;
        let pulse_id = self.pulse_seq;

        let files: Vec<(String, PathBuf)> = self
            .visible
            .iter()
            .take(PULSE_DISPLAY_CAP)
            .map(|summary| (summary.id.clone(), summary.log_path.clone()))
            .collect();
        let cancel = Arc::new(AtomicBool::new(false));
        self.pulse_cancel = Some(Arc::clone(&cancel));
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let mut mtimes = Vec::with_capacity(files.len());
            for (id, path) in files {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                let Ok(metadata) = std::fs::metadata(&path) else {
                    continue;
                };
                let Some(mtime) = metadata
                    .modified()
                    .ok()
                    .and_then(|value| value.duration_since(UNIX_EPOCH).ok())
                    .and_then(|delta| i64::try_from(delta.as_millis()).ok())
                else {
                    continue;
                };
                mtimes.push((id, mtime));
            }
            if !cancel.load(Ordering::Relaxed) {
                let _ = tx.send(BrowserSignal::PulseChecked { pulse_id, mtimes });
            }
        });
    }

    fn reapply(&mut self) {
        let all: Vec<SessionSummary> = self.summaries.values().cloned().collect();
        self.visible = apply_filters(
            &all,
            &self.filter,
            &self.projects,
            self.fulltext_ids.as_ref(),
            self.offset,
        );
        self.sections = group_by_day(&self.visible, self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use time::macros::{date, datetime};

    struct FakeIndex {
        summaries: Mutex<Vec<SessionSummary>>,
        fail: AtomicBool,
        enrich_calls: AtomicUsize,
    }

    impl FakeIndex {
        fn new(summaries: Vec<SessionSummary>) -> Self {
            Self {
                summaries: Mutex::new(summaries),
                fail: AtomicBool::new(false),
                enrich_calls: AtomicUsize::new(0),
            }
        }
    }

    impl SessionIndex for FakeIndex {
        fn refresh(&self, _scope: RefreshScope) -> Result<RefreshOutput, String> {
            if self.fail.load(Ordering::Relaxed) {
                return Err("index offline".to_string());
            }
            Ok(RefreshOutput {
                summaries: self.summaries.lock().expect("lock").clone(),
                warnings: 0,
            })
        }

        fn enrich(&self, path: &Path) -> Option<SessionSummary> {
            self.enrich_calls.fetch_add(1, Ordering::Relaxed);
            self.summaries
                .lock()
                .expect("lock")
                .iter()
                .find(|summary| summary.log_path == path)
                .cloned()
        }

        fn day_counts(
            &self,
            _year: i32,
            _month: Month,
            _dimension: DateDimension,
        ) -> Map<u8, usize> {
            Map::new()
        }

        fn working_dirs(&self) -> Map<PathBuf, usize> {
            let mut dirs = Map::new();
            for summary in self.summaries.lock().expect("lock").iter() {
                *dirs.entry(summary.cwd.clone()).or_insert(0) += 1;
            }
            dirs
        }

        fn file_contains(&self, path: &Path, term: &str) -> bool {
            self.summaries
                .lock()
                .expect("lock")
                .iter()
                .find(|summary| summary.log_path == path)
                .and_then(|summary| summary.instructions.clone())
                .is_some_and(|text| text.to_lowercase().contains(&term.to_lowercase()))
        }

        fn count_all(&self) -> usize {
            self.summaries.lock().expect("lock").len()
        }

        fn invalidate(&self, _path: &Path) {}
        fn invalidate_all(&self) {}
    }

    fn summary(id: &str, cwd: &str) -> SessionSummary {
        SessionSummary {
            id: id.to_string(),
            log_path: PathBuf::from(format!("/logs/{id}.jsonl")),
            started_at: datetime!(2026-03-02 10:00 UTC),
            last_updated: datetime!(2026-03-02 10:00 UTC),
            cli_version: "1.0".to_string(),
            originator: None,
            cwd: PathBuf::from(cwd),
            instructions: None,
            model: None,
            approval_policy: None,
            user_messages: 0,
            assistant_messages: 0,
            tool_calls: 0,
            turn_contexts: 0,
            events: 0,
            response_kinds: Map::new(),
            lines: 0,
            file_size: None,
            preview: None,
            title: None,
            comment: None,
            project: None,
        }
    }

    fn pump_until(
        browser: &mut SessionBrowser,
        mut condition: impl FnMut(&SessionBrowser) -> bool,
    ) {
        let start = Instant::now();
        loop {
            browser.tick(Instant::now());
            if condition(browser) {
                return;
            }
            if start.elapsed() > Duration::from_secs(5) {
                panic!("condition not reached in time");
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn refresh_populates_and_marks_new_sessions_active() {
        let index = Arc::new(FakeIndex::new(vec![
            summary("s1", "/w/a"),
            summary("s2", "/w/b"),
        ]));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.visible().is_empty());

        assert_eq!(browser.visible().len(), 2);
        assert!(browser.error().is_none());
        assert!(browser.is_active("s1"));
        assert!(browser.is_active("s2"));
        let tree = browser.path_tree().expect("tree");
        assert_eq!(tree.path, PathBuf::from("/w"));
        assert_eq!(tree.count, 2);
    }

    #[test]
    fn refresh_failure_fills_error_slot_and_keeps_prior_set() {
        let index = Arc::new(FakeIndex::new(vec![summary("s1", "/w/a")]));
        let mut browser = SessionBrowser::with_offset(Arc::clone(&index) as Arc<dyn SessionIndex>, UtcOffset::UTC);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.visible().is_empty());

        index.fail.store(true, Ordering::Relaxed);
        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| b.error().is_some());

        assert_eq!(browser.error(), Some("index offline"));
        assert_eq!(browser.visible().len(), 1);

        index.fail.store(false, Ordering::Relaxed);
        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| b.error().is_none());
    }

    #[test]
    fn stale_refresh_generation_is_discarded() {
        let index = Arc::new(FakeIndex::new(vec![summary("s1", "/w/a")]));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.visible().is_empty());

        let stale = BrowserSignal::Refreshed {
            generation: browser.generation - 1,
            result: Ok(RefreshOutput::default()),
            working_dirs: None,
        };
        browser.handle_signal(stale, Instant::now());
        assert_eq!(browser.visible().len(), 1);
    }

    #[test]
    fn heartbeats_expire_after_three_seconds() {
        let index = Arc::new(FakeIndex::new(Vec::new()));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);

        let start = Instant::now();
        browser.heartbeats.insert("s1".to_string(), start);

        browser.prune_heartbeats(start + Duration::from_millis(2900));
        assert!(browser.is_active("s1"));

        browser.prune_heartbeats(start + Duration::from_millis(3100));
        assert!(!browser.is_active("s1"));
    }

    #[test]
    fn enrichment_snapshot_skips_an_unchanged_day() {
        let index = Arc::new(FakeIndex::new(vec![
            summary("s1", "/w/a"),
            summary("s2", "/w/b"),
        ]));
        let mut browser =
            SessionBrowser::with_offset(Arc::clone(&index) as Arc<dyn SessionIndex>, UtcOffset::UTC);
        browser.select_day(Some(date!(2026 - 03 - 02)), Instant::now());

        // The day change alone schedules one debounced refresh.
        pump_until(&mut browser, |b| {
            !b.visible().is_empty() && !b.enrichment_in_flight() && !b.snapshots.is_empty()
        });
        let first_run = index.enrich_calls.load(Ordering::Relaxed);
        assert_eq!(first_run, 2);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.refresh_in_flight());
        // Give any stray enrichment a moment to show up, then assert none ran.
        std::thread::sleep(Duration::from_millis(50));
        browser.tick(Instant::now());
        assert!(!browser.enrichment_in_flight());
        assert_eq!(index.enrich_calls.load(Ordering::Relaxed), first_run);
    }

    #[test]
    fn stale_fulltext_scan_results_are_dropped() {
        let mut base = summary("s1", "/w/a");
        base.instructions = Some("contains the needle".to_string());
        let index = Arc::new(FakeIndex::new(vec![base, summary("s2", "/w/b")]));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.visible().is_empty());

        browser.set_search_text("needle", Instant::now());
        let first_scan = browser.fulltext_seq;
        browser.set_search_text("needle again", Instant::now());
        assert!(browser.fulltext_seq > first_scan);

        let stale_ids: BTreeSet<String> = ["s2".to_string()].into_iter().collect();
        browser.handle_signal(
            BrowserSignal::FullTextScanned {
                scan_id: first_scan,
                ids: stale_ids,
            },
            Instant::now(),
        );
        assert!(browser.fulltext_ids.is_none());
    }

    #[test]
    fn fulltext_results_merge_into_the_visible_set() {
        let mut matching = summary("s1", "/w/a");
        matching.instructions = Some("the hidden needle".to_string());
        let index = Arc::new(FakeIndex::new(vec![matching, summary("s2", "/w/b")]));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.visible().is_empty());

        browser.set_search_text("needle", Instant::now());
        // Metadata matching alone finds nothing; the scan must surface s1.
        assert!(browser.visible().is_empty());
        pump_until(&mut browser, |b| !b.visible().is_empty());
        assert_eq!(browser.visible()[0].id, "s1");
    }

    #[test]
    fn enrichment_buffer_flushes_on_the_interval() {
        let index = Arc::new(FakeIndex::new(Vec::new()));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);
        browser.generation = 1;

        let now = Instant::now();
        let mut enriched = summary("s1", "/w/a");
        enriched.user_messages = 42;
        browser.enrichment = Some(enrichment::EnrichmentPass {
            generation: 1,
            key: SnapshotKey {
                dimension: DateDimension::Created,
                year: 2026,
                month: 3,
                day: 2,
                path_filter: None,
            },
            requested: ["s1".to_string(), "s2".to_string()].into_iter().collect(),
            expected: 2,
            received: 0,
            completed: BTreeSet::new(),
            buffer: Vec::new(),
            last_flush: now,
            cancel: Arc::new(AtomicBool::new(false)),
        });

        browser.handle_signal(
            BrowserSignal::Enriched {
                generation: 1,
                id: "s1".to_string(),
                summary: Some(enriched),
            },
            now,
        );
        // Below the item limit and inside the interval: still buffered.
        assert!(browser.summaries.get("s1").is_none());

        browser.tick(now + Duration::from_millis(1100));
        let merged = browser.summaries.get("s1").expect("merged");
        assert_eq!(merged.user_messages, 42);
    }

    #[test]
    fn completed_enrichment_records_only_successful_ids() {
        let index = Arc::new(FakeIndex::new(Vec::new()));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);
        browser.generation = 1;

        let now = Instant::now();
        let key = SnapshotKey {
            dimension: DateDimension::Created,
            year: 2026,
            month: 3,
            day: 2,
            path_filter: None,
        };
        browser.enrichment = Some(enrichment::EnrichmentPass {
            generation: 1,
            key: key.clone(),
            requested: ["s1".to_string(), "s2".to_string()].into_iter().collect(),
            expected: 2,
            received: 0,
            completed: BTreeSet::new(),
            buffer: Vec::new(),
            last_flush: now,
            cancel: Arc::new(AtomicBool::new(false)),
        });

        browser.handle_signal(
            BrowserSignal::Enriched {
                generation: 1,
                id: "s1".to_string(),
                summary: Some(summary("s1", "/w/a")),
            },
            now,
        );
        browser.handle_signal(
            BrowserSignal::Enriched {
                generation: 1,
                id: "s2".to_string(),
                summary: None,
            },
            now,
        );

        assert!(!browser.enrichment_in_flight());
        let recorded = browser.snapshots.get(&key).expect("snapshot");
        assert!(recorded.contains("s1"));
        assert!(!recorded.contains("s2"));
    }

    #[test]
    fn stale_enrichment_generation_is_dropped_even_without_cancellation() {
        let index = Arc::new(FakeIndex::new(Vec::new()));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);
        browser.generation = 5;

        browser.handle_signal(
            BrowserSignal::Enriched {
                generation: 4,
                id: "s1".to_string(),
                summary: Some(summary("s1", "/w/a")),
            },
            Instant::now(),
        );
        assert!(browser.summaries.is_empty());
    }

    #[test]
    fn forced_refresh_supersedes_an_in_flight_pulse() {
        let index = Arc::new(FakeIndex::new(Vec::new()));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);
        browser.pulse_seq = 1;
        browser.pulse_in_flight = true;
        let cancel = Arc::new(AtomicBool::new(false));
        browser.pulse_cancel = Some(Arc::clone(&cancel));

        let now = Instant::now();
        browser.request_refresh(now);
        assert!(cancel.load(Ordering::Relaxed));
        assert!(!browser.pulse_in_flight);

        // A result that raced past the flag carries a stale id and must
        // not raise any heartbeat.
        browser.handle_signal(
            BrowserSignal::PulseChecked {
                pulse_id: 1,
                mtimes: vec![("s1".to_string(), 1000), ("s1".to_string(), 2000)],
            },
            now,
        );
        assert!(!browser.is_active("s1"));
    }

    #[test]
    fn pulse_heartbeats_only_on_advanced_mtimes() {
        let index = Arc::new(FakeIndex::new(Vec::new()));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);
        browser.pulse_seq = 1;
        browser.pulse_in_flight = true;

        let now = Instant::now();
        // First observation establishes the baseline, no heartbeat.
        browser.handle_signal(
            BrowserSignal::PulseChecked {
                pulse_id: 1,
                mtimes: vec![("s1".to_string(), 1000)],
            },
            now,
        );
        assert!(!browser.is_active("s1"));

        browser.pulse_seq = 2;
        browser.pulse_in_flight = true;
        browser.handle_signal(
            BrowserSignal::PulseChecked {
                pulse_id: 2,
                mtimes: vec![("s1".to_string(), 2000)],
            },
            now,
        );
        assert!(browser.is_active("s1"));
    }

    #[test]
    fn project_selection_clears_the_path_filter() {
        let index = Arc::new(FakeIndex::new(vec![
            summary("s1", "/w/p1/sub"),
            summary("s2", "/elsewhere"),
        ]));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);
        browser.set_projects(vec![Project {
            id: "p1".to_string(),
            name: "P1".to_string(),
            path: PathBuf::from("/w/p1"),
        }]);

        browser.request_refresh(Instant::now());
        pump_until(&mut browser, |b| !b.visible().is_empty());

        browser.select_path(Some(PathBuf::from("/w")));
        assert!(browser.filter().path().is_some());

        browser.select_project(Some("p1".to_string()));
        assert!(browser.filter().path().is_none());
        let ids: Vec<&str> = browser.visible().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);
    }

    #[test]
    fn directory_change_debounces_into_one_refresh() {
        let index = Arc::new(FakeIndex::new(vec![summary("s1", "/w/a")]));
        let mut browser = SessionBrowser::with_offset(index, UtcOffset::UTC);

        let start = Instant::now();
        browser.notify_directory_changed(start);
        browser.notify_directory_changed(start + Duration::from_millis(100));

        browser.tick(start + Duration::from_millis(200));
        assert_eq!(browser.generation, 0);

        browser.tick(start + Duration::from_millis(600));
        assert_eq!(browser.generation, 1);
    }
}
