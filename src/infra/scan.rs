use crate::app::{RefreshOutput, RefreshScope, SessionIndex};
use crate::domain::{
    DateDimension, SessionSummary, SummaryBuilder, canonicalize_path, decode_record,
    dimension_timestamp, local_date,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use time::{Month, UtcOffset};
use walkdir::WalkDir;

/// Extension of the per-session log files under the sessions root.
pub const SESSION_LOG_EXTENSION: &str = "jsonl";

#[derive(Debug, Error)]
pub enum ResolveSessionsDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

pub fn resolve_sessions_dir() -> Result<PathBuf, ResolveSessionsDirError> {
    if let Some(override_dir) = std::env::var_os("ROLLSCOPE_SESSIONS_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = dirs::home_dir() else {
        return Err(ResolveSessionsDirError::HomeDirNotFound);
    };

    Ok(home.join(".codex").join("sessions"))
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("sessions directory does not exist: {0}")]
    SessionsDirMissing(String),
}

/// Filesystem-backed session index over a root of per-session `*.jsonl`
/// files. A (size, mtime) cache skips re-parsing unchanged files; the cache
/// sits behind a mutex so an `Arc<FsSessionIndex>` can refresh and enrich
/// from worker threads.
#[derive(Debug)]
pub struct FsSessionIndex {
    root: PathBuf,
    offset: UtcOffset,
    cache: Mutex<BTreeMap<PathBuf, CacheEntry>>,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    size_bytes: u64,
    modified_unix_ms: Option<i64>,
    // None records a file already known to yield no summary.
    summary: Option<SessionSummary>,
}

impl FsSessionIndex {
    pub fn new(root: PathBuf) -> Self {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Self::with_offset(root, offset)
    }

    pub fn with_offset(root: PathBuf, offset: UtcOffset) -> Self {
        Self {
            root,
            offset,
            cache: Mutex::new(BTreeMap::new()),
        }
    }


    fn refresh_all(&self) -> Result<RefreshOutput, ScanError> {
        if !self.root.exists() {
            return Err(ScanError::SessionsDirMissing(
                self.root.display().to_string(),
            ));
        }

        let mut warnings = 0usize;
        let mut summaries: Vec<SessionSummary> = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_error) => {
                    warnings += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some(SESSION_LOG_EXTENSION)
            {
                continue;
            }

            match self.load_file(entry.path()) {
                Ok(Some(summary)) => summaries.push(summary),
                // Incomplete sessions are excluded silently, not warned about.
                Ok(None) => {}
                Err(()) => warnings += 1,
            }
        }

        Ok(RefreshOutput {
            summaries,
            warnings,
        })
    }

    fn load_file(&self, path: &Path) -> Result<Option<SessionSummary>, ()> {
        let metadata = std::fs::metadata(path).map_err(|_| ())?;
        let size_bytes = metadata.len();
        let modified_unix_ms = metadata.modified().ok().and_then(system_time_to_unix_ms);

        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(path) {
                if entry.size_bytes == size_bytes && entry.modified_unix_ms == modified_unix_ms {
                    return Ok(entry.summary.clone());
                }
            }
        }

        let summary = parse_session_file(path, size_bytes).map_err(|_| ())?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                path.to_path_buf(),
                CacheEntry {
                    size_bytes,
                    modified_unix_ms,
                    summary: summary.clone(),
                },
            );
        }
        Ok(summary)
    }
}

impl SessionIndex for FsSessionIndex {
    fn refresh(&self, scope: RefreshScope) -> Result<RefreshOutput, String> {
        let mut output = self.refresh_all().map_err(|error| error.to_string())?;
        if let RefreshScope::Day(day, dimension) = scope {
            output
                .summaries
                .retain(|summary| local_date(dimension_timestamp(summary, dimension), self.offset) == day);
        }
        Ok(output)
    }

    fn enrich(&self, path: &Path) -> Option<SessionSummary> {
        let metadata = std::fs::metadata(path).ok()?;
        let size_bytes = metadata.len();
        let modified_unix_ms = metadata.modified().ok().and_then(system_time_to_unix_ms);

        let summary = parse_session_file(path, size_bytes).ok()?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                path.to_path_buf(),
                CacheEntry {
                    size_bytes,
                    modified_unix_ms,
                    summary: summary.clone(),
                },
            );
        }
        summary
    }

    fn day_counts(&self, year: i32, month: Month, dimension: DateDimension) -> BTreeMap<u8, usize> {
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        let Ok(output) = self.refresh_all() else {
            return counts;
        };
        for summary in &output.summaries {
            let date = local_date(dimension_timestamp(summary, dimension), self.offset);
            if date.year() == year && date.month() == month {
                *counts.entry(date.day()).or_insert(0) += 1;
            }
        }
        counts
    }

    fn working_dirs(&self) -> BTreeMap<PathBuf, usize> {
        let mut dirs: BTreeMap<PathBuf, usize> = BTreeMap::new();
        let Ok(output) = self.refresh_all() else {
            return dirs;
        };
        for summary in &output.summaries {
            *dirs.entry(canonicalize_path(&summary.cwd)).or_insert(0) += 1;
        }
        dirs
    }

    fn file_contains(&self, path: &Path, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return false;
        }
        let Ok(file) = File::open(path) else {
            return false;
        };
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let Ok(line) = line else {
                continue;
            };
            if line.to_lowercase().contains(&term) {
                return true;
            }
        }
        false
    }

    fn count_all(&self) -> usize {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry.path().extension().and_then(|ext| ext.to_str()) == Some(SESSION_LOG_EXTENSION)
            })
            .count()
    }

    fn invalidate(&self, path: &Path) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(path);
        }
    }

    fn invalidate_all(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

/// Parses one session file line by line. Malformed lines are skipped, never
/// aborting the file; a file that never reaches essential metadata yields
/// `Ok(None)`. Only failing to open the file at all is an error.
pub fn parse_session_file(
    path: &Path,
    file_size: u64,
) -> Result<Option<SessionSummary>, std::io::Error> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut builder = SummaryBuilder::new();
    for line_result in reader.lines() {
        // An unreadable line (bad UTF-8, transient read error) is skipped
        // like a malformed one; the rest of the file still counts.
        let line = match line_result {
            Ok(line) => line,
            Err(_) => continue,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(record) = decode_record(trimmed) else {
            continue;
        };
        builder.observe(&record);
    }

    Ok(builder.finish(path.to_path_buf(), Some(file_size)))
}

fn system_time_to_unix_ms(value: SystemTime) -> Option<i64> {
    let delta = value.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(delta.as_millis()).ok()
}
