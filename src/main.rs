mod app;
mod cli;
mod domain;
mod infra;

use crate::app::SessionBrowser;
use crate::cli::{CliCommand, CliInvocation};
use crate::infra::{
    FsSessionIndex, ResolveSessionsDirError, SessionsDirWatcher, WatchError, load_annotations,
    resolve_sessions_dir, resolve_state_dir,
};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    ResolveSessionsDir(#[from] ResolveSessionsDirError),

    #[error(transparent)]
    Cli(#[from] crate::cli::CliRunError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

fn main() {
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command(CliCommand::Watch {
            path,
            project,
            day,
            updated,
            search,
            sort,
        }) => {
            let sessions_dir = resolve_sessions_dir()?;
            let filters = WatchFilters {
                path,
                project,
                day,
                updated,
                search,
                sort,
            };
            run_watch(sessions_dir, filters)
        }
        CliInvocation::Command(command) => {
            let sessions_dir = resolve_sessions_dir()?;
            crate::cli::run(command, &sessions_dir)?;
            Ok(())
        }
    }
}

struct WatchFilters {
    path: Option<std::path::PathBuf>,
    project: Option<String>,
    day: Option<time::Date>,
    updated: bool,
    search: Option<String>,
    sort: crate::domain::SortOrder,
}

/// Headless orchestrator loop: mirrors the sessions directory into a live
/// summary set and prints count and liveness deltas as they happen.
fn run_watch(sessions_dir: std::path::PathBuf, filters: WatchFilters) -> Result<(), MainError> {
    let index = Arc::new(FsSessionIndex::new(sessions_dir.clone()));
    let mut browser = SessionBrowser::new(index);

    if let Ok(state_dir) = resolve_state_dir() {
        if let Ok(annotations) = load_annotations(&state_dir) {
            browser.set_annotations(annotations);
        }
    }

    let now = Instant::now();
    if let Some(path) = filters.path {
        browser.select_path(Some(path));
    }
    if let Some(project) = filters.project {
        browser.select_project(Some(project));
    }
    if filters.updated {
        browser.set_date_dimension(crate::domain::DateDimension::Updated, now);
    }
    browser.select_day(filters.day, now);
    browser.set_sort_order(filters.sort);
    if let Some(search) = filters.search {
        browser.set_search_text(&search, now);
    }

    let watcher = SessionsDirWatcher::subscribe(&sessions_dir)?;
    browser.request_refresh(Instant::now());

    let mut out = io::stdout().lock();
    let _ = writeln!(out, "watching {}", watcher.root().display());
    let mut last_count: Option<usize> = None;
    let mut last_error: Option<String> = None;
    let mut last_active: Vec<String> = Vec::new();

    loop {
        let activity = watcher.drain();
        if activity.changed {
            browser.notify_directory_changed(Instant::now());
        }
        if let Some(message) = activity.error {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "watch error: {message}");
        }

        browser.tick(Instant::now());

        let count = browser.visible().len();
        if last_count != Some(count) {
            last_count = Some(count);
            let days = browser.sections().len();
            if browser.warnings() > 0 {
                let _ = writeln!(
                    out,
                    "sessions: {count} across {days} days (warnings: {})",
                    browser.warnings()
                );
            } else {
                let _ = writeln!(out, "sessions: {count} across {days} days");
            }
        }

        let error = browser.error().map(str::to_string);
        if error != last_error {
            if let Some(message) = &error {
                let mut err = io::stderr().lock();
                let _ = writeln!(err, "refresh error: {message}");
            }
            last_error = error;
        }

        let active: Vec<String> = browser
            .visible()
            .iter()
            .filter(|summary| browser.is_active(&summary.id))
            .map(|summary| summary.id.clone())
            .collect();
        if active != last_active {
            let _ = writeln!(out, "active: {}", active.join(" "));
            last_active = active;
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

fn print_help() {
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "rollscope - browse an agent CLI's JSONL session logs

Usage:
  rollscope <subcommand> [flags]

Subcommands:
  sessions   list sessions (newest first)
             --path <dir>       only sessions under a directory
             --project <id>     only sessions assigned to a project
             --day <YYYY-MM-DD> only sessions on a calendar day
             --updated          evaluate --day against last activity
             --search <text>    metadata and full-text match
             --sort <order>     recency | duration | activity | alpha | size
             --limit <n>        cap the listing (default 20)
  paths      working-directory tree with per-subtree session counts
  days       per-day session counts for one month
             --month <YYYY-MM>  month to histogram (default: current)
             --updated          count by last activity instead of creation
  count      total number of session log files
  annotate   set a session's title/comment
             <session-id> [--title <text>] [--comment <text>]
  assign     assign a session to a project
             <session-id> <project> | <session-id> --clear
  watch      follow the sessions directory, printing deltas
             accepts the same filter flags as sessions (except --limit)

Flags:
  -h, --help      print this help
  -V, --version   print the version

Environment:
  ROLLSCOPE_SESSIONS_DIR   sessions root (default ~/.codex/sessions)"
    );
}
