use crate::infra::SESSION_LOG_EXTENSION;
use notify::event::EventKind;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch sessions directory: {0}")]
    Subscribe(#[from] notify::Error),
}

/// One drained batch of filesystem activity under the sessions root.
/// A burst of events collapses into a single `changed`; only the first
/// error of a batch is kept.
#[derive(Debug, Default, PartialEq)]
pub struct DirActivity {
    pub changed: bool,
    pub error: Option<String>,
}

enum WatchSignal {
    Changed,
    Failed(String),
}

/// Recursive watch over the sessions root. Signals carry no payload
/// beyond "something changed"; the browser debounces and re-enumerates.
pub struct SessionsDirWatcher {
    root: PathBuf,
    rx: Receiver<WatchSignal>,
    _backend: RecommendedWatcher,
}

impl SessionsDirWatcher {
    /// Subscribes to change notifications under `root`. Events that
    /// cannot touch a session log are dropped at the source.
    pub fn subscribe(root: &Path) -> Result<Self, WatchError> {
        let (tx, rx) = channel::<WatchSignal>();
        let mut backend = RecommendedWatcher::new(
            move |outcome: notify::Result<notify::Event>| forward(&tx, outcome),
            Config::default(),
        )?;
        backend.watch(root, RecursiveMode::Recursive)?;
        Ok(SessionsDirWatcher {
            root: root.to_path_buf(),
            rx,
            _backend: backend,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collapses everything queued since the last call.
    pub fn drain(&self) -> DirActivity {
        drain_signals(&self.rx)
    }
}

fn forward(tx: &Sender<WatchSignal>, outcome: notify::Result<notify::Event>) {
    let signal = match outcome {
        Ok(event) if touches_session_log(&event) => WatchSignal::Changed,
        Ok(_) => return,
        Err(error) => WatchSignal::Failed(error.to_string()),
    };
    let _ = tx.send(signal);
}

fn drain_signals(rx: &Receiver<WatchSignal>) -> DirActivity {
    let mut activity = DirActivity::default();
    while let Ok(signal) = rx.try_recv() {
        match signal {
            WatchSignal::Changed => activity.changed = true,
            WatchSignal::Failed(message) => {
                if activity.error.is_none() {
                    activity.error = Some(message);
                }
            }
        }
    }
    activity
}

/// Reads never invalidate the index. Events without paths are kept
/// because some backends omit them on queue overflow.
fn touches_session_log(event: &notify::Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    if event.paths.is_empty() {
        return true;
    }

    event
        .paths
        .iter()
        .any(|path| path.extension().and_then(|ext| ext.to_str()) == Some(SESSION_LOG_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn access_events_never_trigger() {
        let event = notify::Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/s/a.jsonl"));
        assert!(!touches_session_log(&event));
    }

    #[test]
    fn only_session_log_paths_trigger() {
        let log = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/s/2026/03/01/rollout-a.jsonl"));
        assert!(touches_session_log(&log));

        let stray = notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/s/notes.txt"));
        assert!(!touches_session_log(&stray));
    }

    #[test]
    fn pathless_events_trigger_a_rescan() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Any));
        assert!(touches_session_log(&event));
    }

    #[test]
    fn drain_collapses_bursts_and_keeps_the_first_error() {
        let (tx, rx) = channel();
        tx.send(WatchSignal::Changed).expect("send");
        tx.send(WatchSignal::Failed("first".to_string())).expect("send");
        tx.send(WatchSignal::Changed).expect("send");
        tx.send(WatchSignal::Failed("second".to_string())).expect("send");

        let activity = drain_signals(&rx);
        assert!(activity.changed);
        assert_eq!(activity.error.as_deref(), Some("first"));

        assert_eq!(drain_signals(&rx), DirActivity::default());
    }

    #[test]
    fn subscribe_holds_the_watched_root() {
        let dir = tempdir().expect("tempdir");
        let watcher = SessionsDirWatcher::subscribe(dir.path()).expect("subscribe");
        assert_eq!(watcher.root(), dir.path());
        assert_eq!(watcher.drain(), DirActivity::default());
    }
}
