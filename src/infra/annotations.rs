use crate::domain::SessionSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Side-store for fields that are not derived from the logs: a per-session
/// user title, comment, and project assignment, keyed by session id. The
/// log files themselves are never written.
#[derive(Clone, Debug, Default)]
pub struct Annotations {
    entries: BTreeMap<String, Annotation>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub title: Option<String>,
    pub comment: Option<String>,
    pub project: Option<String>,
}

impl Annotations {
    pub fn get(&self, session_id: &str) -> Option<&Annotation> {
        self.entries.get(session_id)
    }

    pub fn upsert(&mut self, session_id: &str, title: &str, comment: &str) {
        let entry = self.entries.entry(session_id.to_string()).or_default();
        entry.title = non_blank(title);
        entry.comment = non_blank(comment);
        self.drop_if_empty(session_id);
    }

    pub fn assign(&mut self, session_id: &str, project: Option<&str>) {
        let entry = self.entries.entry(session_id.to_string()).or_default();
        entry.project = project.and_then(non_blank);
        self.drop_if_empty(session_id);
    }

    fn drop_if_empty(&mut self, session_id: &str) {
        if self
            .entries
            .get(session_id)
            .is_some_and(|entry| *entry == Annotation::default())
        {
            self.entries.remove(session_id);
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ResolveStateDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

pub fn resolve_state_dir() -> Result<PathBuf, ResolveStateDirError> {
    let Some(home) = dirs::home_dir() else {
        return Err(ResolveStateDirError::HomeDirNotFound);
    };
    Ok(home.join(".rollscope"))
}

#[derive(Debug, Error)]
pub enum LoadAnnotationsError {
    #[error("failed to read annotations: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse annotations: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SaveAnnotationsError {
    #[error("failed to encode annotations: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write annotations: {0}")]
    Write(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum UpdateAnnotationError {
    #[error(transparent)]
    Load(#[from] LoadAnnotationsError),

    #[error(transparent)]
    Save(#[from] SaveAnnotationsError),
}

fn annotations_path(state_dir: &Path) -> PathBuf {
    state_dir.join("annotations.json")
}

pub fn load_annotations(state_dir: &Path) -> Result<Annotations, LoadAnnotationsError> {
    let path = annotations_path(state_dir);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Ok(Annotations::default());
        }
        Err(error) => return Err(error.into()),
    };

    let file: AnnotationsFile = serde_json::from_str(&raw)?;
    Ok(Annotations {
        entries: file.entries,
    })
}

pub fn save_annotations(
    state_dir: &Path,
    annotations: &Annotations,
) -> Result<(), SaveAnnotationsError> {
    fs::create_dir_all(state_dir)?;
    let path = annotations_path(state_dir);
    let tmp = path.with_extension("json.tmp");
    let file = AnnotationsFile {
        version: 1,
        entries: annotations.entries.clone(),
    };
    let text = serde_json::to_string_pretty(&file)?;
    fs::write(&tmp, text)?;
    fs::rename(tmp, path)?;
    Ok(())
}

pub fn upsert_annotation(
    state_dir: &Path,
    session_id: &str,
    title: &str,
    comment: &str,
) -> Result<(), UpdateAnnotationError> {
    let mut annotations = load_annotations(state_dir)?;
    annotations.upsert(session_id, title, comment);
    save_annotations(state_dir, &annotations)?;
    Ok(())
}

pub fn assign_project(
    state_dir: &Path,
    session_id: &str,
    project: Option<&str>,
) -> Result<(), UpdateAnnotationError> {
    let mut annotations = load_annotations(state_dir)?;
    annotations.assign(session_id, project);
    save_annotations(state_dir, &annotations)?;
    Ok(())
}

/// Overlays annotation fields onto freshly loaded summaries by id. Only the
/// annotation fields are touched; log-derived fields stay as parsed.
pub fn apply_annotations(summaries: &mut [SessionSummary], annotations: &Annotations) {
    for summary in summaries {
        if let Some(annotation) = annotations.get(&summary.id) {
            summary.title = annotation.title.clone();
            summary.comment = annotation.comment.clone();
            summary.project = annotation.project.clone();
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AnnotationsFile {
    version: u32,
    entries: BTreeMap<String, Annotation>,
}
