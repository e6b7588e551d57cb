use crate::domain::{LogRecord, parse_rfc3339};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

/// Streaming reducer that folds a session file's decoded records into one
/// rollup. Accumulation only; counters never decrement and the last-updated
/// watermark never regresses.
#[derive(Clone, Debug, Default)]
pub struct SummaryBuilder {
    id: Option<String>,
    started_at: Option<OffsetDateTime>,
    last_updated: Option<OffsetDateTime>,
    cli_version: Option<String>,
    originator: Option<String>,
    cwd: Option<PathBuf>,
    instructions: Option<String>,
    model: Option<String>,
    approval_policy: Option<String>,
    user_messages: u64,
    assistant_messages: u64,
    tool_calls: u64,
    turn_contexts: u64,
    events: u64,
    response_kinds: BTreeMap<String, u64>,
    lines: u64,
    preview: Option<String>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &LogRecord) {
        self.lines = self.lines.saturating_add(1);
        self.advance_watermark(record.timestamp());

        match record {
            LogRecord::SessionMeta { payload, .. } => {
                if let Some(id) = &payload.id {
                    self.id = Some(id.clone());
                }
                if let Some(raw) = &payload.timestamp {
                    if let Ok(started) = parse_rfc3339(raw) {
                        self.started_at = Some(started);
                        self.advance_watermark(started);
                    }
                }
                if let Some(cwd) = &payload.cwd {
                    self.cwd = Some(PathBuf::from(cwd));
                }
                if let Some(originator) = &payload.originator {
                    self.originator = Some(originator.clone());
                }
                if let Some(version) = &payload.cli_version {
                    self.cli_version = Some(version.clone());
                }
                // First session_meta with instructions wins; later ones must
                // not clobber it.
                if self.instructions.is_none() {
                    self.instructions = payload.instructions.clone();
                }
            }
            LogRecord::TurnContext { payload, .. } => {
                self.turn_contexts = self.turn_contexts.saturating_add(1);
                if let Some(model) = &payload.model {
                    self.model = Some(model.clone());
                }
                if let Some(policy) = &payload.approval_policy {
                    self.approval_policy = Some(policy.clone());
                }
                if self.cwd.is_none() {
                    self.cwd = payload.cwd.as_ref().map(PathBuf::from);
                }
            }
            LogRecord::EventMessage { payload, .. } => {
                self.events = self.events.saturating_add(1);
                match payload.kind.as_str() {
                    "user_message" => {
                        self.user_messages = self.user_messages.saturating_add(1);
                        if self.preview.is_none() {
                            if let Some(message) = &payload.message {
                                self.preview = derive_preview(message);
                            }
                        }
                    }
                    "agent_message" => {
                        self.assistant_messages = self.assistant_messages.saturating_add(1);
                    }
                    _ => {}
                }
            }
            LogRecord::ResponseItem { payload, .. } => {
                self.events = self.events.saturating_add(1);
                *self.response_kinds.entry(payload.kind.clone()).or_insert(0) += 1;
                if payload.kind == "message" {
                    self.assistant_messages = self.assistant_messages.saturating_add(1);
                }
                if payload.kind.contains("function_call") || payload.kind.contains("tool_call") {
                    self.tool_calls = self.tool_calls.saturating_add(1);
                }
                if self.preview.is_none()
                    && payload.kind == "message"
                    && payload.role.as_deref() == Some("user")
                {
                    if let Some(content) = &payload.content {
                        for block in content {
                            if block.kind != "input_text" {
                                continue;
                            }
                            if let Some(text) = &block.text {
                                self.preview = derive_preview(text);
                                if self.preview.is_some() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            LogRecord::Unknown { .. } => {}
        }
    }

    fn advance_watermark(&mut self, timestamp: OffsetDateTime) {
        match self.last_updated {
            Some(current) if current >= timestamp => {}
            _ => self.last_updated = Some(timestamp),
        }
    }

    /// Id, start timestamp, CLI version, and working directory must all have
    /// been observed before a rollup can be produced.
    pub fn has_essential_metadata(&self) -> bool {
        self.id.is_some()
            && self.started_at.is_some()
            && self.cli_version.is_some()
            && self.cwd.is_some()
    }

    pub fn finish(self, log_path: PathBuf, file_size: Option<u64>) -> Option<SessionSummary> {
        let id = self.id?;
        let started_at = self.started_at?;
        let cli_version = self.cli_version?;
        let cwd = self.cwd?;
        let last_updated = match self.last_updated {
            Some(seen) if seen > started_at => seen,
            _ => started_at,
        };

        Some(SessionSummary {
            id,
            log_path,
            started_at,
            last_updated,
            cli_version,
            originator: self.originator,
            cwd,
            instructions: self.instructions,
            model: self.model,
            approval_policy: self.approval_policy,
            user_messages: self.user_messages,
            assistant_messages: self.assistant_messages,
            tool_calls: self.tool_calls,
            turn_contexts: self.turn_contexts,
            events: self.events,
            response_kinds: self.response_kinds,
            lines: self.lines,
            file_size,
            preview: self.preview,
            title: None,
            comment: None,
            project: None,
        })
    }

    #[cfg(test)]
    pub fn counters(&self) -> (u64, u64, u64, u64, u64, u64) {
        (
            self.user_messages,
            self.assistant_messages,
            self.tool_calls,
            self.turn_contexts,
            self.events,
            self.lines,
        )
    }

    #[cfg(test)]
    pub fn last_updated(&self) -> Option<OffsetDateTime> {
        self.last_updated
    }
}

/// Immutable rollup for one session file. `title`, `comment`, and `project`
/// are annotation fields merged in by id from the side-store, never derived
/// from the log itself.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub log_path: PathBuf,
    pub started_at: OffsetDateTime,
    pub last_updated: OffsetDateTime,
    pub cli_version: String,
    pub originator: Option<String>,
    pub cwd: PathBuf,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub approval_policy: Option<String>,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub tool_calls: u64,
    pub turn_contexts: u64,
    pub events: u64,
    pub response_kinds: BTreeMap<String, u64>,
    pub lines: u64,
    pub file_size: Option<u64>,
    pub preview: Option<String>,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub project: Option<String>,
}

impl SessionSummary {
    /// User title if non-blank, else the first user prompt line, else a
    /// fallback parsed from the log file name.
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            if !title.trim().is_empty() {
                return title.trim().to_string();
            }
        }
        if let Some(preview) = &self.preview {
            if !preview.trim().is_empty() {
                return preview.trim().to_string();
            }
        }
        fallback_title(&self.log_path, &self.id)
    }

    /// Last-updated minus started, floored at zero.
    pub fn elapsed(&self) -> Duration {
        let delta = self.last_updated - self.started_at;
        if delta < Duration::ZERO { Duration::ZERO } else { delta }
    }

    /// Case-insensitive substring match over the summary's textual fields.
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        let mut haystacks: Vec<&str> = vec![&self.id, &self.cli_version];
        if let Some(title) = &self.title {
            haystacks.push(title);
        }
        if let Some(comment) = &self.comment {
            haystacks.push(comment);
        }
        if let Some(model) = &self.model {
            haystacks.push(model);
        }
        if let Some(originator) = &self.originator {
            haystacks.push(originator);
        }
        if let Some(preview) = &self.preview {
            haystacks.push(preview);
        }
        let cwd = self.cwd.to_string_lossy();
        haystacks
            .into_iter()
            .any(|hay| hay.to_lowercase().contains(&needle))
            || cwd.to_lowercase().contains(&needle)
    }
}

fn fallback_title(log_path: &Path, id: &str) -> String {
    let Some(stem) = log_path.file_stem().and_then(|stem| stem.to_str()) else {
        return "(untitled)".to_string();
    };
    let stem = stem.strip_suffix(&format!("-{id}")).unwrap_or(stem);
    let stem = stem.strip_prefix("rollout-").unwrap_or(stem);
    if stem.is_empty() {
        "(untitled)".to_string()
    } else {
        stem.to_string()
    }
}

fn is_metadata_prompt(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("# AGENTS.md instructions")
        || trimmed.starts_with("<environment_context>")
        || trimmed.starts_with("<INSTRUCTIONS>")
        || (trimmed.starts_with("<skill>") && trimmed.contains("</skill>"))
}

fn derive_preview(text: &str) -> Option<String> {
    if is_metadata_prompt(text) {
        return None;
    }
    let first_line = text
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())?;
    Some(first_line.to_string())
}
