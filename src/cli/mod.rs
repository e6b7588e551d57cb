use crate::app::{RefreshScope, SessionIndex};
use crate::domain::{DateDimension, FilterState, PathNode, SortOrder, apply_filters, build_path_tree};
use crate::infra::{
    FsSessionIndex, ResolveStateDirError, UpdateAnnotationError, apply_annotations,
    assign_project, load_annotations, resolve_state_dir, upsert_annotation,
};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, UtcOffset};

const DEFAULT_LIMIT: usize = 20;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Sessions {
        path: Option<PathBuf>,
        project: Option<String>,
        day: Option<Date>,
        updated: bool,
        search: Option<String>,
        sort: SortOrder,
        limit: usize,
    },
    Paths,
    Days {
        year: Option<i32>,
        month: Option<Month>,
        updated: bool,
    },
    Count,
    Annotate {
        session_id: String,
        title: Option<String>,
        comment: Option<String>,
    },
    Assign {
        session_id: String,
        project: Option<String>,
    },
    Watch {
        path: Option<PathBuf>,
        project: Option<String>,
        day: Option<Date>,
        updated: bool,
        search: Option<String>,
        sort: SortOrder,
    },
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1).peekable();
    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::PrintHelp);
    };

    match subcommand.as_str() {
        "sessions" => {
            let mut path: Option<PathBuf> = None;
            let mut project: Option<String> = None;
            let mut day: Option<Date> = None;
            let mut updated = false;
            let mut search: Option<String> = None;
            let mut sort = SortOrder::default();
            let mut limit = DEFAULT_LIMIT;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--path" | "-p" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--path".to_string()))?;
                        path = Some(PathBuf::from(value));
                    }
                    "--project" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--project".to_string())
                        })?;
                        project = Some(value.to_string());
                    }
                    "--day" | "-d" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--day".to_string()))?;
                        day = Some(parse_date_flag("--day", value)?);
                    }
                    "--updated" | "-u" => {
                        updated = true;
                    }
                    "--search" | "-s" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--search".to_string())
                        })?;
                        search = Some(value.to_string());
                    }
                    "--sort" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--sort".to_string()))?;
                        sort = parse_sort_flag("--sort", value)?;
                    }
                    "--limit" | "-l" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--limit".to_string())
                        })?;
                        limit = parse_usize_flag("--limit", value)?;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                    }
                }
            }

            Ok(CliInvocation::Command(CliCommand::Sessions {
                path,
                project,
                day,
                updated,
                search,
                sort,
                limit,
            }))
        }
        "paths" => {
            reject_remaining(&mut iter)?;
            Ok(CliInvocation::Command(CliCommand::Paths))
        }
        "days" => {
            let mut year: Option<i32> = None;
            let mut month: Option<Month> = None;
            let mut updated = false;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--month" | "-m" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--month".to_string())
                        })?;
                        let (parsed_year, parsed_month) = parse_month_flag("--month", value)?;
                        year = Some(parsed_year);
                        month = Some(parsed_month);
                    }
                    "--updated" | "-u" => {
                        updated = true;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                    }
                }
            }

            Ok(CliInvocation::Command(CliCommand::Days {
                year,
                month,
                updated,
            }))
        }
        "count" => {
            reject_remaining(&mut iter)?;
            Ok(CliInvocation::Command(CliCommand::Count))
        }
        "annotate" => {
            let mut session_id: Option<String> = None;
            let mut title: Option<String> = None;
            let mut comment: Option<String> = None;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--title" | "-t" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--title".to_string()))?;
                        title = Some(value.to_string());
                    }
                    "--comment" | "-c" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--comment".to_string())
                        })?;
                        comment = Some(value.to_string());
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ if session_id.is_none() => {
                        session_id = Some(arg.to_string());
                    }
                    _ => {
                        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                    }
                }
            }

            let session_id =
                session_id.ok_or(CliParseError::MissingArgument("annotate <session-id>"))?;
            Ok(CliInvocation::Command(CliCommand::Annotate {
                session_id,
                title,
                comment,
            }))
        }
        "assign" => {
            let mut session_id: Option<String> = None;
            let mut project: Option<String> = None;
            let mut clear = false;

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--clear" => {
                        clear = true;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ if session_id.is_none() => {
                        session_id = Some(arg.to_string());
                    }
                    _ if project.is_none() => {
                        project = Some(arg.to_string());
                    }
                    _ => {
                        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                    }
                }
            }

            let session_id =
                session_id.ok_or(CliParseError::MissingArgument("assign <session-id>"))?;
            if project.is_none() && !clear {
                return Err(CliParseError::MissingArgument(
                    "assign <session-id> <project> (or --clear)",
                ));
            }
            Ok(CliInvocation::Command(CliCommand::Assign {
                session_id,
                project: if clear { None } else { project },
            }))
        }
        "watch" => {
            let mut path: Option<PathBuf> = None;
            let mut project: Option<String> = None;
            let mut day: Option<Date> = None;
            let mut updated = false;
            let mut search: Option<String> = None;
            let mut sort = SortOrder::default();

            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--path" | "-p" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--path".to_string()))?;
                        path = Some(PathBuf::from(value));
                    }
                    "--project" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--project".to_string())
                        })?;
                        project = Some(value.to_string());
                    }
                    "--day" | "-d" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--day".to_string()))?;
                        day = Some(parse_date_flag("--day", value)?);
                    }
                    "--updated" | "-u" => {
                        updated = true;
                    }
                    "--search" | "-s" => {
                        let value = iter.next().ok_or_else(|| {
                            CliParseError::MissingFlagValue("--search".to_string())
                        })?;
                        search = Some(value.to_string());
                    }
                    "--sort" => {
                        let value = iter
                            .next()
                            .ok_or_else(|| CliParseError::MissingFlagValue("--sort".to_string()))?;
                        sort = parse_sort_flag("--sort", value)?;
                    }
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => {
                        return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                    }
                }
            }

            Ok(CliInvocation::Command(CliCommand::Watch {
                path,
                project,
                day,
                updated,
                search,
                sort,
            }))
        }
        other => Err(CliParseError::UnknownSubcommand(other.to_string())),
    }
}

fn reject_remaining<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
) -> Result<(), CliParseError> {
    match iter.next() {
        Some(arg) if arg.starts_with('-') => Err(CliParseError::UnknownFlag(arg.to_string())),
        Some(arg) => Err(CliParseError::UnexpectedArgument(arg.to_string())),
        None => Ok(()),
    }
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    Refresh(String),

    #[error(transparent)]
    ResolveStateDir(#[from] ResolveStateDirError),

    #[error(transparent)]
    LoadAnnotations(#[from] crate::infra::LoadAnnotationsError),

    #[error(transparent)]
    UpdateAnnotation(#[from] UpdateAnnotationError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("cannot format timestamp: {0}")]
    FormatTimestamp(#[from] time::error::Format),
}

pub fn run(command: CliCommand, sessions_dir: &Path) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let stderr = io::stderr();
    let mut err = io::BufWriter::new(stderr.lock());

    match command {
        CliCommand::Sessions {
            path,
            project,
            day,
            updated,
            search,
            sort,
            limit,
        } => {
            let index = FsSessionIndex::new(sessions_dir.to_path_buf());
            let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
            let output = index
                .refresh(RefreshScope::All)
                .map_err(CliRunError::Refresh)?;

            let mut summaries = output.summaries;
            let state_dir = resolve_state_dir()?;
            let annotations = load_annotations(&state_dir)?;
            apply_annotations(&mut summaries, &annotations);

            let mut state = FilterState::default();
            state.select_path(path);
            if project.is_some() {
                state.select_project(project);
            }
            state.day = day;
            state.dimension = if updated {
                DateDimension::Updated
            } else {
                DateDimension::Created
            };
            state.search = search.unwrap_or_default();
            state.sort = sort;

            // One-shot invocation, so the content scan runs inline instead
            // of on a worker thread.
            let fulltext_ids: Option<BTreeSet<String>> = if state.search.trim().is_empty() {
                None
            } else {
                Some(
                    summaries
                        .iter()
                        .filter(|summary| index.file_contains(&summary.log_path, &state.search))
                        .map(|summary| summary.id.clone())
                        .collect(),
                )
            };

            let visible = apply_filters(&summaries, &state, &[], fulltext_ids.as_ref(), offset);
            for summary in visible.iter().take(limit) {
                let line = format!(
                    "{}\t{}\t{}\t{}",
                    summary.started_at.format(&Rfc3339)?,
                    summary.id,
                    summary.display_title(),
                    summary.cwd.display(),
                );
                if !write_line(&mut out, &line)? {
                    return Ok(());
                }
            }
            if output.warnings > 0
                && !write_line(&mut err, &format!("warnings: {}", output.warnings))?
            {
                return Ok(());
            }
            Ok(())
        }
        CliCommand::Paths => {
            let index = FsSessionIndex::new(sessions_dir.to_path_buf());
            // working_dirs walks the root itself; surface a missing root
            // the same way a listing would.
            index
                .refresh(RefreshScope::All)
                .map_err(CliRunError::Refresh)?;
            let dirs = index.working_dirs();
            let mut inputs: Vec<PathBuf> = Vec::new();
            for (dir, count) in dirs {
                for _ in 0..count {
                    inputs.push(dir.clone());
                }
            }
            if let Some(root) = build_path_tree(&inputs) {
                if !print_path_node(&mut out, &root, 0)? {
                    return Ok(());
                }
            }
            Ok(())
        }
        CliCommand::Days {
            year,
            month,
            updated,
        } => {
            let index = FsSessionIndex::new(sessions_dir.to_path_buf());
            let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
            let today = OffsetDateTime::now_utc().to_offset(offset).date();
            let year = year.unwrap_or_else(|| today.year());
            let month = month.unwrap_or_else(|| today.month());
            let dimension = if updated {
                DateDimension::Updated
            } else {
                DateDimension::Created
            };

            let counts = index.day_counts(year, month, dimension);
            for (day, count) in counts {
                let line = format!("{year:04}-{:02}-{day:02}\t{count}", u8::from(month));
                if !write_line(&mut out, &line)? {
                    return Ok(());
                }
            }
            Ok(())
        }
        CliCommand::Count => {
            let index = FsSessionIndex::new(sessions_dir.to_path_buf());
            let line = index.count_all().to_string();
            write_line(&mut out, &line)?;
            Ok(())
        }
        CliCommand::Annotate {
            session_id,
            title,
            comment,
        } => {
            let state_dir = resolve_state_dir()?;
            upsert_annotation(
                &state_dir,
                &session_id,
                title.as_deref().unwrap_or(""),
                comment.as_deref().unwrap_or(""),
            )?;
            Ok(())
        }
        CliCommand::Assign {
            session_id,
            project,
        } => {
            let state_dir = resolve_state_dir()?;
            assign_project(&state_dir, &session_id, project.as_deref())?;
            Ok(())
        }
        // The watch loop owns the process; main drives it directly.
        CliCommand::Watch { .. } => Ok(()),
    }
}

fn print_path_node(out: &mut impl Write, node: &PathNode, depth: usize) -> io::Result<bool> {
    let indent = "  ".repeat(depth);
    let label = if depth == 0 {
        node.path.display().to_string()
    } else {
        node.name.clone()
    };
    if !write_line(out, &format!("{indent}{label}\t{}", node.count))? {
        return Ok(false);
    }
    for child in &node.children {
        if !print_path_node(out, child, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}

fn parse_usize_flag(flag: &str, value: &str) -> Result<usize, CliParseError> {
    value
        .parse::<usize>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        })
}

fn parse_date_flag(flag: &str, value: &str) -> Result<Date, CliParseError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(value, &format).map_err(|_| CliParseError::InvalidFlagValue {
        flag: flag.to_string(),
        value: value.to_string(),
    })
}

fn parse_month_flag(flag: &str, value: &str) -> Result<(i32, Month), CliParseError> {
    let invalid = || CliParseError::InvalidFlagValue {
        flag: flag.to_string(),
        value: value.to_string(),
    };
    let (year, month) = value.split_once('-').ok_or_else(invalid)?;
    let year = year.parse::<i32>().map_err(|_| invalid())?;
    let month = month
        .parse::<u8>()
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .ok_or_else(invalid)?;
    Ok((year, month))
}

fn parse_sort_flag(flag: &str, value: &str) -> Result<SortOrder, CliParseError> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "recency" => Ok(SortOrder::Recency),
        "duration" => Ok(SortOrder::Duration),
        "activity" => Ok(SortOrder::Activity),
        "alpha" | "alphabetical" => Ok(SortOrder::Alphabetical),
        "size" => Ok(SortOrder::FileSize),
        _ => Err(CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}
