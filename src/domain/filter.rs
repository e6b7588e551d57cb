use crate::domain::{SessionSummary, canonicalize_path, path_is_under};
use std::collections::BTreeSet;
use std::path::PathBuf;
use time::{Date, OffsetDateTime, UtcOffset};

/// Which timestamp a day filter is evaluated against. Grouping into day
/// sections always uses the creation date regardless of this choice.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum DateDimension {
    #[default]
    Created,
    Updated,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortOrder {
    #[default]
    Recency,
    Duration,
    Activity,
    Alphabetical,
    FileSize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

/// Orthogonal filter dimensions. Path and project filters are mutually
/// exclusive at selection time: choosing one clears the other.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterState {
    path: Option<PathBuf>,
    project: Option<String>,
    pub day: Option<Date>,
    pub dimension: DateDimension,
    pub search: String,
    pub sort: SortOrder,
}

impl FilterState {
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn select_path(&mut self, path: Option<PathBuf>) {
        self.path = path.map(|p| canonicalize_path(&p));
        if self.path.is_some() {
            self.project = None;
        }
    }

    pub fn select_project(&mut self, project: Option<String>) {
        self.project = project;
        if self.project.is_some() {
            self.path = None;
        }
    }
}

/// Applies the filter stages in fixed order (path, project, day, text), then
/// sorts by the active order. `fulltext_ids` holds the ids matched by the
/// asynchronous full-text scan, if one has completed for the current term.
pub fn apply_filters(
    summaries: &[SessionSummary],
    state: &FilterState,
    projects: &[Project],
    fulltext_ids: Option<&BTreeSet<String>>,
    offset: UtcOffset,
) -> Vec<SessionSummary> {
    let mut result: Vec<SessionSummary> = summaries
        .iter()
        .filter(|summary| passes_path(summary, state))
        .filter(|summary| passes_project(summary, state, projects))
        .filter(|summary| passes_day(summary, state, offset))
        .filter(|summary| passes_text(summary, state, fulltext_ids))
        .cloned()
        .collect();
    sort_summaries(&mut result, state.sort);
    result
}

fn passes_path(summary: &SessionSummary, state: &FilterState) -> bool {
    match &state.path {
        Some(prefix) => path_is_under(&canonicalize_path(&summary.cwd), prefix),
        None => true,
    }
}

fn passes_project(summary: &SessionSummary, state: &FilterState, projects: &[Project]) -> bool {
    let Some(selected) = &state.project else {
        return true;
    };
    if summary.project.as_deref() == Some(selected.as_str()) {
        return true;
    }
    projects
        .iter()
        .find(|project| &project.id == selected)
        .is_some_and(|project| {
            path_is_under(
                &canonicalize_path(&summary.cwd),
                &canonicalize_path(&project.path),
            )
        })
}

fn passes_day(summary: &SessionSummary, state: &FilterState, offset: UtcOffset) -> bool {
    let Some(day) = state.day else {
        return true;
    };
    local_date(dimension_timestamp(summary, state.dimension), offset) == day
}

fn passes_text(
    summary: &SessionSummary,
    state: &FilterState,
    fulltext_ids: Option<&BTreeSet<String>>,
) -> bool {
    let term = state.search.trim();
    if term.is_empty() {
        return true;
    }
    summary.matches_text(term) || fulltext_ids.is_some_and(|ids| ids.contains(&summary.id))
}

pub fn dimension_timestamp(summary: &SessionSummary, dimension: DateDimension) -> OffsetDateTime {
    match dimension {
        DateDimension::Created => summary.started_at,
        DateDimension::Updated => summary.last_updated,
    }
}

pub fn local_date(timestamp: OffsetDateTime, offset: UtcOffset) -> Date {
    timestamp.to_offset(offset).date()
}

pub fn sort_summaries(summaries: &mut [SessionSummary], order: SortOrder) {
    match order {
        SortOrder::Recency => summaries.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::Duration => summaries
            .sort_by(|a, b| b.elapsed().cmp(&a.elapsed()).then_with(|| a.id.cmp(&b.id))),
        SortOrder::Activity => {
            summaries.sort_by(|a, b| b.events.cmp(&a.events).then_with(|| a.id.cmp(&b.id)))
        }
        SortOrder::Alphabetical => summaries.sort_by(|a, b| {
            a.display_title()
                .to_lowercase()
                .cmp(&b.display_title().to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::FileSize => summaries.sort_by(|a, b| {
            b.file_size
                .unwrap_or(0)
                .cmp(&a.file_size.unwrap_or(0))
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DaySection {
    pub day: Date,
    pub sessions: Vec<SessionSummary>,
}

/// Sections a filtered result set by creation date (most recent day first).
/// Creation date is used even when the day filter runs on the updated
/// dimension.
pub fn group_by_day(summaries: &[SessionSummary], offset: UtcOffset) -> Vec<DaySection> {
    let mut sections: Vec<DaySection> = Vec::new();
    for summary in summaries {
        let day = local_date(summary.started_at, offset);
        match sections.iter_mut().find(|section| section.day == day) {
            Some(section) => section.sessions.push(summary.clone()),
            None => sections.push(DaySection {
                day,
                sessions: vec![summary.clone()],
            }),
        }
    }
    sections.sort_by(|a, b| b.day.cmp(&a.day));
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::{date, datetime};

    fn summary(id: &str, cwd: &str, started_at: OffsetDateTime) -> SessionSummary {
        SessionSummary {
            id: id.to_string(),
            log_path: PathBuf::from(format!("/logs/{id}.jsonl")),
            started_at,
            last_updated: started_at,
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
            response_kinds: BTreeMap::new(),
            lines: 0,
            file_size: None,
            preview: None,
            title: None,
            comment: None,
            project: None,
        }
    }

    #[test]
    fn selecting_a_project_clears_the_path_filter() {
        let mut state = FilterState::default();
        state.select_path(Some(PathBuf::from("/a/b")));
        assert!(state.path().is_some());

        state.select_project(Some("p1".to_string()));
        assert!(state.path().is_none());
        assert_eq!(state.project(), Some("p1"));

        state.select_path(Some(PathBuf::from("/a/b")));
        assert!(state.project().is_none());
    }

    #[test]
    fn path_filter_respects_component_boundaries() {
        let summaries = vec![
            summary("s1", "/a/b", datetime!(2026-03-01 10:00 UTC)),
            summary("s2", "/a/b/nested", datetime!(2026-03-01 11:00 UTC)),
            summary("s3", "/a/bc", datetime!(2026-03-01 12:00 UTC)),
        ];
        let mut state = FilterState::default();
        state.select_path(Some(PathBuf::from("/a/b/")));

        let kept = apply_filters(&summaries, &state, &[], None, UtcOffset::UTC);
        let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[test]
    fn project_filter_uses_assignment_then_directory() {
        let mut assigned = summary("s1", "/elsewhere", datetime!(2026-03-01 10:00 UTC));
        assigned.project = Some("p1".to_string());
        let summaries = vec![
            assigned,
            summary("s2", "/projects/p1/sub", datetime!(2026-03-01 11:00 UTC)),
            summary("s3", "/projects/other", datetime!(2026-03-01 12:00 UTC)),
        ];
        let projects = vec![Project {
            id: "p1".to_string(),
            name: "P1".to_string(),
            path: PathBuf::from("/projects/p1"),
        }];
        let mut state = FilterState::default();
        state.select_project(Some("p1".to_string()));

        let kept = apply_filters(&summaries, &state, &projects, None, UtcOffset::UTC);
        let ids: Vec<&str> = kept.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
    }

    #[test]
    fn day_filter_follows_the_selected_dimension() {
        let mut stale = summary("s1", "/a", datetime!(2026-03-01 10:00 UTC));
        stale.last_updated = datetime!(2026-03-02 09:00 UTC);
        let summaries = vec![stale, summary("s2", "/a", datetime!(2026-03-02 10:00 UTC))];

        let mut state = FilterState::default();
        state.day = Some(date!(2026 - 03 - 02));

        let by_created = apply_filters(&summaries, &state, &[], None, UtcOffset::UTC);
        assert_eq!(by_created.len(), 1);
        assert_eq!(by_created[0].id, "s2");

        state.dimension = DateDimension::Updated;
        let by_updated = apply_filters(&summaries, &state, &[], None, UtcOffset::UTC);
        assert_eq!(by_updated.len(), 2);
    }

    #[test]
    fn text_filter_merges_fulltext_ids() {
        let summaries = vec![
            summary("alpha", "/a", datetime!(2026-03-01 10:00 UTC)),
            summary("beta", "/a", datetime!(2026-03-01 11:00 UTC)),
        ];
        let mut state = FilterState::default();
        state.search = "needle".to_string();

        assert!(apply_filters(&summaries, &state, &[], None, UtcOffset::UTC).is_empty());

        let ids: BTreeSet<String> = ["beta".to_string()].into_iter().collect();
        let kept = apply_filters(&summaries, &state, &[], Some(&ids), UtcOffset::UTC);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "beta");
    }

    #[test]
    fn grouping_always_keys_on_creation_date() {
        let mut crossed = summary("s1", "/a", datetime!(2026-03-01 23:00 UTC));
        crossed.last_updated = datetime!(2026-03-02 01:00 UTC);
        let summaries = vec![crossed, summary("s2", "/a", datetime!(2026-03-02 10:00 UTC))];

        let sections = group_by_day(&summaries, UtcOffset::UTC);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].day, date!(2026 - 03 - 02));
        assert_eq!(sections[0].sessions[0].id, "s2");
        assert_eq!(sections[1].day, date!(2026 - 03 - 01));
        assert_eq!(sections[1].sessions[0].id, "s1");
    }

    #[test]
    fn sort_orders() {
        let mut a = summary("a", "/w", datetime!(2026-03-01 10:00 UTC));
        a.last_updated = datetime!(2026-03-01 12:00 UTC);
        a.events = 5;
        a.file_size = Some(10);
        a.title = Some("zeta".to_string());

        let mut b = summary("b", "/w", datetime!(2026-03-01 11:00 UTC));
        b.last_updated = datetime!(2026-03-01 11:30 UTC);
        b.events = 9;
        b.file_size = Some(90);
        b.title = Some("Alpha".to_string());

        let mut list = vec![a.clone(), b.clone()];
        sort_summaries(&mut list, SortOrder::Recency);
        assert_eq!(list[0].id, "a");

        sort_summaries(&mut list, SortOrder::Duration);
        assert_eq!(list[0].id, "a");

        sort_summaries(&mut list, SortOrder::Activity);
        assert_eq!(list[0].id, "b");

        sort_summaries(&mut list, SortOrder::Alphabetical);
        assert_eq!(list[0].id, "b");

        sort_summaries(&mut list, SortOrder::FileSize);
        assert_eq!(list[0].id, "b");
    }
}
