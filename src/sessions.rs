//! Resolution of the session pool a filter denotes.
//!
//! Only concluded sessions are ever reported on. The date window narrows the
//! pool itself only when the caller named sessions explicitly or asked for a
//! cohort; otherwise the window bounds records alone.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StoreResult;
use crate::models::{DateWindow, FilterSpec, OccasionId, OrganizationId, Session, SessionId};
use crate::store::AttendanceStore;

/// Identity narrowing applied to the closed-session pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSelector {
    All,
    Sessions(Vec<SessionId>),
    Occasions(Vec<OccasionId>),
}

/// Predicate set pushed down to the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuery {
    pub now: DateTime<Utc>,
    pub selector: SessionSelector,
    pub window: Option<DateWindow>,
}

impl SessionQuery {
    pub fn for_filter(filter: &FilterSpec, window: DateWindow, now: DateTime<Utc>) -> Self {
        let selector = if !filter.session_ids.is_empty() {
            SessionSelector::Sessions(filter.session_ids.clone())
        } else if !filter.occasion_ids.is_empty() {
            SessionSelector::Occasions(filter.occasion_ids.clone())
        } else {
            SessionSelector::All
        };

        Self {
            now,
            selector,
            window: should_date_filter_sessions(filter).then_some(window),
        }
    }

    /// Reference semantics of the query; the Postgres store mirrors this in SQL.
    pub fn matches(&self, session: &Session) -> bool {
        if session.is_deleted || !is_closed(session, self.now) {
            return false;
        }

        let selected = match &self.selector {
            SessionSelector::All => true,
            SessionSelector::Sessions(ids) => ids.contains(&session.id),
            SessionSelector::Occasions(ids) => ids.contains(&session.occasion_id),
        };

        selected
            && self.window.map_or(true, |window| {
                session.start_time >= window.from && session.end_time <= window.to
            })
    }
}

/// A session has concluded once it ended, or once it started and was closed.
pub fn is_closed(session: &Session, now: DateTime<Utc>) -> bool {
    session.end_time <= now || (!session.is_open && session.start_time <= now)
}

pub fn should_date_filter_sessions(filter: &FilterSpec) -> bool {
    !filter.session_ids.is_empty() || filter.has_cohort_selectors()
}

pub async fn resolve_sessions(
    store: &dyn AttendanceStore,
    org: OrganizationId,
    filter: &FilterSpec,
    window: DateWindow,
    now: DateTime<Utc>,
) -> StoreResult<Vec<Session>> {
    let query = SessionQuery::for_filter(filter, window, now);
    let mut sessions: Vec<Session> = store
        .sessions(org, &query)
        .await?
        .into_iter()
        .filter(|session| query.matches(session))
        .collect();

    sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
    sessions.dedup_by_key(|session| session.id);

    debug!(
        count = sessions.len(),
        date_filtered = query.window.is_some(),
        "resolved sessions"
    );
    Ok(sessions)
}
