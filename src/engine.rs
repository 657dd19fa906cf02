//! Report pipeline: sessions and cohort, then records and eligibility, then
//! aggregation. Every invocation reads a fresh snapshot; nothing is shared
//! between calls.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::{aggregate, effective_age_groups};
use crate::cohort::{resolve_cohort, MembershipCache};
use crate::eligibility::compute_eligibility;
use crate::error::ReportError;
use crate::models::{DateWindow, FilterSpec, MemberId, OrganizationId, ReportRequest, ReportResult};
use crate::records::fetch_records;
use crate::sessions::resolve_sessions;
use crate::store::AttendanceStore;

/// Caller-supplied bounds on one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub now: DateTime<Utc>,
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Checks performed before any store access.
pub fn validate(request: &ReportRequest) -> Result<(OrganizationId, DateWindow), ReportError> {
    let org = request
        .organization_id
        .ok_or_else(|| ReportError::configuration("organization id is required"))?;

    let (from, to) = match (request.filter.date_from, request.filter.date_to) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            return Err(ReportError::configuration(
                "date_from and date_to are both required",
            ))
        }
    };

    if from > to {
        return Err(ReportError::configuration(format!(
            "date_from {from} is after date_to {to}"
        )));
    }

    Ok((org, DateWindow { from, to }))
}

pub async fn generate_report(
    store: &dyn AttendanceStore,
    request: &ReportRequest,
    ctx: &InvocationContext,
) -> Result<ReportResult, ReportError> {
    let (org, window) = validate(request)?;
    let pipeline = run_pipeline(store, org, &request.filter, window, ctx.now);

    let bounded = async {
        match ctx.deadline {
            Some(limit) => tokio::time::timeout(limit, pipeline)
                .await
                .map_err(|_| ReportError::DeadlineExceeded(limit))?,
            None => pipeline.await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            warn!(%org, "report generation cancelled");
            Err(ReportError::Cancelled)
        }
        result = bounded => {
            if let Err(ReportError::DeadlineExceeded(limit)) = &result {
                warn!(%org, ?limit, "report generation exceeded its deadline");
            }
            result
        }
    }
}

async fn run_pipeline(
    store: &dyn AttendanceStore,
    org: OrganizationId,
    filter: &FilterSpec,
    window: DateWindow,
    now: DateTime<Utc>,
) -> Result<ReportResult, ReportError> {
    let cache = MembershipCache::new(store, org);

    let (sessions, cohort) = tokio::try_join!(
        resolve_sessions(store, org, filter, window, now),
        resolve_cohort(&cache, filter),
    )?;

    if sessions.is_empty() {
        info!(%org, "no concluded sessions match the filter");
        return Ok(ReportResult::empty());
    }

    let (records, eligibility, age_groups) = tokio::try_join!(
        fetch_records(store, org, &sessions, window, &cohort),
        compute_eligibility(store, &cache, org, &sessions, &cohort),
        store.age_groups(org),
    )?;

    let member_ids: Vec<MemberId> = records
        .iter()
        .map(|record| record.member_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let members = if member_ids.is_empty() {
        Vec::new()
    } else {
        store.members_by_ids(org, &member_ids).await?
    };

    let age_groups = effective_age_groups(age_groups);
    let report = aggregate(sessions, records, members, &eligibility, &age_groups);

    info!(
        %org,
        sessions = report.summary.sessions_count,
        records = report.summary.total_attendance,
        expected = report.summary.expected_total_members,
        cohort_active = cohort.active,
        "report generated"
    );
    Ok(report)
}
