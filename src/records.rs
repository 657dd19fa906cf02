use std::collections::HashSet;

use tracing::debug;

use crate::cohort::Cohort;
use crate::error::StoreResult;
use crate::models::{AttendanceRecord, DateWindow, OrganizationId, Session, SessionId};
use crate::store::AttendanceStore;

/// Records for the resolved sessions inside the window, narrowed to the
/// cohort when one is active.
pub async fn fetch_records(
    store: &dyn AttendanceStore,
    org: OrganizationId,
    sessions: &[Session],
    window: DateWindow,
    cohort: &Cohort,
) -> StoreResult<Vec<AttendanceRecord>> {
    if sessions.is_empty() {
        return Ok(Vec::new());
    }

    let session_ids: Vec<SessionId> = sessions.iter().map(|session| session.id).collect();
    let fetched = store
        .attendance_records(org, &session_ids, window.from, window.to)
        .await?;
    let fetched_count = fetched.len();
    let resolved: HashSet<SessionId> = session_ids.into_iter().collect();

    let mut records: Vec<AttendanceRecord> = fetched
        .into_iter()
        .filter(|record| resolved.contains(&record.session_id))
        .filter(|record| window.contains(record.marked_at))
        .filter(|record| cohort.admits(&record.member_id))
        .collect();
    records.sort_by(|a, b| a.marked_at.cmp(&b.marked_at).then(a.id.cmp(&b.id)));

    debug!(
        fetched = fetched_count,
        kept = records.len(),
        cohort_active = cohort.active,
        "fetched attendance records"
    );
    Ok(records)
}
