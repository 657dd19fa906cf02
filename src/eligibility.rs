//! Per-session eligibility, the denominator of the attendance rate.
//!
//! | cohort   | session      | eligible(S)                      |
//! |----------|--------------|----------------------------------|
//! | inactive | unrestricted | organization active-member count |
//! | inactive | restricted   | \|allowed(S)\|                   |
//! | active   | unrestricted | \|cohort\|                       |
//! | active   | restricted   | \|cohort ∩ allowed(S)\|          |
//!
//! The expected total sums sessions independently, so a member eligible for
//! two sessions counts twice: it measures attendance opportunities.

use std::collections::{HashMap, HashSet};

use futures::future::try_join_all;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::cohort::{Cohort, MembershipCache};
use crate::error::StoreResult;
use crate::models::{MemberId, OrganizationId, Session, SessionId};
use crate::store::AttendanceStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eligibility {
    pub per_session: HashMap<SessionId, u64>,
    pub expected_total: u64,
}

impl Eligibility {
    pub fn for_session(&self, session_id: &SessionId) -> u64 {
        self.per_session.get(session_id).copied().unwrap_or(0)
    }
}

/// Organization-wide active-member count, fetched at most once per invocation
/// and only if some session needs it.
struct ActiveMemberCount<'a> {
    store: &'a dyn AttendanceStore,
    org: OrganizationId,
    cell: OnceCell<u64>,
}

impl<'a> ActiveMemberCount<'a> {
    fn new(store: &'a dyn AttendanceStore, org: OrganizationId) -> Self {
        Self {
            store,
            org,
            cell: OnceCell::new(),
        }
    }

    async fn get(&self) -> StoreResult<u64> {
        self.cell
            .get_or_try_init(|| self.store.active_member_count(self.org))
            .await
            .copied()
    }
}

/// Members named by the session's allow-lists: explicit members, members of
/// any allowed group, and holders of any allowed tag item.
pub async fn session_allowed_set(
    cache: &MembershipCache<'_>,
    session: &Session,
) -> StoreResult<HashSet<MemberId>> {
    let (by_group, by_tag) = tokio::try_join!(
        cache.group_members(&session.allowed_groups),
        cache.tag_members(&session.allowed_tags),
    )?;

    Ok(session
        .allowed_members
        .iter()
        .copied()
        .chain(by_group.iter().copied())
        .chain(by_tag.iter().copied())
        .collect())
}

async fn eligible_for(
    session: &Session,
    cohort: &Cohort,
    cache: &MembershipCache<'_>,
    active: &ActiveMemberCount<'_>,
) -> StoreResult<u64> {
    if !session.is_restricted() {
        return if cohort.active {
            Ok(cohort.members.len() as u64)
        } else {
            active.get().await
        };
    }

    let allowed = session_allowed_set(cache, session).await?;
    let count = if cohort.active {
        allowed.intersection(&cohort.members).count()
    } else {
        allowed.len()
    };
    Ok(count as u64)
}

pub async fn compute_eligibility(
    store: &dyn AttendanceStore,
    cache: &MembershipCache<'_>,
    org: OrganizationId,
    sessions: &[Session],
    cohort: &Cohort,
) -> StoreResult<Eligibility> {
    let active = ActiveMemberCount::new(store, org);

    let counts = try_join_all(sessions.iter().map(|session| {
        let active = &active;
        async move {
            let eligible = eligible_for(session, cohort, cache, active).await?;
            Ok::<_, crate::error::StoreError>((session.id, eligible))
        }
    }))
    .await?;

    let expected_total: u64 = counts.iter().map(|(_, eligible)| eligible).sum();
    let restricted = sessions.iter().filter(|s| s.is_restricted()).count();
    debug!(
        sessions = sessions.len(),
        restricted,
        expected_total,
        cohort_active = cohort.active,
        "computed eligibility"
    );

    Ok(Eligibility {
        per_session: counts.into_iter().collect(),
        expected_total,
    })
}
