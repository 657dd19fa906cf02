//! Cohort resolution and the per-invocation membership cache.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::{FilterSpec, GroupId, MemberId, OrganizationId, TagItemId};
use crate::store::AttendanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MembershipKind {
    Group,
    Tag,
}

type MembershipKey = (MembershipKind, Vec<uuid::Uuid>);

type MembershipCell = Arc<OnceCell<Arc<HashSet<MemberId>>>>;

/// Memoizes group and tag membership lookups for one engine invocation.
///
/// Keys are the sorted, de-duplicated id set, so the cohort and any number of
/// restricted sessions naming the same groups share a single store query.
/// Each key owns a `OnceCell`; concurrent callers on the same key wait for
/// the first query instead of issuing their own. A failed query leaves the
/// cell empty and the next caller retries.
pub struct MembershipCache<'a> {
    store: &'a dyn AttendanceStore,
    org: OrganizationId,
    entries: Mutex<HashMap<MembershipKey, MembershipCell>>,
}

impl<'a> MembershipCache<'a> {
    pub fn new(store: &'a dyn AttendanceStore, org: OrganizationId) -> Self {
        Self {
            store,
            org,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn group_members(&self, group_ids: &[GroupId]) -> StoreResult<Arc<HashSet<MemberId>>> {
        self.lookup(MembershipKind::Group, group_ids).await
    }

    pub async fn tag_members(&self, tag_item_ids: &[TagItemId]) -> StoreResult<Arc<HashSet<MemberId>>> {
        self.lookup(MembershipKind::Tag, tag_item_ids).await
    }

    async fn lookup(
        &self,
        kind: MembershipKind,
        ids: &[uuid::Uuid],
    ) -> StoreResult<Arc<HashSet<MemberId>>> {
        if ids.is_empty() {
            return Ok(Arc::new(HashSet::new()));
        }

        let mut key_ids = ids.to_vec();
        key_ids.sort();
        key_ids.dedup();

        let cell = self.cell(kind, &key_ids);
        let (store, org, ids) = (self.store, self.org, key_ids.as_slice());
        let members = cell
            .get_or_try_init(|| async move {
                let members = match kind {
                    MembershipKind::Group => store.members_in_groups(org, ids).await?,
                    MembershipKind::Tag => store.members_with_tags(org, ids).await?,
                };
                debug!(?kind, ids = ids.len(), size = members.len(), "membership resolved");
                Ok::<_, StoreError>(Arc::new(members))
            })
            .await?;
        Ok(Arc::clone(members))
    }

    /// Returns the shared cell for a key, creating it on first use.
    ///
    /// The map lock is held only to clone the cell out, never across a store
    /// query. A panic while holding it cannot leave the map half-written, so
    /// a poisoned lock is recovered rather than failing the report.
    fn cell(&self, kind: MembershipKind, key_ids: &[uuid::Uuid]) -> MembershipCell {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("membership cache lock poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(
            entries
                .entry((kind, key_ids.to_vec()))
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }
}

/// Members implied by the caller's member/tag/group selectors.
///
/// An inactive cohort means "everyone" and is never materialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    pub active: bool,
    pub members: HashSet<MemberId>,
}

impl Cohort {
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Whether a member passes the cohort filter.
    pub fn admits(&self, member_id: &MemberId) -> bool {
        !self.active || self.members.contains(member_id)
    }
}

pub async fn resolve_cohort(cache: &MembershipCache<'_>, filter: &FilterSpec) -> StoreResult<Cohort> {
    if !filter.has_cohort_selectors() {
        return Ok(Cohort::inactive());
    }

    let (by_tag, by_group) = tokio::try_join!(
        cache.tag_members(&filter.tag_item_ids),
        cache.group_members(&filter.group_ids),
    )?;

    let members: HashSet<MemberId> = filter
        .member_ids
        .iter()
        .copied()
        .chain(by_tag.iter().copied())
        .chain(by_group.iter().copied())
        .collect();

    debug!(
        explicit = filter.member_ids.len(),
        by_tag = by_tag.len(),
        by_group = by_group.len(),
        size = members.len(),
        "resolved cohort"
    );

    Ok(Cohort {
        active: true,
        members,
    })
}
