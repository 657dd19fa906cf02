use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::AttendanceStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AgeGroup, AttendanceRecord, GroupId, Member, MemberId, OrganizationId, Session, SessionId,
    TagItemId,
};
use crate::sessions::SessionQuery;

/// In-memory store for tests. Ignores the organization id.
#[derive(Default)]
pub struct MemoryStore {
    pub sessions: Vec<Session>,
    pub records: Vec<AttendanceRecord>,
    pub members: Vec<Member>,
    pub groups: HashMap<GroupId, Vec<MemberId>>,
    pub tags: HashMap<TagItemId, Vec<MemberId>>,
    pub age_groups: Option<Vec<AgeGroup>>,
    /// Yield to the runtime inside membership lookups, as a networked store would.
    pub yield_on_lookup: bool,
    /// Sleep this long before answering the session query.
    pub session_delay: Option<Duration>,
    pub failing: Mutex<HashSet<&'static str>>,
    pub active_count_calls: AtomicUsize,
    pub group_calls: AtomicUsize,
    pub tag_calls: AtomicUsize,
    pub store_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn fail(&self, operation: &'static str) {
        self.failing
            .lock()
            .expect("failure set poisoned")
            .insert(operation);
    }

    fn check(&self, operation: &'static str) -> StoreResult<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .lock()
            .expect("failure set poisoned")
            .contains(operation)
        {
            return Err(StoreError::Backend {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn sessions(
        &self,
        _org: OrganizationId,
        query: &SessionQuery,
    ) -> StoreResult<Vec<Session>> {
        if let Some(delay) = self.session_delay {
            tokio::time::sleep(delay).await;
        }
        self.check("session query")?;
        Ok(self
            .sessions
            .iter()
            .filter(|session| query.matches(session))
            .cloned()
            .collect())
    }

    async fn attendance_records(
        &self,
        _org: OrganizationId,
        session_ids: &[SessionId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        self.check("attendance record query")?;
        Ok(self
            .records
            .iter()
            .filter(|record| {
                session_ids.contains(&record.session_id)
                    && record.marked_at >= from
                    && record.marked_at <= to
            })
            .cloned()
            .collect())
    }

    async fn members_in_groups(
        &self,
        _org: OrganizationId,
        group_ids: &[GroupId],
    ) -> StoreResult<HashSet<MemberId>> {
        self.group_calls.fetch_add(1, Ordering::SeqCst);
        if self.yield_on_lookup {
            tokio::task::yield_now().await;
        }
        self.check("group membership query")?;
        Ok(group_ids
            .iter()
            .filter_map(|id| self.groups.get(id))
            .flatten()
            .copied()
            .collect())
    }

    async fn members_with_tags(
        &self,
        _org: OrganizationId,
        tag_item_ids: &[TagItemId],
    ) -> StoreResult<HashSet<MemberId>> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if self.yield_on_lookup {
            tokio::task::yield_now().await;
        }
        self.check("tag membership query")?;
        Ok(tag_item_ids
            .iter()
            .filter_map(|id| self.tags.get(id))
            .flatten()
            .copied()
            .collect())
    }

    async fn members_by_ids(
        &self,
        _org: OrganizationId,
        member_ids: &[MemberId],
    ) -> StoreResult<Vec<Member>> {
        self.check("member lookup")?;
        Ok(self
            .members
            .iter()
            .filter(|member| member_ids.contains(&member.id))
            .cloned()
            .collect())
    }

    async fn active_member_count(&self, _org: OrganizationId) -> StoreResult<u64> {
        self.active_count_calls.fetch_add(1, Ordering::SeqCst);
        self.check("active member count")?;
        Ok(self.members.iter().filter(|member| member.is_active).count() as u64)
    }

    async fn age_groups(&self, _org: OrganizationId) -> StoreResult<Option<Vec<AgeGroup>>> {
        self.check("age group lookup")?;
        Ok(self.age_groups.clone())
    }
}
