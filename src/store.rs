//! Collaborator interfaces the engine reads from.
//!
//! The engine never writes through these traits. Every method is a snapshot
//! read scoped to one organization.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{
    AgeGroup, AttendanceRecord, GroupId, Member, MemberId, OrganizationId, Session, SessionId,
    TagItemId,
};
use crate::sessions::SessionQuery;

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Non-deleted sessions of the organization matching `query`.
    async fn sessions(&self, org: OrganizationId, query: &SessionQuery)
        -> StoreResult<Vec<Session>>;

    /// Records for the given sessions with `marked_at` inside `[from, to]`.
    async fn attendance_records(
        &self,
        org: OrganizationId,
        session_ids: &[SessionId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AttendanceRecord>>;

    async fn members_in_groups(
        &self,
        org: OrganizationId,
        group_ids: &[GroupId],
    ) -> StoreResult<HashSet<MemberId>>;

    async fn members_with_tags(
        &self,
        org: OrganizationId,
        tag_item_ids: &[TagItemId],
    ) -> StoreResult<HashSet<MemberId>>;

    async fn members_by_ids(
        &self,
        org: OrganizationId,
        member_ids: &[MemberId],
    ) -> StoreResult<Vec<Member>>;

    async fn active_member_count(&self, org: OrganizationId) -> StoreResult<u64>;

    /// Configured age buckets, or `None` when the organization has none.
    async fn age_groups(&self, org: OrganizationId) -> StoreResult<Option<Vec<AgeGroup>>>;
}
