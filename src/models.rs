use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type OrganizationId = Uuid;
pub type SessionId = Uuid;
pub type OccasionId = Uuid;
pub type MemberId = Uuid;
pub type GroupId = Uuid;
pub type TagItemId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub occasion_id: OccasionId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_open: bool,
    pub is_deleted: bool,
    #[serde(default)]
    pub allowed_members: Vec<MemberId>,
    #[serde(default)]
    pub allowed_groups: Vec<GroupId>,
    #[serde(default)]
    pub allowed_tags: Vec<TagItemId>,
}

impl Session {
    /// A session is restricted when any of its allow-lists is non-empty.
    pub fn is_restricted(&self) -> bool {
        !self.allowed_members.is_empty()
            || !self.allowed_groups.is_empty()
            || !self.allowed_tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub session_id: SessionId,
    pub member_id: MemberId,
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub full_name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeGroup {
    pub name: String,
    pub min_age: i32,
    pub max_age: i32,
}

impl AgeGroup {
    pub fn new(name: &str, min_age: i32, max_age: i32) -> Self {
        Self {
            name: name.to_string(),
            min_age,
            max_age,
        }
    }

    pub fn contains(&self, age: i32) -> bool {
        age >= self.min_age && age <= self.max_age
    }
}

/// Filter as supplied by the UI. Date bounds are optional on the wire so a
/// missing bound surfaces as a configuration error during validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occasion_ids: Vec<OccasionId>,
    #[serde(default)]
    pub session_ids: Vec<SessionId>,
    #[serde(default)]
    pub member_ids: Vec<MemberId>,
    #[serde(default)]
    pub tag_item_ids: Vec<TagItemId>,
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
}

impl FilterSpec {
    pub fn has_cohort_selectors(&self) -> bool {
        !self.member_ids.is_empty() || !self.tag_item_ids.is_empty() || !self.group_ids.is_empty()
    }
}

/// Inclusive timestamp bounds of a validated filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportRequest {
    pub organization_id: Option<OrganizationId>,
    #[serde(flatten)]
    pub filter: FilterSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCount {
    pub session_id: SessionId,
    pub occasion_id: OccasionId,
    pub start_time: DateTime<Utc>,
    pub eligible: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total_attendance: u64,
    pub unique_members: u64,
    pub sessions_count: u64,
    pub occasions_count: u64,
    pub expected_total_members: u64,
    pub attendance_rate: f64,
    pub days_span: u64,
    pub average_per_day: f64,
    pub peak_day: Option<TrendPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_session: Option<SessionCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Demographic {
    #[serde(rename = "byAgeGroup")]
    pub by_age_group: BTreeMap<String, u64>,
    #[serde(rename = "byGender")]
    pub by_gender: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportResult {
    pub summary: Summary,
    pub trend: Vec<TrendPoint>,
    #[serde(rename = "sessionBreakdown")]
    pub session_breakdown: Vec<SessionCount>,
    pub demographic: Demographic,
    pub records: Vec<AttendanceRecord>,
    pub members: Vec<Member>,
    pub sessions: Vec<Session>,
}

impl ReportResult {
    /// The canonical result for a filter that resolves no sessions.
    pub fn empty() -> Self {
        Self::default()
    }
}
