use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::eligibility::Eligibility;
use crate::models::{
    AgeGroup, AttendanceRecord, Demographic, Member, ReportResult, Session, SessionCount,
    SessionId, Summary, TrendPoint,
};

pub const UNKNOWN_GENDER: &str = "unknown";

/// Built-in buckets used when an organization has configured none.
pub fn default_age_groups() -> Vec<AgeGroup> {
    vec![
        AgeGroup::new("Children", 0, 12),
        AgeGroup::new("Teens", 13, 19),
        AgeGroup::new("Young Adults", 20, 35),
        AgeGroup::new("Adults", 36, 59),
        AgeGroup::new("Seniors", 60, 200),
    ]
}

pub fn effective_age_groups(configured: Option<Vec<AgeGroup>>) -> Vec<AgeGroup> {
    match configured {
        Some(groups) if !groups.is_empty() => groups,
        _ => default_age_groups(),
    }
}

/// First matching bucket wins, even if configuration overlaps.
pub fn age_bucket(age: i32, groups: &[AgeGroup]) -> Option<&AgeGroup> {
    groups.iter().find(|group| group.contains(age))
}

pub fn build_trend(records: &[AttendanceRecord]) -> Vec<TrendPoint> {
    let mut by_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();

    for record in records {
        *by_day.entry(record.marked_at.date_naive()).or_insert(0) += 1;
    }

    by_day
        .into_iter()
        .map(|(date, count)| TrendPoint { date, count })
        .collect()
}

pub fn build_session_breakdown(
    sessions: &[Session],
    records: &[AttendanceRecord],
    eligibility: &Eligibility,
) -> Vec<SessionCount> {
    let mut counts: HashMap<SessionId, u64> = HashMap::new();
    for record in records {
        *counts.entry(record.session_id).or_insert(0) += 1;
    }

    let mut breakdown: Vec<SessionCount> = sessions
        .iter()
        .map(|session| SessionCount {
            session_id: session.id,
            occasion_id: session.occasion_id,
            start_time: session.start_time,
            eligible: eligibility.for_session(&session.id),
            count: counts.get(&session.id).copied().unwrap_or(0),
        })
        .collect();

    breakdown.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(a.start_time.cmp(&b.start_time))
            .then(a.session_id.cmp(&b.session_id))
    });
    breakdown
}

/// Tallies over the members seen in records, not the eligible population.
pub fn build_demographic(members: &[Member], age_groups: &[AgeGroup]) -> Demographic {
    let mut demographic = Demographic::default();

    for member in members {
        if let Some(group) = member.age.and_then(|age| age_bucket(age, age_groups)) {
            *demographic
                .by_age_group
                .entry(group.name.clone())
                .or_insert(0) += 1;
        }

        let gender = member
            .gender
            .as_deref()
            .map(str::trim)
            .filter(|gender| !gender.is_empty())
            .unwrap_or(UNKNOWN_GENDER);
        *demographic.by_gender.entry(gender.to_string()).or_insert(0) += 1;
    }

    demographic
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn first_max_by_count<T: Copy>(items: &[T], count: impl Fn(&T) -> u64) -> Option<T> {
    let mut best: Option<T> = None;
    for item in items {
        if best.map_or(true, |current| count(item) > count(&current)) {
            best = Some(*item);
        }
    }
    best
}

pub fn aggregate(
    sessions: Vec<Session>,
    records: Vec<AttendanceRecord>,
    mut members: Vec<Member>,
    eligibility: &Eligibility,
    age_groups: &[AgeGroup],
) -> ReportResult {
    let seen: HashSet<_> = records.iter().map(|record| record.member_id).collect();
    members.retain(|member| seen.contains(&member.id));
    members.sort_by(|a, b| a.id.cmp(&b.id));
    members.dedup_by_key(|member| member.id);

    let trend = build_trend(&records);
    let session_breakdown = build_session_breakdown(&sessions, &records, eligibility);
    let demographic = build_demographic(&members, age_groups);

    let total_attendance = records.len() as u64;
    let occasions: HashSet<_> = sessions.iter().map(|session| session.occasion_id).collect();
    let days_span = trend.len() as u64;
    let expected_total_members = eligibility.expected_total;

    let summary = Summary {
        total_attendance,
        unique_members: seen.len() as u64,
        sessions_count: sessions.len() as u64,
        occasions_count: occasions.len() as u64,
        expected_total_members,
        attendance_rate: if expected_total_members > 0 {
            total_attendance as f64 / expected_total_members as f64
        } else {
            0.0
        },
        days_span,
        average_per_day: if days_span > 0 {
            round2(total_attendance as f64 / days_span as f64)
        } else {
            0.0
        },
        peak_day: first_max_by_count(&trend, |point| point.count),
        top_session: first_max_by_count(&session_breakdown, |entry| entry.count),
    };

    ReportResult {
        summary,
        trend,
        session_breakdown,
        demographic,
        records,
        members,
        sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, day, hour, 0, 0).unwrap()
    }

    fn session(day: u32) -> Session {
        Session {
            id: Uuid::new_v4(),
            occasion_id: Uuid::new_v4(),
            start_time: at(day, 9),
            end_time: at(day, 11),
            is_open: false,
            is_deleted: false,
            allowed_members: Vec::new(),
            allowed_groups: Vec::new(),
            allowed_tags: Vec::new(),
        }
    }

    fn record(session: &Session, member_id: Uuid, marked_at: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            session_id: session.id,
            member_id,
            marked_at,
        }
    }

    fn member(age: Option<i32>, gender: Option<&str>) -> Member {
        Member {
            id: Uuid::new_v4(),
            full_name: "Grace Okafor".to_string(),
            age,
            gender: gender.map(str::to_string),
            is_active: true,
        }
    }

    #[test]
    fn configured_groups_replace_defaults_unless_empty() {
        assert_eq!(effective_age_groups(None), default_age_groups());
        assert_eq!(effective_age_groups(Some(Vec::new())), default_age_groups());

        let custom = vec![AgeGroup::new("Youth", 0, 25)];
        assert_eq!(effective_age_groups(Some(custom.clone())), custom);
    }

    #[test]
    fn overlapping_buckets_pick_the_first_match() {
        let groups = vec![AgeGroup::new("Youth", 10, 25), AgeGroup::new("Young Adults", 18, 35)];
        assert_eq!(age_bucket(20, &groups).map(|g| g.name.as_str()), Some("Youth"));
        assert_eq!(age_bucket(30, &groups).map(|g| g.name.as_str()), Some("Young Adults"));
        assert!(age_bucket(50, &groups).is_none());
    }

    #[test]
    fn trend_groups_by_record_day_ascending() {
        let s = session(1);
        let m = Uuid::new_v4();
        let records = vec![
            record(&s, m, at(3, 10)),
            record(&s, m, at(1, 10)),
            record(&s, m, at(3, 18)),
        ];

        let trend = build_trend(&records);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].date, at(1, 0).date_naive());
        assert_eq!(trend[0].count, 1);
        assert_eq!(trend[1].count, 2);
    }

    #[test]
    fn breakdown_includes_zero_count_sessions_sorted_descending() {
        let busy = session(1);
        let quiet = session(2);
        let empty = session(3);
        let m = Uuid::new_v4();
        let records = vec![
            record(&busy, m, at(1, 10)),
            record(&busy, Uuid::new_v4(), at(1, 10)),
            record(&quiet, m, at(2, 10)),
        ];

        let breakdown = build_session_breakdown(
            &[empty.clone(), quiet.clone(), busy.clone()],
            &records,
            &Eligibility::default(),
        );
        let order: Vec<_> = breakdown.iter().map(|e| (e.session_id, e.count)).collect();
        assert_eq!(order, vec![(busy.id, 2), (quiet.id, 1), (empty.id, 0)]);
    }

    #[test]
    fn demographic_skips_unknown_ages_but_not_unknown_genders() {
        let members = vec![
            member(Some(8), Some("female")),
            member(Some(40), Some("male")),
            member(None, None),
            member(Some(300), Some("  ")),
        ];

        let demographic = build_demographic(&members, &default_age_groups());
        assert_eq!(demographic.by_age_group.get("Children"), Some(&1));
        assert_eq!(demographic.by_age_group.get("Adults"), Some(&1));
        assert_eq!(demographic.by_age_group.values().sum::<u64>(), 2);
        assert_eq!(demographic.by_gender.get("female"), Some(&1));
        assert_eq!(demographic.by_gender.get("male"), Some(&1));
        assert_eq!(demographic.by_gender.get(UNKNOWN_GENDER), Some(&2));
    }

    #[test]
    fn summary_figures() {
        let a = session(1);
        let b = session(2);
        let (m1, m2) = (member(Some(30), Some("female")), member(Some(70), None));
        let records = vec![
            record(&a, m1.id, at(1, 10)),
            record(&a, m2.id, at(1, 10)),
            record(&b, m1.id, at(2, 10)),
        ];
        let eligibility = Eligibility {
            per_session: HashMap::from([(a.id, 4), (b.id, 4)]),
            expected_total: 8,
        };

        let report = aggregate(
            vec![a.clone(), b.clone()],
            records,
            vec![m1, m2, member(Some(5), None)],
            &eligibility,
            &default_age_groups(),
        );

        let summary = &report.summary;
        assert_eq!(summary.total_attendance, 3);
        assert_eq!(summary.unique_members, 2);
        assert_eq!(summary.sessions_count, 2);
        assert_eq!(summary.occasions_count, 2);
        assert_eq!(summary.days_span, 2);
        assert_eq!(summary.average_per_day, 1.5);
        assert!((summary.attendance_rate - 0.375).abs() < 1e-9);
        assert_eq!(summary.peak_day.map(|p| p.count), Some(2));
        assert_eq!(summary.top_session.map(|t| t.session_id), Some(a.id));
        assert_eq!(summary.top_session.map(|t| t.eligible), Some(4));
        // Only members referenced by records are kept.
        assert_eq!(report.members.len(), 2);

        let breakdown_total: u64 = report.session_breakdown.iter().map(|e| e.count).sum();
        let trend_total: u64 = report.trend.iter().map(|p| p.count).sum();
        assert_eq!(breakdown_total, summary.total_attendance);
        assert_eq!(trend_total, summary.total_attendance);
    }

    #[test]
    fn average_rounds_to_two_decimals_and_peak_prefers_earliest_tie() {
        let s = session(1);
        let m = Uuid::new_v4();
        let records = vec![
            record(&s, m, at(1, 10)),
            record(&s, m, at(2, 10)),
            record(&s, m, at(3, 10)),
            record(&s, m, at(3, 12)),
            record(&s, m, at(1, 12)),
        ];

        let report = aggregate(vec![s], records, Vec::new(), &Eligibility::default(), &[]);
        assert_eq!(report.summary.average_per_day, 1.67);
        assert_eq!(report.summary.peak_day.map(|p| p.date), Some(at(1, 0).date_naive()));
        assert_eq!(report.summary.attendance_rate, 0.0);
    }

    #[test]
    fn no_records_yields_zero_rate_and_no_peak() {
        let s = session(1);
        let eligibility = Eligibility {
            per_session: HashMap::from([(s.id, 5)]),
            expected_total: 5,
        };
        let report = aggregate(vec![s.clone()], Vec::new(), Vec::new(), &eligibility, &[]);

        assert_eq!(report.summary.attendance_rate, 0.0);
        assert_eq!(report.summary.average_per_day, 0.0);
        assert!(report.summary.peak_day.is_none());
        assert_eq!(report.summary.top_session.map(|t| t.count), Some(0));
        assert_eq!(report.session_breakdown.len(), 1);
    }
}
