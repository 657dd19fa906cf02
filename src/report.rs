use std::fmt::Write;

use crate::models::{FilterSpec, ReportResult};

fn scope_label(filter: &FilterSpec) -> String {
    let mut parts = Vec::new();
    if !filter.session_ids.is_empty() {
        parts.push(format!("{} selected sessions", filter.session_ids.len()));
    } else if !filter.occasion_ids.is_empty() {
        parts.push(format!("{} occasions", filter.occasion_ids.len()));
    }
    if !filter.member_ids.is_empty() {
        parts.push(format!("{} members", filter.member_ids.len()));
    }
    if !filter.tag_item_ids.is_empty() {
        parts.push(format!("{} tags", filter.tag_item_ids.len()));
    }
    if !filter.group_ids.is_empty() {
        parts.push(format!("{} groups", filter.group_ids.len()));
    }

    if parts.is_empty() {
        "all concluded sessions".to_string()
    } else {
        parts.join(", ")
    }
}

pub fn render_markdown(report: &ReportResult, filter: &FilterSpec) -> String {
    let mut output = String::new();
    let summary = &report.summary;

    let _ = writeln!(output, "# Attendance Report");
    let window = match (filter.date_from, filter.date_to) {
        (Some(from), Some(to)) => format!("{} to {}", from.date_naive(), to.date_naive()),
        _ => "an unbounded window".to_string(),
    };
    let _ = writeln!(output, "Generated for {} ({})", scope_label(filter), window);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");

    if report.sessions.is_empty() {
        let _ = writeln!(output, "No concluded sessions match this filter.");
        return output;
    }

    let _ = writeln!(output, "- Total attendance: {}", summary.total_attendance);
    let _ = writeln!(output, "- Unique members: {}", summary.unique_members);
    let _ = writeln!(
        output,
        "- Sessions: {} across {} occasions",
        summary.sessions_count, summary.occasions_count
    );
    let _ = writeln!(
        output,
        "- Attendance rate: {:.1}% of {} expected",
        summary.attendance_rate * 100.0,
        summary.expected_total_members
    );
    let _ = writeln!(
        output,
        "- Average per active day: {:.2} over {} days",
        summary.average_per_day, summary.days_span
    );
    if let Some(peak) = summary.peak_day {
        let _ = writeln!(output, "- Peak day: {} ({})", peak.date, peak.count);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Trend");
    if report.trend.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this window.");
    } else {
        for point in &report.trend {
            let _ = writeln!(output, "- {}: {}", point.date, point.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Sessions");
    for entry in report.session_breakdown.iter().take(10) {
        let rate = if entry.eligible > 0 {
            entry.count as f64 / entry.eligible as f64 * 100.0
        } else {
            0.0
        };
        let _ = writeln!(
            output,
            "- {} ({}): {} of {} eligible ({:.1}%)",
            entry.start_time.format("%Y-%m-%d %H:%M"),
            entry.session_id,
            entry.count,
            entry.eligible,
            rate
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Demographics");
    if report.demographic.by_age_group.is_empty() {
        let _ = writeln!(output, "No ages recorded for attending members.");
    } else {
        for (group, count) in &report.demographic.by_age_group {
            let _ = writeln!(output, "- {group}: {count}");
        }
    }
    for (gender, count) in &report.demographic.by_gender {
        let _ = writeln!(output, "- Gender {gender}: {count}");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionCount, Summary, TrendPoint};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn empty_report_says_so() {
        let output = render_markdown(&ReportResult::empty(), &FilterSpec::default());
        assert!(output.contains("Generated for all concluded sessions (an unbounded window)"));
        assert!(output.contains("No concluded sessions match this filter."));
    }

    #[test]
    fn renders_summary_and_breakdown() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        let session_id = Uuid::new_v4();
        let mut report = ReportResult {
            summary: Summary {
                total_attendance: 3,
                unique_members: 2,
                sessions_count: 1,
                occasions_count: 1,
                expected_total_members: 12,
                attendance_rate: 0.25,
                days_span: 1,
                average_per_day: 3.0,
                peak_day: Some(TrendPoint {
                    date: start.date_naive(),
                    count: 3,
                }),
                top_session: None,
            },
            trend: vec![TrendPoint {
                date: start.date_naive(),
                count: 3,
            }],
            session_breakdown: vec![SessionCount {
                session_id,
                occasion_id: Uuid::new_v4(),
                start_time: start,
                eligible: 12,
                count: 3,
            }],
            ..ReportResult::default()
        };
        report.sessions = vec![crate::models::Session {
            id: session_id,
            occasion_id: Uuid::new_v4(),
            start_time: start,
            end_time: start,
            is_open: false,
            is_deleted: false,
            allowed_members: Vec::new(),
            allowed_groups: Vec::new(),
            allowed_tags: Vec::new(),
        }];
        report.demographic.by_gender.insert("unknown".to_string(), 2);

        let filter = FilterSpec {
            date_from: Some(start),
            date_to: Some(start),
            tag_item_ids: vec![Uuid::new_v4()],
            ..FilterSpec::default()
        };
        let output = render_markdown(&report, &filter);

        assert!(output.contains("Generated for 1 tags (2026-02-01 to 2026-02-01)"));
        assert!(output.contains("- Attendance rate: 25.0% of 12 expected"));
        assert!(output.contains("- 2026-02-01: 3"));
        assert!(output.contains("3 of 12 eligible (25.0%)"));
        assert!(output.contains("No ages recorded for attending members."));
        assert!(output.contains("- Gender unknown: 2"));
    }
}
