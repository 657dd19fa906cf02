use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{
    AgeGroup, AttendanceRecord, GroupId, Member, MemberId, OrganizationId, Session, SessionId,
    TagItemId,
};
use crate::sessions::{SessionQuery, SessionSelector};
use crate::store::AttendanceStore;

pub const SEED_ORGANIZATION_ID: Uuid = Uuid::from_u128(0x5e3d_a1c0_4b7e_4f21_9c11_000000000001);

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed collaborator store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        id: row.try_get("id")?,
        occasion_id: row.try_get("occasion_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        is_open: row.try_get("is_open")?,
        is_deleted: row.try_get("is_deleted")?,
        allowed_members: row
            .try_get::<Option<Vec<Uuid>>, _>("allowed_members")?
            .unwrap_or_default(),
        allowed_groups: row
            .try_get::<Option<Vec<Uuid>>, _>("allowed_groups")?
            .unwrap_or_default(),
        allowed_tags: row
            .try_get::<Option<Vec<Uuid>>, _>("allowed_tags")?
            .unwrap_or_default(),
    })
}

fn member_ids_from_rows(rows: Vec<PgRow>) -> Result<HashSet<MemberId>, sqlx::Error> {
    rows.iter().map(|row| row.try_get("member_id")).collect()
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn sessions(
        &self,
        org: OrganizationId,
        query: &SessionQuery,
    ) -> StoreResult<Vec<Session>> {
        const OP: &str = "session query";

        let mut sql = String::from(
            "SELECT id, occasion_id, start_time, end_time, is_open, is_deleted, \
             allowed_members, allowed_groups, allowed_tags \
             FROM church_attendance.sessions \
             WHERE organization_id = $1 AND NOT is_deleted \
             AND (end_time <= $2 OR (NOT is_open AND start_time <= $2))",
        );
        let mut next_param = 3;

        match &query.selector {
            SessionSelector::All => {}
            SessionSelector::Sessions(_) => {
                sql.push_str(&format!(" AND id = ANY(${next_param})"));
                next_param += 1;
            }
            SessionSelector::Occasions(_) => {
                sql.push_str(&format!(" AND occasion_id = ANY(${next_param})"));
                next_param += 1;
            }
        }

        if query.window.is_some() {
            sql.push_str(&format!(
                " AND start_time >= ${} AND end_time <= ${}",
                next_param,
                next_param + 1
            ));
        }
        sql.push_str(" ORDER BY start_time, id");

        let mut rows = sqlx::query(&sql).bind(org).bind(query.now);

        match &query.selector {
            SessionSelector::All => {}
            SessionSelector::Sessions(ids) | SessionSelector::Occasions(ids) => {
                rows = rows.bind(ids.as_slice());
            }
        }

        if let Some(window) = query.window {
            rows = rows.bind(window.from).bind(window.to);
        }

        let rows = rows
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::database(OP))?;

        rows.iter()
            .map(session_from_row)
            .collect::<Result<_, _>>()
            .map_err(StoreError::database(OP))
    }

    async fn attendance_records(
        &self,
        org: OrganizationId,
        session_ids: &[SessionId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        const OP: &str = "attendance record query";

        let rows = sqlx::query(
            r#"
            SELECT id, session_id, member_id, marked_at
            FROM church_attendance.attendance_records
            WHERE organization_id = $1
              AND session_id = ANY($2)
              AND marked_at >= $3
              AND marked_at <= $4
            ORDER BY marked_at, id
            "#,
        )
        .bind(org)
        .bind(session_ids)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database(OP))?;

        rows.iter()
            .map(|row| {
                Ok(AttendanceRecord {
                    id: row.try_get("id")?,
                    session_id: row.try_get("session_id")?,
                    member_id: row.try_get("member_id")?,
                    marked_at: row.try_get("marked_at")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::database(OP))
    }

    async fn members_in_groups(
        &self,
        org: OrganizationId,
        group_ids: &[GroupId],
    ) -> StoreResult<HashSet<MemberId>> {
        const OP: &str = "group membership query";

        let rows = sqlx::query(
            "SELECT DISTINCT member_id FROM church_attendance.group_members \
             WHERE organization_id = $1 AND group_id = ANY($2)",
        )
        .bind(org)
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database(OP))?;

        member_ids_from_rows(rows).map_err(StoreError::database(OP))
    }

    async fn members_with_tags(
        &self,
        org: OrganizationId,
        tag_item_ids: &[TagItemId],
    ) -> StoreResult<HashSet<MemberId>> {
        const OP: &str = "tag membership query";

        let rows = sqlx::query(
            "SELECT DISTINCT member_id FROM church_attendance.member_tags \
             WHERE organization_id = $1 AND tag_item_id = ANY($2)",
        )
        .bind(org)
        .bind(tag_item_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database(OP))?;

        member_ids_from_rows(rows).map_err(StoreError::database(OP))
    }

    async fn members_by_ids(
        &self,
        org: OrganizationId,
        member_ids: &[MemberId],
    ) -> StoreResult<Vec<Member>> {
        const OP: &str = "member lookup";

        let rows = sqlx::query(
            "SELECT id, full_name, age, gender, is_active FROM church_attendance.members \
             WHERE organization_id = $1 AND id = ANY($2) ORDER BY id",
        )
        .bind(org)
        .bind(member_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database(OP))?;

        rows.iter()
            .map(|row| {
                Ok(Member {
                    id: row.try_get("id")?,
                    full_name: row.try_get("full_name")?,
                    age: row.try_get("age")?,
                    gender: row.try_get("gender")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::database(OP))
    }

    async fn active_member_count(&self, org: OrganizationId) -> StoreResult<u64> {
        const OP: &str = "active member count";

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS active FROM church_attendance.members \
             WHERE organization_id = $1 AND is_active",
        )
        .bind(org)
        .fetch_one(&self.pool)
        .await
        .and_then(|row| row.try_get("active"))
        .map_err(StoreError::database(OP))?;

        u64::try_from(count).map_err(|_| StoreError::Decode {
            operation: OP,
            message: format!("negative count {count}"),
        })
    }

    async fn age_groups(&self, org: OrganizationId) -> StoreResult<Option<Vec<AgeGroup>>> {
        const OP: &str = "age group lookup";

        let rows = sqlx::query(
            "SELECT name, min_age, max_age FROM church_attendance.age_groups \
             WHERE organization_id = $1 ORDER BY position",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database(OP))?;

        let groups = rows
            .iter()
            .map(|row| {
                Ok(AgeGroup {
                    name: row.try_get("name")?,
                    min_age: row.try_get("min_age")?,
                    max_age: row.try_get("max_age")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::database(OP))?;

        Ok((!groups.is_empty()).then_some(groups))
    }
}

fn seed_id(kind: u128, index: u128) -> Uuid {
    Uuid::from_u128(0x5e3d_a1c0_4b7e_4f21_9c11_000000000000 | (kind << 32) | index)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let org = SEED_ORGANIZATION_ID;
    sqlx::query(
        r#"
        INSERT INTO church_attendance.organizations (id, name)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(org)
    .bind("Grace Community Church")
    .execute(pool)
    .await?;

    let members = [
        ("Avery Lee", Some(34), Some("female")),
        ("Jules Moreno", Some(41), Some("male")),
        ("Kiara Patel", Some(16), Some("female")),
        ("Samuel Osei", Some(67), Some("male")),
        ("Ruth Adeyemi", Some(72), Some("female")),
        ("Noah Kim", Some(9), Some("male")),
        ("Esther Nwosu", Some(28), None),
        ("Daniel Park", None, Some("male")),
        ("Miriam Haddad", Some(53), Some("female")),
        ("Caleb Johnson", Some(19), Some("male")),
        ("Lydia Mensah", Some(11), Some("female")),
        ("Thomas Reyes", Some(45), Some("male")),
    ];

    let mut member_ids = Vec::with_capacity(members.len());
    for (index, (name, age, gender)) in members.iter().enumerate() {
        let id = seed_id(1, index as u128);
        member_ids.push(id);
        sqlx::query(
            r#"
            INSERT INTO church_attendance.members (id, organization_id, full_name, age, gender, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, age = EXCLUDED.age, gender = EXCLUDED.gender
            "#,
        )
        .bind(id)
        .bind(org)
        .bind(*name)
        .bind(*age)
        .bind(*gender)
        .bind(*name != "Daniel Park")
        .execute(pool)
        .await?;
    }

    let choir = seed_id(2, 0);
    let youth = seed_id(2, 1);
    let memberships = [(choir, vec![0usize, 1, 4, 8]), (youth, vec![2, 5, 9, 10])];
    for (group_id, indexes) in memberships {
        for index in indexes {
            sqlx::query(
                r#"
                INSERT INTO church_attendance.group_members (group_id, member_id, organization_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(group_id)
            .bind(member_ids[index])
            .bind(org)
            .execute(pool)
            .await?;
        }
    }

    let volunteer = seed_id(3, 0);
    for &index in &[0usize, 3, 6, 11] {
        sqlx::query(
            r#"
            INSERT INTO church_attendance.member_tags (tag_item_id, member_id, organization_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(volunteer)
        .bind(member_ids[index])
        .bind(org)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO church_attendance.age_groups (organization_id, position, name, min_age, max_age)
        VALUES ($1, 0, 'Children', 0, 12), ($1, 1, 'Youth', 13, 24),
               ($1, 2, 'Adults', 25, 64), ($1, 3, 'Seniors', 65, 120)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(org)
    .execute(pool)
    .await?;

    let sunday_service = seed_id(4, 0);
    let choir_rehearsal = seed_id(4, 1);
    for (id, name) in [
        (sunday_service, "Sunday Service"),
        (choir_rehearsal, "Choir Rehearsal"),
    ] {
        sqlx::query(
            r#"
            INSERT INTO church_attendance.occasions (id, organization_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(org)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let today = Utc::now()
        .date_naive()
        .and_hms_opt(10, 0, 0)
        .context("invalid seed time")?
        .and_utc();
    let mut inserted = 0u64;
    for week in 1..=4i64 {
        let start = today - Duration::weeks(week);
        let service = seed_id(5, week as u128);
        let rehearsal = seed_id(6, week as u128);

        insert_seed_session(pool, org, service, sunday_service, start, None).await?;
        insert_seed_session(
            pool,
            org,
            rehearsal,
            choir_rehearsal,
            start - Duration::days(3),
            Some(choir),
        )
        .await?;

        for (index, member_id) in member_ids.iter().enumerate() {
            if (index as i64 + week) % 3 == 0 {
                continue;
            }
            inserted += insert_seed_record(pool, org, service, *member_id, start).await?;
        }
        for &index in &[0usize, 1, 4, 8] {
            if (index as i64 + week) % 4 == 0 {
                continue;
            }
            inserted += insert_seed_record(
                pool,
                org,
                rehearsal,
                member_ids[index],
                start - Duration::days(3),
            )
            .await?;
        }
    }

    info!(%org, inserted, "seeded demo organization");
    Ok(())
}

async fn insert_seed_session(
    pool: &PgPool,
    org: OrganizationId,
    id: SessionId,
    occasion_id: Uuid,
    start: DateTime<Utc>,
    allowed_group: Option<GroupId>,
) -> anyhow::Result<()> {
    let allowed_groups: Option<Vec<Uuid>> = allowed_group.map(|group| vec![group]);
    sqlx::query(
        r#"
        INSERT INTO church_attendance.sessions
        (id, organization_id, occasion_id, start_time, end_time, is_open, is_deleted, allowed_groups)
        VALUES ($1, $2, $3, $4, $5, FALSE, FALSE, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(org)
    .bind(occasion_id)
    .bind(start)
    .bind(start + Duration::hours(2))
    .bind(allowed_groups)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_seed_record(
    pool: &PgPool,
    org: OrganizationId,
    session_id: SessionId,
    member_id: MemberId,
    marked_at: DateTime<Utc>,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO church_attendance.attendance_records
        (id, organization_id, session_id, member_id, marked_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(org)
    .bind(session_id)
    .bind(member_id)
    .bind(marked_at + Duration::minutes(15))
    .bind(format!("seed-{session_id}-{member_id}"))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    session_id: Uuid,
    member_id: Uuid,
    marked_at: DateTime<Utc>,
    source_key: Option<String>,
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 2))?;
        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}-{}", row.session_id, row.member_id));

        // Organization is taken from the session so rows cannot cross tenants.
        let result = sqlx::query(
            r#"
            INSERT INTO church_attendance.attendance_records
            (id, organization_id, session_id, member_id, marked_at, source_key)
            SELECT $1, s.organization_id, s.id, m.id, $4, $5
            FROM church_attendance.sessions s
            JOIN church_attendance.members m
              ON m.id = $3 AND m.organization_id = s.organization_id
            WHERE s.id = $2 AND NOT s.is_deleted
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.session_id)
        .bind(row.member_id)
        .bind(row.marked_at)
        .bind(&source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        } else {
            warn!(
                session_id = %row.session_id,
                member_id = %row.member_id,
                %source_key,
                "skipped attendance row: duplicate or unknown session/member"
            );
        }
    }

    Ok(inserted)
}
