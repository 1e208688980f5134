//! Qualification rows and tier-change audit records.

use super::commissions::insert_commission;
use super::{decimal_col, parse_col, set_member_tier, u32_col, Repository};
use crate::domain::{MemberId, PeriodId, TierChange, TierChangeReason, TierId, TierQualification, TimeMs};
use crate::store::{EvaluationCommit, QualificationStore, StoreError, TierChangeSink};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const QUALIFICATION_COLUMNS: &str = "member_id, tier_id, active_referrals, team_volume, \
    consecutive_months, is_permanent, period, evaluated_at";

fn qualification_from_row(row: &SqliteRow) -> Result<TierQualification, StoreError> {
    Ok(TierQualification {
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        tier_id: TierId::new(row.try_get::<String, _>("tier_id")?),
        active_referrals: u32_col(row, "active_referrals")?,
        team_volume: decimal_col(row, "team_volume")?,
        consecutive_months: u32_col(row, "consecutive_months")?,
        is_permanent: row.try_get("is_permanent")?,
        period: parse_col::<PeriodId>(row, "period")?,
        evaluated_at: TimeMs::new(row.try_get("evaluated_at")?),
    })
}

fn tier_change_from_row(row: &SqliteRow) -> Result<TierChange, StoreError> {
    Ok(TierChange {
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        from_tier: TierId::new(row.try_get::<String, _>("from_tier")?),
        to_tier: TierId::new(row.try_get::<String, _>("to_tier")?),
        reason: parse_col::<TierChangeReason>(row, "reason")?,
        active_referrals: u32_col(row, "active_referrals")?,
        team_volume: decimal_col(row, "team_volume")?,
        period: parse_col::<PeriodId>(row, "period")?,
        changed_at: TimeMs::new(row.try_get("changed_at")?),
    })
}

/// Upsert the row for `(member, tier)` and supersede the member's other rows.
async fn upsert_qualification(
    conn: &mut SqliteConnection,
    qualification: &TierQualification,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO qualifications
            (member_id, tier_id, active_referrals, team_volume, consecutive_months,
             is_permanent, period, evaluated_at, superseded)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
        ON CONFLICT(member_id, tier_id) DO UPDATE SET
            active_referrals = excluded.active_referrals,
            team_volume = excluded.team_volume,
            consecutive_months = excluded.consecutive_months,
            is_permanent = excluded.is_permanent,
            period = excluded.period,
            evaluated_at = excluded.evaluated_at,
            superseded = 0
        "#,
    )
    .bind(qualification.member_id.as_str())
    .bind(qualification.tier_id.as_str())
    .bind(qualification.active_referrals as i64)
    .bind(qualification.team_volume.to_canonical_string())
    .bind(qualification.consecutive_months as i64)
    .bind(qualification.is_permanent)
    .bind(qualification.period.to_string())
    .bind(qualification.evaluated_at.as_ms())
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE qualifications SET superseded = 1 WHERE member_id = ? AND tier_id <> ?")
        .bind(qualification.member_id.as_str())
        .bind(qualification.tier_id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_tier_change(
    conn: &mut SqliteConnection,
    change: &TierChange,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO tier_changes
            (member_id, from_tier, to_tier, reason, active_referrals, team_volume,
             period, changed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(member_id, period) DO NOTHING
        "#,
    )
    .bind(change.member_id.as_str())
    .bind(change.from_tier.as_str())
    .bind(change.to_tier.as_str())
    .bind(change.reason.to_string())
    .bind(change.active_referrals as i64)
    .bind(change.team_volume.to_canonical_string())
    .bind(change.period.to_string())
    .bind(change.changed_at.as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl QualificationStore for Repository {
    async fn current_qualification(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<TierQualification>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM qualifications WHERE member_id = ? AND superseded = 0 \
             ORDER BY period DESC, evaluated_at DESC LIMIT 1",
            QUALIFICATION_COLUMNS
        ))
        .bind(member_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(qualification_from_row).transpose()
    }

    async fn save_qualification(
        &self,
        qualification: &TierQualification,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_qualification(&mut tx, qualification).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn qualification_history(
        &self,
        member_id: &MemberId,
    ) -> Result<Vec<TierQualification>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM qualifications WHERE member_id = ? \
             ORDER BY period ASC, evaluated_at ASC",
            QUALIFICATION_COLUMNS
        ))
        .bind(member_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(qualification_from_row).collect()
    }

    async fn commit_evaluation(&self, commit: EvaluationCommit<'_>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        if let Some(bonus) = commit.achievement_bonus {
            insert_commission(&mut tx, bonus).await?;
        }
        if let Some(change) = commit.change {
            insert_tier_change(&mut tx, change).await?;
            set_member_tier(&mut tx, &commit.qualification.member_id, &change.to_tier).await?;
        }
        upsert_qualification(&mut tx, commit.qualification).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TierChangeSink for Repository {
    async fn record_tier_change(&self, change: &TierChange) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_tier_change(&mut conn, change).await
    }

    async fn tier_changes_for(&self, member_id: &MemberId) -> Result<Vec<TierChange>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT member_id, from_tier, to_tier, reason, active_referrals, team_volume,
                   period, changed_at
            FROM tier_changes
            WHERE member_id = ?
            ORDER BY period ASC, id ASC
            "#,
        )
        .bind(member_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tier_change_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{member, repo};
    use super::*;
    use crate::domain::Decimal;
    use crate::store::MemberDirectory;

    fn row(tier: &str, period: &str, consecutive: u32, permanent: bool) -> TierQualification {
        TierQualification {
            member_id: MemberId::new("m"),
            tier_id: TierId::new(tier),
            active_referrals: 4,
            team_volume: Decimal::from_str_canonical("41000.50").unwrap(),
            consecutive_months: consecutive,
            is_permanent: permanent,
            period: period.parse().unwrap(),
            evaluated_at: TimeMs::new(7),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_supersede() {
        let (_dir, repo) = repo().await;
        let m = MemberId::new("m");
        assert_eq!(repo.current_qualification(&m).await.unwrap(), None);

        repo.save_qualification(&row("silver", "2026-01", 1, false)).await.unwrap();
        repo.save_qualification(&row("silver", "2026-02", 2, false)).await.unwrap();
        assert_eq!(
            repo.current_qualification(&m).await.unwrap(),
            Some(row("silver", "2026-02", 2, false))
        );

        repo.save_qualification(&row("gold", "2026-03", 1, false)).await.unwrap();
        let current = repo.current_qualification(&m).await.unwrap().unwrap();
        assert_eq!(current.tier_id, TierId::new("gold"));

        let history = repo.qualification_history(&m).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tier_id, TierId::new("silver"));
    }

    #[tokio::test]
    async fn test_returning_to_a_tier_revives_its_row() {
        let (_dir, repo) = repo().await;
        let m = MemberId::new("m");
        repo.save_qualification(&row("gold", "2026-01", 3, true)).await.unwrap();
        repo.save_qualification(&row("silver", "2026-02", 1, false)).await.unwrap();
        repo.save_qualification(&row("gold", "2026-03", 1, false)).await.unwrap();
        let current = repo.current_qualification(&m).await.unwrap().unwrap();
        assert_eq!(current, row("gold", "2026-03", 1, false));
    }

    #[tokio::test]
    async fn test_tier_change_once_per_period() {
        let (_dir, repo) = repo().await;
        let change = TierChange {
            member_id: MemberId::new("m"),
            from_tier: TierId::new("silver"),
            to_tier: TierId::new("gold"),
            reason: TierChangeReason::Advancement,
            active_referrals: 5,
            team_volume: Decimal::from_i64(60_000),
            period: "2026-02".parse().unwrap(),
            changed_at: TimeMs::new(11),
        };
        assert!(repo.record_tier_change(&change).await.unwrap());
        assert!(!repo.record_tier_change(&change).await.unwrap());
        assert_eq!(repo.tier_changes_for(&MemberId::new("m")).await.unwrap(), vec![change]);
    }

    #[tokio::test]
    async fn test_commit_evaluation_rolls_back_as_a_unit() {
        let (_dir, repo) = repo().await;
        repo.insert_member(&member("m", None)).await.unwrap();
        let change = |who: &str| TierChange {
            member_id: MemberId::new(who),
            from_tier: TierId::new("basic"),
            to_tier: TierId::new("silver"),
            reason: TierChangeReason::Advancement,
            active_referrals: 4,
            team_volume: Decimal::from_i64(41_000),
            period: "2026-01".parse().unwrap(),
            changed_at: TimeMs::new(7),
        };

        // No such member: the tier change written first must not survive.
        let ghost = TierQualification {
            member_id: MemberId::new("ghost"),
            ..row("silver", "2026-01", 1, false)
        };
        let err = repo
            .commit_evaluation(EvaluationCommit {
                qualification: &ghost,
                change: Some(&change("ghost")),
                achievement_bonus: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(repo.tier_changes_for(&MemberId::new("ghost")).await.unwrap().is_empty());
        assert_eq!(repo.current_qualification(&MemberId::new("ghost")).await.unwrap(), None);

        let q = row("silver", "2026-01", 1, false);
        repo.commit_evaluation(EvaluationCommit {
            qualification: &q,
            change: Some(&change("m")),
            achievement_bonus: None,
        })
        .await
        .unwrap();
        let m = repo.get_member(&MemberId::new("m")).await.unwrap().unwrap();
        assert_eq!(m.tier_id, TierId::new("silver"));
        assert_eq!(repo.tier_changes_for(&m.id).await.unwrap(), vec![change("m")]);
        assert_eq!(repo.current_qualification(&m.id).await.unwrap(), Some(q));
    }
}
