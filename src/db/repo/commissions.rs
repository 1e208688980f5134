//! Commission records and compliance review flags.

use super::{decimal_col, parse_col, u32_col, Repository};
use crate::domain::{
    Commission, CommissionId, CommissionStatus, CommissionType, MemberId, PeriodId, TimeMs,
    TransactionId,
};
use crate::engine::{ComplianceScope, ComplianceViolation};
use crate::store::{CommissionSink, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const COMMISSION_COLUMNS: &str = "id, beneficiary_member_id, source_transaction_id, \
    source_member_id, level, commission_type, source_amount, base_rate, tier_multiplier, \
    performance_multiplier, amount, status, period, earned_at, paid_at, reverses";

fn commission_from_row(row: &SqliteRow) -> Result<Commission, StoreError> {
    Ok(Commission {
        id: CommissionId::new(row.try_get::<String, _>("id")?),
        beneficiary_member_id: MemberId::new(row.try_get::<String, _>("beneficiary_member_id")?),
        source_transaction_id: TransactionId::new(
            row.try_get::<String, _>("source_transaction_id")?,
        ),
        source_member_id: MemberId::new(row.try_get::<String, _>("source_member_id")?),
        level: u32_col(row, "level")?,
        commission_type: parse_col::<CommissionType>(row, "commission_type")?,
        source_amount: decimal_col(row, "source_amount")?,
        base_rate: decimal_col(row, "base_rate")?,
        tier_multiplier: decimal_col(row, "tier_multiplier")?,
        performance_multiplier: decimal_col(row, "performance_multiplier")?,
        amount: decimal_col(row, "amount")?,
        status: parse_col::<CommissionStatus>(row, "status")?,
        period: parse_col::<PeriodId>(row, "period")?,
        earned_at: TimeMs::new(row.try_get("earned_at")?),
        paid_at: row.try_get::<Option<i64>, _>("paid_at")?.map(TimeMs::new),
        reverses: row
            .try_get::<Option<String>, _>("reverses")?
            .map(CommissionId::new),
    })
}

fn scope_key(scope: &ComplianceScope) -> (&'static str, String) {
    match scope {
        ComplianceScope::Transaction(id) => ("transaction", id.to_string()),
        ComplianceScope::Period(period) => ("period", period.to_string()),
    }
}

fn violation_from_row(row: &SqliteRow) -> Result<ComplianceViolation, StoreError> {
    let kind: String = row.try_get("scope_kind")?;
    let scope = match kind.as_str() {
        "transaction" => ComplianceScope::Transaction(TransactionId::new(
            row.try_get::<String, _>("scope_id")?,
        )),
        "period" => ComplianceScope::Period(parse_col::<PeriodId>(row, "scope_id")?),
        other => return Err(StoreError::Corrupt(format!("scope_kind = {:?}", other))),
    };
    Ok(ComplianceViolation {
        scope,
        total_commissions: decimal_col(row, "total_commissions")?,
        revenue: decimal_col(row, "revenue")?,
        cap_percent: decimal_col(row, "cap_percent")?,
        cap_amount: decimal_col(row, "cap_amount")?,
        excess: decimal_col(row, "excess")?,
    })
}

/// Insert one record unless its dedup key exists. True when written.
pub(super) async fn insert_commission(
    conn: &mut SqliteConnection,
    c: &Commission,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO commissions
            (id, beneficiary_member_id, source_transaction_id, source_member_id, level,
             commission_type, source_amount, base_rate, tier_multiplier,
             performance_multiplier, amount, status, period, earned_at, paid_at, reverses)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(c.id.as_str())
    .bind(c.beneficiary_member_id.as_str())
    .bind(c.source_transaction_id.as_str())
    .bind(c.source_member_id.as_str())
    .bind(c.level as i64)
    .bind(c.commission_type.as_str())
    .bind(c.source_amount.to_canonical_string())
    .bind(c.base_rate.to_canonical_string())
    .bind(c.tier_multiplier.to_canonical_string())
    .bind(c.performance_multiplier.to_canonical_string())
    .bind(c.amount.to_canonical_string())
    .bind(c.status.to_string())
    .bind(c.period.to_string())
    .bind(c.earned_at.as_ms())
    .bind(c.paid_at.map(|t| t.as_ms()))
    .bind(c.reverses.as_ref().map(|r| r.as_str()))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl CommissionSink for Repository {
    /// One transaction for the whole batch: either every new record lands or
    /// none do.
    async fn record_commissions(&self, commissions: &[Commission]) -> Result<usize, StoreError> {
        if commissions.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for c in commissions {
            if insert_commission(&mut tx, c).await? {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    async fn get_commission(&self, id: &CommissionId) -> Result<Option<Commission>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM commissions WHERE id = ?",
            COMMISSION_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(commission_from_row).transpose()
    }

    async fn commissions_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Commission>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM commissions WHERE source_transaction_id = ? \
             ORDER BY level ASC, beneficiary_member_id ASC",
            COMMISSION_COLUMNS
        ))
        .bind(transaction_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn commissions_for_period(
        &self,
        period: PeriodId,
    ) -> Result<Vec<Commission>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM commissions WHERE period = ? ORDER BY id ASC",
            COMMISSION_COLUMNS
        ))
        .bind(period.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(commission_from_row).collect()
    }

    async fn update_commission_status(
        &self,
        id: &CommissionId,
        from: CommissionStatus,
        to: CommissionStatus,
        paid_at: Option<TimeMs>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE commissions
            SET status = ?, paid_at = COALESCE(?, paid_at)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.to_string())
        .bind(paid_at.map(|t| t.as_ms()))
        .bind(id.as_str())
        .bind(from.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_commission(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("commission {}", id))),
        }
    }

    async fn flag_for_review(
        &self,
        violation: &ComplianceViolation,
        flagged_at: TimeMs,
    ) -> Result<bool, StoreError> {
        let (kind, scope_id) = scope_key(&violation.scope);
        let result = sqlx::query(
            r#"
            INSERT INTO compliance_reviews
                (scope_kind, scope_id, total_commissions, revenue, cap_percent, cap_amount,
                 excess, flagged_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scope_kind, scope_id) DO NOTHING
            "#,
        )
        .bind(kind)
        .bind(scope_id)
        .bind(violation.total_commissions.to_canonical_string())
        .bind(violation.revenue.to_canonical_string())
        .bind(violation.cap_percent.to_canonical_string())
        .bind(violation.cap_amount.to_canonical_string())
        .bind(violation.excess.to_canonical_string())
        .bind(flagged_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn review_flags(&self) -> Result<Vec<ComplianceViolation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT scope_kind, scope_id, total_commissions, revenue, cap_percent, cap_amount, excess
            FROM compliance_reviews
            ORDER BY flagged_at ASC, scope_kind ASC, scope_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(violation_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::repo;
    use super::*;
    use crate::domain::Decimal;
    use crate::engine::check_cap;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn commission(tx: &str, beneficiary: &str, level: u32) -> Commission {
        let tx = TransactionId::new(tx);
        let beneficiary = MemberId::new(beneficiary);
        Commission {
            id: Commission::compute_id(&tx, &beneficiary, level, CommissionType::Referral),
            beneficiary_member_id: beneficiary,
            source_transaction_id: tx,
            source_member_id: MemberId::new("buyer"),
            level,
            commission_type: CommissionType::Referral,
            source_amount: d("10000"),
            base_rate: d("12"),
            tier_multiplier: d("1.2"),
            performance_multiplier: d("1.1"),
            amount: d("1584"),
            status: CommissionStatus::Pending,
            period: "2026-01".parse().unwrap(),
            earned_at: TimeMs::new(42),
            paid_at: None,
            reverses: None,
        }
    }

    #[tokio::test]
    async fn test_record_is_idempotent_and_lossless() {
        let (_dir, repo) = repo().await;
        let batch = vec![commission("tx-1", "s1", 1), commission("tx-1", "s2", 2)];
        assert_eq!(repo.record_commissions(&batch).await.unwrap(), 2);
        assert_eq!(repo.record_commissions(&batch).await.unwrap(), 0);

        let stored = repo
            .commissions_for_transaction(&TransactionId::new("tx-1"))
            .await
            .unwrap();
        assert_eq!(stored, batch);

        let period = repo.commissions_for_period("2026-01".parse().unwrap()).await.unwrap();
        assert_eq!(period.len(), 2);
        assert!(repo
            .commissions_for_period("2026-02".parse().unwrap())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let (_dir, repo) = repo().await;
        let c = commission("tx-1", "s1", 1);
        repo.record_commissions(std::slice::from_ref(&c)).await.unwrap();

        let paid = repo
            .update_commission_status(
                &c.id,
                CommissionStatus::Pending,
                CommissionStatus::Paid,
                Some(TimeMs::new(99)),
            )
            .await
            .unwrap();
        assert!(paid);
        let again = repo
            .update_commission_status(&c.id, CommissionStatus::Pending, CommissionStatus::Disputed, None)
            .await
            .unwrap();
        assert!(!again);

        let stored = repo.get_commission(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommissionStatus::Paid);
        assert_eq!(stored.paid_at, Some(TimeMs::new(99)));

        let missing = repo
            .update_commission_status(
                &CommissionId::new("cm:none"),
                CommissionStatus::Pending,
                CommissionStatus::Paid,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_review_flags_once_per_scope() {
        let (_dir, repo) = repo().await;
        let violation = check_cap(
            ComplianceScope::Period("2026-01".parse().unwrap()),
            d("3000"),
            d("10000"),
            d("25"),
        )
        .unwrap();
        assert!(repo.flag_for_review(&violation, TimeMs::new(1)).await.unwrap());
        assert!(!repo.flag_for_review(&violation, TimeMs::new(2)).await.unwrap());
        assert_eq!(repo.review_flags().await.unwrap(), vec![violation]);
    }
}
