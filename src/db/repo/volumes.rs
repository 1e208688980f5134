//! Team volume credits and period revenue.
//!
//! Volumes are TEXT decimals, so accumulation happens in Rust inside the
//! write transaction opened by the credit row.

use super::{decimal_col, Repository};
use crate::domain::{Decimal, MemberId, PeriodId, TeamVolume, TransactionId};
use crate::store::{StoreError, VolumeLedger};
use async_trait::async_trait;
use sqlx::Row;

#[async_trait]
impl VolumeLedger for Repository {
    async fn credit_team_volume(
        &self,
        transaction_id: &TransactionId,
        period: PeriodId,
        beneficiaries: &[MemberId],
        amount: Decimal,
    ) -> Result<bool, StoreError> {
        let period_key = period.to_string();
        let mut tx = self.pool.begin().await?;

        // Writing the credit row first takes the write lock before any read.
        let credited = sqlx::query(
            r#"
            INSERT INTO team_volume_credits (transaction_id, period, amount)
            VALUES (?, ?, ?)
            ON CONFLICT(transaction_id) DO NOTHING
            "#,
        )
        .bind(transaction_id.as_str())
        .bind(period_key.as_str())
        .bind(amount.to_canonical_string())
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for member_id in beneficiaries {
            let current = sqlx::query(
                "SELECT volume FROM team_volumes WHERE member_id = ? AND period = ?",
            )
            .bind(member_id.as_str())
            .bind(period_key.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            let current = match current {
                Some(row) => decimal_col(&row, "volume")?,
                None => Decimal::zero(),
            };

            sqlx::query(
                r#"
                INSERT INTO team_volumes (member_id, period, volume)
                VALUES (?, ?, ?)
                ON CONFLICT(member_id, period) DO UPDATE SET volume = excluded.volume
                "#,
            )
            .bind(member_id.as_str())
            .bind(period_key.as_str())
            .bind((current + amount).to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn team_volume(
        &self,
        member_id: &MemberId,
        period: PeriodId,
    ) -> Result<Decimal, StoreError> {
        let row = sqlx::query("SELECT volume FROM team_volumes WHERE member_id = ? AND period = ?")
            .bind(member_id.as_str())
            .bind(period.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => decimal_col(&row, "volume"),
            None => Ok(Decimal::zero()),
        }
    }

    async fn team_volumes_for_period(
        &self,
        period: PeriodId,
    ) -> Result<Vec<TeamVolume>, StoreError> {
        let rows = sqlx::query(
            "SELECT member_id, volume FROM team_volumes WHERE period = ? ORDER BY member_id ASC",
        )
        .bind(period.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut volumes = Vec::with_capacity(rows.len());
        for row in &rows {
            let volume = decimal_col(row, "volume")?;
            if volume.is_zero() {
                continue;
            }
            volumes.push(TeamVolume {
                member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
                period,
                volume,
            });
        }
        Ok(volumes)
    }

    /// Summed in Rust: SQLite's SUM over TEXT would go through REAL.
    async fn period_revenue(&self, period: PeriodId) -> Result<Decimal, StoreError> {
        let rows = sqlx::query("SELECT amount FROM team_volume_credits WHERE period = ?")
            .bind(period.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut sum = Decimal::zero();
        for row in &rows {
            sum += decimal_col(row, "amount")?;
        }
        Ok(sum)
    }
}
