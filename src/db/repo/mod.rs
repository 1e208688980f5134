//! Repository layer for database operations.
//!
//! `Repository` implements the store traits over SQLite. Methods are organized
//! across submodules by concern:
//! - `mod.rs` - members and sponsorship
//! - `matrix.rs` - matrix positions and slot claims
//! - `commissions.rs` - commission records and compliance reviews
//! - `volumes.rs` - team volume credits and period revenue
//! - `qualifications.rs` - qualification rows and tier changes

mod commissions;
mod matrix;
mod qualifications;
mod volumes;

use crate::domain::{Decimal, Member, MemberId, MemberStatus, TierId, TimeMs};
use crate::store::{MemberDirectory, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use std::fmt::Display;
use std::str::FromStr;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a TEXT column into a typed value, reporting the column on failure.
pub(crate) fn parse_col<T>(row: &SqliteRow, col: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(col)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(format!("{} = {:?}: {}", col, raw, e)))
}

pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str_canonical(&raw)
        .map_err(|e| StoreError::Corrupt(format!("{} = {:?}: {}", col, raw, e)))
}

pub(crate) fn u32_col(row: &SqliteRow, col: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(col)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{} = {} out of range", col, raw)))
}

fn member_from_row(row: &SqliteRow) -> Result<Member, StoreError> {
    let performance_score: Option<String> = row.try_get("performance_score")?;
    let performance_score = performance_score
        .map(|raw| {
            Decimal::from_str_canonical(&raw).map_err(|e| {
                StoreError::Corrupt(format!("performance_score = {:?}: {}", raw, e))
            })
        })
        .transpose()?;

    Ok(Member {
        id: MemberId::new(row.try_get::<String, _>("id")?),
        sponsor_id: row
            .try_get::<Option<String>, _>("sponsor_id")?
            .map(MemberId::new),
        tier_id: TierId::new(row.try_get::<String, _>("tier_id")?),
        joined_at: TimeMs::new(row.try_get("joined_at")?),
        status: parse_col::<MemberStatus>(row, "status")?,
        performance_score,
    })
}

const MEMBER_COLUMNS: &str = "id, sponsor_id, tier_id, joined_at, status, performance_score";

#[async_trait]
impl MemberDirectory for Repository {
    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM members WHERE id = ?", MEMBER_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn get_sponsor_chain(
        &self,
        id: &MemberId,
        max_depth: u32,
    ) -> Result<Vec<Member>, StoreError> {
        // Walk parent links one lookup at a time; the forest invariant is
        // enforced on insert so the walk terminates.
        let mut chain = Vec::new();
        let mut cursor = self.get_member(id).await?.and_then(|m| m.sponsor_id);
        while let Some(sponsor_id) = cursor {
            if chain.len() >= max_depth as usize {
                break;
            }
            let sponsor = self
                .get_member(&sponsor_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("sponsor {}", sponsor_id)))?;
            cursor = sponsor.sponsor_id.clone();
            chain.push(sponsor);
        }
        Ok(chain)
    }

    async fn get_direct_referrals(&self, id: &MemberId) -> Result<Vec<Member>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM members WHERE sponsor_id = ? ORDER BY id ASC",
            MEMBER_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn list_member_ids(&self) -> Result<Vec<MemberId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM members ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok(MemberId::new(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO members (id, sponsor_id, tier_id, joined_at, status, performance_score)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(member.id.as_str())
        .bind(member.sponsor_id.as_ref().map(|s| s.as_str()))
        .bind(member.tier_id.as_str())
        .bind(member.joined_at.as_ms())
        .bind(member.status.to_string())
        .bind(member.performance_score.map(|s| s.to_canonical_string()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("member {} exists", member.id)));
        }
        Ok(())
    }

    async fn update_member_tier(&self, id: &MemberId, tier_id: &TierId) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        set_member_tier(&mut conn, id, tier_id).await
    }
}

pub(crate) async fn set_member_tier(
    conn: &mut SqliteConnection,
    id: &MemberId,
    tier_id: &TierId,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE members SET tier_id = ? WHERE id = ?")
        .bind(tier_id.as_str())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("member {}", id)));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{member, repo};
    use super::*;

    #[tokio::test]
    async fn test_member_roundtrip_with_score() {
        let (_dir, repo) = repo().await;
        let m = member("a", None)
            .with_performance_score(Decimal::from_str_canonical("8.5").unwrap())
            .with_status(MemberStatus::Inactive);
        repo.insert_member(&m).await.unwrap();
        assert_eq!(repo.get_member(&MemberId::new("a")).await.unwrap(), Some(m));
        assert_eq!(repo.get_member(&MemberId::new("zz")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_member_is_conflict() {
        let (_dir, repo) = repo().await;
        repo.insert_member(&member("a", None)).await.unwrap();
        let err = repo.insert_member(&member("a", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_sponsor_rejected_by_foreign_key() {
        let (_dir, repo) = repo().await;
        let err = repo.insert_member(&member("b", Some("ghost"))).await.unwrap_err();
        assert!(matches!(err, StoreError::Db(_)));
    }

    #[tokio::test]
    async fn test_sponsor_chain_and_referrals() {
        let (_dir, repo) = repo().await;
        repo.insert_member(&member("a", None)).await.unwrap();
        repo.insert_member(&member("b", Some("a"))).await.unwrap();
        repo.insert_member(&member("c", Some("b"))).await.unwrap();
        repo.insert_member(&member("d", Some("b"))).await.unwrap();

        let chain = repo.get_sponsor_chain(&MemberId::new("c"), 5).await.unwrap();
        let ids: Vec<_> = chain.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(repo.get_sponsor_chain(&MemberId::new("c"), 1).await.unwrap().len(), 1);

        let referrals = repo.get_direct_referrals(&MemberId::new("b")).await.unwrap();
        let ids: Vec<_> = referrals.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        assert_eq!(repo.list_member_ids().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_update_member_tier() {
        let (_dir, repo) = repo().await;
        repo.insert_member(&member("a", None)).await.unwrap();
        repo.update_member_tier(&MemberId::new("a"), &TierId::new("gold"))
            .await
            .unwrap();
        let m = repo.get_member(&MemberId::new("a")).await.unwrap().unwrap();
        assert_eq!(m.tier_id, TierId::new("gold"));

        let err = repo
            .update_member_tier(&MemberId::new("zz"), &TierId::new("gold"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
