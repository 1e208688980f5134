//! Matrix position operations for the repository.

use super::{u32_col, Repository};
use crate::domain::{MatrixPosition, MemberId, PositionId, SlotClaim, SlotTarget, TimeMs};
use crate::store::{MatrixStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const POSITION_COLUMNS: &str = "id, member_id, root_sponsor_id, level, slot_index, row_offset, \
                                parent_position_id, is_spillover, placed_at";

fn position_from_row(row: &SqliteRow) -> Result<MatrixPosition, StoreError> {
    let row_offset: i64 = row.try_get("row_offset")?;
    Ok(MatrixPosition {
        id: PositionId(row.try_get("id")?),
        member_id: MemberId::new(row.try_get::<String, _>("member_id")?),
        root_sponsor_id: MemberId::new(row.try_get::<String, _>("root_sponsor_id")?),
        level: u32_col(row, "level")?,
        slot_index: u32_col(row, "slot_index")?,
        row_offset: u64::try_from(row_offset)
            .map_err(|_| StoreError::Corrupt(format!("row_offset = {}", row_offset)))?,
        parent_position_id: row
            .try_get::<Option<i64>, _>("parent_position_id")?
            .map(PositionId),
        is_spillover: row.try_get("is_spillover")?,
        placed_at: TimeMs::new(row.try_get("placed_at")?),
    })
}

#[async_trait]
impl MatrixStore for Repository {
    async fn get_position(
        &self,
        root_sponsor_id: &MemberId,
        member_id: &MemberId,
    ) -> Result<Option<MatrixPosition>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM matrix_positions WHERE root_sponsor_id = ? AND member_id = ?",
            POSITION_COLUMNS
        ))
        .bind(root_sponsor_id.as_str())
        .bind(member_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn list_positions(
        &self,
        root_sponsor_id: &MemberId,
    ) -> Result<Vec<MatrixPosition>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM matrix_positions WHERE root_sponsor_id = ? \
             ORDER BY level ASC, row_offset ASC",
            POSITION_COLUMNS
        ))
        .bind(root_sponsor_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    /// The unique indexes on `(root, member)` and `(root, level, row_offset)`
    /// make the insert the atomic claim; `DO NOTHING` reports the loser.
    async fn claim_slot(
        &self,
        root_sponsor_id: &MemberId,
        member_id: &MemberId,
        target: &SlotTarget,
        placed_at: TimeMs,
    ) -> Result<SlotClaim, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO matrix_positions
                (member_id, root_sponsor_id, level, slot_index, row_offset,
                 parent_position_id, is_spillover, placed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(member_id.as_str())
        .bind(root_sponsor_id.as_str())
        .bind(target.level as i64)
        .bind(target.slot_index as i64)
        .bind(target.row_offset as i64)
        .bind(target.parent_position_id.map(|p| p.0))
        .bind(target.is_spillover)
        .bind(placed_at.as_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            let position = target.into_position(
                PositionId(result.last_insert_rowid()),
                member_id.clone(),
                root_sponsor_id.clone(),
                placed_at,
            );
            return Ok(SlotClaim::Claimed(position));
        }

        match self.get_position(root_sponsor_id, member_id).await? {
            Some(existing) => Ok(SlotClaim::AlreadyPlaced(existing)),
            None => Ok(SlotClaim::Collision),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{member, repo};
    use super::*;
    use crate::store::MemberDirectory;

    fn level_one(slot: u32) -> SlotTarget {
        SlotTarget {
            level: 1,
            slot_index: slot,
            row_offset: slot as u64,
            parent_position_id: None,
            is_spillover: false,
        }
    }

    #[tokio::test]
    async fn test_claim_then_collision_then_already_placed() {
        let (_dir, repo) = repo().await;
        for (id, sponsor) in [("a", None), ("b", Some("a")), ("c", Some("a"))] {
            repo.insert_member(&member(id, sponsor)).await.unwrap();
        }
        let root = MemberId::new("a");

        let claimed = repo
            .claim_slot(&root, &MemberId::new("b"), &level_one(0), TimeMs::new(5))
            .await
            .unwrap();
        let SlotClaim::Claimed(position) = claimed else {
            panic!("expected claim, got {:?}", claimed);
        };
        assert_eq!(position.level, 1);

        let collision = repo
            .claim_slot(&root, &MemberId::new("c"), &level_one(0), TimeMs::new(6))
            .await
            .unwrap();
        assert_eq!(collision, SlotClaim::Collision);

        let again = repo
            .claim_slot(&root, &MemberId::new("b"), &level_one(1), TimeMs::new(7))
            .await
            .unwrap();
        assert_eq!(again, SlotClaim::AlreadyPlaced(position.clone()));

        assert_eq!(
            repo.get_position(&root, &MemberId::new("b")).await.unwrap(),
            Some(position)
        );
    }

    #[tokio::test]
    async fn test_list_positions_is_level_ordered() {
        let (_dir, repo) = repo().await;
        for (id, sponsor) in [("a", None), ("b", Some("a")), ("c", Some("a")), ("d", Some("a"))] {
            repo.insert_member(&member(id, sponsor)).await.unwrap();
        }
        let root = MemberId::new("a");
        let SlotClaim::Claimed(b) = repo
            .claim_slot(&root, &MemberId::new("b"), &level_one(1), TimeMs::new(1))
            .await
            .unwrap()
        else {
            panic!("claim failed");
        };
        let spill = SlotTarget {
            level: 2,
            slot_index: 0,
            row_offset: 3,
            parent_position_id: Some(b.id),
            is_spillover: true,
        };
        repo.claim_slot(&root, &MemberId::new("d"), &spill, TimeMs::new(2))
            .await
            .unwrap();
        repo.claim_slot(&root, &MemberId::new("c"), &level_one(0), TimeMs::new(3))
            .await
            .unwrap();

        let positions = repo.list_positions(&root).await.unwrap();
        let ids: Vec<_> = positions.iter().map(|p| p.member_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "d"]);
        assert!(positions[2].is_spillover);
        assert_eq!(positions[2].parent_position_id, Some(b.id));
        assert!(repo.list_positions(&MemberId::new("b")).await.unwrap().is_empty());
    }
}
