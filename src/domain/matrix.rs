//! Matrix placement records.

use crate::domain::{MemberId, PositionId, TimeMs};
use serde::{Deserialize, Serialize};

/// Placement of a member inside a sponsor-rooted fixed-width tree.
///
/// The root sponsor itself is not a position; its children sit at level 1.
/// Positions are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixPosition {
    pub id: PositionId,
    pub member_id: MemberId,
    pub root_sponsor_id: MemberId,
    /// 1-based depth below the root sponsor.
    pub level: u32,
    /// 0-based slot within the parent.
    pub slot_index: u32,
    /// Left-to-right index across the whole level; unique per (root, level).
    pub row_offset: u64,
    /// `None` for level-1 positions, whose parent is the root sponsor.
    pub parent_position_id: Option<PositionId>,
    pub is_spillover: bool,
    pub placed_at: TimeMs,
}

/// A free slot chosen by the placement search, not yet claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTarget {
    pub level: u32,
    pub slot_index: u32,
    pub row_offset: u64,
    pub parent_position_id: Option<PositionId>,
    pub is_spillover: bool,
}

impl SlotTarget {
    /// Materialize the target into a position once the store has assigned an id.
    pub fn into_position(
        self,
        id: PositionId,
        member_id: MemberId,
        root_sponsor_id: MemberId,
        placed_at: TimeMs,
    ) -> MatrixPosition {
        MatrixPosition {
            id,
            member_id,
            root_sponsor_id,
            level: self.level,
            slot_index: self.slot_index,
            row_offset: self.row_offset,
            parent_position_id: self.parent_position_id,
            is_spillover: self.is_spillover,
            placed_at,
        }
    }
}

/// Result of an atomic slot claim against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClaim {
    /// The slot was free and now holds the member.
    Claimed(MatrixPosition),
    /// The member already had a position under this root.
    AlreadyPlaced(MatrixPosition),
    /// Another member took the slot first; search again.
    Collision,
}
