//! Fixed-width matrix placement with breadth-first spillover.

use crate::domain::{MatrixPosition, MemberId, PositionId, SlotTarget};
use std::collections::{HashMap, VecDeque};

/// Snapshot of one root sponsor's matrix tree.
///
/// Built from the flat position records of a single root; the search never
/// crosses into another root's tree.
#[derive(Debug, Clone)]
pub struct MatrixTree {
    root_sponsor_id: MemberId,
    positions: Vec<MatrixPosition>,
    /// parent -> child indices into `positions`, sorted by slot.
    children: HashMap<Option<PositionId>, Vec<usize>>,
}

impl MatrixTree {
    pub fn new(root_sponsor_id: MemberId, positions: Vec<MatrixPosition>) -> Self {
        let mut children: HashMap<Option<PositionId>, Vec<usize>> = HashMap::new();
        for (idx, position) in positions.iter().enumerate() {
            children
                .entry(position.parent_position_id)
                .or_default()
                .push(idx);
        }
        for kids in children.values_mut() {
            kids.sort_by_key(|&idx| positions[idx].slot_index);
        }
        MatrixTree {
            root_sponsor_id,
            positions,
            children,
        }
    }

    pub fn root_sponsor_id(&self) -> &MemberId {
        &self.root_sponsor_id
    }

    pub fn position_of(&self, member_id: &MemberId) -> Option<&MatrixPosition> {
        self.positions.iter().find(|p| &p.member_id == member_id)
    }

    /// Number of members placed under the root.
    pub fn downline_count(&self) -> usize {
        self.positions.len()
    }

    /// Deepest occupied level, 0 for an empty tree.
    pub fn depth(&self) -> u32 {
        self.positions.iter().map(|p| p.level).max().unwrap_or(0)
    }

    fn children_of(&self, parent: Option<PositionId>) -> &[usize] {
        self.children
            .get(&parent)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Positions in breadth-first order: by level, then left to right.
    pub fn bfs_order(&self) -> Vec<&MatrixPosition> {
        let mut ordered = Vec::with_capacity(self.positions.len());
        let mut queue: VecDeque<usize> = self.children_of(None).iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            let position = &self.positions[idx];
            ordered.push(position);
            queue.extend(self.children_of(Some(position.id)).iter().copied());
        }
        ordered
    }

    /// Find the slot a new member lands in.
    ///
    /// The root's own row is tried first (direct placement). Once it is full,
    /// positions are visited breadth-first, left to right, and the first one
    /// with a free child slot receives the member as spillover. Returns `None`
    /// when every slot within `max_levels` is taken, or when the slot's row
    /// offset does not fit in a `u64`.
    pub fn find_open_slot(&self, width: u32, max_levels: u32) -> Option<SlotTarget> {
        if width == 0 || max_levels == 0 {
            return None;
        }

        let root_row = self.children_of(None);
        if let Some(slot) = first_free_slot(&self.positions, root_row, width) {
            return Some(SlotTarget {
                level: 1,
                slot_index: slot,
                row_offset: slot as u64,
                parent_position_id: None,
                is_spillover: false,
            });
        }

        let mut queue: VecDeque<usize> = root_row.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            let parent = &self.positions[idx];
            if parent.level >= max_levels {
                // Breadth-first: every later entry is at least this deep.
                break;
            }
            let kids = self.children_of(Some(parent.id));
            if let Some(slot) = first_free_slot(&self.positions, kids, width) {
                let row_offset = parent
                    .row_offset
                    .checked_mul(u64::from(width))?
                    .checked_add(u64::from(slot))?;
                return Some(SlotTarget {
                    level: parent.level + 1,
                    slot_index: slot,
                    row_offset,
                    parent_position_id: Some(parent.id),
                    is_spillover: true,
                });
            }
            queue.extend(kids.iter().copied());
        }

        None
    }
}

fn first_free_slot(positions: &[MatrixPosition], occupied: &[usize], width: u32) -> Option<u32> {
    (0..width).find(|slot| !occupied.iter().any(|&idx| positions[idx].slot_index == *slot))
}
