//! In-memory store for tests and embedding.

use super::{
    CommissionSink, EvaluationCommit, MatrixStore, MemberDirectory, QualificationStore, StoreError,
    TierChangeSink, VolumeLedger,
};
use crate::domain::{
    Commission, CommissionId, CommissionStatus, CommissionType, Decimal, MatrixPosition, Member,
    MemberId, PeriodId, PositionId, SlotClaim, SlotTarget, TeamVolume, TierChange, TierId,
    TierQualification, TimeMs, TransactionId,
};
use crate::engine::{ComplianceScope, ComplianceViolation};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

type DedupKey = (TransactionId, MemberId, u32, CommissionType);

#[derive(Debug, Default)]
struct Inner {
    members: BTreeMap<MemberId, Member>,
    positions: Vec<MatrixPosition>,
    next_position_id: i64,
    commissions: BTreeMap<CommissionId, Commission>,
    dedup: HashSet<DedupKey>,
    reviews: Vec<ComplianceViolation>,
    credited: HashSet<TransactionId>,
    volumes: BTreeMap<(PeriodId, MemberId), Decimal>,
    revenue: HashMap<PeriodId, Decimal>,
    /// (row, superseded)
    qualifications: Vec<(TierQualification, bool)>,
    tier_changes: Vec<TierChange>,
}

impl Inner {
    fn insert_commission(&mut self, commission: &Commission) -> bool {
        if !self.dedup.insert(commission.dedup_key()) {
            return false;
        }
        self.commissions
            .insert(commission.id.clone(), commission.clone());
        true
    }

    fn set_member_tier(&mut self, id: &MemberId, tier_id: &TierId) -> Result<(), StoreError> {
        let member = self
            .members
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("member {}", id)))?;
        member.tier_id = tier_id.clone();
        Ok(())
    }

    fn upsert_qualification(&mut self, qualification: &TierQualification) {
        let mut replaced = false;
        for (row, superseded) in self
            .qualifications
            .iter_mut()
            .filter(|(q, _)| q.member_id == qualification.member_id)
        {
            if row.tier_id == qualification.tier_id {
                *row = qualification.clone();
                *superseded = false;
                replaced = true;
            } else {
                *superseded = true;
            }
        }
        if !replaced {
            self.qualifications.push((qualification.clone(), false));
        }
    }

    fn insert_tier_change(&mut self, change: &TierChange) -> bool {
        let duplicate = self
            .tier_changes
            .iter()
            .any(|c| c.member_id == change.member_id && c.period == change.period);
        if !duplicate {
            self.tier_changes.push(change.clone());
        }
        !duplicate
    }
}

/// Store backed by in-process maps.
///
/// Stat lookups can be made to fail or stall per member, slot claims can be
/// made to collide and evaluation commits can be made to fail, to exercise
/// the engine's isolation and retry paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    corrupt_stats: HashSet<MemberId>,
    slow_stats: HashMap<MemberId, Duration>,
    forced_collisions: AtomicU32,
    failed_commits: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make stat lookups for `member_id` fail with a corrupt-row error.
    pub fn with_corrupt_stats(mut self, member_id: MemberId) -> Self {
        self.corrupt_stats.insert(member_id);
        self
    }

    /// Delay stat lookups for `member_id`.
    pub fn with_slow_stats(mut self, member_id: MemberId, delay: Duration) -> Self {
        self.slow_stats.insert(member_id, delay);
        self
    }

    /// Report a collision for the next `count` slot claims.
    pub fn with_forced_collisions(self, count: u32) -> Self {
        self.forced_collisions.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` evaluation commits before anything is written.
    pub fn with_failed_commits(self, count: u32) -> Self {
        self.failed_commits.store(count, Ordering::SeqCst);
        self
    }

    async fn stats_gate(&self, member_id: &MemberId) -> Result<(), StoreError> {
        if let Some(delay) = self.slow_stats.get(member_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.corrupt_stats.contains(member_id) {
            return Err(StoreError::Corrupt(format!("stats for member {}", member_id)));
        }
        Ok(())
    }

    fn take_forced_collision(&self) -> bool {
        take_one(&self.forced_collisions)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl MemberDirectory for MemoryStore {
    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.inner.read().await.members.get(id).cloned())
    }

    async fn get_sponsor_chain(
        &self,
        id: &MemberId,
        max_depth: u32,
    ) -> Result<Vec<Member>, StoreError> {
        let inner = self.inner.read().await;
        let mut chain = Vec::new();
        let mut cursor = inner.members.get(id).and_then(|m| m.sponsor_id.clone());
        while let Some(sponsor_id) = cursor {
            if chain.len() >= max_depth as usize {
                break;
            }
            let sponsor = inner
                .members
                .get(&sponsor_id)
                .ok_or_else(|| StoreError::NotFound(format!("sponsor {}", sponsor_id)))?;
            cursor = sponsor.sponsor_id.clone();
            chain.push(sponsor.clone());
        }
        Ok(chain)
    }

    async fn get_direct_referrals(&self, id: &MemberId) -> Result<Vec<Member>, StoreError> {
        self.stats_gate(id).await?;
        Ok(self
            .inner
            .read()
            .await
            .members
            .values()
            .filter(|m| m.sponsor_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    async fn list_member_ids(&self) -> Result<Vec<MemberId>, StoreError> {
        Ok(self.inner.read().await.members.keys().cloned().collect())
    }

    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.members.contains_key(&member.id) {
            return Err(StoreError::Conflict(format!("member {} exists", member.id)));
        }
        inner.members.insert(member.id.clone(), member.clone());
        Ok(())
    }

    async fn update_member_tier(&self, id: &MemberId, tier_id: &TierId) -> Result<(), StoreError> {
        self.inner.write().await.set_member_tier(id, tier_id)
    }
}

#[async_trait]
impl MatrixStore for MemoryStore {
    async fn get_position(
        &self,
        root_sponsor_id: &MemberId,
        member_id: &MemberId,
    ) -> Result<Option<MatrixPosition>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .positions
            .iter()
            .find(|p| &p.root_sponsor_id == root_sponsor_id && &p.member_id == member_id)
            .cloned())
    }

    async fn list_positions(
        &self,
        root_sponsor_id: &MemberId,
    ) -> Result<Vec<MatrixPosition>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .positions
            .iter()
            .filter(|p| &p.root_sponsor_id == root_sponsor_id)
            .cloned()
            .collect())
    }

    async fn claim_slot(
        &self,
        root_sponsor_id: &MemberId,
        member_id: &MemberId,
        target: &SlotTarget,
        placed_at: TimeMs,
    ) -> Result<SlotClaim, StoreError> {
        let mut inner = self.inner.write().await;
        let in_root = |p: &&MatrixPosition| &p.root_sponsor_id == root_sponsor_id;

        if let Some(existing) = inner
            .positions
            .iter()
            .filter(in_root)
            .find(|p| &p.member_id == member_id)
        {
            return Ok(SlotClaim::AlreadyPlaced(existing.clone()));
        }
        if self.take_forced_collision() {
            return Ok(SlotClaim::Collision);
        }
        let occupied = inner
            .positions
            .iter()
            .filter(in_root)
            .any(|p| p.level == target.level && p.row_offset == target.row_offset);
        if occupied {
            return Ok(SlotClaim::Collision);
        }

        inner.next_position_id += 1;
        let position = target.into_position(
            PositionId(inner.next_position_id),
            member_id.clone(),
            root_sponsor_id.clone(),
            placed_at,
        );
        inner.positions.push(position.clone());
        Ok(SlotClaim::Claimed(position))
    }
}

#[async_trait]
impl CommissionSink for MemoryStore {
    async fn record_commissions(&self, commissions: &[Commission]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(commissions
            .iter()
            .filter(|c| inner.insert_commission(c))
            .count())
    }

    async fn get_commission(&self, id: &CommissionId) -> Result<Option<Commission>, StoreError> {
        Ok(self.inner.read().await.commissions.get(id).cloned())
    }

    async fn commissions_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Commission>, StoreError> {
        let inner = self.inner.read().await;
        let mut found: Vec<_> = inner
            .commissions
            .values()
            .filter(|c| &c.source_transaction_id == transaction_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| (c.level, c.beneficiary_member_id.clone()));
        Ok(found)
    }

    async fn commissions_for_period(
        &self,
        period: PeriodId,
    ) -> Result<Vec<Commission>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .commissions
            .values()
            .filter(|c| c.period == period)
            .cloned()
            .collect())
    }

    async fn update_commission_status(
        &self,
        id: &CommissionId,
        from: CommissionStatus,
        to: CommissionStatus,
        paid_at: Option<TimeMs>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.commissions.get_mut(id) {
            Some(c) if c.status == from => {
                c.status = to;
                if paid_at.is_some() {
                    c.paid_at = paid_at;
                }
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("commission {}", id))),
        }
    }

    async fn flag_for_review(
        &self,
        violation: &ComplianceViolation,
        _flagged_at: TimeMs,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let seen = |scope: &ComplianceScope| inner.reviews.iter().any(|v| &v.scope == scope);
        if seen(&violation.scope) {
            return Ok(false);
        }
        inner.reviews.push(violation.clone());
        Ok(true)
    }

    async fn review_flags(&self) -> Result<Vec<ComplianceViolation>, StoreError> {
        Ok(self.inner.read().await.reviews.clone())
    }
}

#[async_trait]
impl VolumeLedger for MemoryStore {
    async fn credit_team_volume(
        &self,
        transaction_id: &TransactionId,
        period: PeriodId,
        beneficiaries: &[MemberId],
        amount: Decimal,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.credited.insert(transaction_id.clone()) {
            return Ok(false);
        }
        for member_id in beneficiaries {
            *inner
                .volumes
                .entry((period, member_id.clone()))
                .or_default() += amount;
        }
        *inner.revenue.entry(period).or_default() += amount;
        Ok(true)
    }

    async fn team_volume(
        &self,
        member_id: &MemberId,
        period: PeriodId,
    ) -> Result<Decimal, StoreError> {
        self.stats_gate(member_id).await?;
        Ok(self
            .inner
            .read()
            .await
            .volumes
            .get(&(period, member_id.clone()))
            .copied()
            .unwrap_or_default())
    }

    async fn team_volumes_for_period(
        &self,
        period: PeriodId,
    ) -> Result<Vec<TeamVolume>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .volumes
            .range((period, MemberId::new(""))..)
            .take_while(|((p, _), _)| *p == period)
            .filter(|(_, volume)| !volume.is_zero())
            .map(|((p, member_id), volume)| TeamVolume {
                member_id: member_id.clone(),
                period: *p,
                volume: *volume,
            })
            .collect())
    }

    async fn period_revenue(&self, period: PeriodId) -> Result<Decimal, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .revenue
            .get(&period)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl QualificationStore for MemoryStore {
    async fn current_qualification(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<TierQualification>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .qualifications
            .iter()
            .filter(|(q, superseded)| !superseded && &q.member_id == member_id)
            .max_by_key(|(q, _)| (q.period, q.evaluated_at))
            .map(|(q, _)| q.clone()))
    }

    async fn save_qualification(
        &self,
        qualification: &TierQualification,
    ) -> Result<(), StoreError> {
        self.inner.write().await.upsert_qualification(qualification);
        Ok(())
    }

    async fn qualification_history(
        &self,
        member_id: &MemberId,
    ) -> Result<Vec<TierQualification>, StoreError> {
        let mut rows: Vec<_> = self
            .inner
            .read()
            .await
            .qualifications
            .iter()
            .filter(|(q, _)| &q.member_id == member_id)
            .map(|(q, _)| q.clone())
            .collect();
        rows.sort_by_key(|q| (q.period, q.evaluated_at));
        Ok(rows)
    }

    async fn commit_evaluation(&self, commit: EvaluationCommit<'_>) -> Result<(), StoreError> {
        let member_id = &commit.qualification.member_id;
        if take_one(&self.failed_commits) {
            return Err(StoreError::Conflict(format!(
                "evaluation commit for member {} rejected",
                member_id
            )));
        }

        let mut inner = self.inner.write().await;
        match commit.change {
            // The only fallible step goes first, so a failure leaves nothing behind.
            Some(change) => inner.set_member_tier(member_id, &change.to_tier)?,
            None if !inner.members.contains_key(member_id) => {
                return Err(StoreError::NotFound(format!("member {}", member_id)));
            }
            None => {}
        }
        if let Some(change) = commit.change {
            inner.insert_tier_change(change);
        }
        if let Some(bonus) = commit.achievement_bonus {
            inner.insert_commission(bonus);
        }
        inner.upsert_qualification(commit.qualification);
        Ok(())
    }
}

#[async_trait]
impl TierChangeSink for MemoryStore {
    async fn record_tier_change(&self, change: &TierChange) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.insert_tier_change(change))
    }

    async fn tier_changes_for(&self, member_id: &MemberId) -> Result<Vec<TierChange>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .tier_changes
            .iter()
            .filter(|c| &c.member_id == member_id)
            .cloned()
            .collect())
    }
}
