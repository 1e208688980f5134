//! Tier qualification state machine.
//!
//! Each evaluation is a pure function of the member, its current
//! qualification row and the period's stats. The caller persists the result.

use crate::config::EngineConfig;
use crate::domain::{
    Commission, InvestmentTier, Member, MemberId, PeriodId, QualificationState,
    QualificationStats, TierChange, TierChangeReason, TierId, TierQualification, TierTable, TimeMs,
};
use crate::engine::bonus::BonusCalculator;
use crate::error::EngineError;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierDecision {
    /// Moved up exactly one rank.
    Advanced,
    /// Bar still met at the current tier.
    Maintained,
    /// Bar missed but the qualification is permanent.
    DowngradeSuspended,
    /// Moved down to the highest tier whose bar is met.
    Downgraded,
    /// Entry tier with its bar unmet; nothing lower to fall to.
    BelowBar,
    /// This period was already evaluated.
    AlreadyEvaluated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierEvaluation {
    pub member_id: MemberId,
    pub period: PeriodId,
    pub decision: TierDecision,
    pub from_tier: TierId,
    pub to_tier: TierId,
    pub stats: QualificationStats,
    pub state: QualificationState,
    pub became_permanent: bool,
    /// Row to persist; `None` when nothing changed.
    #[serde(skip)]
    pub qualification: Option<TierQualification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<TierChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievement_bonus: Option<Commission>,
}

pub struct QualificationMachine {
    config: EngineConfig,
    tiers: Arc<TierTable>,
    bonuses: BonusCalculator,
}

impl QualificationMachine {
    pub fn new(config: EngineConfig, tiers: Arc<TierTable>) -> Self {
        let bonuses = BonusCalculator::new(config.clone(), tiers.clone());
        Self {
            config,
            tiers,
            bonuses,
        }
    }

    /// Evaluate `member` for `period`.
    ///
    /// `current` is the member's latest qualification row, if any. A row for a
    /// tier other than the member's current tier is ignored.
    ///
    /// # Errors
    /// `UnknownTier` when the member's tier is not in the table.
    pub fn evaluate(
        &self,
        member: &Member,
        current: Option<&TierQualification>,
        stats: QualificationStats,
        period: PeriodId,
        now: TimeMs,
    ) -> Result<TierEvaluation, EngineError> {
        let tier = self
            .tiers
            .get(&member.tier_id)
            .ok_or_else(|| EngineError::UnknownTier {
                member_id: member.id.clone(),
                tier_id: member.tier_id.clone(),
            })?;
        let row = current.filter(|q| q.tier_id == tier.id);

        if let Some(row) = row.filter(|q| q.period >= period) {
            return Ok(TierEvaluation {
                member_id: member.id.clone(),
                period,
                decision: TierDecision::AlreadyEvaluated,
                from_tier: tier.id.clone(),
                to_tier: tier.id.clone(),
                stats,
                state: QualificationState::from_current(Some(row)),
                became_permanent: false,
                qualification: None,
                change: None,
                achievement_bonus: None,
            });
        }

        let target = self.target_tier(tier, &stats);
        let meets_current = tier
            .requirements
            .is_met(stats.active_referrals, stats.team_volume);

        let evaluation = if target.rank > tier.rank {
            self.advance(member, tier, target, stats, period, now)
        } else if meets_current {
            self.maintain(member, tier, row, stats, period, now)
        } else if row.is_some_and(|q| q.is_permanent) {
            self.suspend_downgrade(member, tier, row, stats, period, now)
        } else if tier.rank == 0 {
            let qualification = self.row(member, tier, &stats, 0, false, period, now);
            self.finish(
                member,
                tier,
                tier,
                TierDecision::BelowBar,
                stats,
                qualification,
                period,
                false,
            )
        } else {
            self.downgrade(member, tier, target, stats, period, now)
        };

        Ok(evaluation)
    }

    /// Rebuild the evaluation behind `change`, a tier change already recorded
    /// for its period whose qualification row is missing.
    ///
    /// The rebuilt evaluation uses the stats stored on the change, so it
    /// lands on the same tier as the original run. Returns `None` when the
    /// row is already in place, or when the member has since moved to a tier
    /// the change does not involve.
    pub fn resume(
        &self,
        member: &Member,
        change: &TierChange,
        current: Option<&TierQualification>,
        now: TimeMs,
    ) -> Result<Option<TierEvaluation>, EngineError> {
        let finished = current.is_some_and(|q| q.tier_id == change.to_tier && q.period >= change.period);
        let involved = member.tier_id == change.from_tier || member.tier_id == change.to_tier;
        if finished || !involved {
            return Ok(None);
        }

        let lookup = |tier_id: &TierId| {
            self.tiers
                .get(tier_id)
                .ok_or_else(|| EngineError::UnknownTier {
                    member_id: member.id.clone(),
                    tier_id: tier_id.clone(),
                })
        };
        let from = lookup(&change.from_tier)?;
        let to = lookup(&change.to_tier)?;
        let stats = QualificationStats {
            active_referrals: change.active_referrals,
            team_volume: change.team_volume,
        };

        let mut evaluation = match change.reason {
            TierChangeReason::Advancement => self.advance(member, from, to, stats, change.period, now),
            TierChangeReason::Downgrade => self.downgrade(member, from, to, stats, change.period, now),
        };
        evaluation.change = Some(change.clone());
        Ok(Some(evaluation))
    }

    /// Highest tier whose bar is met, at most one rank above `current`.
    /// Falls back to the entry tier when no bar is met.
    fn target_tier<'a>(
        &'a self,
        current: &'a InvestmentTier,
        stats: &QualificationStats,
    ) -> &'a InvestmentTier {
        let ceiling = (current.rank + 1).min(self.tiers.highest_rank());
        (0..=ceiling)
            .rev()
            .filter_map(|rank| self.tiers.by_rank(rank))
            .find(|t| {
                t.requirements
                    .is_met(stats.active_referrals, stats.team_volume)
            })
            .unwrap_or_else(|| self.tiers.entry_tier())
    }

    fn advance(
        &self,
        member: &Member,
        from: &InvestmentTier,
        to: &InvestmentTier,
        stats: QualificationStats,
        period: PeriodId,
        now: TimeMs,
    ) -> TierEvaluation {
        let qualification = self.row(member, to, &stats, 1, false, period, now);
        let mut evaluation = self.finish(
            member,
            from,
            to,
            TierDecision::Advanced,
            stats,
            qualification,
            period,
            false,
        );
        let change = self.change(member, from, to, TierChangeReason::Advancement, &evaluation, now);
        evaluation.change = Some(change);
        evaluation.achievement_bonus = self.bonuses.achievement_bonus(member, to, period, now);
        evaluation
    }

    fn maintain(
        &self,
        member: &Member,
        tier: &InvestmentTier,
        row: Option<&TierQualification>,
        stats: QualificationStats,
        period: PeriodId,
        now: TimeMs,
    ) -> TierEvaluation {
        // A skipped period breaks the streak.
        let consecutive = match row {
            Some(q) if q.period == period.previous() => q.consecutive_months + 1,
            _ => 1,
        };
        let was_permanent = row.is_some_and(|q| q.is_permanent);
        let is_permanent = was_permanent || consecutive >= self.config.permanence_months;
        let qualification = self.row(member, tier, &stats, consecutive, is_permanent, period, now);
        self.finish(
            member,
            tier,
            tier,
            TierDecision::Maintained,
            stats,
            qualification,
            period,
            is_permanent && !was_permanent,
        )
    }

    fn suspend_downgrade(
        &self,
        member: &Member,
        tier: &InvestmentTier,
        row: Option<&TierQualification>,
        stats: QualificationStats,
        period: PeriodId,
        now: TimeMs,
    ) -> TierEvaluation {
        let consecutive = row.map(|q| q.consecutive_months).unwrap_or_default();
        let qualification = self.row(member, tier, &stats, consecutive, true, period, now);
        self.finish(
            member,
            tier,
            tier,
            TierDecision::DowngradeSuspended,
            stats,
            qualification,
            period,
            false,
        )
    }

    fn downgrade(
        &self,
        member: &Member,
        from: &InvestmentTier,
        to: &InvestmentTier,
        stats: QualificationStats,
        period: PeriodId,
        now: TimeMs,
    ) -> TierEvaluation {
        let met = to
            .requirements
            .is_met(stats.active_referrals, stats.team_volume);
        let qualification = self.row(member, to, &stats, u32::from(met), false, period, now);
        let mut evaluation = self.finish(
            member,
            from,
            to,
            TierDecision::Downgraded,
            stats,
            qualification,
            period,
            false,
        );
        let change = self.change(member, from, to, TierChangeReason::Downgrade, &evaluation, now);
        evaluation.change = Some(change);
        evaluation
    }

    #[allow(clippy::too_many_arguments)]
    fn row(
        &self,
        member: &Member,
        tier: &InvestmentTier,
        stats: &QualificationStats,
        consecutive_months: u32,
        is_permanent: bool,
        period: PeriodId,
        now: TimeMs,
    ) -> TierQualification {
        TierQualification {
            member_id: member.id.clone(),
            tier_id: tier.id.clone(),
            active_referrals: stats.active_referrals,
            team_volume: stats.team_volume,
            consecutive_months,
            is_permanent,
            period,
            evaluated_at: now,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        member: &Member,
        from: &InvestmentTier,
        to: &InvestmentTier,
        decision: TierDecision,
        stats: QualificationStats,
        qualification: TierQualification,
        period: PeriodId,
        became_permanent: bool,
    ) -> TierEvaluation {
        TierEvaluation {
            member_id: member.id.clone(),
            period,
            decision,
            from_tier: from.id.clone(),
            to_tier: to.id.clone(),
            stats,
            state: QualificationState::from_current(Some(&qualification)),
            became_permanent,
            qualification: Some(qualification),
            change: None,
            achievement_bonus: None,
        }
    }

    fn change(
        &self,
        member: &Member,
        from: &InvestmentTier,
        to: &InvestmentTier,
        reason: TierChangeReason,
        evaluation: &TierEvaluation,
        now: TimeMs,
    ) -> TierChange {
        TierChange {
            member_id: member.id.clone(),
            from_tier: from.id.clone(),
            to_tier: to.id.clone(),
            reason,
            active_referrals: evaluation.stats.active_referrals,
            team_volume: evaluation.stats.team_volume,
            period: evaluation.period,
            changed_at: now,
        }
    }
}
