//! Per-member tier evaluation and the periodic tier sweep.

use super::Engine;
use crate::domain::{MemberId, PeriodId, QualificationStats, TimeMs};
use crate::engine::{TierDecision, TierEvaluation};
use crate::error::EngineError;
use crate::store::{EvaluationCommit, StoreError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFailure {
    pub member_id: MemberId,
    pub error: String,
    pub retryable: bool,
}

/// Decision counts of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCounts {
    pub advanced: usize,
    pub maintained: usize,
    pub downgrade_suspended: usize,
    pub downgraded: usize,
    pub below_bar: usize,
    pub already_evaluated: usize,
}

impl DecisionCounts {
    fn record(&mut self, decision: TierDecision) {
        let slot = match decision {
            TierDecision::Advanced => &mut self.advanced,
            TierDecision::Maintained => &mut self.maintained,
            TierDecision::DowngradeSuspended => &mut self.downgrade_suspended,
            TierDecision::Downgraded => &mut self.downgraded,
            TierDecision::BelowBar => &mut self.below_bar,
            TierDecision::AlreadyEvaluated => &mut self.already_evaluated,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSweepReport {
    pub run_id: Uuid,
    pub period: PeriodId,
    pub counts: DecisionCounts,
    pub became_permanent: usize,
    /// Sorted by member id.
    pub outcomes: Vec<TierEvaluation>,
    /// Sorted by member id.
    pub failures: Vec<MemberFailure>,
}

impl Engine {
    /// Gather `member_id`'s stats for `period`, bounded by `stats_timeout`.
    pub async fn qualification_stats(
        &self,
        member_id: &MemberId,
        period: PeriodId,
    ) -> Result<QualificationStats, EngineError> {
        let timeout = self.config.stats_timeout;
        let lookup = async {
            let referrals = self.store.get_direct_referrals(member_id).await?;
            let team_volume = self.store.team_volume(member_id, period).await?;
            Ok::<_, StoreError>(QualificationStats {
                active_referrals: referrals.iter().filter(|m| m.is_active()).count() as u32,
                team_volume,
            })
        };

        match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(EngineError::StatsUnavailable {
                member_id: member_id.clone(),
                period,
                reason: e.to_string(),
            }),
            Err(_) => Err(EngineError::Timeout {
                member_id: member_id.clone(),
                operation: "stats lookup",
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Evaluate one member for `period` and persist the outcome.
    ///
    /// The bonus, tier change, member tier and qualification row are
    /// committed as one unit. A tier change already recorded for `period`
    /// without its row is finished from the recorded change, never
    /// re-evaluated, so a member moves at most one step per period.
    pub async fn evaluate_member(
        &self,
        member_id: &MemberId,
        period: PeriodId,
    ) -> Result<TierEvaluation, EngineError> {
        let _guard = self.member_locks.lock(member_id).await;
        let now = TimeMs::now();

        let member = self
            .store
            .get_member(member_id)
            .await?
            .ok_or_else(|| EngineError::MemberNotFound(member_id.clone()))?;
        let current = self.store.current_qualification(member_id).await?;
        let machine = self.qualification_machine();

        let recorded = self
            .store
            .tier_changes_for(member_id)
            .await?
            .into_iter()
            .find(|c| c.period == period);
        let resumed = match &recorded {
            Some(change) => machine.resume(&member, change, current.as_ref(), now)?,
            None => None,
        };
        let evaluation = match resumed {
            Some(evaluation) => {
                tracing::info!(
                    member_id = %member_id,
                    period = %period,
                    to = %evaluation.to_tier,
                    "Finishing interrupted tier change"
                );
                evaluation
            }
            None => {
                let stats = self.qualification_stats(member_id, period).await?;
                machine.evaluate(&member, current.as_ref(), stats, period, now)?
            }
        };

        if let Some(row) = &evaluation.qualification {
            self.store
                .commit_evaluation(EvaluationCommit {
                    qualification: row,
                    change: evaluation.change.as_ref(),
                    achievement_bonus: evaluation.achievement_bonus.as_ref(),
                })
                .await?;
        }
        if let Some(change) = &evaluation.change {
            tracing::info!(
                member_id = %member_id,
                period = %period,
                from = %change.from_tier,
                to = %change.to_tier,
                reason = %change.reason,
                "Tier changed"
            );
        }

        tracing::debug!(
            member_id = %member_id,
            period = %period,
            decision = ?evaluation.decision,
            became_permanent = evaluation.became_permanent,
            "Member evaluated"
        );
        Ok(evaluation)
    }

    /// Evaluate every member for `period`.
    ///
    /// Members run concurrently up to `sweep_concurrency`. A member whose
    /// evaluation fails is logged and listed in `failures`; the rest of the
    /// sweep carries on. Re-running a completed sweep is a no-op.
    pub async fn run_tier_evaluation_sweep(
        &self,
        period: PeriodId,
    ) -> Result<TierSweepReport, EngineError> {
        let run_id = Uuid::new_v4();
        let member_ids = self.store.list_member_ids().await?;
        tracing::info!(%run_id, period = %period, members = member_ids.len(), "Tier evaluation sweep started");

        let results: Vec<_> = stream::iter(member_ids)
            .map(|member_id| async move {
                let result = self.evaluate_member(&member_id, period).await;
                (member_id, result)
            })
            .buffer_unordered(self.config.sweep_concurrency.max(1))
            .collect()
            .await;

        let mut counts = DecisionCounts::default();
        let mut became_permanent = 0;
        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for (member_id, result) in results {
            match result {
                Ok(evaluation) => {
                    counts.record(evaluation.decision);
                    if evaluation.became_permanent {
                        became_permanent += 1;
                    }
                    outcomes.push(evaluation);
                }
                Err(e) => {
                    tracing::warn!(%run_id, member_id = %member_id, period = %period, error = %e, "Member evaluation skipped");
                    failures.push(MemberFailure {
                        member_id,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcomes.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        failures.sort_by(|a, b| a.member_id.cmp(&b.member_id));

        tracing::info!(
            %run_id,
            period = %period,
            evaluated = outcomes.len(),
            failed = failures.len(),
            advanced = counts.advanced,
            downgraded = counts.downgraded,
            "Tier evaluation sweep finished"
        );
        Ok(TierSweepReport {
            run_id,
            period,
            counts,
            became_permanent,
            outcomes,
            failures,
        })
    }
}
