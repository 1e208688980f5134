//! Multi-level referral commission calculation.

use crate::config::EngineConfig;
use crate::domain::{
    Commission, CommissionStatus, CommissionType, Decimal, Member, MemberId, TierTable, TimeMs,
    Transaction, TransactionId,
};
use crate::engine::compliance::{check_cap, ComplianceScope, ComplianceViolation};
use crate::error::EngineError;
use serde::Serialize;
use std::sync::Arc;

/// Why an ancestor in the upline earned nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    UnknownTier,
    /// The tier has no positive rate at this level.
    NoRate,
    /// The amount rounds to zero before limits are applied.
    ZeroAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAncestor {
    pub member_id: MemberId,
    pub level: u32,
    pub reason: SkipReason,
}

/// Result of fanning one transaction out over its upline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionBatch {
    pub transaction_id: TransactionId,
    pub commissions: Vec<Commission>,
    pub skipped: Vec<SkippedAncestor>,
    pub total: Decimal,
    /// Set when `total` breaches the per-transaction cap.
    pub compliance: Option<ComplianceViolation>,
}

/// Pure calculator: no I/O, same inputs give the same batch.
pub struct CommissionCalculator {
    config: EngineConfig,
    tiers: Arc<TierTable>,
}

impl CommissionCalculator {
    pub fn new(config: EngineConfig, tiers: Arc<TierTable>) -> Self {
        Self { config, tiers }
    }

    /// Compute the referral commissions owed for `tx`.
    ///
    /// `chain` is the sponsor chain of the purchasing member, nearest first.
    /// Only the first `commission_levels` ancestors are considered; a skipped
    /// ancestor still consumes its level.
    ///
    /// # Errors
    /// `InvalidTransactionState` when the transaction is not confirmed or
    /// active, `InvalidTransactionAmount` when the amount is not positive.
    pub fn calculate(
        &self,
        tx: &Transaction,
        chain: &[Member],
        earned_at: TimeMs,
    ) -> Result<CommissionBatch, EngineError> {
        let period = match (tx.status.is_commissionable(), tx.period()) {
            (true, Some(period)) => period,
            _ => {
                return Err(EngineError::InvalidTransactionState {
                    transaction_id: tx.id.clone(),
                    status: tx.status,
                })
            }
        };
        if !tx.amount.is_positive() {
            return Err(EngineError::InvalidTransactionAmount {
                transaction_id: tx.id.clone(),
                amount: tx.amount,
            });
        }

        let limits = self.config.limits_for(CommissionType::Referral);
        let mut commissions = Vec::new();
        let mut skipped = Vec::new();

        for (idx, ancestor) in chain
            .iter()
            .take(self.config.commission_levels as usize)
            .enumerate()
        {
            let level = idx as u32 + 1;
            let skip = |reason| SkippedAncestor {
                member_id: ancestor.id.clone(),
                level,
                reason,
            };

            if !ancestor.is_active() {
                tracing::debug!(
                    transaction_id = %tx.id,
                    member_id = %ancestor.id,
                    level,
                    "Skipping inactive ancestor"
                );
                skipped.push(skip(SkipReason::Inactive));
                continue;
            }

            let Some(tier) = self.tiers.get(&ancestor.tier_id) else {
                tracing::warn!(
                    transaction_id = %tx.id,
                    member_id = %ancestor.id,
                    tier = %ancestor.tier_id,
                    "Ancestor has unknown tier"
                );
                skipped.push(skip(SkipReason::UnknownTier));
                continue;
            };

            let base_rate = tier.rate_for_level(level);
            if !base_rate.is_positive() {
                if level as usize <= tier.level_rates.len() {
                    let err = EngineError::InvalidCommissionRate {
                        member_id: ancestor.id.clone(),
                        tier_id: tier.id.clone(),
                        level,
                        rate: base_rate,
                    };
                    tracing::warn!(
                        transaction_id = %tx.id,
                        member_id = %ancestor.id,
                        error = %err,
                        "Skipping ancestor"
                    );
                } else {
                    tracing::debug!(
                        transaction_id = %tx.id,
                        member_id = %ancestor.id,
                        tier = %tier.id,
                        level,
                        "Tier pays nothing at this level"
                    );
                }
                skipped.push(skip(SkipReason::NoRate));
                continue;
            }

            let performance_multiplier = self
                .config
                .performance_multiplier(ancestor.performance_score);
            let raw = Commission::raw_amount(
                tx.amount,
                base_rate,
                tier.tier_multiplier,
                performance_multiplier,
            );
            if raw.round_money().is_zero() {
                tracing::debug!(
                    transaction_id = %tx.id,
                    member_id = %ancestor.id,
                    level,
                    raw = %raw,
                    "Commission rounds to zero"
                );
                skipped.push(skip(SkipReason::ZeroAmount));
                continue;
            }
            let amount = limits.clamp(raw, tx.amount).round_money();

            commissions.push(Commission {
                id: Commission::compute_id(&tx.id, &ancestor.id, level, CommissionType::Referral),
                beneficiary_member_id: ancestor.id.clone(),
                source_transaction_id: tx.id.clone(),
                source_member_id: tx.member_id.clone(),
                level,
                commission_type: CommissionType::Referral,
                source_amount: tx.amount,
                base_rate,
                tier_multiplier: tier.tier_multiplier,
                performance_multiplier,
                amount,
                status: CommissionStatus::Pending,
                period,
                earned_at,
                paid_at: None,
                reverses: None,
            });
        }

        let total: Decimal = commissions.iter().map(|c| c.amount).sum();
        let compliance = check_cap(
            ComplianceScope::Transaction(tx.id.clone()),
            total,
            tx.amount,
            self.config.compliance_cap_percent,
        );

        Ok(CommissionBatch {
            transaction_id: tx.id.clone(),
            commissions,
            skipped,
            total,
            compliance,
        })
    }
}
