//! Commission fan-out for confirmed transactions and the payout lifecycle.

use super::Engine;
use crate::domain::{
    Commission, CommissionId, CommissionStatus, Decimal, MemberId, PeriodId, TimeMs, Transaction,
    TransactionId,
};
use crate::engine::{ComplianceViolation, SkippedAncestor};
use crate::error::EngineError;
use crate::store::StoreError;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

/// Result of processing one transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub transaction_id: TransactionId,
    pub period: PeriodId,
    /// The full fan-out, including records that already existed.
    pub commissions: Vec<Commission>,
    /// How many of `commissions` were written by this call.
    pub newly_recorded: usize,
    pub skipped: Vec<SkippedAncestor>,
    pub total: Decimal,
    /// False when the transaction's volume had already been credited.
    pub volume_credited: bool,
    /// Set when the fan-out breached the cap; the breach is flagged for review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceViolation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFailure {
    pub transaction_id: TransactionId,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpReport {
    pub run_id: Uuid,
    pub outcomes: Vec<TransactionOutcome>,
    pub failures: Vec<TransactionFailure>,
    /// Completed fan-outs that breached the compliance cap and await review.
    pub flagged: Vec<TransactionFailure>,
}

impl Engine {
    /// Compute and persist the commission fan-out of a confirmed transaction.
    ///
    /// Idempotent: a second call for the same transaction writes nothing new
    /// and does not credit team volume twice. Once persisting starts it runs
    /// to completion on its own task, even if this future is dropped.
    pub async fn calculate_for_transaction(
        &self,
        tx: &Transaction,
    ) -> Result<TransactionOutcome, EngineError> {
        let earned_at = TimeMs::now();

        if self.store.get_member(&tx.member_id).await?.is_none() {
            return Err(EngineError::MemberNotFound(tx.member_id.clone()));
        }

        let depth = self
            .config
            .commission_levels
            .max(self.config.team_volume_depth);
        let upline = self.store.get_sponsor_chain(&tx.member_id, depth).await?;
        let guards = self
            .member_locks
            .lock_many(upline.iter().map(|m| &m.id))
            .await;
        // Statuses and tiers may have moved while waiting on the locks.
        let upline = self.store.get_sponsor_chain(&tx.member_id, depth).await?;

        let levels = (self.config.commission_levels as usize).min(upline.len());
        let batch = self
            .commission_calculator()
            .calculate(tx, &upline[..levels], earned_at)?;
        let Some(period) = tx.period() else {
            return Err(EngineError::InvalidTransactionState {
                transaction_id: tx.id.clone(),
                status: tx.status,
            });
        };

        let store = self.store.clone();
        let beneficiaries: Vec<MemberId> = upline.iter().map(|m| m.id.clone()).collect();
        let records = batch.commissions.clone();
        let violation = batch.compliance.clone();
        let transaction_id = tx.id.clone();
        let amount = tx.amount;

        let persist = tokio::spawn(async move {
            let _guards = guards;
            let newly_recorded = store.record_commissions(&records).await?;
            let volume_credited = store
                .credit_team_volume(&transaction_id, period, &beneficiaries, amount)
                .await?;
            if let Some(violation) = &violation {
                store.flag_for_review(violation, earned_at).await?;
            }
            Ok::<_, EngineError>((newly_recorded, volume_credited))
        });
        let (newly_recorded, volume_credited) = persist
            .await
            .map_err(|e| EngineError::Internal(format!("commission persist task failed: {}", e)))??;

        match &batch.compliance {
            Some(violation) => tracing::warn!(
                transaction_id = %tx.id,
                period = %period,
                total = %batch.total,
                excess = %violation.excess,
                "Commission fan-out breaches compliance cap, flagged for review"
            ),
            None => tracing::info!(
                transaction_id = %tx.id,
                member_id = %tx.member_id,
                period = %period,
                commissions = batch.commissions.len(),
                newly_recorded,
                skipped = batch.skipped.len(),
                total = %batch.total,
                "Commissions calculated"
            ),
        }

        Ok(TransactionOutcome {
            transaction_id: batch.transaction_id,
            period,
            commissions: batch.commissions,
            newly_recorded,
            skipped: batch.skipped,
            total: batch.total,
            volume_credited,
            compliance: batch.compliance,
        })
    }

    /// Process a backlog of transactions, `sweep_concurrency` at a time.
    ///
    /// Transactions sharing an upline still serialize on the member locks.
    /// A failing transaction is reported and never stops the others.
    pub async fn run_commission_catch_up(&self, transactions: Vec<Transaction>) -> CatchUpReport {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, transactions = transactions.len(), "Commission catch-up started");

        let results: Vec<_> = stream::iter(transactions)
            .map(|tx| async move {
                let result = self.calculate_for_transaction(&tx).await;
                (tx.id, result)
            })
            .buffer_unordered(self.config.sweep_concurrency.max(1))
            .collect()
            .await;

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        let mut flagged = Vec::new();
        for (transaction_id, result) in results {
            match result {
                Ok(outcome) => {
                    if let Some(violation) = &outcome.compliance {
                        let breach = EngineError::ComplianceCapExceeded(violation.clone());
                        flagged.push(TransactionFailure {
                            transaction_id,
                            retryable: breach.is_retryable(),
                            error: breach.to_string(),
                        });
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    tracing::warn!(%run_id, transaction_id = %transaction_id, error = %e, "Transaction skipped");
                    failures.push(TransactionFailure {
                        transaction_id,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcomes.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        failures.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));
        flagged.sort_by(|a, b| a.transaction_id.cmp(&b.transaction_id));

        tracing::info!(
            %run_id,
            processed = outcomes.len(),
            failed = failures.len(),
            flagged = flagged.len(),
            "Commission catch-up finished"
        );
        CatchUpReport {
            run_id,
            outcomes,
            failures,
            flagged,
        }
    }

    /// pending -> paid.
    pub async fn mark_commission_paid(
        &self,
        id: &CommissionId,
        paid_at: TimeMs,
    ) -> Result<Commission, EngineError> {
        self.transition_commission(id, CommissionStatus::Paid, Some(paid_at))
            .await
    }

    /// pending -> disputed.
    pub async fn mark_commission_disputed(
        &self,
        id: &CommissionId,
    ) -> Result<Commission, EngineError> {
        self.transition_commission(id, CommissionStatus::Disputed, None)
            .await
    }

    async fn transition_commission(
        &self,
        id: &CommissionId,
        to: CommissionStatus,
        paid_at: Option<TimeMs>,
    ) -> Result<Commission, EngineError> {
        let from = CommissionStatus::Pending;
        if !self
            .store
            .update_commission_status(id, from, to, paid_at)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => EngineError::CommissionNotFound(id.clone()),
                other => other.into(),
            })?
        {
            let current = self
                .store
                .get_commission(id)
                .await?
                .ok_or_else(|| EngineError::CommissionNotFound(id.clone()))?;
            return Err(EngineError::InvalidCommissionTransition {
                commission_id: id.clone(),
                from: current.status,
                to,
            });
        }

        let updated = self
            .store
            .get_commission(id)
            .await?
            .ok_or_else(|| EngineError::CommissionNotFound(id.clone()))?;
        tracing::info!(commission_id = %id, status = %to, "Commission status updated");
        Ok(updated)
    }

    /// Record a compensating commission that negates `id`.
    ///
    /// The original record is never modified. Compensating twice returns the
    /// same record without writing a second one.
    pub async fn compensate_commission(
        &self,
        id: &CommissionId,
        reason: &str,
    ) -> Result<Commission, EngineError> {
        let original = self
            .store
            .get_commission(id)
            .await?
            .ok_or_else(|| EngineError::CommissionNotFound(id.clone()))?;
        let compensation = original.compensating(TimeMs::now());
        if let Some(existing) = self.store.get_commission(&compensation.id).await? {
            return Ok(existing);
        }
        self.store
            .record_commissions(std::slice::from_ref(&compensation))
            .await?;

        tracing::info!(
            commission_id = %id,
            compensation_id = %compensation.id,
            amount = %compensation.amount,
            reason,
            "Commission compensated"
        );
        Ok(compensation)
    }
}
