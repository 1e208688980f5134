//! Periodic team-volume and leadership bonus sweep with the period-level
//! compliance check.

use super::qualification::MemberFailure;
use super::Engine;
use crate::domain::{Commission, Decimal, MemberId, PeriodId, TimeMs};
use crate::engine::{check_cap, ComplianceScope, ComplianceViolation};
use crate::error::EngineError;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusSweepReport {
    pub run_id: Uuid,
    pub period: PeriodId,
    /// Sorted by beneficiary.
    pub team_volume_bonuses: Vec<Commission>,
    /// Sorted by beneficiary.
    pub leadership_bonuses: Vec<Commission>,
    pub newly_recorded: usize,
    pub failures: Vec<MemberFailure>,
    pub period_commissions: Decimal,
    pub period_revenue: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceViolation>,
}

impl Engine {
    /// Pay the period's team-volume bonuses, then leadership overrides on
    /// them, then check every commission earned in the period against the
    /// period revenue.
    ///
    /// Safe to re-run: bonuses are keyed per member and period, and the
    /// review flag is raised once per period.
    pub async fn run_team_volume_bonus_sweep(
        &self,
        period: PeriodId,
    ) -> Result<BonusSweepReport, EngineError> {
        let run_id = Uuid::new_v4();
        let earned_at = TimeMs::now();
        let calculator = self.bonus_calculator();
        let volumes = self.store.team_volumes_for_period(period).await?;
        tracing::info!(%run_id, period = %period, members = volumes.len(), "Team volume bonus sweep started");

        let mut failures = Vec::new();
        let mut fail = |member_id: &MemberId, e: EngineError| {
            tracing::warn!(%run_id, member_id = %member_id, period = %period, error = %e, "Bonus skipped");
            failures.push(MemberFailure {
                member_id: member_id.clone(),
                retryable: e.is_retryable(),
                error: e.to_string(),
            });
        };

        let mut team_volume_bonuses = Vec::new();
        let mut by_sponsor: BTreeMap<MemberId, Decimal> = BTreeMap::new();
        for volume in &volumes {
            let member = match self.store.get_member(&volume.member_id).await {
                Ok(Some(member)) => member,
                Ok(None) => {
                    fail(&volume.member_id, EngineError::MemberNotFound(volume.member_id.clone()));
                    continue;
                }
                Err(e) => {
                    fail(&volume.member_id, e.into());
                    continue;
                }
            };
            match calculator.team_volume_bonus(&member, volume.volume, period, earned_at) {
                Ok(Some(bonus)) => {
                    if let Some(sponsor_id) = &member.sponsor_id {
                        *by_sponsor.entry(sponsor_id.clone()).or_default() += bonus.amount;
                    }
                    team_volume_bonuses.push(bonus);
                }
                Ok(None) => {}
                Err(e) => fail(&member.id, e),
            }
        }

        let mut leadership_bonuses = Vec::new();
        for (sponsor_id, referral_total) in &by_sponsor {
            let sponsor = match self.store.get_member(sponsor_id).await {
                Ok(Some(sponsor)) => sponsor,
                Ok(None) => {
                    fail(sponsor_id, EngineError::MemberNotFound(sponsor_id.clone()));
                    continue;
                }
                Err(e) => {
                    fail(sponsor_id, e.into());
                    continue;
                }
            };
            match calculator.leadership_bonus(&sponsor, *referral_total, period, earned_at) {
                Ok(Some(bonus)) => leadership_bonuses.push(bonus),
                Ok(None) => {}
                Err(e) => fail(sponsor_id, e),
            }
        }

        let mut records = team_volume_bonuses.clone();
        records.extend(leadership_bonuses.iter().cloned());
        let newly_recorded = self.store.record_commissions(&records).await?;

        let period_commissions = self
            .store
            .commissions_for_period(period)
            .await?
            .iter()
            .fold(Decimal::zero(), |sum, c| sum + c.amount);
        let period_revenue = self.store.period_revenue(period).await?;
        let compliance = check_cap(
            ComplianceScope::Period(period),
            period_commissions,
            period_revenue,
            self.config.compliance_cap_percent,
        );
        if let Some(violation) = &compliance {
            self.store.flag_for_review(violation, earned_at).await?;
            tracing::warn!(
                %run_id,
                period = %period,
                commissions = %period_commissions,
                revenue = %period_revenue,
                excess = %violation.excess,
                "Period commissions breach compliance cap, flagged for review"
            );
        }

        failures.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        tracing::info!(
            %run_id,
            period = %period,
            team_volume_bonuses = team_volume_bonuses.len(),
            leadership_bonuses = leadership_bonuses.len(),
            newly_recorded,
            failed = failures.len(),
            "Team volume bonus sweep finished"
        );
        Ok(BonusSweepReport {
            run_id,
            period,
            team_volume_bonuses,
            leadership_bonuses,
            newly_recorded,
            failures,
            period_commissions,
            period_revenue,
            compliance,
        })
    }
}
