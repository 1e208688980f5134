//! Revenue-percentage compliance cap.
//!
//! A breach never truncates amounts; it produces a violation that is flagged
//! for manual reconciliation.

use crate::domain::{Decimal, PeriodId, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ComplianceScope {
    Transaction(TransactionId),
    Period(PeriodId),
}

impl fmt::Display for ComplianceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceScope::Transaction(id) => write!(f, "transaction {}", id),
            ComplianceScope::Period(period) => write!(f, "period {}", period),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceViolation {
    pub scope: ComplianceScope,
    pub total_commissions: Decimal,
    pub revenue: Decimal,
    pub cap_percent: Decimal,
    pub cap_amount: Decimal,
    pub excess: Decimal,
}

impl fmt::Display for ComplianceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: commissions {} exceed {}% of revenue {} by {}",
            self.scope, self.total_commissions, self.cap_percent, self.revenue, self.excess
        )
    }
}

/// Compare `total_commissions` against `cap_percent` of `revenue`.
pub fn check_cap(
    scope: ComplianceScope,
    total_commissions: Decimal,
    revenue: Decimal,
    cap_percent: Decimal,
) -> Option<ComplianceViolation> {
    let cap_amount = cap_percent.percent_of(revenue);
    if total_commissions <= cap_amount {
        return None;
    }
    Some(ComplianceViolation {
        scope,
        total_commissions,
        revenue,
        cap_percent,
        cap_amount,
        excess: total_commissions - cap_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_within_cap() {
        let scope = ComplianceScope::Transaction(TransactionId::new("tx"));
        assert_eq!(check_cap(scope, d("2500"), d("10000"), d("25")), None);
    }

    #[test]
    fn test_breach_reports_excess() {
        let scope = ComplianceScope::Period("2026-01".parse().unwrap());
        let violation = check_cap(scope, d("3000"), d("10000"), d("25")).unwrap();
        assert_eq!(violation.cap_amount, d("2500"));
        assert_eq!(violation.excess, d("500"));
        assert!(violation.to_string().contains("period 2026-01"));
    }

    #[test]
    fn test_zero_revenue_with_commissions_is_a_breach() {
        let scope = ComplianceScope::Period("2026-01".parse().unwrap());
        let violation = check_cap(scope, d("10"), Decimal::zero(), d("25")).unwrap();
        assert_eq!(violation.excess, d("10"));
    }
}
