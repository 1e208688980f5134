//! Commission fan-out through the service layer: amounts, idempotency,
//! team-volume credit, compliance flagging and the payout lifecycle.

mod common;

use common::{d, id, memory_engine, period, purchase, register, register_with_tier};
use netengine::domain::{CommissionId, TierId, TransactionStatus};
use netengine::engine::ComplianceScope;
use netengine::store::{CommissionSink, VolumeLedger};
use netengine::{CommissionStatus, CommissionType, Decimal, EngineError, NewMember, TimeMs};
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_direct_sponsor_scenario_pays_1584() {
    let (store, engine) = memory_engine().await;
    let mut sponsor = NewMember::new("s", None, TimeMs::new(0));
    sponsor.tier_id = Some(TierId::new("silver"));
    sponsor.performance_score = Some(d("7.5"));
    engine.register_member(sponsor).await.unwrap();
    register(&engine, "m", Some("s")).await;

    let outcome = engine
        .calculate_for_transaction(&purchase("tx-1", "m", "10000"))
        .await
        .unwrap();

    assert_eq!(outcome.commissions.len(), 1);
    let c = &outcome.commissions[0];
    assert_eq!(c.beneficiary_member_id, id("s"));
    assert_eq!(c.level, 1);
    assert_eq!(c.commission_type, CommissionType::Referral);
    assert_eq!(c.amount, d("1584"));
    assert_eq!(c.tier_multiplier, d("1.2"));
    assert_eq!(c.performance_multiplier, d("1.1"));
    assert_eq!(c.status, CommissionStatus::Pending);
    assert_eq!(outcome.newly_recorded, 1);
    assert_eq!(outcome.compliance, None);

    let stored = store.get_commission(&c.id).await.unwrap().unwrap();
    assert_eq!(&stored, c);
}

#[tokio::test]
async fn test_amounts_clamp_to_floor_and_ceiling() {
    let (_store, engine) = memory_engine().await;
    let mut star = NewMember::new("star", None, TimeMs::new(0));
    star.tier_id = Some(TierId::new("gold"));
    star.performance_score = Some(d("9.5"));
    engine.register_member(star).await.unwrap();
    register(&engine, "big", Some("star")).await;
    register(&engine, "low", None).await;
    register(&engine, "small", Some("low")).await;

    // 15% * 1.5 * 1.3 = 29.25% of 10000, above the 20% ceiling.
    let high = engine
        .calculate_for_transaction(&purchase("tx-high", "big", "10000"))
        .await
        .unwrap();
    assert_eq!(high.commissions[0].amount, d("2000"));

    // 10% of 800 = 80, below the 100 floor.
    let low = engine
        .calculate_for_transaction(&purchase("tx-low", "small", "800"))
        .await
        .unwrap();
    assert_eq!(low.commissions[0].amount, d("100"));
}

async fn bronze_chain(engine: &netengine::Engine, len: usize) {
    register(engine, "u0", None).await;
    for i in 1..=len {
        register(engine, &format!("u{}", i), Some(&format!("u{}", i - 1))).await;
    }
}

#[tokio::test]
async fn test_fan_out_stops_at_five_levels_and_credits_whole_upline() {
    let (store, engine) = memory_engine().await;
    bronze_chain(&engine, 6).await;

    let outcome = engine
        .calculate_for_transaction(&purchase("tx-1", "u6", "10000"))
        .await
        .unwrap();

    let paid: Vec<_> = outcome
        .commissions
        .iter()
        .map(|c| (c.beneficiary_member_id.as_str(), c.level, c.amount))
        .collect();
    assert_eq!(
        paid,
        vec![
            ("u5", 1, d("1000")),
            ("u4", 2, d("500")),
            ("u3", 3, d("300")),
            ("u2", 4, d("200")),
            ("u1", 5, d("100")),
        ]
    );
    assert_eq!(outcome.total, d("2100"));
    assert!(outcome.volume_credited);

    for member in ["u0", "u1", "u5"] {
        assert_eq!(store.team_volume(&id(member), period()).await.unwrap(), d("10000"));
    }
    assert_eq!(store.team_volume(&id("u6"), period()).await.unwrap(), Decimal::zero());
    assert_eq!(store.period_revenue(period()).await.unwrap(), d("10000"));
}

#[tokio::test]
async fn test_rerun_writes_nothing_new() {
    let (store, engine) = memory_engine().await;
    bronze_chain(&engine, 3).await;
    let tx = purchase("tx-1", "u3", "5000");

    let first = engine.calculate_for_transaction(&tx).await.unwrap();
    let second = engine.calculate_for_transaction(&tx).await.unwrap();

    assert_eq!(first.newly_recorded, 3);
    assert_eq!(second.newly_recorded, 0);
    assert!(!second.volume_credited);
    let ids = |o: &netengine::orchestration::TransactionOutcome| {
        o.commissions.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(
        store
            .commissions_for_transaction(&tx.id)
            .await
            .unwrap()
            .len(),
        3
    );
    assert_eq!(store.team_volume(&id("u0"), period()).await.unwrap(), d("5000"));
}

#[tokio::test]
async fn test_concurrent_transactions_share_upline_volume() {
    let (store, engine) = memory_engine().await;
    register(&engine, "top", None).await;
    register(&engine, "left", Some("top")).await;
    register(&engine, "right", Some("top")).await;

    let tx_l = purchase("tx-l", "left", "1000");
    let tx_r = purchase("tx-r", "right", "2500");
    let (a, b) = tokio::join!(
        engine.calculate_for_transaction(&tx_l),
        engine.calculate_for_transaction(&tx_r),
    );
    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(store.team_volume(&id("top"), period()).await.unwrap(), d("3500"));
}

#[tokio::test]
async fn test_breach_is_flagged_not_truncated() {
    let (store, engine) = memory_engine().await;
    register_with_tier(&engine, "g0", None, "gold").await;
    for i in 1..=5 {
        register_with_tier(&engine, &format!("g{}", i), Some(&format!("g{}", i - 1)), "gold").await;
    }

    let outcome = engine
        .calculate_for_transaction(&purchase("tx-big", "g5", "10000"))
        .await
        .unwrap();

    // 2000 (ceiling) + 1200 + 750 + 450 + 300 against a 2500 cap.
    assert_eq!(outcome.total, d("4700"));
    let violation = outcome.compliance.expect("breach");
    assert_eq!(violation.cap_amount, d("2500"));
    assert_eq!(violation.excess, d("2200"));
    assert_eq!(outcome.newly_recorded, 5);

    let flags = store.review_flags().await.unwrap();
    assert_eq!(flags.len(), 1);
    assert!(matches!(&flags[0].scope, ComplianceScope::Transaction(tx) if tx.as_str() == "tx-big"));
}

#[tokio::test]
async fn test_catch_up_lists_breaches_for_review() {
    let (_store, engine) = memory_engine().await;
    register_with_tier(&engine, "g0", None, "gold").await;
    for i in 1..=5 {
        register_with_tier(&engine, &format!("g{}", i), Some(&format!("g{}", i - 1)), "gold").await;
    }

    let report = engine
        .run_commission_catch_up(vec![
            purchase("tx-big", "g5", "10000"),
            // g0 has no upline: nothing to pay, nothing to flag.
            purchase("tx-root", "g0", "500"),
        ])
        .await;

    assert_eq!(report.outcomes.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.flagged.len(), 1);
    let flagged = &report.flagged[0];
    assert_eq!(flagged.transaction_id.as_str(), "tx-big");
    assert!(!flagged.retryable);
    assert!(flagged.error.starts_with("compliance cap exceeded"));
}

#[tokio::test]
async fn test_pending_transaction_is_rejected_and_retryable() {
    let (store, engine) = memory_engine().await;
    bronze_chain(&engine, 1).await;
    let tx = purchase("tx-p", "u1", "1000").with_status(TransactionStatus::Pending);

    let err = engine.calculate_for_transaction(&tx).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransactionState { .. }));
    assert!(err.is_retryable());
    assert!(store.commissions_for_transaction(&tx.id).await.unwrap().is_empty());
    assert_eq!(store.period_revenue(period()).await.unwrap(), Decimal::zero());
}

#[tokio::test]
async fn test_catch_up_isolates_failures() {
    let (_store, engine) = memory_engine().await;
    bronze_chain(&engine, 2).await;

    let report = engine
        .run_commission_catch_up(vec![
            purchase("tx-3", "u2", "1000"),
            purchase("tx-1", "u1", "1000").with_status(TransactionStatus::Failed),
            purchase("tx-2", "ghost", "1000"),
            purchase("tx-0", "u2", "3000"),
        ])
        .await;

    let done: Vec<_> = report.outcomes.iter().map(|o| o.transaction_id.as_str()).collect();
    assert_eq!(done, vec!["tx-0", "tx-3"]);
    let failed: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.transaction_id.as_str(), f.retryable))
        .collect();
    assert_eq!(failed, vec![("tx-1", true), ("tx-2", false)]);
}

#[tokio::test]
async fn test_payout_lifecycle() {
    let (store, engine) = memory_engine().await;
    bronze_chain(&engine, 2).await;
    let outcome = engine
        .calculate_for_transaction(&purchase("tx-1", "u2", "2000"))
        .await
        .unwrap();
    let (first, second) = (&outcome.commissions[0].id, &outcome.commissions[1].id);

    let paid = engine.mark_commission_paid(first, TimeMs::new(99)).await.unwrap();
    assert_eq!(paid.status, CommissionStatus::Paid);
    assert_eq!(paid.paid_at, Some(TimeMs::new(99)));

    let err = engine.mark_commission_paid(first, TimeMs::new(100)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidCommissionTransition {
            from: CommissionStatus::Paid,
            to: CommissionStatus::Paid,
            ..
        }
    ));
    assert_err!(engine.mark_commission_disputed(first).await);

    let disputed = engine.mark_commission_disputed(second).await.unwrap();
    assert_eq!(disputed.status, CommissionStatus::Disputed);
    assert_eq!(disputed.paid_at, None);

    let err = engine
        .mark_commission_paid(&CommissionId::new("cm:missing"), TimeMs::new(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CommissionNotFound(_)));

    let stored = store.get_commission(first).await.unwrap().unwrap();
    assert_eq!(stored.paid_at, Some(TimeMs::new(99)));
}

#[tokio::test]
async fn test_compensation_negates_without_touching_original() {
    let (store, engine) = memory_engine().await;
    bronze_chain(&engine, 1).await;
    let outcome = engine
        .calculate_for_transaction(&purchase("tx-1", "u1", "2000"))
        .await
        .unwrap();
    let original = outcome.commissions[0].clone();
    engine.mark_commission_paid(&original.id, TimeMs::new(5)).await.unwrap();

    let reversal = engine
        .compensate_commission(&original.id, "refund")
        .await
        .unwrap();
    assert_eq!(reversal.amount, -original.amount);
    assert_eq!(reversal.reverses, Some(original.id.clone()));
    assert_eq!(reversal.status, CommissionStatus::Pending);

    let again = engine
        .compensate_commission(&original.id, "refund")
        .await
        .unwrap();
    assert_eq!(again.id, reversal.id);

    let stored = store.get_commission(&original.id).await.unwrap().unwrap();
    assert_eq!(stored.amount, original.amount);
    assert_eq!(stored.status, CommissionStatus::Paid);
}
