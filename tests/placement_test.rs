//! Matrix placement through the service layer: registration, BFS spillover,
//! slot uniqueness under concurrency and collision retries.

mod common;

use common::{engine_with, id, memory_engine, register};
use netengine::domain::{Member, MemberStatus, TierId};
use netengine::store::{MatrixStore, MemberDirectory};
use netengine::{EngineConfig, EngineError, MemoryStore, NewMember, PlacementOutcome, TimeMs};
use std::collections::HashSet;
use std::sync::Arc;

fn placed(outcome: &PlacementOutcome) -> (u32, u32, bool) {
    match outcome {
        PlacementOutcome::Placed(p) => (p.level, p.slot_index, p.is_spillover),
        other => panic!("expected a placement, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fourth_referral_spills_under_first() {
    let (_store, engine) = memory_engine().await;
    let root = engine
        .register_member(NewMember::new("a", None, TimeMs::new(0)))
        .await
        .unwrap();
    assert!(matches!(root.placement, PlacementOutcome::Root));

    let mut results = Vec::new();
    for member in ["b", "c", "d", "e"] {
        let reg = engine
            .register_member(NewMember::new(member, Some(id("a")), TimeMs::new(0)))
            .await
            .unwrap();
        results.push(placed(&reg.placement));
    }

    assert_eq!(
        results,
        vec![(1, 0, false), (1, 1, false), (1, 2, false), (2, 0, true)]
    );

    let tree = engine.matrix_tree(&id("a")).await.unwrap();
    let e = tree.position_of(&id("e")).unwrap();
    let b = tree.position_of(&id("b")).unwrap();
    assert_eq!(e.parent_position_id, Some(b.id));
    assert_eq!(tree.downline_count(), 4);
    assert_eq!(tree.depth(), 2);
    let order: Vec<_> = tree.bfs_order().iter().map(|p| p.member_id.as_str()).collect();
    assert_eq!(order, vec!["b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_placement_is_deterministic_across_runs() {
    async fn run() -> Vec<(String, u32, u32, u64, bool)> {
        let (_store, engine) = memory_engine().await;
        register(&engine, "root", None).await;
        for i in 0..20 {
            register(&engine, &format!("m{:02}", i), Some("root")).await;
        }
        let tree = engine.matrix_tree(&id("root")).await.unwrap();
        let assignments = tree
            .bfs_order()
            .iter()
            .map(|p| {
                (
                    p.member_id.to_string(),
                    p.level,
                    p.slot_index,
                    p.row_offset,
                    p.is_spillover,
                )
            })
            .collect();
        assignments
    }

    let first = run().await;
    assert_eq!(first.len(), 20);
    assert_eq!(first, run().await);
    // 3 direct, 9 on level 2, the rest on level 3.
    assert_eq!(first.iter().filter(|p| p.1 == 1).count(), 3);
    assert_eq!(first.iter().filter(|p| p.1 == 2).count(), 9);
    assert_eq!(first.iter().filter(|p| p.1 == 3).count(), 8);
}

#[tokio::test]
async fn test_concurrent_registrations_never_share_a_slot() {
    let (store, engine) = memory_engine().await;
    let engine = Arc::new(engine);
    register(&engine, "root", None).await;

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .register_member(NewMember::new(
                        format!("m{}", i).as_str(),
                        Some(id("root")),
                        TimeMs::new(0),
                    ))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        let reg = handle.await.unwrap();
        assert!(matches!(reg.placement, PlacementOutcome::Placed(_)));
    }

    let positions = store.list_positions(&id("root")).await.unwrap();
    assert_eq!(positions.len(), 30);
    let slots: HashSet<_> = positions.iter().map(|p| (p.level, p.row_offset)).collect();
    assert_eq!(slots.len(), 30);
}

#[tokio::test]
async fn test_place_is_idempotent() {
    let (_store, engine) = memory_engine().await;
    register(&engine, "a", None).await;
    register(&engine, "b", Some("a")).await;

    let first = engine.place(&id("b"), &id("a")).await.unwrap();
    let second = engine.place(&id("b"), &id("a")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.matrix_tree(&id("a")).await.unwrap().downline_count(), 1);
}

#[tokio::test]
async fn test_place_only_under_own_sponsor() {
    let (store, engine) = memory_engine().await;
    register(&engine, "a", None).await;
    register(&engine, "z", None).await;
    register(&engine, "b", Some("a")).await;

    let err = engine.place(&id("b"), &id("z")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidMember(_)));
    // A root has no sponsor to be placed under.
    let err = engine.place(&id("z"), &id("a")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidMember(_)));

    assert!(store.list_positions(&id("z")).await.unwrap().is_empty());
    assert_eq!(store.list_positions(&id("a")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_full_matrix_defers_placement_but_registers() {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        matrix_width: 2,
        max_matrix_levels: 1,
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config).await;
    register(&engine, "a", None).await;
    register(&engine, "b", Some("a")).await;
    register(&engine, "c", Some("a")).await;

    let reg = engine
        .register_member(NewMember::new("d", Some(id("a")), TimeMs::new(0)))
        .await
        .unwrap();
    match reg.placement {
        PlacementOutcome::Deferred(EngineError::MatrixFull {
            root_sponsor_id,
            max_levels,
        }) => {
            assert_eq!(root_sponsor_id, id("a"));
            assert_eq!(max_levels, 1);
        }
        other => panic!("expected MatrixFull, got {:?}", other),
    }
    assert!(store.get_member(&id("d")).await.unwrap().is_some());
    assert_eq!(store.get_position(&id("a"), &id("d")).await.unwrap(), None);
}

#[tokio::test]
async fn test_collisions_are_retried() {
    let store = Arc::new(MemoryStore::new().with_forced_collisions(2));
    let engine = engine_with(store.clone(), EngineConfig::default()).await;
    register(&engine, "a", None).await;

    let reg = engine
        .register_member(NewMember::new("b", Some(id("a")), TimeMs::new(0)))
        .await
        .unwrap();
    assert_eq!(placed(&reg.placement), (1, 0, false));
}

#[tokio::test]
async fn test_persistent_collisions_surface_contention() {
    let store = Arc::new(MemoryStore::new().with_forced_collisions(10));
    let config = EngineConfig {
        placement_max_retries: 3,
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config).await;
    register(&engine, "a", None).await;

    let reg = engine
        .register_member(NewMember::new("b", Some(id("a")), TimeMs::new(0)))
        .await
        .unwrap();
    match reg.placement {
        PlacementOutcome::Deferred(err @ EngineError::PlacementContention { attempts: 3, .. }) => {
            assert!(err.is_retryable());
        }
        other => panic!("expected contention, got {:?}", other),
    }
}

#[tokio::test]
async fn test_registration_rejects_broken_sponsorship() {
    let (store, engine) = memory_engine().await;
    register(&engine, "a", None).await;

    let err = engine
        .register_member(NewMember::new("x", Some(id("ghost")), TimeMs::new(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SponsorNotFound(_)));

    let err = engine
        .register_member(NewMember::new("y", Some(id("y")), TimeMs::new(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidMember(_)));

    let err = engine
        .register_member(NewMember::new("a", None, TimeMs::new(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidMember(_)));

    let mut unknown_tier = NewMember::new("z", Some(id("a")), TimeMs::new(0));
    unknown_tier.tier_id = Some(TierId::new("platinum"));
    let err = engine.register_member(unknown_tier).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownTier { .. }));

    store
        .insert_member(
            &Member::new(id("sleepy"), Some(id("a")), TierId::new("bronze"), TimeMs::new(0))
                .with_status(MemberStatus::Inactive),
        )
        .await
        .unwrap();
    let err = engine
        .register_member(NewMember::new("w", Some(id("sleepy")), TimeMs::new(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SponsorInactive(_)));
}

#[tokio::test]
async fn test_default_sponsor_adopts_unreferred_members() {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        default_sponsor_id: Some(id("house")),
        ..EngineConfig::default()
    };
    let engine = engine_with(store.clone(), config).await;

    let house = engine
        .register_member(NewMember::new("house", None, TimeMs::new(0)))
        .await
        .unwrap();
    assert!(matches!(house.placement, PlacementOutcome::Root));

    let reg = engine
        .register_member(NewMember::new("walk-in", None, TimeMs::new(0)))
        .await
        .unwrap();
    assert_eq!(reg.member.sponsor_id, Some(id("house")));
    assert_eq!(placed(&reg.placement), (1, 0, false));
}
