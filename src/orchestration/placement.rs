//! Member registration and matrix placement.

use super::Engine;
use crate::domain::{Decimal, MatrixPosition, Member, MemberId, SlotClaim, TierId, TimeMs};
use crate::engine::MatrixTree;
use crate::error::EngineError;
use crate::store::StoreError;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A registration request from the onboarding flow.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub id: MemberId,
    /// Referrer; the configured default sponsor is used when absent.
    pub sponsor_id: Option<MemberId>,
    /// Starting tier; the entry tier when absent.
    pub tier_id: Option<TierId>,
    pub joined_at: TimeMs,
    pub performance_score: Option<Decimal>,
}

impl NewMember {
    pub fn new(id: impl Into<MemberId>, sponsor_id: Option<MemberId>, joined_at: TimeMs) -> Self {
        Self {
            id: id.into(),
            sponsor_id,
            tier_id: None,
            joined_at,
            performance_score: None,
        }
    }
}

/// What happened to the new member's matrix placement.
#[derive(Debug)]
pub enum PlacementOutcome {
    Placed(MatrixPosition),
    /// Registration succeeded but placement did not; retry `place` later.
    Deferred(EngineError),
    /// No sponsor and no default sponsor: the member is a root.
    Root,
}

#[derive(Debug)]
pub struct Registration {
    pub member: Member,
    pub placement: PlacementOutcome,
}

impl Engine {
    /// Insert a member and try to place it in its sponsor's matrix.
    ///
    /// The sponsor must already exist, so the sponsorship links stay a forest.
    /// A failed placement never fails the registration.
    pub async fn register_member(&self, new: NewMember) -> Result<Registration, EngineError> {
        if new.id.as_str().trim().is_empty() {
            return Err(EngineError::InvalidMember("member id is empty".to_string()));
        }

        let sponsor_id = match &new.sponsor_id {
            Some(sponsor_id) => Some(sponsor_id.clone()),
            None => self
                .config
                .default_sponsor_id
                .clone()
                .filter(|house| house != &new.id),
        };
        if sponsor_id.as_ref() == Some(&new.id) {
            return Err(EngineError::InvalidMember(format!(
                "member {} cannot sponsor itself",
                new.id
            )));
        }
        if let Some(sponsor_id) = &sponsor_id {
            self.eligible_sponsor(sponsor_id).await?;
        }

        let tiers = self.tiers();
        let tier_id = new
            .tier_id
            .clone()
            .unwrap_or_else(|| tiers.entry_tier().id.clone());
        if tiers.get(&tier_id).is_none() {
            return Err(EngineError::UnknownTier {
                member_id: new.id.clone(),
                tier_id,
            });
        }

        let mut member = Member::new(new.id.clone(), sponsor_id.clone(), tier_id, new.joined_at);
        member.performance_score = new.performance_score;

        self.store
            .insert_member(&member)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    EngineError::InvalidMember(format!("member {} already registered", member.id))
                }
                other => other.into(),
            })?;
        tracing::info!(member_id = %member.id, sponsor_id = ?member.sponsor_id, "Member registered");

        let placement = match &sponsor_id {
            None => PlacementOutcome::Root,
            Some(sponsor_id) => match self.place(&member.id, sponsor_id).await {
                Ok(position) => PlacementOutcome::Placed(position),
                Err(e) => {
                    tracing::warn!(member_id = %member.id, sponsor_id = %sponsor_id, error = %e, "Placement deferred");
                    PlacementOutcome::Deferred(e)
                }
            },
        };

        Ok(Registration { member, placement })
    }

    async fn eligible_sponsor(&self, sponsor_id: &MemberId) -> Result<Member, EngineError> {
        let sponsor = self
            .store
            .get_member(sponsor_id)
            .await?
            .ok_or_else(|| EngineError::SponsorNotFound(sponsor_id.clone()))?;
        let is_house = self.config.default_sponsor_id.as_ref() == Some(sponsor_id);
        if !sponsor.is_active() && !is_house {
            return Err(EngineError::SponsorInactive(sponsor_id.clone()));
        }
        Ok(sponsor)
    }

    /// Place `member_id` in `sponsor_id`'s matrix.
    ///
    /// `sponsor_id` must be the member's own sponsor. Idempotent: an existing
    /// placement under this root is returned as is. Placement into one root
    /// is serialized; a lost slot race re-runs the search with exponential
    /// backoff until `placement_max_retries`.
    pub async fn place(
        &self,
        member_id: &MemberId,
        sponsor_id: &MemberId,
    ) -> Result<MatrixPosition, EngineError> {
        if member_id == sponsor_id {
            return Err(EngineError::InvalidMember(format!(
                "member {} cannot be placed under itself",
                member_id
            )));
        }
        let member = self
            .store
            .get_member(member_id)
            .await?
            .ok_or_else(|| EngineError::MemberNotFound(member_id.clone()))?;
        if member.sponsor_id.as_ref() != Some(sponsor_id) {
            return Err(EngineError::InvalidMember(format!(
                "member {} is not sponsored by {}",
                member_id, sponsor_id
            )));
        }
        if let Some(existing) = self.store.get_position(sponsor_id, member_id).await? {
            return Ok(existing);
        }
        self.eligible_sponsor(sponsor_id).await?;

        let _root_guard = self.placement_locks.lock(sponsor_id).await;
        let width = self.config.matrix_width;
        let max_levels = self.config.max_matrix_levels;
        let max_attempts = self.config.placement_max_retries;
        let attempts = AtomicU32::new(0);

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(200),
            max_elapsed_time: None,
            ..Default::default()
        };

        let position = retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let positions = self
                .store
                .list_positions(sponsor_id)
                .await
                .map_err(|e| backoff::Error::permanent(EngineError::from(e)))?;
            let tree = MatrixTree::new(sponsor_id.clone(), positions);
            let target = tree.find_open_slot(width, max_levels).ok_or_else(|| {
                backoff::Error::permanent(EngineError::MatrixFull {
                    root_sponsor_id: sponsor_id.clone(),
                    max_levels,
                })
            })?;

            let claim = self
                .store
                .claim_slot(sponsor_id, member_id, &target, TimeMs::now())
                .await
                .map_err(|e| backoff::Error::permanent(EngineError::from(e)))?;

            match claim {
                SlotClaim::Claimed(position) | SlotClaim::AlreadyPlaced(position) => Ok(position),
                SlotClaim::Collision => {
                    let err = EngineError::PlacementContention {
                        member_id: member_id.clone(),
                        attempts: attempt,
                    };
                    if attempt >= max_attempts {
                        Err(backoff::Error::permanent(err))
                    } else {
                        tracing::debug!(member_id = %member_id, root = %sponsor_id, attempt, "Slot claim collided, searching again");
                        Err(backoff::Error::transient(err))
                    }
                }
            }
        })
        .await?;

        tracing::info!(
            member_id = %member_id,
            root = %sponsor_id,
            level = position.level,
            slot = position.slot_index,
            spillover = position.is_spillover,
            "Member placed"
        );
        Ok(position)
    }

    /// Snapshot of `root_sponsor_id`'s matrix.
    pub async fn matrix_tree(&self, root_sponsor_id: &MemberId) -> Result<MatrixTree, EngineError> {
        let positions = self.store.list_positions(root_sponsor_id).await?;
        Ok(MatrixTree::new(root_sponsor_id.clone(), positions))
    }
}
