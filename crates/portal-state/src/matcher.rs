// Custodian matching
//
// SAFETY INVARIANTS:
// 1. Candidate order is fixed by (capacity desc, address asc) so every replica allocates identically
// 2. Each allocation is min(remaining, capacity); allocations sum exactly to the matched amount
// 3. AllOrNothing never returns a partial allocation

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::StateError;
use crate::types::PaymentAddress;

/// A custodian able to take up to `capacity` of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub address: PaymentAddress,
    pub remote_address: String,
    pub capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub address: PaymentAddress,
    pub remote_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Porting: the whole amount must be covered up front
    AllOrNothing,
    /// Redeem: cover what is possible, leave the rest waiting
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchOutcome {
    pub allocations: Vec<Allocation>,
    /// Unmatched part of the request
    pub remaining: u64,
}

impl MatchOutcome {
    pub fn matched(&self) -> u64 {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Deterministic greedy allocator.
pub struct CustodianMatcher;

impl CustodianMatcher {
    /// Sort candidates into allocation order.
    pub fn order(candidates: &mut [MatchCandidate]) {
        candidates.sort_by(|a, b| {
            b.capacity
                .cmp(&a.capacity)
                .then_with(|| a.address.cmp(&b.address))
        });
    }

    pub fn allocate(
        amount: u64,
        mut candidates: Vec<MatchCandidate>,
        policy: MatchPolicy,
    ) -> Result<MatchOutcome, StateError> {
        candidates.retain(|c| c.capacity > 0);
        Self::order(&mut candidates);

        let mut remaining = amount;
        let mut allocations = Vec::new();
        for candidate in candidates {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(candidate.capacity);
            remaining -= take;
            allocations.push(Allocation {
                address: candidate.address,
                remote_address: candidate.remote_address,
                amount: take,
            });
        }

        if remaining > 0 && policy == MatchPolicy::AllOrNothing {
            debug!(
                "matcher: cannot cover {} (short by {}), rejecting",
                amount, remaining
            );
            return Err(StateError::InsufficientCapacity {
                requested: amount,
                matchable: amount - remaining,
            });
        }

        Ok(MatchOutcome { allocations, remaining })
    }
}
