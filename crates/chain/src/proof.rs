use alloy_primitives::U256;

use crate::types::Header;

/// A peer's claim that its chain accumulates more work than `lower_bound`.
///
/// `states` is the supporting sample of headers, ascending by height and
/// always ending with the claimed tip. The consecutive tail must link by
/// `prev`; sparse entries lower down only need monotonic chainwork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainworkProof {
    pub lower_bound: U256,
    pub states: Vec<Header>,
}

impl ChainworkProof {
    /// Verify the proof structurally and return the tip it attests to.
    ///
    /// Checks, in order: the sample is non-empty, strictly ascending in both
    /// height and chainwork, entirely above `lower_bound`, adjacent heights
    /// link by `prev`, and every header carries valid PoW.
    pub fn is_valid(&self) -> Option<Header> {
        let first = self.states.first()?;
        if first.chainwork <= self.lower_bound {
            return None;
        }

        for pair in self.states.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.height <= a.height || b.chainwork <= a.chainwork {
                return None;
            }
            if b.height == a.height + 1 && b.prev != a.hash() {
                return None;
            }
        }

        if !self.states.iter().all(Header::is_valid) {
            return None;
        }

        self.states.last().cloned()
    }

    /// The height-sorted header array backing the proof.
    pub fn into_states(self) -> Vec<Header> {
        self.states
    }
}
