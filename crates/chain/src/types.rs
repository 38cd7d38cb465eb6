use alloy_primitives::{B256, U256};
use sha3::{Digest, Keccak256, Keccak512};

use crate::merkle::{self, Proof};

/// First height carrying a real block. Tips below this are ignored.
pub const HEIGHT_GENESIS: u64 = 1;

/// Identity of a remote node, as reported during authentication.
pub type NodeId = B256;

/// A serialized transaction, built and validated elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction(pub Vec<u8>);

/// Proof-of-work seal carried by every header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pow {
    pub difficulty: U256,
    pub nonce: u64,
}

/// A full chain header.
///
/// `chainwork` is the cumulative difficulty up to and including this header,
/// so headers compare by `(chainwork, height)` and the tip is the maximum.
/// `history_root` commits to the hashes of all ancestor headers, which is
/// what inclusion proofs for historical states are verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub height: u64,
    pub prev: B256,
    pub chainwork: U256,
    pub kernels_root: B256,
    pub utxo_root: B256,
    pub history_root: B256,
    pub timestamp: u64,
    pub pow: Pow,
}

/// Sequence prefix of a header run: the fields that position the run on the
/// chain. Used by the header-pack wire form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderPrefix {
    pub height: u64,
    pub prev: B256,
    pub chainwork: U256,
}

/// Per-element remainder of a header, paired with a `HeaderPrefix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderElement {
    pub kernels_root: B256,
    pub utxo_root: B256,
    pub history_root: B256,
    pub timestamp: u64,
    pub pow: Pow,
}

/// Compact identity of a historical header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateId {
    pub height: u64,
    pub hash: B256,
}

impl Header {
    fn write_sealed<D: Digest>(&self, h: &mut D) {
        h.update(self.height.to_be_bytes());
        h.update(self.prev);
        h.update(self.chainwork.to_be_bytes::<32>());
        h.update(self.kernels_root);
        h.update(self.utxo_root);
        h.update(self.history_root);
        h.update(self.timestamp.to_be_bytes());
        h.update(self.pow.difficulty.to_be_bytes::<32>());
    }

    /// Full header hash, the value `prev` of the successor points at.
    pub fn hash(&self) -> B256 {
        let mut k = Keccak256::new();
        self.write_sealed(&mut k);
        k.update(self.pow.nonce.to_be_bytes());
        B256::from_slice(&k.finalize())
    }

    /// Hash the PoW solution is evaluated on: a wide digest of the sealed
    /// fields chained with the little-endian nonce.
    pub fn pow_hash(&self) -> B256 {
        let mut k = Keccak512::new();
        self.write_sealed(&mut k);
        let seed: [u8; 64] = k.finalize().into();

        let mut k = Keccak256::new();
        k.update(seed);
        k.update(self.pow.nonce.to_le_bytes());
        B256::from_slice(&k.finalize())
    }

    /// Check the header's proof of work against its declared difficulty.
    pub fn is_valid(&self) -> bool {
        if self.pow.difficulty.is_zero() {
            return false;
        }
        let target = U256::MAX / self.pow.difficulty;
        U256::from_be_slice(self.pow_hash().as_slice()) <= target
    }

    /// Whether `next` directly extends this header.
    pub fn is_next(&self, next: &Header) -> bool {
        next.height == self.height + 1 && next.prev == self.hash()
    }

    pub fn id(&self) -> StateId {
        StateId {
            height: self.height,
            hash: self.hash(),
        }
    }

    pub fn prefix(&self) -> HeaderPrefix {
        HeaderPrefix {
            height: self.height,
            prev: self.prev,
            chainwork: self.chainwork,
        }
    }

    pub fn element(&self) -> HeaderElement {
        HeaderElement {
            kernels_root: self.kernels_root,
            utxo_root: self.utxo_root,
            history_root: self.history_root,
            timestamp: self.timestamp,
            pow: self.pow,
        }
    }

    pub fn from_parts(prefix: &HeaderPrefix, element: &HeaderElement) -> Header {
        Header {
            height: prefix.height,
            prev: prefix.prev,
            chainwork: prefix.chainwork,
            kernels_root: element.kernels_root,
            utxo_root: element.utxo_root,
            history_root: element.history_root,
            timestamp: element.timestamp,
            pow: element.pow,
        }
    }

    // ------------------------------------------------------------------
    // Proof predicates. All are verified against this header in its role
    // as the tip of the chain the prover committed to.
    // ------------------------------------------------------------------

    /// Inclusion of a historical header in the chain below this tip.
    pub fn is_valid_proof_state(&self, id: &StateId, proof: &Proof) -> bool {
        id.height < self.height && merkle::interpret(id.hash, proof) == self.history_root
    }

    /// Inclusion of an unspent output commitment.
    pub fn is_valid_proof_utxo(&self, commitment: &B256, proof: &Proof) -> bool {
        merkle::interpret(*commitment, proof) == self.utxo_root
    }

    /// Inclusion of a kernel by its id.
    pub fn is_valid_proof_kernel(&self, kernel_id: &B256, proof: &Proof) -> bool {
        merkle::interpret(*kernel_id, proof) == self.kernels_root
    }

    /// Inclusion of an asset description.
    pub fn is_valid_proof_asset(&self, asset_leaf: B256, proof: &Proof) -> bool {
        merkle::interpret(asset_leaf, proof) == self.utxo_root
    }

    /// Inclusion of a spent shielded input.
    pub fn is_valid_proof_shielded_inp(&self, desc_hash: B256, proof: &Proof) -> bool {
        merkle::interpret(desc_hash, proof) == self.utxo_root
    }

    /// Inclusion of a shielded output.
    pub fn is_valid_proof_shielded_outp(&self, desc_hash: B256, proof: &Proof) -> bool {
        merkle::interpret(desc_hash, proof) == self.utxo_root
    }

    /// Inclusion of a contract variable under this tip's state.
    pub fn is_valid_proof_contract(&self, key: &[u8], value: &[u8], proof: &Proof) -> bool {
        let mut k = Keccak256::new();
        k.update((key.len() as u32).to_be_bytes());
        k.update(key);
        k.update(value);
        let leaf = B256::from_slice(&k.finalize());
        merkle::interpret(leaf, proof) == self.utxo_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> Header {
        Header {
            height: 7,
            prev: B256::repeat_byte(1),
            chainwork: U256::from(700),
            kernels_root: B256::repeat_byte(2),
            utxo_root: B256::repeat_byte(3),
            history_root: B256::repeat_byte(4),
            timestamp: 1_600_000_000,
            pow: Pow {
                difficulty: U256::from(1),
                nonce: 0,
            },
        }
    }

    #[test]
    fn hash_deterministic_and_nonce_sensitive() {
        let h = test_header();
        assert_eq!(h.hash(), h.hash());

        let mut h2 = h.clone();
        h2.pow.nonce = 1;
        assert_ne!(h.hash(), h2.hash());
        assert_ne!(h.pow_hash(), h2.pow_hash());
    }

    #[test]
    fn difficulty_one_always_valid() {
        // Target is the full hash range, so any nonce wins.
        assert!(test_header().is_valid());
    }

    #[test]
    fn zero_difficulty_is_invalid() {
        let mut h = test_header();
        h.pow.difficulty = U256::ZERO;
        assert!(!h.is_valid());
    }

    #[test]
    fn is_next_checks_height_and_link() {
        let h = test_header();
        let mut next = test_header();
        next.height = h.height + 1;
        next.prev = h.hash();
        assert!(h.is_next(&next));

        next.prev = B256::ZERO;
        assert!(!h.is_next(&next));
    }

    #[test]
    fn prefix_element_round_trip() {
        let h = test_header();
        let rebuilt = Header::from_parts(&h.prefix(), &h.element());
        assert_eq!(h, rebuilt);
    }
}
