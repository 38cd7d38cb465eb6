use alloy_primitives::B256;
use k256::schnorr::signature::Verifier;
use k256::schnorr::{Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

/// A transaction kernel as returned by kernel-by-id queries.
///
/// `excess` is the x-only public key the kernel signature verifies under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxKernel {
    pub excess: [u8; 32],
    pub signature: [u8; 64],
    pub fee: u64,
    pub min_height: u64,
    pub max_height: u64,
}

impl TxKernel {
    /// Kernel identity, the leaf kernel inclusion proofs are built over.
    pub fn id(&self) -> B256 {
        let mut k = Keccak256::new();
        k.update(self.excess);
        k.update(self.fee.to_be_bytes());
        k.update(self.min_height.to_be_bytes());
        k.update(self.max_height.to_be_bytes());
        B256::from_slice(&k.finalize())
    }

    /// The digest the kernel signature commits to for a given height.
    pub fn signing_message(&self, at_height: u64) -> B256 {
        let mut k = Keccak256::new();
        k.update(self.excess);
        k.update(self.fee.to_be_bytes());
        k.update(self.min_height.to_be_bytes());
        k.update(self.max_height.to_be_bytes());
        k.update(at_height.to_be_bytes());
        B256::from_slice(&k.finalize())
    }

    /// Verify the height window and the kernel signature over `at_height`.
    pub fn is_valid(&self, at_height: u64) -> bool {
        if at_height < self.min_height || at_height > self.max_height {
            return false;
        }
        let Ok(vk) = VerifyingKey::from_bytes(&self.excess) else {
            return false;
        };
        let Ok(sig) = Signature::try_from(&self.signature[..]) else {
            return false;
        };
        vk.verify(self.signing_message(at_height).as_slice(), &sig)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::schnorr::signature::Signer;
    use k256::schnorr::SigningKey;

    fn signed_kernel(at_height: u64) -> TxKernel {
        let sk = SigningKey::from_bytes(&[7u8; 32]).unwrap();
        let mut kernel = TxKernel {
            excess: sk.verifying_key().to_bytes().into(),
            signature: [0u8; 64],
            fee: 100,
            min_height: 10,
            max_height: 50,
        };
        let sig: Signature = sk.sign(kernel.signing_message(at_height).as_slice());
        kernel.signature = sig.to_bytes();
        kernel
    }

    #[test]
    fn valid_signature_within_window() {
        assert!(signed_kernel(20).is_valid(20));
    }

    #[test]
    fn height_outside_window_fails() {
        let k = signed_kernel(20);
        assert!(!k.is_valid(9));
        assert!(!k.is_valid(51));
    }

    #[test]
    fn wrong_claimed_height_fails() {
        // Signed for height 20, claimed at 21.
        assert!(!signed_kernel(20).is_valid(21));
    }

    #[test]
    fn tampered_signature_fails() {
        let mut k = signed_kernel(20);
        k.signature[0] ^= 1;
        assert!(!k.is_valid(20));
    }
}
