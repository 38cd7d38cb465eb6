use alloy_primitives::B256;
use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};

use crate::types::NodeId;

const OWNER_TAG: &[u8] = b"owner-auth";
const VIEWER_TAG: &[u8] = b"viewer-auth";

/// Key material proving ownership of the wallet to provisioned nodes.
///
/// Both sides of the authentication exchange derive an obscured identity
/// from the owner public key and the counterparty's node id, so the key
/// itself never crosses the wire.
pub struct OwnerKdf {
    secret: SigningKey,
}

impl OwnerKdf {
    /// Derive a key from wallet seed material.
    pub fn from_seed(seed: &[u8]) -> Self {
        // Hash until the scalar is usable; the first attempt all but always is.
        let mut counter = 0u32;
        loop {
            let mut k = Keccak256::new();
            k.update(seed);
            k.update(counter.to_be_bytes());
            if let Ok(secret) = SigningKey::from_slice(&k.finalize()) {
                return Self { secret };
            }
            counter += 1;
        }
    }

    pub fn public_bytes(&self) -> [u8; 33] {
        let point = self.secret.verifying_key().to_encoded_point(true);
        point.as_bytes().try_into().expect("compressed point")
    }

    fn obscure(&self, tag: &[u8], remote: &NodeId) -> B256 {
        let mut k = Keccak256::new();
        k.update(tag);
        k.update(self.public_bytes());
        k.update(remote);
        B256::from_slice(&k.finalize())
    }

    /// Identity we present to a node to prove we hold the owner key.
    pub fn obscured_id(&self, remote: &NodeId) -> NodeId {
        self.obscure(OWNER_TAG, remote)
    }

    /// Identity a provisioned node presents back; valid only if it was
    /// derived from the same owner key.
    pub fn viewer_id(&self, remote: &NodeId) -> NodeId {
        self.obscure(VIEWER_TAG, remote)
    }

    pub fn is_valid_viewer_proof(&self, remote: &NodeId, claimed: &NodeId) -> bool {
        self.viewer_id(remote) == *claimed
    }
}
