use alloy_primitives::B256;
use sha3::{Digest, Keccak256};

/// One step of a Merkle path. `on_right` says which side the sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofNode {
    pub on_right: bool,
    pub hash: B256,
}

pub type Proof = Vec<ProofNode>;

fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut k = Keccak256::new();
    k.update(left);
    k.update(right);
    B256::from_slice(&k.finalize())
}

/// Fold a leaf up a proof path, yielding the root it commits to.
pub fn interpret(leaf: B256, proof: &[ProofNode]) -> B256 {
    let mut hv = leaf;
    for node in proof {
        hv = if node.on_right {
            hash_pair(&hv, &node.hash)
        } else {
            hash_pair(&node.hash, &hv)
        };
    }
    hv
}

/// Largest power of two strictly below `n`. Callers guarantee `n >= 2`.
fn split_point(n: usize) -> usize {
    let half = n.next_power_of_two() / 2;
    debug_assert!(half >= 1 && half < n);
    half
}

/// Root of the left-complete range tree over a leaf sequence.
pub fn root_over(leaves: &[B256]) -> B256 {
    match leaves.len() {
        0 => B256::ZERO,
        1 => leaves[0],
        n => {
            let m = split_point(n);
            hash_pair(&root_over(&leaves[..m]), &root_over(&leaves[m..]))
        }
    }
}

/// Path proving `leaves[index]` under `root_over(leaves)`.
pub fn proof_for(leaves: &[B256], index: usize) -> Proof {
    assert!(index < leaves.len());
    let mut proof = Proof::new();
    build_proof(leaves, index, &mut proof);
    proof
}

fn build_proof(leaves: &[B256], index: usize, out: &mut Proof) {
    if leaves.len() == 1 {
        return;
    }
    let m = split_point(leaves.len());
    if index < m {
        build_proof(&leaves[..m], index, out);
        out.push(ProofNode {
            on_right: true,
            hash: root_over(&leaves[m..]),
        });
    } else {
        build_proof(&leaves[m..], index - m, out);
        out.push(ProofNode {
            on_right: false,
            hash: root_over(&leaves[..m]),
        });
    }
}
