use alloy_primitives::{Address, B256};
use sha3::{Digest, Keccak512};

use crate::rlp::{HashStream, Node};

/// Blocks per PoW cache epoch on the external chain.
const EPOCH_LENGTH: u64 = 30_000;

/// Header of the external chain referenced by cross-chain proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthHeader {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub tx_root: B256,
    pub receipt_root: B256,
    pub bloom: [u8; 256],
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: B256,
    pub nonce: u64,
}

impl EthHeader {
    fn base_nodes(&self) -> [Node<'_>; 13] {
        [
            Node::bytes(self.parent_hash.as_slice()),
            Node::bytes(self.uncle_hash.as_slice()),
            Node::bytes(self.coinbase.as_slice()),
            Node::bytes(self.state_root.as_slice()),
            Node::bytes(self.tx_root.as_slice()),
            Node::bytes(self.receipt_root.as_slice()),
            Node::bytes(&self.bloom),
            Node::integer(self.difficulty),
            Node::integer(self.number),
            Node::integer(self.gas_limit),
            Node::integer(self.gas_used),
            Node::integer(self.timestamp),
            Node::bytes(&self.extra_data),
        ]
    }

    fn hash_nodes(nodes: &[Node<'_>]) -> B256 {
        let root = Node::list(nodes);
        let mut hs = HashStream::new();
        root.write(&mut hs);
        hs.finish()
    }

    /// Hash of the 13-field header, the value the PoW is mined over.
    pub fn hash_for_pow(&self) -> B256 {
        Self::hash_nodes(&self.base_nodes())
    }

    /// Final header hash including the mix hash and nonce.
    pub fn hash_final(&self) -> B256 {
        let base = self.base_nodes();
        let mut nodes: Vec<Node<'_>> = base.into();
        nodes.push(Node::bytes(self.mix_hash.as_slice()));
        nodes.push(Node::integer(self.nonce));
        Self::hash_nodes(&nodes)
    }

    /// Seed digest the PoW dataset lookup starts from.
    pub fn pow_seed(&self) -> [u8; 64] {
        let mut k = Keccak512::new();
        k.update(self.hash_for_pow());
        k.update(self.nonce.to_le_bytes());
        k.finalize().into()
    }

    /// PoW cache epoch of this header.
    pub fn epoch(&self) -> u64 {
        self.number / EPOCH_LENGTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b256(s: &str) -> B256 {
        B256::from_slice(&hex::decode(s).unwrap())
    }

    /// Mainnet block 1 of the external chain.
    fn block_1() -> EthHeader {
        EthHeader {
            parent_hash: b256("d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3"),
            uncle_hash: b256("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"),
            coinbase: Address::from_slice(
                &hex::decode("05a56e2d52c817161883f50c441c3228cfe54d9f").unwrap(),
            ),
            state_root: b256("d67e4d450343046425ae4271474353857ab860dbc0a1dde64b41b5cd3a532bf3"),
            tx_root: b256("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"),
            receipt_root: b256("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"),
            bloom: [0u8; 256],
            difficulty: 0x3ff800000,
            number: 1,
            gas_limit: 5000,
            gas_used: 0,
            timestamp: 1438269988,
            extra_data: hex::decode("476574682f76312e302e302f6c696e75782f676f312e342e32").unwrap(),
            mix_hash: b256("969b900de27b6ac6a67742365dd65f55a0526c41fd18e1b16f1a1215c2e66f59"),
            nonce: 0x539bd4979fef1ec4,
        }
    }

    #[test]
    fn final_hash_matches_mainnet_block_1() {
        assert_eq!(
            block_1().hash_final(),
            b256("88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6")
        );
    }

    #[test]
    fn pow_hash_excludes_seal() {
        let h = block_1();
        assert_ne!(h.hash_for_pow(), h.hash_final());

        let mut reseal = h.clone();
        reseal.nonce = 0;
        reseal.mix_hash = B256::ZERO;
        assert_eq!(h.hash_for_pow(), reseal.hash_for_pow());
    }

    #[test]
    fn pow_seed_depends_on_nonce() {
        let h = block_1();
        let mut other = h.clone();
        other.nonce += 1;
        assert_ne!(h.pow_seed(), other.pow_seed());
    }

    #[test]
    fn epoch_boundaries() {
        let mut h = block_1();
        assert_eq!(h.epoch(), 0);
        h.number = 29_999;
        assert_eq!(h.epoch(), 0);
        h.number = 30_000;
        assert_eq!(h.epoch(), 1);
    }
}
