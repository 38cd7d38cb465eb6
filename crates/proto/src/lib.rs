pub mod messages;
pub mod requests;

pub use messages::{DisconnectReason, IdType, NodeMsg};
pub use requests::{Request, RequestKind};

/// Capability bits exchanged in `Login`.
pub mod login_flags {
    /// Peer relays transactions into the mempool network.
    pub const SPREADING_TRANSACTIONS: u32 = 0x01;
    /// Peer serves the bulletin-board system.
    pub const BBS: u32 = 0x02;
    /// Peer forwards addresses of other peers.
    pub const SEND_PEERS: u32 = 0x04;
    /// Peer may ask us to finalize mined blocks.
    pub const MINING_FINALIZATION: u32 = 0x08;
}
