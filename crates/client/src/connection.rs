use std::collections::VecDeque;
use std::time::Instant;

use chain::{Header, NodeId};
use proto::Request;

use crate::RequestHandler;

/// Connection state bits. These are orthogonal: a peer can be a full node
/// without being owned, and liveness is independent of authentication.
pub mod flags {
    /// Transport is up and not mid-reset.
    pub const LIVE: u32 = 0x01;
    /// Outbound encrypted handshake finished; required for assignment.
    pub const SECURE_OUT: u32 = 0x02;
    /// Peer authenticated as a full node.
    pub const NODE: u32 = 0x04;
    /// Peer proved it was provisioned with our owner key.
    pub const OWNED: u32 = 0x08;
    /// The up-notification went out and must be paired with a down one.
    pub const REPORTED_CONNECTED: u32 = 0x10;
}

/// Bisection state, present only while the peer's chainwork exceeds ours.
pub(crate) struct SyncCtx {
    /// Floor of the search range.
    pub low_height: u64,
    /// Highest local header the peer has proven to hold, once found.
    pub confirmed: Option<Header>,
    /// Local tip at the moment the peer announced a non-consecutive jump.
    pub tip_before_gap: Option<Header>,
    /// Batch currently awaiting a common-state proof.
    pub confirming: Vec<Header>,
}

/// A posted request travelling through the queues.
pub(crate) struct RequestNode {
    pub id: u64,
    pub req: Request,
    /// `None` marks a cancelled request; walkers sweep those lazily.
    pub handler: Option<Box<dyn RequestHandler>>,
}

pub(crate) struct Connection {
    pub addr: String,
    pub flags: u32,
    pub login_flags: u32,
    pub node_id: NodeId,
    /// Most recent valid tip announced by this peer.
    pub tip: Option<Header>,
    pub sync: Option<SyncCtx>,
    pub inflight: VecDeque<RequestNode>,
    pub timer_at: Option<Instant>,
}

impl Connection {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            flags: 0,
            login_flags: 0,
            node_id: NodeId::ZERO,
            tip: None,
            sync: None,
            inflight: VecDeque::new(),
            timer_at: None,
        }
    }

    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn has_login(&self, flag: u32) -> bool {
        self.login_flags & flag != 0
    }

    pub fn is_live(&self) -> bool {
        self.has(flags::LIVE)
    }

    pub fn is_secure_out(&self) -> bool {
        self.has(flags::SECURE_OUT)
    }

    pub fn reset_vars(&mut self) {
        self.flags = 0;
        self.login_flags = 0;
        self.node_id = NodeId::ZERO;
        self.tip = None;
    }
}
