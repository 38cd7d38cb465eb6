//! Light-client core: per-connection sync state machines and the request
//! dispatcher that multiplexes application queries across untrusted nodes.
//!
//! The embedding owns the event loop; it feeds transport events and decoded
//! messages into [`Network`] and receives upcalls through its [`Client`]
//! implementation. Everything here runs on that single thread, except the
//! header-pack verifier which may shard PoW checks through an injected
//! [`Executor`].

pub mod config;
pub mod error;
pub mod network;
pub mod pack;

mod connection;

pub use config::{load_config_file, Config, ConfigError};
pub use connection::flags;
pub use error::ProtocolError;
pub use network::Network;
pub use pack::{Executor, Sequential, Threads};

use std::future::Future;

use alloy_primitives::B256;
use chain::{History, NodeId, OwnerKdf, Transaction};
use proto::messages::{BbsMsg, DisconnectReason};
use proto::{NodeMsg, Request};

/// The embedding application: collaborator accessors plus upcalls.
///
/// Upcalls may arrive while an upcall is already on the stack; implementations
/// must tolerate reentrancy.
pub trait Client: Send {
    type H: History;

    fn history(&self) -> &Self::H;
    fn history_mut(&mut self) -> &mut Self::H;

    /// Owner key material, if this wallet can prove node ownership.
    fn owner_kdf(&self) -> Option<&OwnerKdf> {
        None
    }

    /// Build the finalizing transaction an owned node asked for.
    fn build_finalization(&mut self, _height: u64, _fees: u64) -> Option<Transaction> {
        None
    }

    /// Contribute extra capability bits to the outgoing `Login`.
    fn setup_login(&mut self, _flags: &mut u32) {}

    fn on_new_tip(&mut self) {}
    fn on_tip_unchanged(&mut self) {}
    fn on_rolled_back(&mut self) {}
    fn on_owned_node(&mut self, _id: NodeId, _connected: bool) {}
    fn on_node_connected(&mut self, _connected: bool) {}
    fn on_connection_failed(&mut self, _reason: &DisconnectReason) {}
    /// Events checkpoint from an owned node, reported per node.
    fn on_events_serif(&mut self, _node: NodeId, _value: B256, _height: u64) {}
    fn on_new_peer(&mut self, _id: NodeId, _addr: &str) {}
}

/// Session layer handle. Connections are addressed by their stable index.
pub trait Transport: Send + Sync {
    fn connect(
        &self,
        conn: usize,
        addr: &str,
        proxy: Option<&str>,
    ) -> impl Future<Output = ()> + Send;

    /// Queue a message for delivery. `false` means the session is gone; the
    /// eventual disconnect event performs the cleanup.
    fn send(&self, conn: usize, msg: NodeMsg) -> impl Future<Output = bool> + Send;

    fn close(&self, conn: usize) -> impl Future<Output = ()> + Send;
}

/// Completion callback attached to a posted request.
pub trait RequestHandler: Send {
    fn on_complete(&mut self, req: Request);
}

/// Observer of one bulletin-board channel.
pub trait BbsReceiver: Send {
    fn on_msg(&mut self, msg: BbsMsg);
}
