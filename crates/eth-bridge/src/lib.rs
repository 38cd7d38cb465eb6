pub mod header;
pub mod rlp;

pub use header::EthHeader;
pub use rlp::{decode, HashStream, Item, Node, RlpError, Sink, Visitor};
