pub mod history;
pub mod kernel;
pub mod keys;
pub mod merkle;
pub mod proof;
pub mod types;

pub use history::{History, MemoryHistory, StateWalker};
pub use kernel::TxKernel;
pub use keys::OwnerKdf;
pub use proof::ChainworkProof;
pub use types::{
    Header, HeaderElement, HeaderPrefix, NodeId, Pow, StateId, Transaction, HEIGHT_GENESIS,
};
