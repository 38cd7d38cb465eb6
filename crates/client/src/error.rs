use thiserror::Error;

/// A peer broke the protocol's preconditions.
///
/// These never escape to the embedding: the message trampoline answers any of
/// them by tearing the connection down, requeueing its requests and arming
/// the reconnect timer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected {0} in the current connection state")]
    Unexpected(&'static str),
    #[error("peer reported a tip without chainwork progress")]
    TipRegression,
    #[error("announced header fails PoW validation")]
    InvalidHeader,
    #[error("proof fails verification")]
    InvalidProof,
    #[error("node authenticated twice")]
    DuplicateAuthentication,
    #[error("reply {got} does not match the oldest in-flight request")]
    ResponseMismatch { got: &'static str },
    #[error("DataMissing for a request kind that requires data")]
    DataMissingUnsupported,
}
