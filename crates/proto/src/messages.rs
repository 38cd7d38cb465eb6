//! Wire message bodies exchanged with remote nodes.
//!
//! Framing and field serialization live in the session layer; the types here
//! only carry the decoded content through the state machine.

use alloy_primitives::{B256, U256};
use chain::merkle::Proof;
use chain::{
    ChainworkProof, Header, HeaderElement, HeaderPrefix, NodeId, StateId, Transaction, TxKernel,
};

/// Who an `Authentication` message identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Node,
    Owner,
    Viewer,
}

/// Why the session layer dropped a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Io(String),
    Handshake(String),
    RemoteClosed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Io(e) => write!(f, "i/o error: {e}"),
            DisconnectReason::Handshake(e) => write!(f, "handshake failed: {e}"),
            DisconnectReason::RemoteClosed => write!(f, "closed by remote"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Login {
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub id_type: IdType,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTip {
    pub header: Header,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetCommonState {
    pub ids: Vec<StateId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofCommonState {
    pub id: StateId,
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofChainWork {
    pub lower_bound: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofChainWork {
    pub proof: ChainworkProof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetBlockFinalization {
    pub height: u64,
    pub fees: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFinalization {
    pub value: Transaction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BbsSubscribe {
    pub channel: u64,
    pub time_from: u64,
    pub on: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BbsMsg {
    pub channel: u64,
    pub time_posted: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventsSerif {
    pub value: B256,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub addr: String,
}

// ---------------------------------------------------------------------------
// Query / reply pairs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofUtxo {
    pub utxo: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofUtxo {
    pub proofs: Vec<Proof>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofKernel {
    pub id: B256,
}

/// Empty proof means the kernel is unknown at the current tip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofKernel {
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofKernel2 {
    pub id: B256,
    pub fetch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofKernel2 {
    pub kernel: Option<TxKernel>,
    pub height: u64,
}

pub const ASSET_ID_INVALID: u32 = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInfo {
    pub id: u32,
    pub owner: B256,
    pub metadata: Vec<u8>,
}

impl AssetInfo {
    /// Leaf hash asset inclusion proofs are built over.
    pub fn leaf(&self) -> B256 {
        use sha3::{Digest, Keccak256};
        let mut k = Keccak256::new();
        k.update(self.id.to_be_bytes());
        k.update(self.owner);
        k.update(&self.metadata);
        B256::from_slice(&k.finalize())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofAsset {
    pub owner: B256,
    pub asset_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofAsset {
    pub info: Option<AssetInfo>,
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetEvents {
    pub height_from: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub height: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventsList {
    pub items: Vec<Event>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastTransaction {
    pub tx: Transaction,
    pub fluff: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStatus {
    pub code: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetShieldedList {
    pub id0: u64,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShieldedList {
    pub items: Vec<B256>,
    pub state_hash: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofShieldedInput {
    pub spend_pk: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofShieldedInput {
    pub height: u64,
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetProofShieldedOutput {
    pub serial_pub: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofShieldedOutput {
    pub id: u64,
    pub height: u64,
    pub commitment: B256,
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSummary {
    pub utxos: u64,
    pub kernels: u64,
    pub shielded_outputs: u64,
    pub shielded_inputs: u64,
    pub assets: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetHeaders {
    pub height_min: u64,
    pub count: u64,
}

/// A run of consecutive headers, elements newest-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HdrPack {
    pub prefix: HeaderPrefix,
    pub elements: Vec<HeaderElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetBody {
    pub id: StateId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetBodyPack {
    pub top: StateId,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyPack {
    pub bodies: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetContractVars {
    pub key_min: Vec<u8>,
    pub key_max: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractVarItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractVars {
    pub items: Vec<ContractVarItem>,
    pub more: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogPos {
    pub height: u64,
    pub index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetContractLogs {
    pub height_min: u64,
    pub height_max: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractLogItem {
    pub pos: LogPos,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractLogs {
    pub items: Vec<ContractLogItem>,
    pub more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetContractVar {
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractVar {
    pub value: Vec<u8>,
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetContractLogProof {
    pub pos: LogPos,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractLogProof {
    pub proof: Proof,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetShieldedOutputsAt {
    pub height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShieldedOutputsAt {
    pub count: u64,
}

/// Every message body, both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMsg {
    Login(Login),
    Authentication(Authentication),
    NewTip(NewTip),
    GetCommonState(GetCommonState),
    ProofCommonState(ProofCommonState),
    GetProofChainWork(GetProofChainWork),
    ProofChainWork(ProofChainWork),
    GetBlockFinalization(GetBlockFinalization),
    BlockFinalization(BlockFinalization),
    BbsSubscribe(BbsSubscribe),
    BbsMsg(BbsMsg),
    Ping,
    Pong,
    DataMissing,
    EventsSerif(EventsSerif),
    PeerInfo(PeerInfo),

    GetProofUtxo(GetProofUtxo),
    ProofUtxo(ProofUtxo),
    GetProofKernel(GetProofKernel),
    ProofKernel(ProofKernel),
    GetProofKernel2(GetProofKernel2),
    ProofKernel2(ProofKernel2),
    GetProofAsset(GetProofAsset),
    ProofAsset(ProofAsset),
    GetEvents(GetEvents),
    EventsList(EventsList),
    BroadcastTransaction(BroadcastTransaction),
    TransactionStatus(TransactionStatus),
    GetShieldedList(GetShieldedList),
    ShieldedList(ShieldedList),
    GetProofShieldedInput(GetProofShieldedInput),
    ProofShieldedInput(ProofShieldedInput),
    GetProofShieldedOutput(GetProofShieldedOutput),
    ProofShieldedOutput(ProofShieldedOutput),
    GetStateSummary,
    StateSummary(StateSummary),
    GetHeaders(GetHeaders),
    HdrPack(HdrPack),
    GetBody(GetBody),
    Body(Body),
    GetBodyPack(GetBodyPack),
    BodyPack(BodyPack),
    GetContractVars(GetContractVars),
    ContractVars(ContractVars),
    GetContractLogs(GetContractLogs),
    ContractLogs(ContractLogs),
    GetContractVar(GetContractVar),
    ContractVar(ContractVar),
    GetContractLogProof(GetContractLogProof),
    ContractLogProof(ContractLogProof),
    GetShieldedOutputsAt(GetShieldedOutputsAt),
    ShieldedOutputsAt(ShieldedOutputsAt),
}

impl NodeMsg {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeMsg::Login(_) => "Login",
            NodeMsg::Authentication(_) => "Authentication",
            NodeMsg::NewTip(_) => "NewTip",
            NodeMsg::GetCommonState(_) => "GetCommonState",
            NodeMsg::ProofCommonState(_) => "ProofCommonState",
            NodeMsg::GetProofChainWork(_) => "GetProofChainWork",
            NodeMsg::ProofChainWork(_) => "ProofChainWork",
            NodeMsg::GetBlockFinalization(_) => "GetBlockFinalization",
            NodeMsg::BlockFinalization(_) => "BlockFinalization",
            NodeMsg::BbsSubscribe(_) => "BbsSubscribe",
            NodeMsg::BbsMsg(_) => "BbsMsg",
            NodeMsg::Ping => "Ping",
            NodeMsg::Pong => "Pong",
            NodeMsg::DataMissing => "DataMissing",
            NodeMsg::EventsSerif(_) => "EventsSerif",
            NodeMsg::PeerInfo(_) => "PeerInfo",
            NodeMsg::GetProofUtxo(_) => "GetProofUtxo",
            NodeMsg::ProofUtxo(_) => "ProofUtxo",
            NodeMsg::GetProofKernel(_) => "GetProofKernel",
            NodeMsg::ProofKernel(_) => "ProofKernel",
            NodeMsg::GetProofKernel2(_) => "GetProofKernel2",
            NodeMsg::ProofKernel2(_) => "ProofKernel2",
            NodeMsg::GetProofAsset(_) => "GetProofAsset",
            NodeMsg::ProofAsset(_) => "ProofAsset",
            NodeMsg::GetEvents(_) => "GetEvents",
            NodeMsg::EventsList(_) => "EventsList",
            NodeMsg::BroadcastTransaction(_) => "BroadcastTransaction",
            NodeMsg::TransactionStatus(_) => "TransactionStatus",
            NodeMsg::GetShieldedList(_) => "GetShieldedList",
            NodeMsg::ShieldedList(_) => "ShieldedList",
            NodeMsg::GetProofShieldedInput(_) => "GetProofShieldedInput",
            NodeMsg::ProofShieldedInput(_) => "ProofShieldedInput",
            NodeMsg::GetProofShieldedOutput(_) => "GetProofShieldedOutput",
            NodeMsg::ProofShieldedOutput(_) => "ProofShieldedOutput",
            NodeMsg::GetStateSummary => "GetStateSummary",
            NodeMsg::StateSummary(_) => "StateSummary",
            NodeMsg::GetHeaders(_) => "GetHeaders",
            NodeMsg::HdrPack(_) => "HdrPack",
            NodeMsg::GetBody(_) => "GetBody",
            NodeMsg::Body(_) => "Body",
            NodeMsg::GetBodyPack(_) => "GetBodyPack",
            NodeMsg::BodyPack(_) => "BodyPack",
            NodeMsg::GetContractVars(_) => "GetContractVars",
            NodeMsg::ContractVars(_) => "ContractVars",
            NodeMsg::GetContractLogs(_) => "GetContractLogs",
            NodeMsg::ContractLogs(_) => "ContractLogs",
            NodeMsg::GetContractVar(_) => "GetContractVar",
            NodeMsg::ContractVar(_) => "ContractVar",
            NodeMsg::GetContractLogProof(_) => "GetContractLogProof",
            NodeMsg::ContractLogProof(_) => "ContractLogProof",
            NodeMsg::GetShieldedOutputsAt(_) => "GetShieldedOutputsAt",
            NodeMsg::ShieldedOutputsAt(_) => "ShieldedOutputsAt",
        }
    }
}
