//! Typed request records.
//!
//! A request couples the outgoing query with a slot for the reply. Records
//! move between the dispatcher's pending queue and one connection's in-flight
//! queue; replies are matched strictly in send order by kind.

use chain::Header;

use crate::messages::{self, NodeMsg};

/// Tag identifying a request variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Utxo,
    Kernel,
    KernelById,
    Asset,
    Events,
    Transaction,
    ShieldedList,
    ShieldedInput,
    ShieldedOutput,
    StateSummary,
    HeaderRange,
    Body,
    BodyPack,
    ContractVars,
    ContractLogs,
    ContractVar,
    ContractLogProof,
    ShieldedOutputsAt,
    BbsMessage,
}

#[derive(Debug, Clone, Default)]
pub struct RequestUtxo {
    pub msg: messages::GetProofUtxo,
    pub res: messages::ProofUtxo,
}

#[derive(Debug, Clone, Default)]
pub struct RequestKernel {
    pub msg: messages::GetProofKernel,
    pub res: messages::ProofKernel,
}

#[derive(Debug, Clone, Default)]
pub struct RequestKernelById {
    pub msg: messages::GetProofKernel2,
    pub res: messages::ProofKernel2,
}

#[derive(Debug, Clone, Default)]
pub struct RequestAsset {
    pub msg: messages::GetProofAsset,
    pub res: messages::ProofAsset,
}

#[derive(Debug, Clone, Default)]
pub struct RequestEvents {
    pub msg: messages::GetEvents,
    pub res: messages::EventsList,
}

#[derive(Debug, Clone, Default)]
pub struct RequestTransaction {
    pub msg: messages::BroadcastTransaction,
    pub res: messages::TransactionStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RequestShieldedList {
    pub msg: messages::GetShieldedList,
    pub res: messages::ShieldedList,
}

#[derive(Debug, Clone, Default)]
pub struct RequestShieldedInput {
    pub msg: messages::GetProofShieldedInput,
    pub res: messages::ProofShieldedInput,
}

#[derive(Debug, Clone, Default)]
pub struct RequestShieldedOutput {
    pub msg: messages::GetProofShieldedOutput,
    pub res: messages::ProofShieldedOutput,
}

#[derive(Debug, Clone, Default)]
pub struct RequestStateSummary {
    pub res: messages::StateSummary,
}

#[derive(Debug, Clone, Default)]
pub struct RequestHeaderRange {
    pub msg: messages::GetHeaders,
    pub res: messages::HdrPack,
    /// Reconstructed and PoW-checked run, filled during validation.
    pub states: Vec<Header>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    pub msg: messages::GetBody,
    pub res: messages::Body,
}

#[derive(Debug, Clone, Default)]
pub struct RequestBodyPack {
    pub msg: messages::GetBodyPack,
    pub res: messages::BodyPack,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContractVars {
    pub msg: messages::GetContractVars,
    pub res: messages::ContractVars,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContractLogs {
    pub msg: messages::GetContractLogs,
    pub res: messages::ContractLogs,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContractVar {
    pub msg: messages::GetContractVar,
    pub res: messages::ContractVar,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContractLogProof {
    pub msg: messages::GetContractLogProof,
    pub res: messages::ContractLogProof,
}

#[derive(Debug, Clone, Default)]
pub struct RequestShieldedOutputsAt {
    pub msg: messages::GetShieldedOutputsAt,
    pub res: messages::ShieldedOutputsAt,
}

/// Outbound bulletin-board message; completion is the delivery confirmation.
#[derive(Debug, Clone, Default)]
pub struct RequestBbsMessage {
    pub msg: messages::BbsMsg,
}

#[derive(Debug, Clone)]
pub enum Request {
    Utxo(RequestUtxo),
    Kernel(RequestKernel),
    KernelById(RequestKernelById),
    Asset(RequestAsset),
    Events(RequestEvents),
    Transaction(RequestTransaction),
    ShieldedList(RequestShieldedList),
    ShieldedInput(RequestShieldedInput),
    ShieldedOutput(RequestShieldedOutput),
    StateSummary(RequestStateSummary),
    HeaderRange(RequestHeaderRange),
    Body(RequestBody),
    BodyPack(RequestBodyPack),
    ContractVars(RequestContractVars),
    ContractLogs(RequestContractLogs),
    ContractVar(RequestContractVar),
    ContractLogProof(RequestContractLogProof),
    ShieldedOutputsAt(RequestShieldedOutputsAt),
    BbsMessage(RequestBbsMessage),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Utxo(_) => RequestKind::Utxo,
            Request::Kernel(_) => RequestKind::Kernel,
            Request::KernelById(_) => RequestKind::KernelById,
            Request::Asset(_) => RequestKind::Asset,
            Request::Events(_) => RequestKind::Events,
            Request::Transaction(_) => RequestKind::Transaction,
            Request::ShieldedList(_) => RequestKind::ShieldedList,
            Request::ShieldedInput(_) => RequestKind::ShieldedInput,
            Request::ShieldedOutput(_) => RequestKind::ShieldedOutput,
            Request::StateSummary(_) => RequestKind::StateSummary,
            Request::HeaderRange(_) => RequestKind::HeaderRange,
            Request::Body(_) => RequestKind::Body,
            Request::BodyPack(_) => RequestKind::BodyPack,
            Request::ContractVars(_) => RequestKind::ContractVars,
            Request::ContractLogs(_) => RequestKind::ContractLogs,
            Request::ContractVar(_) => RequestKind::ContractVar,
            Request::ContractLogProof(_) => RequestKind::ContractLogProof,
            Request::ShieldedOutputsAt(_) => RequestKind::ShieldedOutputsAt,
            Request::BbsMessage(_) => RequestKind::BbsMessage,
        }
    }

    /// The wire message that issues this request.
    pub fn to_msg(&self) -> NodeMsg {
        match self {
            Request::Utxo(r) => NodeMsg::GetProofUtxo(r.msg.clone()),
            Request::Kernel(r) => NodeMsg::GetProofKernel(r.msg.clone()),
            Request::KernelById(r) => NodeMsg::GetProofKernel2(r.msg.clone()),
            Request::Asset(r) => NodeMsg::GetProofAsset(r.msg.clone()),
            Request::Events(r) => NodeMsg::GetEvents(r.msg.clone()),
            Request::Transaction(r) => NodeMsg::BroadcastTransaction(r.msg.clone()),
            Request::ShieldedList(r) => NodeMsg::GetShieldedList(r.msg.clone()),
            Request::ShieldedInput(r) => NodeMsg::GetProofShieldedInput(r.msg.clone()),
            Request::ShieldedOutput(r) => NodeMsg::GetProofShieldedOutput(r.msg.clone()),
            Request::StateSummary(_) => NodeMsg::GetStateSummary,
            Request::HeaderRange(r) => NodeMsg::GetHeaders(r.msg.clone()),
            Request::Body(r) => NodeMsg::GetBody(r.msg.clone()),
            Request::BodyPack(r) => NodeMsg::GetBodyPack(r.msg.clone()),
            Request::ContractVars(r) => NodeMsg::GetContractVars(r.msg.clone()),
            Request::ContractLogs(r) => NodeMsg::GetContractLogs(r.msg.clone()),
            Request::ContractVar(r) => NodeMsg::GetContractVar(r.msg.clone()),
            Request::ContractLogProof(r) => NodeMsg::GetContractLogProof(r.msg.clone()),
            Request::ShieldedOutputsAt(r) => NodeMsg::GetShieldedOutputsAt(r.msg.clone()),
            Request::BbsMessage(r) => NodeMsg::BbsMsg(r.msg.clone()),
        }
    }

    /// Which request kind a reply message completes, if any.
    pub fn response_kind(msg: &NodeMsg) -> Option<RequestKind> {
        Some(match msg {
            NodeMsg::ProofUtxo(_) => RequestKind::Utxo,
            NodeMsg::ProofKernel(_) => RequestKind::Kernel,
            NodeMsg::ProofKernel2(_) => RequestKind::KernelById,
            NodeMsg::ProofAsset(_) => RequestKind::Asset,
            NodeMsg::EventsList(_) => RequestKind::Events,
            NodeMsg::TransactionStatus(_) => RequestKind::Transaction,
            NodeMsg::ShieldedList(_) => RequestKind::ShieldedList,
            NodeMsg::ProofShieldedInput(_) => RequestKind::ShieldedInput,
            NodeMsg::ProofShieldedOutput(_) => RequestKind::ShieldedOutput,
            NodeMsg::StateSummary(_) => RequestKind::StateSummary,
            NodeMsg::HdrPack(_) => RequestKind::HeaderRange,
            NodeMsg::Body(_) => RequestKind::Body,
            NodeMsg::BodyPack(_) => RequestKind::BodyPack,
            NodeMsg::ContractVars(_) => RequestKind::ContractVars,
            NodeMsg::ContractLogs(_) => RequestKind::ContractLogs,
            NodeMsg::ContractVar(_) => RequestKind::ContractVar,
            NodeMsg::ContractLogProof(_) => RequestKind::ContractLogProof,
            NodeMsg::ShieldedOutputsAt(_) => RequestKind::ShieldedOutputsAt,
            NodeMsg::Pong => RequestKind::BbsMessage,
            _ => return None,
        })
    }

    /// Move a reply's payload into this record's result slot.
    pub fn apply_response(&mut self, msg: NodeMsg) -> Result<(), NodeMsg> {
        match (self, msg) {
            (Request::Utxo(r), NodeMsg::ProofUtxo(m)) => r.res = m,
            (Request::Kernel(r), NodeMsg::ProofKernel(m)) => r.res = m,
            (Request::KernelById(r), NodeMsg::ProofKernel2(m)) => r.res = m,
            (Request::Asset(r), NodeMsg::ProofAsset(m)) => r.res = m,
            (Request::Events(r), NodeMsg::EventsList(m)) => r.res = m,
            (Request::Transaction(r), NodeMsg::TransactionStatus(m)) => r.res = m,
            (Request::ShieldedList(r), NodeMsg::ShieldedList(m)) => r.res = m,
            (Request::ShieldedInput(r), NodeMsg::ProofShieldedInput(m)) => r.res = m,
            (Request::ShieldedOutput(r), NodeMsg::ProofShieldedOutput(m)) => r.res = m,
            (Request::StateSummary(r), NodeMsg::StateSummary(m)) => r.res = m,
            (Request::HeaderRange(r), NodeMsg::HdrPack(m)) => r.res = m,
            (Request::Body(r), NodeMsg::Body(m)) => r.res = m,
            (Request::BodyPack(r), NodeMsg::BodyPack(m)) => r.res = m,
            (Request::ContractVars(r), NodeMsg::ContractVars(m)) => r.res = m,
            (Request::ContractLogs(r), NodeMsg::ContractLogs(m)) => r.res = m,
            (Request::ContractVar(r), NodeMsg::ContractVar(m)) => r.res = m,
            (Request::ContractLogProof(r), NodeMsg::ContractLogProof(m)) => r.res = m,
            (Request::ShieldedOutputsAt(r), NodeMsg::ShieldedOutputsAt(m)) => r.res = m,
            (Request::BbsMessage(_), NodeMsg::Pong) => {}
            (_, msg) => return Err(msg),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn response_kind_matches_apply() {
        let mut req = Request::Kernel(RequestKernel {
            msg: messages::GetProofKernel {
                id: B256::repeat_byte(1),
            },
            ..Default::default()
        });

        let reply = NodeMsg::ProofKernel(messages::ProofKernel { proof: Vec::new() });
        assert_eq!(Request::response_kind(&reply), Some(req.kind()));
        assert!(req.apply_response(reply).is_ok());
    }

    #[test]
    fn mismatched_reply_is_rejected() {
        let mut req = Request::Kernel(RequestKernel::default());
        let reply = NodeMsg::StateSummary(messages::StateSummary::default());
        assert!(req.apply_response(reply).is_err());
    }

    #[test]
    fn queries_are_not_responses() {
        assert_eq!(
            Request::response_kind(&NodeMsg::GetStateSummary),
            None
        );
        assert_eq!(Request::response_kind(&NodeMsg::DataMissing), None);
    }

    #[test]
    fn bbs_request_completes_on_pong() {
        let mut req = Request::BbsMessage(RequestBbsMessage::default());
        assert_eq!(
            Request::response_kind(&NodeMsg::Pong),
            Some(RequestKind::BbsMessage)
        );
        assert!(req.apply_response(NodeMsg::Pong).is_ok());
    }
}
