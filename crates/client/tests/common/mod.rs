//! Shared harness: a recording client, a recording transport and a scripted
//! remote node that answers sync probes from its own chain.

use std::sync::{Arc, Mutex};

use alloy_primitives::{B256, U256};
use chain::{merkle, ChainworkProof, Header, History, MemoryHistory, NodeId, OwnerKdf, Pow, StateId};
use client::{BbsReceiver, Client, Config, Network, RequestHandler, Transport};
use proto::messages::{
    BbsMsg, DisconnectReason, NewTip, ProofChainWork, ProofCommonState,
};
use proto::{NodeMsg, Request};

pub const DIFF: u64 = 10;

// ---------------------------------------------------------------------------
// Recording client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ev {
    NewTip,
    TipUnchanged,
    RolledBack,
    OwnedNode(bool),
    NodeConnected(bool),
    ConnectionFailed,
    EventsSerif(u64),
    NewPeer,
}

pub struct RecClient {
    pub history: MemoryHistory,
    pub events: Arc<Mutex<Vec<Ev>>>,
    pub kdf: Option<OwnerKdf>,
}

impl Client for RecClient {
    type H = MemoryHistory;

    fn history(&self) -> &MemoryHistory {
        &self.history
    }

    fn history_mut(&mut self) -> &mut MemoryHistory {
        &mut self.history
    }

    fn owner_kdf(&self) -> Option<&OwnerKdf> {
        self.kdf.as_ref()
    }

    fn build_finalization(&mut self, height: u64, _fees: u64) -> Option<chain::Transaction> {
        Some(chain::Transaction(height.to_be_bytes().to_vec()))
    }

    fn on_new_tip(&mut self) {
        self.events.lock().unwrap().push(Ev::NewTip);
    }

    fn on_tip_unchanged(&mut self) {
        self.events.lock().unwrap().push(Ev::TipUnchanged);
    }

    fn on_rolled_back(&mut self) {
        self.events.lock().unwrap().push(Ev::RolledBack);
    }

    fn on_owned_node(&mut self, _id: NodeId, connected: bool) {
        self.events.lock().unwrap().push(Ev::OwnedNode(connected));
    }

    fn on_node_connected(&mut self, connected: bool) {
        self.events.lock().unwrap().push(Ev::NodeConnected(connected));
    }

    fn on_connection_failed(&mut self, _reason: &DisconnectReason) {
        self.events.lock().unwrap().push(Ev::ConnectionFailed);
    }

    fn on_events_serif(&mut self, _node: NodeId, _value: B256, height: u64) {
        self.events.lock().unwrap().push(Ev::EventsSerif(height));
    }

    fn on_new_peer(&mut self, _id: NodeId, _addr: &str) {
        self.events.lock().unwrap().push(Ev::NewPeer);
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockTransport {
    pub sent: Arc<Mutex<Vec<(usize, NodeMsg)>>>,
    pub connects: Arc<Mutex<Vec<usize>>>,
    pub closes: Arc<Mutex<Vec<usize>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_sent(&self) -> Vec<(usize, NodeMsg)> {
        self.sent.lock().unwrap().drain(..).collect()
    }

    pub fn closes(&self) -> Vec<usize> {
        self.closes.lock().unwrap().clone()
    }

    pub fn connects(&self) -> Vec<usize> {
        self.connects.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn connect(&self, conn: usize, _addr: &str, _proxy: Option<&str>) {
        self.connects.lock().unwrap().push(conn);
    }

    async fn send(&self, conn: usize, msg: NodeMsg) -> bool {
        self.sent.lock().unwrap().push((conn, msg));
        true
    }

    async fn close(&self, conn: usize) {
        self.closes.lock().unwrap().push(conn);
    }
}

// ---------------------------------------------------------------------------
// Handlers and receivers
// ---------------------------------------------------------------------------

pub struct RecHandler(pub Arc<Mutex<Vec<Request>>>);

impl RequestHandler for RecHandler {
    fn on_complete(&mut self, req: Request) {
        self.0.lock().unwrap().push(req);
    }
}

pub struct RecReceiver(pub Arc<Mutex<Vec<BbsMsg>>>);

impl BbsReceiver for RecReceiver {
    fn on_msg(&mut self, msg: BbsMsg) {
        self.0.lock().unwrap().push(msg);
    }
}

// ---------------------------------------------------------------------------
// Chain building
// ---------------------------------------------------------------------------

pub fn mine(header: &mut Header) {
    while !header.is_valid() {
        header.pow.nonce += 1;
    }
}

fn tagged_root(tag: u8, height: u64, salt: u8) -> B256 {
    let mut b = [0u8; 32];
    b[0] = tag;
    b[1] = salt;
    b[8..16].copy_from_slice(&height.to_be_bytes());
    B256::from(b)
}

/// Extend `base` with `n` mined headers. `tag` differentiates forks: two
/// extensions of the same base with different tags diverge immediately.
pub fn extend_chain(base: &[Header], n: u64, tag: u8) -> Vec<Header> {
    let mut out = base.to_vec();
    let mut leaves: Vec<B256> = base.iter().map(Header::hash).collect();

    for _ in 0..n {
        let height = out.len() as u64 + 1;
        let (prev, chainwork) = match out.last() {
            Some(p) => (p.hash(), p.chainwork + U256::from(DIFF)),
            None => (B256::ZERO, U256::from(DIFF)),
        };
        let mut h = Header {
            height,
            prev,
            chainwork,
            kernels_root: tagged_root(tag, height, 1),
            utxo_root: tagged_root(tag, height, 2),
            history_root: merkle::root_over(&leaves),
            timestamp: 1_700_000_000 + height,
            pow: Pow {
                difficulty: U256::from(DIFF),
                nonce: 0,
            },
        };
        mine(&mut h);
        leaves.push(h.hash());
        out.push(h);
    }
    out
}

pub fn build_chain(n: u64, tag: u8) -> Vec<Header> {
    extend_chain(&[], n, tag)
}

/// Append one mined header with chosen commitment roots; used to anchor
/// proof-carrying replies against a tip the test controls.
pub fn extend_with_roots(base: &[Header], utxo_root: B256, kernels_root: B256) -> Vec<Header> {
    let mut out = extend_chain(base, 1, 0xff);
    let top = out.last_mut().unwrap();
    top.utxo_root = utxo_root;
    top.kernels_root = kernels_root;
    top.pow.nonce = 0;
    mine(top);
    out
}

// ---------------------------------------------------------------------------
// Scripted remote node
// ---------------------------------------------------------------------------

/// Holds a full chain and answers sync probes the way a node would.
pub struct MockNode {
    pub chain: Vec<Header>,
}

impl MockNode {
    pub fn new(chain: Vec<Header>) -> Self {
        Self { chain }
    }

    pub fn tip(&self) -> Header {
        self.chain.last().unwrap().clone()
    }

    fn header_at(&self, height: u64) -> Option<&Header> {
        self.chain.get(height as usize - 1)
    }

    /// Hashes of every header below the tip, in height order.
    fn leaves(&self) -> Vec<B256> {
        let below = self.chain.len() - 1;
        self.chain[..below].iter().map(Header::hash).collect()
    }

    fn prove_height(&self, height: u64) -> ProofCommonState {
        let leaves = self.leaves();
        let idx = height as usize - 1;
        ProofCommonState {
            id: StateId {
                height,
                hash: leaves[idx],
            },
            proof: merkle::proof_for(&leaves, idx),
        }
    }

    /// First requested id on our chain is proven; if none is, the last id's
    /// height is answered with our own state there as a disproof.
    pub fn answer_common_state(&self, ids: &[StateId]) -> ProofCommonState {
        for id in ids {
            if let Some(h) = self.header_at(id.height) {
                if h.hash() == id.hash {
                    return self.prove_height(id.height);
                }
            }
        }
        self.prove_height(ids.last().unwrap().height)
    }

    pub fn answer_chainwork(&self, lower_bound: U256) -> ProofChainWork {
        let states = self
            .chain
            .iter()
            .filter(|s| s.chainwork > lower_bound)
            .cloned()
            .collect();
        ProofChainWork {
            proof: ChainworkProof {
                lower_bound,
                states,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Network setup and drivers
// ---------------------------------------------------------------------------

pub fn make_network(n_conns: usize, local: &[Header], kdf: Option<OwnerKdf>) -> Network<RecClient> {
    let cfg = Config {
        node_addresses: (0..n_conns).map(|i| format!("10.1.0.{i}:9100")).collect(),
        reconnect_timeout_ms: 0,
        close_connection_delay_ms: 0,
        ..Default::default()
    };
    let mut history = MemoryHistory::new();
    if !local.is_empty() {
        history.add_states(local);
    }
    Network::new(
        cfg,
        RecClient {
            history,
            events: Arc::new(Mutex::new(Vec::new())),
            kdf,
        },
    )
}

pub fn events_of(net: &Network<RecClient>) -> Vec<Ev> {
    net.client().events.lock().unwrap().clone()
}

pub fn local_tip_height(net: &Network<RecClient>) -> Option<u64> {
    net.client().history.get_tip().map(|s| s.height)
}

/// Announce the node's tip and keep answering its sync probes until the
/// connection stops asking. Returns every outbound message drained while
/// driving, for inspection.
pub async fn drive_sync(
    net: &mut Network<RecClient>,
    ci: usize,
    node: &MockNode,
    tr: &MockTransport,
) -> Vec<(usize, NodeMsg)> {
    net.on_msg(ci, NodeMsg::NewTip(NewTip { header: node.tip() }), tr)
        .await;
    drive_probes(net, ci, node, tr).await
}

/// Answer already-outstanding probes for `ci` until quiescent.
pub async fn drive_probes(
    net: &mut Network<RecClient>,
    ci: usize,
    node: &MockNode,
    tr: &MockTransport,
) -> Vec<(usize, NodeMsg)> {
    let mut seen = Vec::new();
    loop {
        let batch = tr.take_sent();
        if batch.is_empty() {
            break;
        }
        let mut answered = false;
        for (conn, msg) in batch {
            if conn == ci {
                match &msg {
                    NodeMsg::GetCommonState(m) => {
                        let reply = node.answer_common_state(&m.ids);
                        seen.push((conn, msg));
                        net.on_msg(ci, NodeMsg::ProofCommonState(reply), tr).await;
                        answered = true;
                        continue;
                    }
                    NodeMsg::GetProofChainWork(m) => {
                        let reply = node.answer_chainwork(m.lower_bound);
                        seen.push((conn, msg));
                        net.on_msg(ci, NodeMsg::ProofChainWork(reply), tr).await;
                        answered = true;
                        continue;
                    }
                    _ => {}
                }
            }
            seen.push((conn, msg));
        }
        if !answered {
            break;
        }
    }
    seen
}

/// Common-state probe batch sizes observed in a drained message log.
pub fn probe_sizes(log: &[(usize, NodeMsg)]) -> Vec<usize> {
    log.iter()
        .filter_map(|(_, m)| match m {
            NodeMsg::GetCommonState(g) => Some(g.ids.len()),
            _ => None,
        })
        .collect()
}
