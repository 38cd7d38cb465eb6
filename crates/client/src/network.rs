//! The dispatcher: owns the peer set, the global pending-request queue and
//! the bulletin-board subscription table, and runs one sync state machine
//! per connection.
//!
//! Every handler that can observe a protocol violation returns a
//! [`ProtocolError`]; the message trampoline turns that into a teardown plus
//! reconnect timer. Violations are logged, never surfaced to the embedding.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use sha3::{Digest, Keccak256};
use tracing::{debug, info, warn};

use chain::{Header, History, StateId, StateWalker, HEIGHT_GENESIS};
use proto::messages::{
    Authentication, BbsMsg, BbsSubscribe, BlockFinalization, DisconnectReason, EventsSerif,
    GetBlockFinalization, GetCommonState, GetProofChainWork, IdType, Login, PeerInfo,
    ProofChainWork, ProofCommonState, ASSET_ID_INVALID,
};
use proto::{login_flags, NodeMsg, Request, RequestKind};

use crate::config::Config;
use crate::connection::{flags, Connection, RequestNode, SyncCtx};
use crate::error::ProtocolError;
use crate::pack;
use crate::{BbsReceiver, Client, Executor, RequestHandler, Sequential, Transport};

struct BbsEntry {
    receiver: Box<dyn BbsReceiver>,
    last_seen: u64,
}

/// The request-multiplexing network core. One instance per client.
pub struct Network<C: Client> {
    cfg: Config,
    client: C,
    conns: Vec<Connection>,
    /// Connection indices in assignment priority order. The last connection
    /// to finish a sync is hoisted to the front.
    order: Vec<usize>,
    pending: VecDeque<RequestNode>,
    bbs: HashMap<u64, BbsEntry>,
    executor: Box<dyn Executor>,
    next_request_id: u64,
}

impl<C: Client> Network<C> {
    pub fn new(cfg: Config, client: C) -> Self {
        let conns: Vec<Connection> = cfg
            .node_addresses
            .iter()
            .map(|a| Connection::new(a.clone()))
            .collect();
        let order = (0..conns.len()).collect();
        Self {
            cfg,
            client,
            conns,
            order,
            pending: VecDeque::new(),
            bbs: HashMap::new(),
            executor: Box::new(Sequential),
            next_request_id: 1,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Install a parallel executor for header-pack verification.
    pub fn set_executor(&mut self, executor: Box<dyn Executor>) {
        self.executor = executor;
    }

    // ------------------------------------------------------------------
    // Introspection, mostly for the embedding's status surface
    // ------------------------------------------------------------------

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn connection_tip(&self, conn: usize) -> Option<&Header> {
        self.conns[conn].tip.as_ref()
    }

    pub fn is_live(&self, conn: usize) -> bool {
        self.conns[conn].is_live()
    }

    pub fn is_owned(&self, conn: usize) -> bool {
        self.conns[conn].has(flags::OWNED)
    }

    pub fn is_syncing(&self, conn: usize) -> bool {
        self.conns[conn].sync.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn inflight_len(&self, conn: usize) -> usize {
        self.conns[conn].inflight.len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Dial every connection that is not already live and secure.
    pub async fn connect_all(&mut self, t: &(impl Transport + ?Sized)) {
        for ci in 0..self.conns.len() {
            if self.conns[ci].is_live() && self.conns[ci].is_secure_out() {
                continue;
            }
            self.teardown(ci, t).await;
            self.dial(ci, t).await;
        }
    }

    /// Tear everything down; in-flight requests return to the global queue.
    pub async fn shutdown(&mut self, t: &(impl Transport + ?Sized)) {
        for ci in 0..self.conns.len() {
            self.teardown(ci, t).await;
        }
    }

    async fn dial(&self, ci: usize, t: &(impl Transport + ?Sized)) {
        let proxy = self
            .cfg
            .use_proxy
            .then_some(self.cfg.proxy_address.as_deref())
            .flatten();
        debug!(conn = ci, addr = %self.conns[ci].addr, "dialing");
        t.connect(ci, &self.conns[ci].addr, proxy).await;
    }

    /// The outbound encrypted handshake finished.
    pub async fn on_connected_secure(&mut self, ci: usize, t: &(impl Transport + ?Sized)) {
        self.conns[ci].flags |= flags::LIVE | flags::SECURE_OUT;

        let mut login = login_flags::MINING_FINALIZATION | login_flags::SEND_PEERS;
        self.client.setup_login(&mut login);
        if !t.send(ci, NodeMsg::Login(Login { flags: login })).await {
            warn!(conn = ci, "failed to send login");
        }

        if !self.conns[ci].has(flags::REPORTED_CONNECTED) {
            self.conns[ci].flags |= flags::REPORTED_CONNECTED;
            self.client.on_node_connected(true);
        }
    }

    /// The session layer dropped the connection.
    pub async fn on_disconnect(
        &mut self,
        ci: usize,
        reason: DisconnectReason,
        t: &(impl Transport + ?Sized),
    ) {
        warn!(conn = ci, %reason, "disconnected");
        self.client.on_connection_failed(&reason);
        self.teardown(ci, t).await;
        self.arm_reconnect(ci);
    }

    fn arm_reconnect(&mut self, ci: usize) {
        self.conns[ci].timer_at =
            Some(Instant::now() + Duration::from_millis(self.cfg.reconnect_timeout_ms as u64));
    }

    async fn teardown(&mut self, ci: usize, t: &(impl Transport + ?Sized)) {
        t.close(ci).await;
        self.reset_internal(ci);
        self.conns[ci].reset_vars();
    }

    fn reset_internal(&mut self, ci: usize) {
        self.conns[ci].sync = None;
        self.conns[ci].timer_at = None;

        if self.conns[ci].has(flags::OWNED) {
            let id = self.conns[ci].node_id;
            self.client.on_owned_node(id, false);
        }
        if self.conns[ci].has(flags::REPORTED_CONNECTED) {
            self.client.on_node_connected(false);
        }

        // Outstanding requests go back to the global queue, order preserved.
        while let Some(node) = self.conns[ci].inflight.pop_front() {
            self.pending.push_back(node);
        }
    }

    /// Sweep due timers. Live connections in poll mode close and re-arm for
    /// the next poll; dead ones redial.
    pub async fn check_timeouts(&mut self, t: &(impl Transport + ?Sized)) {
        let now = Instant::now();
        for ci in 0..self.conns.len() {
            let due = matches!(self.conns[ci].timer_at, Some(at) if at <= now);
            if !due {
                continue;
            }
            self.conns[ci].timer_at = None;

            if self.conns[ci].is_live() {
                if self.cfg.poll_period_ms != 0 {
                    debug!(conn = ci, "idle close between polls");
                    self.teardown(ci, t).await;
                    let delay = (self.cfg.target_block_time_s as u64 * 1000)
                        .max(self.cfg.poll_period_ms as u64);
                    self.conns[ci].timer_at = Some(now + Duration::from_millis(delay));
                }
            } else {
                self.dial(ci, t).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Message trampoline
    // ------------------------------------------------------------------

    /// Feed one decoded message from connection `ci` through the state
    /// machine. Protocol violations tear the connection down here.
    pub async fn on_msg(&mut self, ci: usize, msg: NodeMsg, t: &(impl Transport + ?Sized)) {
        if let Err(e) = self.handle_msg(ci, msg, t).await {
            warn!(conn = ci, err = %e, "protocol violation, dropping connection");
            self.teardown(ci, t).await;
            self.arm_reconnect(ci);
        }
    }

    async fn handle_msg(
        &mut self,
        ci: usize,
        msg: NodeMsg,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        match msg {
            NodeMsg::Login(m) => {
                self.handle_peer_login(ci, m, t).await;
                Ok(())
            }
            NodeMsg::Authentication(m) => self.handle_authentication(ci, m, t).await,
            NodeMsg::NewTip(m) => self.handle_new_tip(ci, m.header, t).await,
            NodeMsg::ProofCommonState(m) => self.on_proof_common_state(ci, m, t).await,
            NodeMsg::ProofChainWork(m) => self.on_proof_chain_work(ci, m, t).await,
            NodeMsg::GetBlockFinalization(m) => self.handle_block_finalization(ci, m, t).await,
            NodeMsg::BbsMsg(m) => {
                self.handle_bbs_msg(m);
                Ok(())
            }
            NodeMsg::EventsSerif(m) => self.handle_events_serif(ci, m),
            NodeMsg::PeerInfo(m) => {
                self.handle_peer_info(m);
                Ok(())
            }
            NodeMsg::DataMissing => self.on_data_missing(ci, t).await,
            NodeMsg::Ping => {
                t.send(ci, NodeMsg::Pong).await;
                Ok(())
            }
            other => {
                if let Some(kind) = Request::response_kind(&other) {
                    self.on_request_reply(ci, kind, other, t).await
                } else {
                    Err(ProtocolError::Unexpected(other.name()))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Login and authentication
    // ------------------------------------------------------------------

    async fn handle_peer_login(&mut self, ci: usize, msg: Login, t: &(impl Transport + ?Sized)) {
        debug!(conn = ci, flags = msg.flags, "peer login");
        self.conns[ci].login_flags = msg.flags;
        self.assign_requests(ci, t).await;

        if msg.flags & login_flags::BBS != 0 {
            let subs: Vec<(u64, u64)> = self
                .bbs
                .iter()
                .map(|(ch, e)| (*ch, e.last_seen))
                .collect();
            for (channel, time_from) in subs {
                t.send(
                    ci,
                    NodeMsg::BbsSubscribe(BbsSubscribe {
                        channel,
                        time_from,
                        on: true,
                    }),
                )
                .await;
            }
        }
    }

    async fn handle_authentication(
        &mut self,
        ci: usize,
        msg: Authentication,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        match msg.id_type {
            IdType::Node => {
                if self.conns[ci].has(flags::NODE) {
                    return Err(ProtocolError::DuplicateAuthentication);
                }
                self.conns[ci].flags |= flags::NODE;
                self.conns[ci].node_id = msg.id;

                if let Some(kdf) = self.client.owner_kdf() {
                    let proof = kdf.obscured_id(&msg.id);
                    t.send(
                        ci,
                        NodeMsg::Authentication(Authentication {
                            id_type: IdType::Owner,
                            id: proof,
                        }),
                    )
                    .await;
                }
            }
            IdType::Viewer => {
                if self.conns[ci].has(flags::OWNED) || !self.conns[ci].has(flags::NODE) {
                    return Err(ProtocolError::Unexpected("Authentication"));
                }
                let node_id = self.conns[ci].node_id;
                let ok = self
                    .client
                    .owner_kdf()
                    .map(|k| k.is_valid_viewer_proof(&node_id, &msg.id))
                    .unwrap_or(false);
                if !ok {
                    return Err(ProtocolError::Unexpected("Authentication"));
                }
                self.conns[ci].flags |= flags::OWNED;
                info!(conn = ci, node = %node_id, "node proved ownership");
                self.client.on_owned_node(node_id, true);
            }
            // Only ever sent by us.
            IdType::Owner => {}
        }
        Ok(())
    }

    async fn handle_block_finalization(
        &mut self,
        ci: usize,
        msg: GetBlockFinalization,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        if !self.conns[ci].has(flags::OWNED) {
            return Err(ProtocolError::Unexpected("GetBlockFinalization"));
        }
        let value = self
            .client
            .build_finalization(msg.height, msg.fees)
            .ok_or(ProtocolError::Unexpected("GetBlockFinalization"))?;
        t.send(ci, NodeMsg::BlockFinalization(BlockFinalization { value }))
            .await;
        Ok(())
    }

    fn handle_events_serif(&mut self, ci: usize, msg: EventsSerif) -> Result<(), ProtocolError> {
        if !self.conns[ci].has(flags::OWNED) {
            return Err(ProtocolError::Unexpected("EventsSerif"));
        }
        let node_id = self.conns[ci].node_id;
        self.client.on_events_serif(node_id, msg.value, msg.height);
        Ok(())
    }

    fn handle_peer_info(&mut self, msg: PeerInfo) {
        self.client.on_new_peer(msg.id, &msg.addr);
    }

    // ------------------------------------------------------------------
    // Tip tracking and sync
    // ------------------------------------------------------------------

    fn should_sync(&self, ci: usize) -> bool {
        let Some(peer_tip) = self.conns[ci].tip.as_ref() else {
            return false;
        };
        match self.client.history().get_tip() {
            Some(local) => local.chainwork < peer_tip.chainwork,
            None => true,
        }
    }

    fn is_at_tip(&self, ci: usize) -> bool {
        match (self.client.history().get_tip(), self.conns[ci].tip.as_ref()) {
            (Some(local), Some(peer)) => local == *peer,
            _ => false,
        }
    }

    fn prioritize(&mut self, ci: usize) {
        self.order.retain(|&x| x != ci);
        self.order.insert(0, ci);
    }

    async fn handle_new_tip(
        &mut self,
        ci: usize,
        header: Header,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        if header.height < HEIGHT_GENESIS {
            return Ok(());
        }

        let was_unset;
        {
            let conn = &mut self.conns[ci];
            if conn.tip.as_ref() == Some(&header) {
                return Ok(()); // redundant announcement
            }
            let current = conn.tip.as_ref().map(|s| s.chainwork).unwrap_or_default();
            if header.chainwork <= current {
                return Err(ProtocolError::TipRegression);
            }
            if !header.is_valid() {
                return Err(ProtocolError::InvalidHeader);
            }

            // A non-consecutive jump while bisecting usually means the peer
            // reorganized; remember where we were so the chainwork proof can
            // tell us whether the probe window is still meaningful.
            if let (Some(sync), Some(tip)) = (conn.sync.as_mut(), conn.tip.as_ref()) {
                if sync.confirming.is_empty()
                    && sync.tip_before_gap.is_none()
                    && !tip.is_next(&header)
                {
                    sync.tip_before_gap = Some(tip.clone());
                }
            }

            was_unset = conn.tip.is_none();
            debug!(conn = ci, height = header.height, "new tip");
            conn.tip = Some(header);
        }

        if self.conns[ci].sync.is_none() {
            if self.should_sync(ci) {
                self.start_sync(ci, t).await;
            } else {
                self.client.on_tip_unchanged();
                if was_unset {
                    // The peer just became usable for at-tip queries.
                    self.assign_requests(ci, t).await;
                }
            }
        }
        Ok(())
    }

    async fn start_sync(&mut self, ci: usize, t: &(impl Transport + ?Sized)) {
        debug_assert!(self.should_sync(ci));
        self.conns[ci].timer_at = None;

        let peer_tip = self.conns[ci].tip.clone().expect("tip set before sync");

        if let Some(local) = self.client.history().get_tip() {
            if local.is_next(&peer_tip) {
                info!(conn = ci, height = peer_tip.height, "fast-forward to announced tip");
                self.client
                    .history_mut()
                    .add_states(std::slice::from_ref(&peer_tip));
                self.prioritize(ci);
                self.assign_requests(ci, t).await;
                self.client.on_new_tip();
                return;
            }
        }

        info!(conn = ci, height = peer_tip.height, "starting bisection sync");
        self.conns[ci].sync = Some(SyncCtx {
            low_height: peer_tip.height,
            confirmed: None,
            tip_before_gap: None,
            confirming: Vec::new(),
        });
        self.search_below(ci, peer_tip.height, 1, t).await;
    }

    /// Ask the peer which of our headers at heights `<= h` it holds.
    async fn search_below(&mut self, ci: usize, h: u64, count: u32, t: &(impl Transport + ?Sized)) {
        debug_assert!(count > 0);
        debug_assert!(self.should_sync(ci));

        struct Collect {
            want: usize,
            states: Vec<Header>,
        }
        impl StateWalker for Collect {
            fn on_state(&mut self, s: &Header) -> bool {
                self.states.push(s.clone());
                self.states.len() < self.want
            }
        }

        let mut w = Collect {
            want: count as usize,
            states: Vec::with_capacity(count as usize),
        };
        self.client.history().enum_states(&mut w, Some(h));

        if w.states.is_empty() {
            // Nothing left to probe; the whole chain needs proving.
            self.conns[ci].sync.as_mut().expect("syncing").confirmed = None;
            self.request_chainwork_proof(ci, t).await;
        } else {
            let ids: Vec<StateId> = w.states.iter().map(Header::id).collect();
            debug!(conn = ci, below = h, batch = ids.len(), "probing common state");
            t.send(ci, NodeMsg::GetCommonState(GetCommonState { ids }))
                .await;
            self.conns[ci].sync.as_mut().expect("syncing").confirming = w.states;
        }
    }

    async fn on_proof_common_state(
        &mut self,
        ci: usize,
        msg: ProofCommonState,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        let states = {
            let Some(sync) = self.conns[ci].sync.as_mut() else {
                return Err(ProtocolError::Unexpected("ProofCommonState"));
            };
            std::mem::take(&mut sync.confirming)
        };
        if states.is_empty() {
            return Err(ProtocolError::Unexpected("ProofCommonState"));
        }

        if !self.should_sync(ci) {
            debug!(conn = ci, "tip adopted elsewhere, dropping sync context");
            self.conns[ci].sync = None;
            return Ok(());
        }

        let tip = self.conns[ci].tip.clone().expect("tip set while syncing");

        let Some(i) = states.iter().position(|s| s.height == msg.id.height) else {
            // The peer must prove something inside the batch unless its whole
            // chain sits below the probed range.
            if tip.height > states.last().expect("non-empty").height {
                return Err(ProtocolError::Unexpected("ProofCommonState"));
            }
            self.search_below(ci, tip.height, 1, t).await;
            return Ok(());
        };

        if !tip.is_valid_proof_state(&msg.id, &msg.proof) {
            return Err(ProtocolError::InvalidProof);
        }

        let low_height = self.conns[ci].sync.as_ref().expect("syncing").low_height;
        if low_height < states[0].height && i != 0 {
            // A concurrent rollback moved the floor below this batch; descend
            // into the region we have not probed yet.
            self.search_below(ci, low_height + 1, 1, t).await;
        } else if states[i].hash() != msg.id.hash {
            if i != states.len() - 1 {
                // A disproof is only ever expected for the last requested id.
                return Err(ProtocolError::Unexpected("ProofCommonState"));
            }
            let h = states.last().expect("non-empty").height;
            self.search_below(ci, h, (states.len() * 2) as u32, t).await;
        } else {
            debug!(conn = ci, height = msg.id.height, "common ancestor confirmed");
            self.conns[ci].sync.as_mut().expect("syncing").confirmed = Some(states[i].clone());
            self.request_chainwork_proof(ci, t).await;
        }
        Ok(())
    }

    async fn request_chainwork_proof(&mut self, ci: usize, t: &(impl Transport + ?Sized)) {
        if self.conns[ci].has(flags::OWNED) {
            // Trusted node; adopt its tip without a proof round.
            let sync = self.conns[ci].sync.take().expect("syncing");
            let low = sync.confirmed.as_ref().map(|s| s.height).unwrap_or(0);
            self.post_chainwork_proof(ci, Vec::new(), low, t).await;
            return;
        }

        let lower_bound = {
            let sync = self.conns[ci].sync.as_mut().expect("syncing");
            let lower = sync
                .confirmed
                .as_ref()
                .map(|s| s.chainwork)
                .unwrap_or_default();
            sync.tip_before_gap = None;
            sync.low_height = sync.confirmed.as_ref().map(|s| s.height).unwrap_or(0);
            lower
        };
        t.send(
            ci,
            NodeMsg::GetProofChainWork(GetProofChainWork { lower_bound }),
        )
        .await;
    }

    async fn on_proof_chain_work(
        &mut self,
        ci: usize,
        msg: ProofChainWork,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        {
            let conn = &self.conns[ci];
            let Some(sync) = conn.sync.as_ref() else {
                return Err(ProtocolError::Unexpected("ProofChainWork"));
            };
            if !sync.confirming.is_empty() {
                return Err(ProtocolError::Unexpected("ProofChainWork"));
            }
            let lower = sync
                .confirmed
                .as_ref()
                .map(|s| s.chainwork)
                .unwrap_or_default();
            if msg.proof.lower_bound != lower {
                return Err(ProtocolError::Unexpected("ProofChainWork"));
            }
            let Some(proof_tip) = msg.proof.is_valid() else {
                return Err(ProtocolError::InvalidProof);
            };
            if conn.tip.as_ref() != Some(&proof_tip) {
                return Err(ProtocolError::Unexpected("ProofChainWork"));
            }
        }

        let sync = self.conns[ci].sync.take().expect("checked above");

        if !self.should_sync(ci) {
            debug!(conn = ci, "tip adopted elsewhere, dropping sync context");
            return Ok(());
        }

        let arr = msg.proof.into_states();

        if let (Some(tbg), Some(confirmed)) = (&sync.tip_before_gap, &sync.confirmed) {
            // The peer jumped tips mid-bisection. If neither the old tip nor
            // the confirmed ancestor shows up in the proof, it reorganized
            // past our probe window and the search is stale.
            if !arr_contains(&arr, tbg) && !arr_contains(&arr, confirmed) {
                info!(conn = ci, "reorg beyond probe window, restarting sync");
                self.start_sync(ci, t).await;
                return Ok(());
            }
        }

        self.post_chainwork_proof(ci, arr, sync.low_height, t).await;
        Ok(())
    }

    /// Apply a verified chainwork proof: roll back local headers the peer
    /// does not have, adopt its chain and hand out requests again.
    async fn post_chainwork_proof(
        &mut self,
        ci: usize,
        arr: Vec<Header>,
        low_height: u64,
        t: &(impl Transport + ?Sized),
    ) {
        struct EraseWalker<'a> {
            low_height: u64,
            low_erase: Option<u64>,
            arr: &'a [Header],
        }
        impl StateWalker for EraseWalker<'_> {
            fn on_state(&mut self, s: &Header) -> bool {
                if s.height <= self.low_height {
                    return false;
                }
                if arr_contains(self.arr, s) {
                    return false;
                }
                self.low_erase = Some(s.height);
                true
            }
        }

        let mut w = EraseWalker {
            low_height,
            low_erase: None,
            arr: &arr,
        };
        self.client.history().enum_states(&mut w, None);

        if let Some(low_erase) = w.low_erase {
            info!(conn = ci, from = low_erase, "rolling back local history");
            self.client.history_mut().delete_from(low_erase);

            // Other connections mid-sync must not trust probes above the
            // erased region; lower their floors so they re-bisect.
            for conn in &mut self.conns {
                if let Some(sync) = conn.sync.as_mut() {
                    sync.low_height = sync.low_height.min(low_erase - 1);
                }
            }
            self.client.on_rolled_back();
        }

        if arr.is_empty() {
            let tip = self.conns[ci].tip.clone().expect("tip set");
            self.client.history_mut().add_states(std::slice::from_ref(&tip));
        } else {
            self.client.history_mut().add_states(&arr);
        }

        let new_tip = self.client.history().get_tip().map(|s| s.height);
        info!(conn = ci, height = ?new_tip, "sync finished");

        self.prioritize(ci);
        self.client.on_new_tip();
        self.assign_requests(ci, t).await;
    }

    // ------------------------------------------------------------------
    // Request dispatch
    // ------------------------------------------------------------------

    /// Park a request on the global queue and poke the connections.
    pub async fn post_request(
        &mut self,
        req: Request,
        handler: Box<dyn RequestHandler>,
        t: &(impl Transport + ?Sized),
    ) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.push_back(RequestNode {
            id,
            req,
            handler: Some(handler),
        });
        self.on_new_requests(t).await;
        id
    }

    /// Detach the handler; the request is swept on the next queue walk and
    /// its completion callback never runs.
    pub fn cancel(&mut self, id: u64) {
        for node in &mut self.pending {
            if node.id == id {
                node.handler = None;
                return;
            }
        }
        for conn in &mut self.conns {
            for node in &mut conn.inflight {
                if node.id == id {
                    node.handler = None;
                    return;
                }
            }
        }
    }

    async fn on_new_requests(&mut self, t: &(impl Transport + ?Sized)) {
        for ci in self.order.clone() {
            if self.conns[ci].is_live() && self.conns[ci].is_secure_out() {
                self.assign_requests(ci, t).await;
                break;
            }
        }
    }

    /// Walk the global queue in order, taking every request this connection
    /// currently supports.
    async fn assign_requests(&mut self, ci: usize, t: &(impl Transport + ?Sized)) {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].handler.is_none() {
                self.pending.remove(i); // cancelled, sweep
                continue;
            }
            if !self.is_supported(ci, &self.pending[i].req) {
                i += 1;
                continue;
            }
            let node = self.pending.remove(i).expect("index checked");
            self.send_request(ci, &node.req, t).await;
            self.conns[ci].inflight.push_back(node);
        }

        if self.conns[ci].inflight.is_empty() && self.cfg.poll_period_ms != 0 {
            self.conns[ci].timer_at = Some(
                Instant::now() + Duration::from_millis(self.cfg.close_connection_delay_ms as u64),
            );
        } else {
            self.conns[ci].timer_at = None;
        }
    }

    /// Capability predicate: can this connection serve the request right now?
    fn is_supported(&self, ci: usize, req: &Request) -> bool {
        let at_tip = self.is_at_tip(ci);
        let conn = &self.conns[ci];
        match req.kind() {
            RequestKind::Utxo => at_tip,
            RequestKind::Events => conn.has(flags::OWNED) && at_tip,
            RequestKind::Transaction => {
                conn.has_login(login_flags::SPREADING_TRANSACTIONS) && at_tip
            }
            RequestKind::BbsMessage => conn.has_login(login_flags::BBS) && at_tip,
            RequestKind::Kernel
            | RequestKind::KernelById
            | RequestKind::Asset
            | RequestKind::ShieldedList
            | RequestKind::ShieldedInput
            | RequestKind::ShieldedOutput
            | RequestKind::StateSummary
            | RequestKind::HeaderRange
            | RequestKind::Body
            | RequestKind::BodyPack
            | RequestKind::ContractVars
            | RequestKind::ContractLogs
            | RequestKind::ContractVar
            | RequestKind::ContractLogProof
            | RequestKind::ShieldedOutputsAt => conn.has(flags::NODE) && at_tip,
        }
    }

    async fn send_request(&self, ci: usize, req: &Request, t: &(impl Transport + ?Sized)) {
        if !t.send(ci, req.to_msg()).await {
            warn!(conn = ci, "failed to send request");
        }
        if req.kind() == RequestKind::BbsMessage {
            // The pong to this confirms delivery and completes the request.
            t.send(ci, NodeMsg::Ping).await;
        }
    }

    async fn on_request_reply(
        &mut self,
        ci: usize,
        kind: RequestKind,
        msg: NodeMsg,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        let name = msg.name();
        {
            let Some(front) = self.conns[ci].inflight.front() else {
                return Err(ProtocolError::Unexpected(name));
            };
            if front.req.kind() != kind {
                return Err(ProtocolError::ResponseMismatch { got: name });
            }
        }

        let mut node = self.conns[ci].inflight.pop_front().expect("checked");

        if node.req.apply_response(msg).is_err() {
            self.conns[ci].inflight.push_front(node);
            return Err(ProtocolError::ResponseMismatch { got: name });
        }
        if let Err(e) = self.validate_response(ci, &mut node.req) {
            self.conns[ci].inflight.push_front(node);
            return Err(e);
        }

        let still_supported = self.is_supported(ci, &node.req);
        self.finish_front(ci, node, still_supported, t).await;
        Ok(())
    }

    /// Complete, requeue or drop the request just taken off the front.
    async fn finish_front(
        &mut self,
        ci: usize,
        node: RequestNode,
        still_supported: bool,
        t: &(impl Transport + ?Sized),
    ) {
        let RequestNode { id, req, handler } = node;

        if let Some(mut handler) = handler {
            if !still_supported {
                // Support degraded between send and reply; let another
                // connection retry it.
                debug!(conn = ci, request = id, "requeueing degraded request");
                self.pending.push_back(RequestNode {
                    id,
                    req,
                    handler: Some(handler),
                });
                self.on_new_requests(t).await;
                return;
            }
            handler.on_complete(req);
        }

        if self.conns[ci].inflight.is_empty() && self.cfg.poll_period_ms != 0 {
            self.conns[ci].timer_at = Some(Instant::now());
        }
    }

    async fn on_data_missing(
        &mut self,
        ci: usize,
        t: &(impl Transport + ?Sized),
    ) -> Result<(), ProtocolError> {
        let Some(front) = self.conns[ci].inflight.front() else {
            return Err(ProtocolError::Unexpected("DataMissing"));
        };
        match front.req.kind() {
            // These two may legitimately come back empty.
            RequestKind::HeaderRange | RequestKind::BodyPack => {}
            _ => return Err(ProtocolError::DataMissingUnsupported),
        }
        let node = self.conns[ci].inflight.pop_front().expect("checked");
        let still_supported = self.is_supported(ci, &node.req);
        self.finish_front(ci, node, still_supported, t).await;
        Ok(())
    }

    /// Check a filled-in reply against this connection's tip before the
    /// completion callback may run.
    fn validate_response(&self, ci: usize, req: &mut Request) -> Result<(), ProtocolError> {
        let Some(tip) = self.conns[ci].tip.as_ref() else {
            return Err(ProtocolError::Unexpected("reply"));
        };

        match req {
            Request::Utxo(r) => {
                for proof in &r.res.proofs {
                    if !tip.is_valid_proof_utxo(&r.msg.utxo, proof) {
                        return Err(ProtocolError::InvalidProof);
                    }
                }
            }
            Request::Kernel(r) => {
                if !r.res.proof.is_empty()
                    && !tip.is_valid_proof_kernel(&r.msg.id, &r.res.proof)
                {
                    return Err(ProtocolError::InvalidProof);
                }
            }
            Request::KernelById(r) => {
                if let Some(kernel) = &r.res.kernel {
                    if !kernel.is_valid(r.res.height) {
                        return Err(ProtocolError::InvalidProof);
                    }
                }
            }
            Request::Asset(r) => {
                if let Some(info) = &r.res.info {
                    if r.msg.owner != B256::ZERO && r.msg.owner != info.owner {
                        return Err(ProtocolError::InvalidProof);
                    }
                    if r.msg.asset_id != ASSET_ID_INVALID && r.msg.asset_id != info.id {
                        return Err(ProtocolError::InvalidProof);
                    }
                    if !r.res.proof.is_empty()
                        && !tip.is_valid_proof_asset(info.leaf(), &r.res.proof)
                    {
                        return Err(ProtocolError::InvalidProof);
                    }
                } else if !r.res.proof.is_empty() {
                    return Err(ProtocolError::InvalidProof);
                }
            }
            Request::ShieldedInput(r) => {
                if !r.res.proof.is_empty() {
                    let leaf = shielded_inp_leaf(&r.msg.spend_pk, r.res.height);
                    if !tip.is_valid_proof_shielded_inp(leaf, &r.res.proof) {
                        return Err(ProtocolError::InvalidProof);
                    }
                }
            }
            Request::ShieldedOutput(r) => {
                if !r.res.proof.is_empty() {
                    let leaf = shielded_outp_leaf(
                        &r.msg.serial_pub,
                        &r.res.commitment,
                        r.res.id,
                        r.res.height,
                    );
                    if !tip.is_valid_proof_shielded_outp(leaf, &r.res.proof) {
                        return Err(ProtocolError::InvalidProof);
                    }
                }
            }
            Request::HeaderRange(r) => {
                let states = pack::unpack(&r.res.prefix, &r.res.elements);
                if !pack::verify(&states, self.executor.as_ref()) {
                    return Err(ProtocolError::InvalidProof);
                }
                r.states = states;
            }
            Request::ContractVar(r) => {
                if !r.res.proof.is_empty()
                    && !tip.is_valid_proof_contract(&r.msg.key, &r.res.value, &r.res.proof)
                {
                    return Err(ProtocolError::InvalidProof);
                }
            }
            Request::ContractLogProof(_) => {
                // Cannot be checked here: the header the proof anchors to is
                // not part of the reply.
            }
            Request::Events(_)
            | Request::Transaction(_)
            | Request::ShieldedList(_)
            | Request::StateSummary(_)
            | Request::Body(_)
            | Request::BodyPack(_)
            | Request::ContractVars(_)
            | Request::ContractLogs(_)
            | Request::ShieldedOutputsAt(_)
            | Request::BbsMessage(_) => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bulletin board
    // ------------------------------------------------------------------

    /// Subscribe, update or (with `receiver == None`) drop a channel. Adding
    /// an observer for an existing channel overwrites it in place.
    pub async fn bbs_subscribe(
        &mut self,
        channel: u64,
        timestamp: u64,
        receiver: Option<Box<dyn BbsReceiver>>,
        t: &(impl Transport + ?Sized),
    ) {
        use std::collections::hash_map::Entry;

        let on = receiver.is_some();
        match self.bbs.entry(channel) {
            Entry::Vacant(v) => {
                let Some(receiver) = receiver else {
                    return;
                };
                v.insert(BbsEntry {
                    receiver,
                    last_seen: timestamp,
                });
            }
            Entry::Occupied(mut o) => {
                if let Some(receiver) = receiver {
                    // Overwrite in place; peers keep their subscription.
                    let e = o.get_mut();
                    e.receiver = receiver;
                    e.last_seen = timestamp;
                    return;
                }
                o.remove();
            }
        }

        let msg = BbsSubscribe {
            channel,
            time_from: timestamp,
            on,
        };
        for ci in 0..self.conns.len() {
            if self.conns[ci].is_live() && self.conns[ci].is_secure_out() {
                t.send(ci, NodeMsg::BbsSubscribe(msg.clone())).await;
            }
        }
    }

    fn handle_bbs_msg(&mut self, msg: BbsMsg) {
        if let Some(entry) = self.bbs.get_mut(&msg.channel) {
            entry.last_seen = msg.time_posted;
            entry.receiver.on_msg(msg);
        }
    }
}

/// `arr` is sorted by height; membership is an exact header match.
fn arr_contains(arr: &[Header], s: &Header) -> bool {
    match arr.binary_search_by(|x| x.height.cmp(&s.height)) {
        Ok(i) => arr[i] == *s,
        Err(_) => false,
    }
}

fn shielded_inp_leaf(spend_pk: &B256, height: u64) -> B256 {
    let mut k = Keccak256::new();
    k.update(spend_pk);
    k.update(height.to_be_bytes());
    B256::from_slice(&k.finalize())
}

fn shielded_outp_leaf(serial_pub: &B256, commitment: &B256, id: u64, height: u64) -> B256 {
    let mut k = Keccak256::new();
    k.update(serial_pub);
    k.update(commitment);
    k.update(id.to_be_bytes());
    k.update(height.to_be_bytes());
    B256::from_slice(&k.finalize())
}
