//! Node orchestration.
//!
//! [`Node::start`] brings up one node: it binds the peer listener, opens
//! the rendezvous channel (fatal if unavailable), and spawns the actor
//! task that owns every piece of node state. The returned [`NodeHandle`]
//! is the only way in: commands travel over a channel and answer on
//! oneshots, events stream out of a broadcast channel.
//!
//! Session transport tasks, dial attempts, and chunk uploads run as their
//! own tasks but never touch node state; they report back through the
//! internal message queue.

use crate::{NodeConfig, NodeError, NodeEvent};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;
use weft_crypto::{SigningKey, VerifyingKey};
use weft_files::{
    Catalog, ChunkOutcome, FileEntry, FileOffer, TransferEngine, TransferError, UPLOAD_BURST,
    UPLOAD_YIELD_MS, chunk_payloads, transfer::chunk_count,
};
use weft_ledger::{
    Blockchain, ConsensusEngine, ConsensusState, ProposalVerdict, Whitelist, build_block,
    engine::FinalizeOutcome, leader_at, mempool::validate_transaction, Mempool, sign_block,
};
use weft_net::{PeerRegistry, PeerSession, SessionEvent, TcpTransport, await_hello, send_hello};
use weft_proto::{
    Block, NodeId, PeerMessage, RendezvousMessage, SessionSignal, Transaction, canonical, now_ms,
};
use weft_rendezvous::{RendezvousClient, RendezvousEvent};

/// How long a dial may sit unanswered before it can be retried
const DIAL_EXPIRY: Duration = Duration::from_secs(10);

/// Event stream depth; slow subscribers lose old events, never block
const EVENT_CAPACITY: usize = 256;

enum Command {
    Share {
        name: String,
        mime_type: String,
        content: Vec<u8>,
        reply: oneshot::Sender<FileEntry>,
    },
    StopShare {
        file_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Download {
        file_id: Uuid,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    CancelDownload {
        file_id: Uuid,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    SubmitTransaction {
        to: String,
        data: Vec<u8>,
        amount: f64,
        reply: oneshot::Sender<Result<Transaction, NodeError>>,
    },
    Dial {
        peer: NodeId,
    },
    DropPeer {
        peer: NodeId,
    },
    WhitelistAdd {
        peer: NodeId,
        reply: oneshot::Sender<bool>,
    },
    WhitelistRemove {
        peer: NodeId,
        reply: oneshot::Sender<bool>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<NodeId>>,
    },
    ChainSnapshot {
        reply: oneshot::Sender<Vec<Block>>,
    },
    MempoolSnapshot {
        reply: oneshot::Sender<Vec<Transaction>>,
    },
    SharedFiles {
        reply: oneshot::Sender<Vec<FileEntry>>,
    },
    AvailableFiles {
        reply: oneshot::Sender<Vec<FileOffer>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    OutboundReady {
        peer: NodeId,
        key: VerifyingKey,
        transport: TcpTransport,
    },
    OutboundFailed {
        peer: NodeId,
    },
    InboundReady {
        peer: NodeId,
        key: VerifyingKey,
        transport: TcpTransport,
    },
    SyncWithPeer {
        peer: NodeId,
    },
    DialExpired {
        peer: NodeId,
    },
    UploadDone {
        peer: NodeId,
    },
}

/// A running node.
///
/// Dropping the `Node` (and every cloned handle) stops the actor task.
pub struct Node {
    handle: NodeHandle,
}

impl Node {
    /// Start a node: bind the listener, open the rendezvous channel, and
    /// spawn the actor task.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Listener`] if the listen address cannot be
    /// bound, or [`NodeError::Rendezvous`] when the rendezvous service is
    /// unreachable; rendezvous failure is fatal and the caller decides
    /// whether to retry.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        let signing_key = match config.identity_seed {
            Some(seed) => SigningKey::from_bytes(&seed),
            None => SigningKey::generate(&mut rand_core::OsRng),
        };
        let verifying_key = signing_key.verifying_key();
        let node_id = NodeId::from_verifying_key(&verifying_key);

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|e| NodeError::Listener(e.to_string()))?;
        let listen_addr = listener
            .local_addr()
            .map_err(|e| NodeError::Listener(e.to_string()))?;

        let (rdv_tx, rdv_rx) = mpsc::channel(64);
        let rendezvous =
            RendezvousClient::connect(config.rendezvous_addr, node_id.clone(), rdv_tx).await?;

        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (net_tx, net_rx) = mpsc::channel(256);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let listener_task = tokio::spawn(run_listener(
            listener,
            node_id.clone(),
            verifying_key,
            internal_tx.clone(),
        ));

        // Schedule determinism requires every node to insert members in the
        // same order; configured members come first, self last.
        let mut whitelist = Whitelist::new();
        for member in &config.whitelist {
            whitelist.add(member.clone());
        }
        if config.whitelist_self {
            whitelist.add(node_id.clone());
        }

        let advertised_addr = advertised(config.advertised_addr, listen_addr);
        let min_votes = config.consensus.min_votes;
        let transfers = TransferEngine::new(
            config.transfer.max_downloads,
            config.transfer.max_uploads_per_peer,
        );
        let runtime = Runtime {
            config,
            node_id: node_id.clone(),
            signing_key,
            verifying_key,
            listen_addr: advertised_addr,
            registry: PeerRegistry::new(node_id.clone()),
            catalog: Catalog::new(),
            transfers,
            chain: Blockchain::new(),
            mempool: Mempool::new(),
            whitelist,
            consensus: ConsensusEngine::new(node_id.clone(), min_votes),
            keys: HashMap::new(),
            connecting: HashSet::new(),
            rendezvous,
            listener_task,
            events: events_tx.clone(),
            net_tx,
            internal_tx,
            vote_deadline: None,
        };
        tokio::spawn(runtime.run(commands_rx, net_rx, rdv_rx, internal_rx));

        tracing::info!(%node_id, %listen_addr, "node started");
        Ok(Self {
            handle: NodeHandle {
                node_id,
                listen_addr,
                commands: commands_tx,
                events: events_tx,
            },
        })
    }

    /// A cloneable handle to this node
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }
}

impl std::ops::Deref for Node {
    type Target = NodeHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

fn advertised(configured: Option<SocketAddr>, bound: SocketAddr) -> SocketAddr {
    if let Some(addr) = configured {
        return addr;
    }
    if bound.ip().is_unspecified() {
        (std::net::Ipv4Addr::LOCALHOST, bound.port()).into()
    } else {
        bound
    }
}

/// Command-channel handle to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    node_id: NodeId,
    listen_addr: SocketAddr,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<NodeEvent>,
}

impl NodeHandle {
    /// This node's identifier
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The bound peer-listener address
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Subscribe to the node's event stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, NodeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| NodeError::NotRunning)?;
        reply_rx.await.map_err(|_| NodeError::NotRunning)
    }

    /// Share content under the local catalog and offer it to every peer.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn share(
        &self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<FileEntry, NodeError> {
        let (name, mime_type) = (name.into(), mime_type.into());
        self.request(|reply| Command::Share {
            name,
            mime_type,
            content,
            reply,
        })
        .await
    }

    /// Withdraw a shared file. Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn stop_share(&self, file_id: Uuid) -> Result<bool, NodeError> {
        self.request(|reply| Command::StopShare { file_id, reply }).await
    }

    /// Request a download of an offered file.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::UnknownFile`] for ids never offered,
    /// [`TransferError::TooManyTransfers`] at the concurrency cap, or
    /// [`TransferError::SourceLost`] when the advertiser is not connected.
    pub async fn download(&self, file_id: Uuid) -> Result<(), NodeError> {
        self.request(|reply| Command::Download { file_id, reply }).await?
    }

    /// Abandon an in-flight download.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotDownloading`] when nothing is in flight.
    pub async fn cancel_download(&self, file_id: Uuid) -> Result<(), NodeError> {
        self.request(|reply| Command::CancelDownload { file_id, reply })
            .await?
    }

    /// Sign, pool, and broadcast a transaction authored by this node.
    ///
    /// # Errors
    ///
    /// Returns the validation error for transactions that fail local checks.
    pub async fn submit_transaction(
        &self,
        to: impl Into<String>,
        data: Vec<u8>,
        amount: f64,
    ) -> Result<Transaction, NodeError> {
        let to = to.into();
        self.request(|reply| Command::SubmitTransaction {
            to,
            data,
            amount,
            reply,
        })
        .await?
    }

    /// Ask the node to establish a session with `peer` (no-op when one
    /// exists or is in flight).
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn dial(&self, peer: NodeId) -> Result<(), NodeError> {
        self.commands
            .send(Command::Dial { peer })
            .await
            .map_err(|_| NodeError::NotRunning)
    }

    /// Tear down the session with `peer`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn drop_peer(&self, peer: NodeId) -> Result<(), NodeError> {
        self.commands
            .send(Command::DropPeer { peer })
            .await
            .map_err(|_| NodeError::NotRunning)
    }

    /// Add a node to the whitelist; returns whether it was new.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn whitelist_add(&self, peer: NodeId) -> Result<bool, NodeError> {
        self.request(|reply| Command::WhitelistAdd { peer, reply }).await
    }

    /// Remove a node from the whitelist; returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn whitelist_remove(&self, peer: NodeId) -> Result<bool, NodeError> {
        self.request(|reply| Command::WhitelistRemove { peer, reply }).await
    }

    /// Peers with open sessions
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn connected_peers(&self) -> Result<Vec<NodeId>, NodeError> {
        self.request(|reply| Command::ConnectedPeers { reply }).await
    }

    /// Snapshot of the local chain
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn chain(&self) -> Result<Vec<Block>, NodeError> {
        self.request(|reply| Command::ChainSnapshot { reply }).await
    }

    /// Snapshot of pending transactions
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn mempool(&self) -> Result<Vec<Transaction>, NodeError> {
        self.request(|reply| Command::MempoolSnapshot { reply }).await
    }

    /// Snapshot of locally shared files
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn shared_files(&self) -> Result<Vec<FileEntry>, NodeError> {
        self.request(|reply| Command::SharedFiles { reply }).await
    }

    /// Snapshot of files peers have offered
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node has stopped.
    pub async fn available_files(&self) -> Result<Vec<FileOffer>, NodeError> {
        self.request(|reply| Command::AvailableFiles { reply }).await
    }

    /// Stop the node: cancel timers, close sessions without farewell
    /// frames, clear in-memory state.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotRunning`] if the node already stopped.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

struct Runtime {
    config: NodeConfig,
    node_id: NodeId,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    /// Advertised listener address (session-setup blobs)
    listen_addr: SocketAddr,
    registry: PeerRegistry,
    catalog: Catalog,
    transfers: TransferEngine,
    chain: Blockchain,
    mempool: Mempool,
    whitelist: Whitelist,
    consensus: ConsensusEngine,
    /// Verified peer public keys, learned from hellos and signal blobs
    keys: HashMap<NodeId, VerifyingKey>,
    /// Outbound transport attempts in flight
    connecting: HashSet<NodeId>,
    rendezvous: RendezvousClient,
    listener_task: JoinHandle<()>,
    events: broadcast::Sender<NodeEvent>,
    net_tx: mpsc::Sender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    vote_deadline: Option<Instant>,
}

impl Runtime {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut net: mpsc::Receiver<SessionEvent>,
        mut rdv: mpsc::Receiver<RendezvousEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut rotation = tokio::time::interval(self.config.consensus.rotation_interval);
        let mut production = tokio::time::interval(self.config.consensus.production_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        rotation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        production.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown { reply }) => {
                            self.shutdown();
                            let _ = reply.send(());
                            return;
                        }
                        Some(command) => self.handle_command(command),
                        // Every handle dropped; stop quietly.
                        None => {
                            self.shutdown();
                            return;
                        }
                    }
                }
                Some(event) = net.recv() => self.handle_session_event(event),
                Some(event) = rdv.recv() => self.handle_rendezvous_event(event),
                Some(message) = internal.recv() => self.handle_internal(message),
                _ = heartbeat.tick() => self.on_heartbeat(),
                _ = rotation.tick() => self.recompute_leader(),
                _ = production.tick() => self.on_production_tick(),
                () = vote_window(self.vote_deadline) => self.finalize_round(),
            }
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(node = %self.node_id, "node stopping");
        self.rendezvous.shutdown();
        self.listener_task.abort();
        self.registry.close_all();
        self.catalog.clear();
        self.transfers.clear();
        self.mempool.clear();
        self.consensus.reset();
        self.vote_deadline = None;
    }

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine; broadcast never blocks the actor.
        let _ = self.events.send(event);
    }

    fn key_of(&self) -> impl Fn(&NodeId) -> Option<VerifyingKey> + Copy + '_ {
        resolver(&self.keys, &self.node_id, self.verifying_key)
    }

    fn own_signal(&self) -> SessionSignal {
        SessionSignal {
            addr: self.listen_addr,
            public_key: self.verifying_key.to_hex(),
        }
    }

    // ---- commands ----

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Share {
                name,
                mime_type,
                content,
                reply,
            } => {
                let entry = self.catalog.share(name, mime_type, content);
                self.registry.broadcast(&offer_message(&entry), None);
                self.emit(NodeEvent::FileShared { entry: entry.clone() });
                let _ = reply.send(entry);
            }
            Command::StopShare { file_id, reply } => {
                let removed = self.catalog.stop_share(file_id).is_some();
                if removed {
                    self.registry
                        .broadcast(&PeerMessage::FileUnavailable { file_id }, None);
                }
                let _ = reply.send(removed);
            }
            Command::Download { file_id, reply } => {
                let _ = reply.send(self.start_download(file_id));
            }
            Command::CancelDownload { file_id, reply } => {
                let result = self
                    .transfers
                    .cancel(file_id)
                    .map(|_| ())
                    .map_err(NodeError::from);
                let _ = reply.send(result);
            }
            Command::SubmitTransaction {
                to,
                data,
                amount,
                reply,
            } => {
                let _ = reply.send(self.submit_transaction(to, data, amount));
            }
            Command::Dial { peer } => self.dial_peer(peer),
            Command::DropPeer { peer } => self.teardown_peer(&peer),
            Command::WhitelistAdd { peer, reply } => {
                let added = self.whitelist.add(peer);
                if added {
                    self.recompute_leader();
                }
                let _ = reply.send(added);
            }
            Command::WhitelistRemove { peer, reply } => {
                let removed = self.whitelist.remove(&peer);
                if removed {
                    self.recompute_leader();
                }
                let _ = reply.send(removed);
            }
            Command::ConnectedPeers { reply } => {
                let _ = reply.send(self.registry.connected_peers());
            }
            Command::ChainSnapshot { reply } => {
                let _ = reply.send(self.chain.snapshot());
            }
            Command::MempoolSnapshot { reply } => {
                let _ = reply.send(self.mempool.snapshot());
            }
            Command::SharedFiles { reply } => {
                let _ = reply.send(self.catalog.shared_entries());
            }
            Command::AvailableFiles { reply } => {
                let _ = reply.send(self.catalog.offers());
            }
            // Shutdown is intercepted by the run loop before dispatch.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn start_download(&mut self, file_id: Uuid) -> Result<(), NodeError> {
        let Some(offer) = self.catalog.offer(file_id).cloned() else {
            return Err(TransferError::UnknownFile(file_id).into());
        };
        self.transfers.begin_download(&offer)?;
        let requested = self.registry.send(
            &offer.advertiser,
            &PeerMessage::FileRequest {
                file_id,
                requester: self.node_id.clone(),
            },
        );
        if !requested {
            let _ = self.transfers.cancel(file_id);
            return Err(TransferError::SourceLost.into());
        }
        Ok(())
    }

    fn submit_transaction(
        &mut self,
        to: String,
        data: Vec<u8>,
        amount: f64,
    ) -> Result<Transaction, NodeError> {
        let mut tx = Transaction::new(self.node_id.clone(), to, data, amount);
        let signature = self.signing_key.sign(&canonical::transaction_signable(&tx));
        tx.signature = Some(signature.to_hex());
        validate_transaction(&tx, self.key_of())?;

        self.mempool.insert(tx.clone());
        self.registry.broadcast(
            &PeerMessage::Transaction {
                transaction: tx.clone(),
            },
            None,
        );
        self.emit(NodeEvent::TransactionSubmitted {
            transaction: tx.clone(),
        });
        Ok(tx)
    }

    // ---- sessions ----

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Frame { peer, message } => self.handle_frame(peer, message),
            SessionEvent::Closed { peer } => self.teardown_peer(&peer),
        }
    }

    fn teardown_peer(&mut self, peer: &NodeId) {
        self.registry.finish_dial(peer);
        if self.registry.remove(peer).is_none() {
            return;
        }
        tracing::info!(peer = %peer, "peer disconnected");
        self.emit(NodeEvent::PeerDisconnected { peer: peer.clone() });
        for offer in self.catalog.drop_offers_from(peer) {
            self.emit(NodeEvent::FileUnavailable { file_id: offer.id });
        }
        for file_id in self.transfers.drop_downloads_from(peer) {
            self.emit(NodeEvent::DownloadFailed {
                file_id,
                reason: TransferError::SourceLost,
            });
        }
        self.recompute_leader();
    }

    fn on_session_open(&mut self, peer: NodeId) {
        tracing::info!(peer = %peer, "peer connected");
        self.emit(NodeEvent::PeerConnected { peer: peer.clone() });

        // Re-send the full local catalog to the new peer, unicast.
        for entry in self.catalog.shared_entries() {
            self.registry.send(&peer, &offer_message(&entry));
        }

        // Whitelisted peers get a catch-up sync shortly after connect.
        if self.whitelist.contains(&peer) {
            let internal = self.internal_tx.clone();
            let delay = self.config.consensus.sync_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = internal.send(Internal::SyncWithPeer { peer });
            });
        }
    }

    // ---- dialing ----

    fn dial_peer(&mut self, peer: NodeId) {
        if peer == self.node_id || !self.registry.begin_dial(&peer) {
            return;
        }
        tracing::debug!(peer = %peer, "dialing");
        self.rendezvous.send(RendezvousMessage::Offer {
            from: self.node_id.clone(),
            to: peer.clone(),
            signal: self.own_signal(),
        });
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DIAL_EXPIRY).await;
            let _ = internal.send(Internal::DialExpired { peer });
        });
    }

    fn handle_signal(&mut self, from: NodeId, signal: SessionSignal, reply_with_answer: bool) {
        let key = match VerifyingKey::from_hex(&signal.public_key) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(peer = %from, "signal carried a bad key: {e}");
                return;
            }
        };
        if !from.matches_key(&key) {
            tracing::warn!(peer = %from, "signal key does not match claimed id");
            return;
        }
        self.keys.insert(from.clone(), key);

        if reply_with_answer {
            self.rendezvous.send(RendezvousMessage::Answer {
                from: self.node_id.clone(),
                to: from.clone(),
                signal: self.own_signal(),
            });
        }

        // The lexicographically larger id opens the transport.
        if self.registry.initiates_toward(&from)
            && self.registry.get(&from).is_none()
            && !self.connecting.contains(&from)
        {
            self.connecting.insert(from.clone());
            let internal = self.internal_tx.clone();
            let local_id = self.node_id.clone();
            let local_key = self.verifying_key;
            tokio::spawn(connect_to_peer(from, signal.addr, local_id, local_key, internal));
        }
    }

    fn handle_rendezvous_event(&mut self, event: RendezvousEvent) {
        match event {
            RendezvousEvent::PeerList(peers) => {
                for peer in peers {
                    self.dial_peer(peer);
                }
            }
            RendezvousEvent::PeerJoined(peer) => self.dial_peer(peer),
            RendezvousEvent::PeerLeft(peer) => {
                // The direct session, if any, dies on its own transport;
                // just allow a future re-dial.
                self.registry.finish_dial(&peer);
            }
            RendezvousEvent::Offer { from, signal } => self.handle_signal(from, signal, true),
            RendezvousEvent::Answer { from, signal } => self.handle_signal(from, signal, false),
            RendezvousEvent::Reconnected => {
                self.rendezvous.send(RendezvousMessage::GetPeers {
                    node_id: self.node_id.clone(),
                });
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::OutboundReady {
                peer,
                key,
                transport,
            } => {
                self.connecting.remove(&peer);
                self.registry.finish_dial(&peer);
                self.keys.insert(peer.clone(), key);
                self.install_session(peer, transport, true);
            }
            Internal::OutboundFailed { peer } => {
                self.connecting.remove(&peer);
                self.registry.finish_dial(&peer);
            }
            Internal::InboundReady {
                peer,
                key,
                transport,
            } => {
                self.registry.finish_dial(&peer);
                self.keys.insert(peer.clone(), key);
                self.install_session(peer, transport, false);
            }
            Internal::SyncWithPeer { peer } => {
                if self.registry.is_connected(&peer) {
                    self.registry.send(
                        &peer,
                        &PeerMessage::BlockchainSyncRequest {
                            from_index: self.chain.height(),
                            request_id: Uuid::new_v4(),
                        },
                    );
                }
            }
            Internal::DialExpired { peer } => {
                if !self.registry.is_connected(&peer) {
                    self.registry.finish_dial(&peer);
                }
            }
            Internal::UploadDone { peer } => {
                self.transfers.finish_upload(&peer);
            }
        }
    }

    fn install_session(&mut self, peer: NodeId, transport: TcpTransport, initiator: bool) {
        let session = PeerSession::spawn(peer.clone(), transport, initiator, self.net_tx.clone());
        match self.registry.install(session) {
            Ok(()) => self.on_session_open(peer),
            Err(redundant) => drop(redundant),
        }
    }

    // ---- frames ----

    fn handle_frame(&mut self, peer: NodeId, message: PeerMessage) {
        match message {
            PeerMessage::Hello { .. } => {
                tracing::debug!(peer = %peer, "unexpected hello mid-session");
            }
            PeerMessage::Ping { timestamp } => {
                self.registry.send(&peer, &PeerMessage::Pong { timestamp });
            }
            PeerMessage::Pong { .. } => {
                self.registry.record_pong(&peer, now_ms());
            }
            PeerMessage::FileOffer {
                file_id,
                name,
                size,
                mime_type,
                sha256_hash,
            } => self.on_file_offer(peer, file_id, name, size, mime_type, &sha256_hash),
            PeerMessage::FileUnavailable { file_id } => {
                if self.catalog.withdraw_offer(file_id, &peer).is_some() {
                    self.emit(NodeEvent::FileUnavailable { file_id });
                }
            }
            PeerMessage::FileRequest { file_id, .. } => self.serve_upload(peer, file_id),
            PeerMessage::FileMetadata {
                file_id,
                total_chunks,
                chunk_size,
                ..
            } => {
                self.transfers
                    .on_metadata(&peer, file_id, total_chunks, chunk_size);
            }
            PeerMessage::FileChunk {
                file_id,
                chunk_index,
                chunk_data,
                ..
            } => self.on_file_chunk(peer, file_id, chunk_index, &chunk_data),
            PeerMessage::FileError { file_id, message } => {
                if self
                    .transfers
                    .download(file_id)
                    .is_some_and(|t| t.source_peer == peer)
                {
                    let _ = self.transfers.cancel(file_id);
                    self.emit(NodeEvent::DownloadFailed {
                        file_id,
                        reason: TransferError::Refused(message),
                    });
                }
            }
            PeerMessage::Transaction { transaction } => self.on_transaction(peer, transaction),
            PeerMessage::BlockProposal { block } => self.on_proposal(peer, block),
            PeerMessage::BlockVote {
                block_hash,
                voter,
                approve,
                ..
            } => {
                if voter != peer {
                    tracing::warn!(peer = %peer, claimed = %voter, "vote relayed under wrong name");
                    return;
                }
                self.consensus
                    .record_vote(&block_hash, &voter, approve, &self.whitelist);
            }
            PeerMessage::NewBlock { block } => self.on_new_block(peer, block),
            PeerMessage::BlockchainSyncRequest {
                from_index,
                request_id,
            } => {
                self.registry.send(
                    &peer,
                    &PeerMessage::BlockchainSyncResponse {
                        request_id,
                        blocks: self.chain.from_index(from_index),
                        total_blocks: self.chain.height(),
                    },
                );
            }
            PeerMessage::BlockchainSyncResponse { blocks, .. } => self.on_sync_response(blocks),
            PeerMessage::LeaderAnnouncement {
                leader,
                block_height,
                ..
            } => {
                if leader != peer {
                    tracing::debug!(peer = %peer, claimed = %leader, "third-party leader claim ignored");
                    return;
                }
                if self.consensus.on_leader_announcement(
                    &leader,
                    block_height,
                    self.chain.height(),
                    &self.whitelist,
                ) {
                    self.emit(NodeEvent::LeaderChanged {
                        leader: Some(leader),
                    });
                }
            }
        }
    }

    fn on_file_offer(
        &mut self,
        peer: NodeId,
        file_id: Uuid,
        name: String,
        size: u64,
        mime_type: String,
        sha256_hash: &str,
    ) {
        let Ok(digest) = weft_crypto::Digest::from_hex(sha256_hash) else {
            tracing::warn!(peer = %peer, "offer with malformed digest dropped");
            return;
        };
        let offer = FileOffer {
            id: file_id,
            name,
            size,
            mime_type,
            sha256_hash: digest,
            advertiser: peer,
            seen_at_ms: now_ms(),
        };
        if self.catalog.record_offer(offer.clone()) {
            self.emit(NodeEvent::FileAvailable { offer });
        }
    }

    fn on_file_chunk(&mut self, peer: NodeId, file_id: Uuid, chunk_index: u64, chunk_data: &str) {
        match self.transfers.on_chunk(&peer, file_id, chunk_index, chunk_data) {
            ChunkOutcome::Progress { received, total } => {
                self.emit(NodeEvent::DownloadProgress {
                    file_id,
                    received,
                    total,
                });
            }
            ChunkOutcome::Complete { bytes, total } => {
                self.emit(NodeEvent::DownloadProgress {
                    file_id,
                    received: total,
                    total,
                });
                let name = self
                    .catalog
                    .offer(file_id)
                    .map(|o| o.name.clone())
                    .unwrap_or_default();
                self.emit(NodeEvent::DownloadCompleted {
                    file_id,
                    name,
                    content: Arc::from(bytes),
                });
            }
            ChunkOutcome::Failed(reason) => {
                self.emit(NodeEvent::DownloadFailed { file_id, reason });
            }
            ChunkOutcome::Duplicate | ChunkOutcome::Ignored => {}
        }
    }

    fn serve_upload(&mut self, peer: NodeId, file_id: Uuid) {
        let Some(shared) = self.catalog.shared(file_id) else {
            self.registry.send(
                &peer,
                &PeerMessage::FileError {
                    file_id,
                    message: "file not shared here".to_string(),
                },
            );
            return;
        };
        let entry = shared.entry.clone();
        let content = Arc::clone(&shared.content);

        if !self.transfers.begin_upload(&peer) {
            self.registry.send(
                &peer,
                &PeerMessage::FileError {
                    file_id,
                    message: "upload limit reached".to_string(),
                },
            );
            return;
        }
        let Some(session) = self.registry.get(&peer) else {
            self.transfers.finish_upload(&peer);
            return;
        };
        self.catalog.record_download(file_id);

        let outbound = session.outbound();
        let chunk_size = self.config.transfer.chunk_size;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_upload(&entry, &content, chunk_size, outbound).await {
                tracing::debug!(file = %entry.id, "upload ended early: {e}");
            }
            let _ = internal.send(Internal::UploadDone { peer });
        });
    }

    // ---- ledger ----

    fn on_transaction(&mut self, peer: NodeId, tx: Transaction) {
        if let Err(e) = validate_transaction(&tx, self.key_of()) {
            tracing::warn!(peer = %peer, "dropping invalid transaction: {e}");
            return;
        }
        if self.mempool.insert(tx.clone()) {
            self.emit(NodeEvent::TransactionReceived { transaction: tx });
        }
    }

    fn on_proposal(&mut self, peer: NodeId, block: Block) {
        // Proposals can land between rotation ticks; refresh the schedule
        // before judging provenance.
        self.recompute_leader();
        let key_of = resolver(&self.keys, &self.node_id, self.verifying_key);
        let verdict = self.consensus.on_proposal(block, &peer, &self.chain, key_of);
        match verdict {
            ProposalVerdict::Vote { block_hash, approve } => {
                self.registry.broadcast(
                    &PeerMessage::BlockVote {
                        block_hash,
                        voter: self.node_id.clone(),
                        approve,
                        timestamp: now_ms(),
                    },
                    None,
                );
                // The follower clears its round state when the window ends.
                if self.vote_deadline.is_none() {
                    self.vote_deadline =
                        Some(Instant::now() + self.config.consensus.vote_window);
                }
            }
            ProposalVerdict::IgnoredNotLeader | ProposalVerdict::IgnoredBusy => {}
        }
    }

    fn on_new_block(&mut self, peer: NodeId, block: Block) {
        if block.index < self.chain.height() {
            return;
        }
        if block.index > self.chain.height() {
            // We are behind; catch up from the announcing peer.
            self.registry.send(
                &peer,
                &PeerMessage::BlockchainSyncRequest {
                    from_index: self.chain.height(),
                    request_id: Uuid::new_v4(),
                },
            );
            return;
        }
        if let Err(e) = self.commit_block(block, false) {
            tracing::warn!(peer = %peer, "announced block rejected: {e}");
        }
    }

    fn on_sync_response(&mut self, blocks: Vec<Block>) {
        let start = self.chain.height();
        let committed = {
            let key_of = resolver(&self.keys, &self.node_id, self.verifying_key);
            self.chain.apply_sync_batch(blocks, key_of)
        };
        if self.chain.height() == start {
            return;
        }
        self.mempool.purge(&committed);
        for index in start..self.chain.height() {
            if let Some(block) = self.chain.get(index) {
                let block = block.clone();
                self.consensus.observe_commit(&block.hash);
                self.emit(NodeEvent::BlockAdded { block });
            }
        }
        self.recompute_leader();
    }

    fn commit_block(&mut self, block: Block, announce: bool) -> Result<(), NodeError> {
        let committed = {
            let key_of = resolver(&self.keys, &self.node_id, self.verifying_key);
            self.chain.append(block.clone(), key_of)?
        };
        self.mempool.purge(&committed);
        self.consensus.observe_commit(&block.hash);
        self.emit(NodeEvent::BlockAdded {
            block: block.clone(),
        });
        if announce {
            self.registry
                .broadcast(&PeerMessage::NewBlock { block }, None);
        }
        self.recompute_leader();
        Ok(())
    }

    // ---- timers ----

    fn on_heartbeat(&mut self) {
        for peer in self.registry.heartbeat_tick(now_ms()) {
            self.teardown_peer(&peer);
        }
    }

    fn recompute_leader(&mut self) {
        // Schedule over the reachable part of the whitelist, so leadership
        // moves on when the scheduled leader is gone.
        let eligible = Whitelist::from_members(
            self.whitelist
                .iter()
                .filter(|member| {
                    **member == self.node_id || self.registry.is_connected(member)
                })
                .cloned(),
        );
        let slot_ms = self.config.consensus.rotation_interval.as_millis() as i64;
        let leader = leader_at(&eligible, self.chain.height(), now_ms(), slot_ms);
        if self.consensus.set_leader(leader.clone()) {
            self.emit(NodeEvent::LeaderChanged {
                leader: leader.clone(),
            });
            if leader.as_ref() == Some(&self.node_id) {
                self.registry.broadcast(
                    &PeerMessage::LeaderAnnouncement {
                        leader: self.node_id.clone(),
                        block_height: self.chain.height(),
                        timestamp: now_ms(),
                    },
                    None,
                );
            }
        }
    }

    fn on_production_tick(&mut self) {
        if !self.consensus.is_leader() || self.consensus.state() != ConsensusState::Idle {
            return;
        }
        let transactions = self.mempool.take_for_proposal();
        if transactions.is_empty() {
            return;
        }
        let mut block = build_block(
            self.chain.height(),
            self.chain.tip().hash.clone(),
            transactions,
            self.node_id.clone(),
        );
        sign_block(&mut block, &self.signing_key);
        tracing::debug!(
            index = block.index,
            transactions = block.transactions.len(),
            "proposing block"
        );
        if self.consensus.begin_round(block.clone()) {
            self.registry
                .broadcast(&PeerMessage::BlockProposal { block }, None);
            self.vote_deadline = Some(Instant::now() + self.config.consensus.vote_window);
        }
    }

    fn finalize_round(&mut self) {
        self.vote_deadline = None;
        match self.consensus.finalize(&self.whitelist) {
            FinalizeOutcome::Committed(block) => {
                if let Err(e) = self.commit_block(block, true) {
                    // A block that gathered quorum must extend our own tip.
                    tracing::error!("commit of approved block failed: {e}");
                }
            }
            FinalizeOutcome::Dropped { approvals, required } => {
                tracing::info!(approvals, required, "proposal dropped without quorum");
            }
            FinalizeOutcome::Cleared => {}
        }
    }
}

/// Resolve a signer id to its verified public key. The local node always
/// resolves to its own key; peers resolve through the key directory.
fn resolver<'a>(
    keys: &'a HashMap<NodeId, VerifyingKey>,
    own_id: &'a NodeId,
    own_key: VerifyingKey,
) -> impl Fn(&NodeId) -> Option<VerifyingKey> + Copy + 'a {
    move |id: &NodeId| {
        if id == own_id {
            Some(own_key)
        } else {
            keys.get(id).copied()
        }
    }
}

async fn vote_window(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

fn offer_message(entry: &FileEntry) -> PeerMessage {
    PeerMessage::FileOffer {
        file_id: entry.id,
        name: entry.name.clone(),
        size: entry.size,
        mime_type: entry.mime_type.clone(),
        sha256_hash: entry.sha256_hash.to_hex(),
    }
}

async fn connect_to_peer(
    peer: NodeId,
    addr: SocketAddr,
    local_id: NodeId,
    local_key: VerifyingKey,
    internal: mpsc::UnboundedSender<Internal>,
) {
    let attempt = async {
        let mut transport = TcpTransport::connect(addr).await?;
        send_hello(&mut transport, &local_id, &local_key).await?;
        let (peer_id, peer_key) = await_hello(&mut transport).await?;
        if peer_id != peer {
            return Err(weft_net::NetError::Handshake(format!(
                "connected to {peer_id}, expected {peer}"
            )));
        }
        Ok((peer_key, transport))
    };
    match attempt.await {
        Ok((key, transport)) => {
            let _ = internal.send(Internal::OutboundReady {
                peer,
                key,
                transport,
            });
        }
        Err(e) => {
            tracing::debug!(peer = %peer, "outbound connect failed: {e}");
            let _ = internal.send(Internal::OutboundFailed { peer });
        }
    }
}

async fn run_listener(
    listener: TcpListener,
    local_id: NodeId,
    local_key: VerifyingKey,
    internal: mpsc::UnboundedSender<Internal>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let internal = internal.clone();
                let local_id = local_id.clone();
                tokio::spawn(async move {
                    stream.set_nodelay(true).ok();
                    let mut transport = TcpTransport::new(stream);
                    match await_hello(&mut transport).await {
                        Ok((peer, key)) => {
                            if send_hello(&mut transport, &local_id, &local_key).await.is_ok() {
                                let _ = internal.send(Internal::InboundReady {
                                    peer,
                                    key,
                                    transport,
                                });
                            }
                        }
                        Err(e) => {
                            tracing::debug!(%remote, "inbound handshake failed: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!("listener accept failed: {e}");
            }
        }
    }
}

async fn run_upload(
    entry: &FileEntry,
    content: &[u8],
    chunk_size: u64,
    outbound: mpsc::Sender<String>,
) -> Result<(), NodeError> {
    let total_chunks = chunk_count(entry.size, chunk_size);
    let metadata = PeerMessage::FileMetadata {
        file_id: entry.id,
        name: entry.name.clone(),
        size: entry.size,
        mime_type: entry.mime_type.clone(),
        total_chunks,
        chunk_size,
    };
    send_frame(&outbound, &metadata).await?;

    let mut sent = 0u64;
    for (chunk_index, chunk_data, is_last) in chunk_payloads(content, chunk_size) {
        let frame = PeerMessage::FileChunk {
            file_id: entry.id,
            chunk_index,
            chunk_data,
            is_last,
        };
        send_frame(&outbound, &frame).await?;
        sent += 1;
        // Yield periodically so one transfer cannot monopolize the channel.
        if sent % UPLOAD_BURST == 0 {
            tokio::time::sleep(Duration::from_millis(UPLOAD_YIELD_MS)).await;
        }
    }
    tracing::debug!(file = %entry.id, chunks = total_chunks, "upload finished");
    Ok(())
}

async fn send_frame(
    outbound: &mpsc::Sender<String>,
    message: &PeerMessage,
) -> Result<(), NodeError> {
    let frame = message.encode().map_err(weft_net::NetError::from)?;
    outbound
        .send(frame)
        .await
        .map_err(|_| weft_net::NetError::Transport("session closed".to_string()))?;
    Ok(())
}
