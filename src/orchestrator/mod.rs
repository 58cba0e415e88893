//! Node Orchestrator: owns the UDP socket, the TCP CLI listener, and every
//! piece of node state, and runs the single `tokio::select!` loop that acts
//! as this node's one logical writer -- a `Mutex`-free, single-task event
//! loop that all state mutation passes through.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use crate::config::Configuration;
use crate::consensus::{ConsensusAction, ConsensusEngine};
use crate::database::LocalDatabase;
use crate::gossip::{GossipEngine, HEARTBEAT_INTERVAL_SECS};
use crate::peer::{canonical_peer_key, now_millis, PeerKey, PeerTable, PRUNE_HORIZON_SECS};
use crate::session::{CliDispatcher, Operation};
use crate::wire::{ConsensusMessage, WireMessage};

/// How often the orchestrator wakes up to prune peers, re-check heartbeat
/// timing, and sweep expired consensus rounds.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Largest datagram this node will attempt to read. Generously above
/// [`crate::wire::MAX_DATAGRAM_BYTES`] so a slightly oversized inbound
/// datagram from a misbehaving peer is truncated-and-dropped rather than
/// panicking the recv call.
const RECV_BUFFER_BYTES: usize = 4096;

pub struct Orchestrator {
    udp: UdpSocket,
    self_key: PeerKey,
    self_host: String,
    self_port: u16,
    peers: PeerTable,
    gossip: GossipEngine,
    consensus: ConsensusEngine,
    database: LocalDatabase,
    last_heartbeat: u64,
    operations_tx: mpsc::UnboundedSender<Operation>,
    operations_rx: mpsc::UnboundedReceiver<Operation>,
}

impl Orchestrator {
    /// Binds the UDP and TCP sockets named by `config` and seeds the peer
    /// table with its configured bootstrap peers.
    pub async fn bind(config: &Configuration) -> anyhow::Result<(Self, CliDispatcher)> {
        let udp = UdpSocket::bind((config.node.host.as_str(), config.node.udp_port)).await?;
        let udp_addr = udp.local_addr()?;
        let self_key = udp_addr.to_string();

        let tcp = TcpListener::bind((config.node.host.as_str(), config.node.tcp_port)).await?;

        let mut peers = PeerTable::new();
        let now = now_millis();
        for bootstrap in &config.node.bootstrap_peers {
            match split_host_port(bootstrap).and_then(|(h, p)| canonical_peer_key(&h, p)) {
                Ok(key) => {
                    info!("seeding bootstrap peer {key}");
                    peers.observe(key, now);
                }
                Err(err) => warn!("ignoring bootstrap peer '{bootstrap}': {err}"),
            }
        }

        let (operations_tx, operations_rx) = mpsc::unbounded_channel();
        let dispatcher = CliDispatcher::new(tcp, operations_tx.clone());

        let orchestrator = Self {
            self_host: udp_addr.ip().to_string(),
            self_port: udp_addr.port(),
            udp,
            peers,
            gossip: GossipEngine::default(),
            consensus: ConsensusEngine::new(
                self_key.clone(),
                config.consensus.lie_percent,
                config.consensus.fault_bound,
            ),
            database: LocalDatabase::new(),
            last_heartbeat: now,
            operations_tx,
            operations_rx,
            self_key,
        };

        Ok((orchestrator, dispatcher))
    }

    pub fn udp_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    pub fn operations(&self) -> mpsc::UnboundedSender<Operation> {
        self.operations_tx.clone()
    }

    /// Runs until cancelled. Every branch of the `select!` runs to completion
    /// before the next is polled, so node state never needs a lock.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut recv_buf = vec![0u8; RECV_BUFFER_BYTES];

        loop {
            tokio::select! {
                result = self.udp.recv_from(&mut recv_buf) => {
                    match result {
                        Ok((len, sender)) => self.on_datagram(&recv_buf[..len], sender).await,
                        Err(err) => warn!("udp recv error: {err}"),
                    }
                }
                Some(op) = self.operations_rx.recv() => {
                    self.on_operation(op).await;
                }
                _ = tick.tick() => {
                    self.on_tick(now_millis()).await;
                }
            }
        }
    }

    async fn on_datagram(&mut self, bytes: &[u8], sender: SocketAddr) {
        let message = match WireMessage::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!("dropping malformed datagram from {sender}: {err}");
                return;
            }
        };
        let sender_key = sender.to_string();

        match message {
            WireMessage::Gossip(msg) => self.on_gossip(msg, sender_key).await,
            WireMessage::Consensus(msg) => self.on_consensus(msg, sender_key).await,
        }
    }

    async fn on_gossip(&mut self, msg: crate::wire::GossipMessage, sender_key: PeerKey) {
        let now = now_millis();
        let Some(targets) = self.gossip.on_receive(&msg, &sender_key, &self.peers) else {
            trace!("dropping already-seen gossip {}", msg.id);
            return;
        };
        self.peers.observe(sender_key, now);

        let mut forwarded = msg.clone();
        forwarded.path.push(self.self_key.clone());
        let envelope = WireMessage::Gossip(forwarded);

        for target in targets {
            self.send_to(&target, &envelope).await;
        }
    }

    async fn on_consensus(&mut self, msg: ConsensusMessage, sender_key: PeerKey) {
        let now = now_millis();
        let actions = match msg {
            ConsensusMessage::Forward {
                id,
                parentid,
                om,
                index,
                value,
                origin,
                path,
            } => self.consensus.receive_forward(
                id, parentid, om, index, value, origin, path, sender_key, &self.peers, now,
            ),
            ConsensusMessage::Report {
                parentid,
                reporter,
                value,
                ..
            } => self
                .consensus
                .receive_report(parentid, reporter, sender_key, value, now),
        };
        self.apply_actions(actions).await;
    }

    async fn on_operation(&mut self, op: Operation) {
        match op {
            Operation::Peers(reply) => {
                let _ = reply.send(self.peers.snapshot());
            }
            Operation::Current(reply) => {
                let _ = reply.send(self.database.snapshot());
            }
            Operation::StartConsensus { index, word, reply } => {
                let now = now_millis();
                match self.consensus.start_root(index, word, &self.peers, now) {
                    Ok((id, actions)) => {
                        self.apply_actions(actions).await;
                        let _ = reply.send(Ok(id));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err.to_string()));
                    }
                }
            }
            Operation::SetLyingPercent { percent, reply } => {
                self.consensus.set_lying_percent(percent);
                let _ = reply.send(());
            }
        }
    }

    async fn on_tick(&mut self, now: u64) {
        self.peers.prune(now, PRUNE_HORIZON_SECS);

        if now.saturating_sub(self.last_heartbeat) >= HEARTBEAT_INTERVAL_SECS * 1000 {
            let heartbeat = self.gossip.heartbeat(&self.self_host, self.self_port);
            let envelope = WireMessage::Gossip(heartbeat);
            for target in self.peers.random_subset(crate::gossip::FANOUT, &[]) {
                self.send_to(&target, &envelope).await;
            }
            self.last_heartbeat = now;
        }

        let actions = self.consensus.sweep(now);
        self.apply_actions(actions).await;
    }

    async fn apply_actions(&mut self, actions: Vec<ConsensusAction>) {
        for action in actions {
            match action {
                ConsensusAction::Send { to, message } => {
                    self.send_to(&to, &WireMessage::Consensus(message)).await;
                }
                ConsensusAction::WriteDatabase { index, value } => {
                    match self.database.set(index, value.clone()) {
                        Ok(()) => info!("database[{index}] = '{value}' by consensus"),
                        Err(err) => warn!("consensus resolved an invalid index: {err}"),
                    }
                }
            }
        }
    }

    async fn send_to(&self, peer: &PeerKey, message: &WireMessage) {
        let Ok(addr) = peer.parse::<SocketAddr>() else {
            warn!("cannot send to non-canonical peer key '{peer}'");
            return;
        };
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to encode outbound message to {peer}: {err}");
                return;
            }
        };
        if let Err(err) = self.udp.send_to(&bytes, addr).await {
            warn!("failed to send to {peer}: {err}");
        }
    }
}

fn split_host_port(spec: &str) -> crate::peer::Result<(String, u16)> {
    let (host, port) = spec.rsplit_once(':').ok_or_else(|| {
        crate::peer::PeerError::Empty(spec.to_string())
    })?;
    let port: u16 = port.parse().map_err(|_| crate::peer::PeerError::Empty(spec.to_string()))?;
    Ok((host.to_string(), port))
}
