use anyhow::{Context, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::info;

use super::types::{GossipMessage, Node, NodeId, NodeState};
use crate::directory::assignment::MemberEndpoint;

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DATAGRAM: usize = 65_536;

/// SWIM-style membership over UDP.
///
/// Every change to the set of live members bumps a topology version published
/// on a watch channel; the rebalancer recomputes partition ownership from it.
pub struct MembershipService {
    pub local_node: Node,
    members: DashMap<NodeId, Node>,
    socket: UdpSocket,
    incarnation: AtomicU64,
    topology: watch::Sender<u64>,
}

impl MembershipService {
    /// Binds the gossip socket and announces this node to `seeds`.
    ///
    /// `query_host:query_port` is advertised to peers as the address serving
    /// state queries for this node.
    pub async fn bind(
        bind_addr: SocketAddr,
        query_host: String,
        query_port: u16,
        seeds: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind gossip socket on {}", bind_addr))?;
        let gossip_addr = socket.local_addr()?;

        let local_node = Node {
            id: NodeId::new(),
            gossip_addr,
            query_host,
            query_port,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };
        let members = DashMap::new();
        members.insert(local_node.id.clone(), local_node.clone());
        let (topology, _) = watch::channel(0);

        let service = Arc::new(Self {
            local_node,
            members,
            socket,
            incarnation: AtomicU64::new(1),
            topology,
        });
        service.join(&seeds).await?;
        Ok(service)
    }

    async fn join(&self, seeds: &[SocketAddr]) -> Result<()> {
        if seeds.is_empty() {
            return Ok(());
        }
        info!("Joining cluster via {} seed node(s)", seeds.len());

        let encoded = bincode::serialize(&GossipMessage::Join {
            node: self.local_node.clone(),
        })?;
        for seed in seeds {
            self.socket
                .send_to(&encoded, seed)
                .await
                .with_context(|| format!("failed to contact seed {}", seed))?;
            info!("Sent join request to {}", seed);
        }
        Ok(())
    }

    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting membership service {} on {}",
            self.local_node.id, self.local_node.gossip_addr
        );

        let service = self.clone();
        tokio::spawn(async move { service.gossip_loop().await });

        let service = self.clone();
        tokio::spawn(async move { service.receive_loop().await });

        tokio::spawn(async move { self.failure_detection_loop().await });
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_node.id
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::SeqCst)
    }

    /// Receiver of the topology version; it changes whenever a member joins,
    /// dies, or comes back from the dead.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.topology.subscribe()
    }

    pub fn topology_version(&self) -> u64 {
        *self.topology.borrow()
    }

    pub fn member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|m| m.value().clone())
    }

    pub fn members(&self) -> Vec<Node> {
        self.members.iter().map(|m| m.value().clone()).collect()
    }

    /// Members that may own partitions: alive or merely suspected.
    pub fn live_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|m| m.value().state.is_live())
            .map(|m| m.value().clone())
            .collect()
    }

    pub fn live_endpoints(&self) -> Vec<MemberEndpoint> {
        self.live_members().iter().map(Node::endpoint).collect()
    }

    fn topology_changed(&self, reason: &str) {
        self.topology.send_modify(|version| *version += 1);
        info!(
            "Topology v{} ({}), {} live member(s)",
            self.topology_version(),
            reason,
            self.live_members().len()
        );
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let peers: Vec<Node> = self
                .members
                .iter()
                .filter(|m| m.value().id != self.local_node.id && m.value().state.is_live())
                .map(|m| m.value().clone())
                .collect();
            if peers.is_empty() {
                continue;
            }

            use rand::Rng;
            let target = &peers[rand::thread_rng().gen_range(0..peers.len())];
            let ping = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation: self.incarnation(),
            };
            self.send(&ping, target.gossip_addr).await;
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling gossip from {}: {}", src, e);
                        }
                    }
                    Err(e) => tracing::warn!("Undecodable gossip from {}: {}", src, e),
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                self.handle_ping(from, incarnation, src).await
            }
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members);
                Ok(())
            }
            GossipMessage::Join { node } => self.handle_join(node).await,
            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
                Ok(())
            }
            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
                Ok(())
            }
        }
    }

    /// Direct contact proves liveness. Returns true if the node was dead.
    fn heard_from(&self, from: &NodeId, incarnation: u64) -> bool {
        let Some(mut member) = self.members.get_mut(from) else {
            return false;
        };
        let revived = !member.state.is_live();
        member.last_seen = Some(Instant::now());
        member.state = NodeState::Alive;
        member.incarnation = member.incarnation.max(incarnation);
        revived
    }

    async fn handle_ping(&self, from: NodeId, incarnation: u64, src: SocketAddr) -> Result<()> {
        tracing::debug!("Ping from {} at {}", from, src);
        if self.heard_from(&from, incarnation) {
            self.topology_changed("member revived");
        }
        self.reply_with_members(src).await
    }

    async fn reply_with_members(&self, to: SocketAddr) -> Result<()> {
        let ack = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: self.incarnation(),
            members: self.members(),
        };
        let encoded = bincode::serialize(&ack)?;
        self.socket.send_to(&encoded, to).await?;
        Ok(())
    }

    fn handle_ack(&self, from: NodeId, incarnation: u64, members: Vec<Node>) {
        tracing::debug!("Ack from {} with {} member(s)", from, members.len());

        let mut changed = false;
        for member in members {
            changed |= self.merge_member(member);
        }
        changed |= self.heard_from(&from, incarnation);
        if changed {
            self.topology_changed("membership merged");
        }
    }

    /// Folds a peer's view of one member into ours. Returns true if the set of
    /// live members changed.
    fn merge_member(&self, incoming: Node) -> bool {
        if incoming.id == self.local_node.id {
            return false;
        }

        match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                if incoming.incarnation > existing.incarnation {
                    let was_live = existing.state.is_live();
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.gossip_addr = incoming.gossip_addr;
                    existing.query_host = incoming.query_host;
                    existing.query_port = incoming.query_port;
                    existing.last_seen = Some(Instant::now());
                    was_live != existing.state.is_live()
                } else {
                    if incoming.incarnation == existing.incarnation
                        && incoming.state == NodeState::Alive
                        && existing.state == NodeState::Suspect
                    {
                        info!("{} refuted suspicion", incoming.id);
                        existing.state = NodeState::Alive;
                        existing.last_seen = Some(Instant::now());
                    }
                    false
                }
            }
            None if incoming.state.is_live() => {
                info!(
                    "Discovered member {} (gossip {}, query {}:{})",
                    incoming.id, incoming.gossip_addr, incoming.query_host, incoming.query_port
                );
                let mut node = incoming;
                node.last_seen = Some(Instant::now());
                self.members.insert(node.id.clone(), node);
                true
            }
            None => false,
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            if incarnation < self.incarnation() {
                return;
            }
            self.incarnation.fetch_max(incarnation + 1, Ordering::SeqCst);
            let refuted = self.incarnation();
            if let Some(mut local) = self.members.get_mut(&node_id) {
                local.incarnation = refuted;
            }
            info!("Refuting suspicion with incarnation {}", refuted);
            self.broadcast(&GossipMessage::Alive {
                node_id,
                incarnation: refuted,
            })
            .await;
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing)
                if incarnation >= existing.incarnation && existing.state == NodeState::Alive =>
            {
                info!("Node {} at {} suspected", existing.id, existing.gossip_addr);
                existing.state = NodeState::Suspect;
                existing.incarnation = incarnation;
                existing.last_seen = Some(Instant::now());
            }
            Some(_) => {}
            None => tracing::debug!("Suspect message for unknown node {}", node_id),
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        let revived = match self.members.get_mut(&node_id) {
            Some(mut existing)
                if incarnation > existing.incarnation
                    || (incarnation == existing.incarnation
                        && existing.state == NodeState::Suspect) =>
            {
                info!("Node {} is alive (inc={})", existing.id, incarnation);
                let revived = !existing.state.is_live();
                existing.state = NodeState::Alive;
                existing.incarnation = incarnation;
                existing.last_seen = Some(Instant::now());
                revived
            }
            Some(_) => false,
            None => {
                tracing::debug!("Alive message for unknown node {}", node_id);
                false
            }
        };
        if revived {
            self.topology_changed("member revived");
        }
    }

    async fn handle_join(&self, mut node: Node) -> Result<()> {
        info!("Node {} joining at {}", node.id, node.gossip_addr);

        let reply_to = node.gossip_addr;
        node.state = NodeState::Alive;
        node.last_seen = Some(Instant::now());
        let previous = self.members.insert(node.id.clone(), node);
        if previous.is_none_or(|p| !p.state.is_live()) {
            self.topology_changed("member joined");
        }

        self.reply_with_members(reply_to).await
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let (suspects, deaths) = self.detect_failures(Instant::now());

            if deaths > 0 {
                self.topology_changed("member declared dead");
            }
            for msg in suspects {
                self.broadcast(&msg).await;
            }
        }
    }

    /// Advances members through Alive -> Suspect -> Dead by silence. Returns
    /// suspicions to broadcast and the number of members declared dead.
    pub(crate) fn detect_failures(&self, now: Instant) -> (Vec<GossipMessage>, usize) {
        let mut suspects = Vec::new();
        let mut deaths = 0;

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            if member.id == self.local_node.id {
                continue;
            }
            let Some(last_seen) = member.last_seen else {
                member.last_seen = Some(now);
                continue;
            };
            let silent = now.saturating_duration_since(last_seen);

            match member.state {
                NodeState::Alive if silent > SUSPECT_TIMEOUT => {
                    tracing::warn!("Node {} suspected (silent for {:?})", member.id, silent);
                    member.state = NodeState::Suspect;
                    suspects.push(GossipMessage::Suspect {
                        node_id: member.id.clone(),
                        incarnation: member.incarnation,
                    });
                }
                NodeState::Suspect if silent > DEAD_TIMEOUT => {
                    tracing::warn!("Node {} declared dead (silent for {:?})", member.id, silent);
                    member.state = NodeState::Dead;
                    deaths += 1;
                }
                _ => {}
            }
        }

        (suspects, deaths)
    }

    async fn broadcast(&self, msg: &GossipMessage) {
        let targets: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|m| m.value().id != self.local_node.id && m.value().state.is_live())
            .map(|m| m.value().gossip_addr)
            .collect();

        for addr in targets {
            self.send(msg, addr).await;
        }
    }

    async fn send(&self, msg: &GossipMessage, to: SocketAddr) {
        match bincode::serialize(msg) {
            Ok(encoded) => {
                if let Err(e) = self.socket.send_to(&encoded, to).await {
                    tracing::warn!("Failed to send gossip to {}: {}", to, e);
                }
            }
            Err(e) => tracing::error!("Failed to encode gossip message: {}", e),
        }
    }
}
