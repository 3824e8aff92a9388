// src/core/cluster/gossip.rs

//! The snapshot gossip transport.
//!
//! Every node periodically sends its full local snapshot to every other
//! member over UDP, and again right after any local change. Received
//! snapshots replace the sender's entry in the cluster data store.

use crate::config::Config;
use crate::core::cluster::secure_gossip::SecureGossipMessage;
use crate::core::cluster::snapshot::{NodeSnapshot, now_ms};
use crate::core::cluster::store::ClusterStore;
use crate::core::errors::AgentError;
use crate::core::metrics;
use crate::core::orchestrator::MonitorWake;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, broadcast};
use tokio::time;
use tracing::{debug, error, info, warn};

const UDP_BUFFER_SIZE: usize = 65535;

/// The payload of one gossip datagram.
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq)]
pub struct GossipMessage {
    pub sender: String,
    pub cluster_id: String,
    pub snapshot: NodeSnapshot,
    pub timestamp_ms: u64,
}

/// Outbound half of the gossip contract. The inbound half is [`ClusterStore::ingest`].
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Sends the local snapshot to every peer.
    async fn publish(&self, snapshot: NodeSnapshot) -> Result<(), AgentError>;
}

#[derive(Debug, Clone)]
pub struct GossipSettings {
    pub port: u16,
    pub interval: Duration,
    pub peer_timeout: Duration,
    pub peers: BTreeMap<String, String>,
    pub cluster_id: String,
    pub secret: Option<String>,
}

impl From<&Config> for GossipSettings {
    fn from(config: &Config) -> Self {
        Self {
            port: config.gossip.port,
            interval: config.gossip.interval,
            peer_timeout: config.gossip.peer_timeout,
            peers: config.gossip.peers.clone(),
            cluster_id: config.cluster.id.clone(),
            secret: config.cluster.secret.clone(),
        }
    }
}

impl GossipSettings {
    fn peer_addr(&self, node: &str) -> String {
        self.peers
            .get(node)
            .cloned()
            .unwrap_or_else(|| format!("{}:{}", node, self.port))
    }
}

/// Where learned members are persisted.
#[derive(Debug, Clone)]
pub struct MembershipSink {
    pub config: Arc<Mutex<Config>>,
    pub path: Option<PathBuf>,
}

impl MembershipSink {
    async fn persist(&self, members: Vec<String>) {
        let mut config = self.config.lock().await;
        if config.cluster.nodes == members {
            return;
        }
        config.cluster.nodes = members;
        if let Some(path) = &self.path
            && let Err(e) = config.save(path)
        {
            error!("Failed to persist cluster membership: {}", e);
        }
    }
}

/// The UDP gossip bus.
#[derive(Debug)]
pub struct UdpGossip {
    socket: UdpSocket,
    store: Arc<ClusterStore>,
    wake: Arc<MonitorWake>,
    settings: GossipSettings,
    membership: Option<MembershipSink>,
}

impl UdpGossip {
    /// Binds the gossip port on all interfaces.
    pub async fn bind(
        store: Arc<ClusterStore>,
        wake: Arc<MonitorWake>,
        settings: GossipSettings,
        membership: Option<MembershipSink>,
    ) -> Result<Self, AgentError> {
        let addr = format!("0.0.0.0:{}", settings.port);
        let socket = UdpSocket::bind(&addr).await.map_err(|e| {
            AgentError::Gossip(format!(
                "failed to bind gossip on UDP port {}: {e}",
                settings.port
            ))
        })?;
        info!("Gossip listening on UDP port {}.", settings.port);
        Ok(Self {
            socket,
            store,
            wake,
            settings,
            membership,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AgentError> {
        Ok(self.socket.local_addr()?)
    }

    /// Wraps and signs a snapshot for the wire.
    pub fn encode(&self, snapshot: NodeSnapshot) -> Result<Vec<u8>, AgentError> {
        let message = GossipMessage {
            sender: self.store.my_name().to_string(),
            cluster_id: self.settings.cluster_id.clone(),
            snapshot,
            timestamp_ms: now_ms(),
        };
        SecureGossipMessage::new(message, self.settings.secret.as_deref())?.encode()
    }

    /// Decodes a datagram and checks signature, cluster, sender and clock skew.
    pub fn accept(&self, bytes: &[u8]) -> Result<GossipMessage, AgentError> {
        let secure = SecureGossipMessage::decode(bytes)?;
        if !secure.verify(self.settings.secret.as_deref()) {
            return Err(AgentError::Gossip("invalid signature".to_string()));
        }
        let message = secure.message;
        if message.cluster_id != self.settings.cluster_id {
            return Err(AgentError::Gossip(format!(
                "foreign cluster id '{}'",
                message.cluster_id
            )));
        }
        if message.sender == self.store.my_name() {
            return Err(AgentError::Gossip("message from self".to_string()));
        }
        if !self.store.is_member(&message.sender) {
            return Err(AgentError::Gossip(format!(
                "sender '{}' is not a cluster member",
                message.sender
            )));
        }
        let window = 2 * self.settings.peer_timeout.as_millis() as u64;
        if now_ms().abs_diff(message.timestamp_ms) > window {
            return Err(AgentError::Gossip(format!(
                "timestamp of '{}' is outside the accepted window",
                message.sender
            )));
        }
        Ok(message)
    }

    async fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        let message = match self.accept(bytes) {
            Ok(m) => m,
            Err(e) => {
                metrics::GOSSIP_MESSAGES_DROPPED_TOTAL.inc();
                warn!("Dropping gossip datagram from {}: {}", src, e);
                return;
            }
        };
        metrics::GOSSIP_MESSAGES_RECEIVED_TOTAL.inc();
        let outcome = self.store.ingest(&message.sender, message.snapshot);
        if !outcome.new_members.is_empty()
            && let Some(sink) = &self.membership
        {
            sink.persist(self.store.members()).await;
        }
        self.wake.wake("gossip", false);
    }

    async fn publish_local(&self) {
        if let Err(e) = self.publish(self.store.outbound()).await {
            error!("Failed to publish the local snapshot: {}", e);
        }
    }

    /// Runs the transmit and receive loops until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), AgentError> {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        let mut ticker = time::interval(self.settings.interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Gossip shutting down.");
                    return Ok(());
                }
                _ = ticker.tick() => self.publish_local().await,
                _ = self.store.local_changed() => self.publish_local().await,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((len, src)) => self.handle_datagram(&buf[..len], src).await,
                    Err(e) => error!("Error receiving gossip: {}", e),
                },
            }
        }
    }
}

#[async_trait]
impl GossipTransport for UdpGossip {
    async fn publish(&self, snapshot: NodeSnapshot) -> Result<(), AgentError> {
        let bytes = self.encode(snapshot)?;
        if bytes.len() > UDP_BUFFER_SIZE {
            return Err(AgentError::Gossip(format!(
                "snapshot too large for a datagram ({} bytes)",
                bytes.len()
            )));
        }
        let me = self.store.my_name();
        for member in self.store.sorted_members() {
            if member == me {
                continue;
            }
            let addr = self.settings.peer_addr(&member);
            if let Err(e) = self.socket.send_to(&bytes, addr.as_str()).await {
                debug!("Failed to send gossip to {} ({}): {}", member, addr, e);
            }
        }
        Ok(())
    }
}
