//! libp2p network adapter.
//!
//! Gossipsub carries broadcasts (consensus messages, sealed-block
//! announcements); a request-response protocol with length-prefixed SBOR
//! frames carries the sync service calls. The swarm runs in its own task
//! and is driven through a command channel.

use super::codec::{decode_gossip, encode_consensus, encode_notify, GossipMessage};
use super::{SYNC_PROTOCOL, TOPIC_BLOCKS, TOPIC_CONSENSUS};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use istria_messages::{ConsensusMessage, NotifyRequest, SyncRequest, SyncResponse};
use istria_sync::{ClientError, NotifyQueue, PeerId, SyncClient};
use istria_types::{keccak256, Block};
use libp2p::{
    gossipsub, identity,
    request_response::{self, ProtocolSupport, ResponseChannel},
    swarm::{NetworkBehaviour, SwarmEvent},
    Multiaddr, PeerId as Libp2pPeerId, StreamProtocol, Swarm, SwarmBuilder,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Domain separator for deriving the libp2p identity from the node key.
const IDENTITY_DOMAIN: &[u8] = b"istria-libp2p-identity-v1:";

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Listen multiaddresses.
    pub listen_addresses: Vec<Multiaddr>,
    /// Peers dialed at startup.
    pub bootstrap_peers: Vec<Multiaddr>,
    /// Timeout for one sync request.
    pub request_timeout: Duration,
    /// Gossipsub message size cap.
    pub max_message_size: usize,
    /// Gossipsub heartbeat interval.
    pub gossipsub_heartbeat: Duration,
    /// Idle connection teardown.
    pub idle_connection_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec![],
            bootstrap_peers: vec![],
            request_timeout: Duration::from_secs(10),
            max_message_size: 4 * 1024 * 1024,
            gossipsub_heartbeat: Duration::from_secs(1),
            idle_connection_timeout: Duration::from_secs(60),
        }
    }
}

/// Network errors.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("network error: {0}")]
    Setup(String),

    #[error("network shutdown")]
    Shutdown,

    #[error("request timeout")]
    Timeout,

    #[error("invalid peer id")]
    InvalidPeerId,
}

/// An inbound sync request awaiting a response.
#[derive(Debug)]
pub struct InboundRequest {
    /// The requesting peer.
    pub peer: PeerId,
    /// The decoded request.
    pub request: SyncRequest,
    /// Opaque channel id for [`NetworkAdapter::respond`].
    pub channel_id: u64,
}

/// Peer connection lifecycle events.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A connection was established.
    Connected(PeerId),
    /// The last connection to the peer closed.
    Disconnected(PeerId),
}

/// Derive a deterministic libp2p Ed25519 identity from the node's secret
/// scalar.
pub fn derive_identity(secret: &[u8; 32]) -> identity::Keypair {
    let mut preimage = Vec::with_capacity(IDENTITY_DOMAIN.len() + secret.len());
    preimage.extend_from_slice(IDENTITY_DOMAIN);
    preimage.extend_from_slice(secret);
    let seed = keccak256(&preimage);

    let secret_key = identity::ed25519::SecretKey::try_from_bytes(*seed.as_bytes())
        .expect("any 32 bytes are a valid ed25519 seed");
    identity::Keypair::from(identity::ed25519::Keypair::from(secret_key))
}

/// Commands sent to the swarm task.
enum SwarmCommand {
    Subscribe {
        topic: String,
    },
    Broadcast {
        topic: String,
        data: Vec<u8>,
    },
    Dial {
        address: Multiaddr,
    },
    Request {
        peer: Libp2pPeerId,
        data: Vec<u8>,
        response_tx: oneshot::Sender<Result<Vec<u8>, NetworkError>>,
    },
    Respond {
        channel_id: u64,
        data: Vec<u8>,
    },
}

/// Length-prefixed framing for the sync request-response protocol.
#[derive(Debug, Clone, Default)]
struct SyncCodec;

#[async_trait::async_trait]
impl request_response::Codec for SyncCodec {
    type Protocol = StreamProtocol;
    type Request = Vec<u8>;
    type Response = Vec<u8>;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> std::io::Result<Self::Request>
    where
        T: futures::AsyncRead + Unpin + Send,
    {
        read_framed(io).await
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> std::io::Result<Self::Response>
    where
        T: futures::AsyncRead + Unpin + Send,
    {
        read_framed(io).await
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> std::io::Result<()>
    where
        T: futures::AsyncWrite + Unpin + Send,
    {
        write_framed(io, req).await
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> std::io::Result<()>
    where
        T: futures::AsyncWrite + Unpin + Send,
    {
        write_framed(io, res).await
    }
}

async fn read_framed<T>(io: &mut T) -> std::io::Result<Vec<u8>>
where
    T: futures::AsyncRead + Unpin + Send,
{
    use futures::AsyncReadExt;

    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_framed<T>(io: &mut T, data: Vec<u8>) -> std::io::Result<()>
where
    T: futures::AsyncWrite + Unpin + Send,
{
    use futures::AsyncWriteExt;

    let len = data.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&data).await?;
    io.close().await?;
    Ok(())
}

/// Combined gossip + request-response behaviour.
#[derive(NetworkBehaviour)]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    request_response: request_response::Behaviour<SyncCodec>,
}

/// The node's network adapter.
pub struct NetworkAdapter {
    local_peer_id: Libp2pPeerId,
    command_tx: mpsc::UnboundedSender<SwarmCommand>,
    request_timeout: Duration,
}

impl NetworkAdapter {
    /// Build the adapter and spawn its swarm task.
    ///
    /// Inbound traffic is routed out of the swarm task:
    /// - consensus gossip → `consensus_tx` (dropped when the driver lags)
    /// - block announcements → `notify_queue`, as peer-attributed pushes
    /// - sync requests → the returned [`InboundRequest`] receiver
    /// - connection lifecycle → the returned [`PeerEvent`] receiver
    pub fn spawn(
        config: NetworkConfig,
        keypair: identity::Keypair,
        consensus_tx: mpsc::Sender<ConsensusMessage>,
        notify_queue: Arc<NotifyQueue>,
    ) -> Result<
        (
            Arc<Self>,
            mpsc::Receiver<InboundRequest>,
            mpsc::Receiver<PeerEvent>,
        ),
        NetworkError,
    > {
        let local_peer_id = Libp2pPeerId::from(keypair.public());
        info!(peer_id = %local_peer_id, "Starting network adapter");

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(config.gossipsub_heartbeat)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .message_id_fn(|msg| {
                use std::hash::{Hash, Hasher};
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                msg.data.hash(&mut hasher);
                msg.topic.hash(&mut hasher);
                gossipsub::MessageId::from(hasher.finish().to_string())
            })
            .max_transmit_size(config.max_message_size)
            .build()
            .map_err(|e| NetworkError::Setup(e.to_string()))?;

        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(keypair.clone()),
            gossipsub_config,
        )
        .map_err(|e| NetworkError::Setup(e.to_string()))?;

        let request_response = request_response::Behaviour::with_codec(
            SyncCodec,
            std::iter::once((StreamProtocol::new(SYNC_PROTOCOL), ProtocolSupport::Full)),
            request_response::Config::default(),
        );

        let behaviour = Behaviour {
            gossipsub,
            request_response,
        };

        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_quic()
            .with_behaviour(|_| behaviour)
            .map_err(|e| NetworkError::Setup(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(config.idle_connection_timeout))
            .build();

        for addr in &config.listen_addresses {
            swarm
                .listen_on(addr.clone())
                .map_err(|e| NetworkError::Setup(e.to_string()))?;
            info!(address = %addr, "Listening");
        }
        for addr in &config.bootstrap_peers {
            if let Err(e) = swarm.dial(addr.clone()) {
                warn!(address = %addr, error = %e, "Bootstrap dial failed");
            } else {
                info!(address = %addr, "Dialing bootstrap peer");
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(128);
        let (peer_tx, peer_rx) = mpsc::channel(128);

        let adapter = Arc::new(Self {
            local_peer_id,
            command_tx,
            request_timeout: config.request_timeout,
        });

        tokio::spawn(event_loop(
            swarm,
            command_rx,
            consensus_tx,
            notify_queue,
            inbound_tx,
            peer_tx,
        ));

        // Both broadcast topics are always live.
        for topic in [TOPIC_CONSENSUS, TOPIC_BLOCKS] {
            let _ = adapter.command_tx.send(SwarmCommand::Subscribe {
                topic: topic.to_string(),
            });
        }

        Ok((adapter, inbound_rx, peer_rx))
    }

    /// The local peer id.
    pub fn local_peer_id(&self) -> Libp2pPeerId {
        self.local_peer_id
    }

    /// Broadcast a consensus message.
    pub fn broadcast_consensus(&self, msg: &ConsensusMessage) {
        let _ = self.command_tx.send(SwarmCommand::Broadcast {
            topic: TOPIC_CONSENSUS.to_string(),
            data: encode_consensus(msg),
        });
    }

    /// Announce a sealed block.
    pub fn announce_block(&self, block: &Block) {
        let _ = self.command_tx.send(SwarmCommand::Broadcast {
            topic: TOPIC_BLOCKS.to_string(),
            data: encode_notify(&NotifyRequest::new(block.encode())),
        });
    }

    /// Dial a peer address.
    pub fn dial(&self, address: Multiaddr) {
        let _ = self.command_tx.send(SwarmCommand::Dial { address });
    }

    /// Answer an inbound sync request.
    pub fn respond(&self, channel_id: u64, response: &SyncResponse) {
        let data = sbor::basic_encode(response).expect("response encoding is infallible");
        let _ = self
            .command_tx
            .send(SwarmCommand::Respond { channel_id, data });
    }
}

impl SyncClient for NetworkAdapter {
    fn request<'a>(
        &'a self,
        peer: &'a PeerId,
        req: SyncRequest,
    ) -> BoxFuture<'a, Result<SyncResponse, ClientError>> {
        async move {
            let target = Libp2pPeerId::from_str(&peer.0)
                .map_err(|_| ClientError::Transport("invalid peer id".into()))?;
            let data =
                sbor::basic_encode(&req).map_err(|e| ClientError::Transport(format!("{e:?}")))?;

            let (tx, rx) = oneshot::channel();
            self.command_tx
                .send(SwarmCommand::Request {
                    peer: target,
                    data,
                    response_tx: tx,
                })
                .map_err(|_| ClientError::Transport("network shutdown".into()))?;

            let raw = match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(result)) => result.map_err(|e| ClientError::Transport(e.to_string()))?,
                Ok(Err(_)) => return Err(ClientError::Transport("network shutdown".into())),
                Err(_) => return Err(ClientError::Transport("request timeout".into())),
            };

            sbor::basic_decode(&raw).map_err(|e| ClientError::Decode(format!("{e:?}")))
        }
        .boxed()
    }
}

/// The swarm task: executes commands and routes events.
async fn event_loop(
    mut swarm: Swarm<Behaviour>,
    mut command_rx: mpsc::UnboundedReceiver<SwarmCommand>,
    consensus_tx: mpsc::Sender<ConsensusMessage>,
    notify_queue: Arc<NotifyQueue>,
    inbound_tx: mpsc::Sender<InboundRequest>,
    peer_tx: mpsc::Sender<PeerEvent>,
) {
    let mut pending_requests: HashMap<
        request_response::OutboundRequestId,
        oneshot::Sender<Result<Vec<u8>, NetworkError>>,
    > = HashMap::new();
    let mut response_channels: HashMap<u64, ResponseChannel<Vec<u8>>> = HashMap::new();
    let mut next_channel_id: u64 = 0;

    loop {
        tokio::select! {
            maybe = command_rx.recv() => {
                let Some(cmd) = maybe else {
                    info!("Network adapter closed");
                    return;
                };
                handle_command(&mut swarm, cmd, &mut pending_requests, &mut response_channels);
            }

            event = swarm.select_next_some() => {
                handle_swarm_event(
                    event,
                    &consensus_tx,
                    &notify_queue,
                    &inbound_tx,
                    &peer_tx,
                    &mut pending_requests,
                    &mut response_channels,
                    &mut next_channel_id,
                )
                .await;
            }
        }
    }
}

fn handle_command(
    swarm: &mut Swarm<Behaviour>,
    cmd: SwarmCommand,
    pending_requests: &mut HashMap<
        request_response::OutboundRequestId,
        oneshot::Sender<Result<Vec<u8>, NetworkError>>,
    >,
    response_channels: &mut HashMap<u64, ResponseChannel<Vec<u8>>>,
) {
    match cmd {
        SwarmCommand::Subscribe { topic } => {
            let topic = gossipsub::IdentTopic::new(topic);
            if let Err(e) = swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                warn!(topic = %topic, error = %e, "Subscribe failed");
            }
        }
        SwarmCommand::Broadcast { topic, data } => {
            let topic = gossipsub::IdentTopic::new(topic);
            if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), data) {
                // InsufficientPeers is routine on a quiet single-node setup.
                debug!(topic = %topic, error = ?e, "Publish failed");
            }
        }
        SwarmCommand::Dial { address } => {
            if let Err(e) = swarm.dial(address) {
                warn!(error = %e, "Dial failed");
            }
        }
        SwarmCommand::Request {
            peer,
            data,
            response_tx,
        } => {
            let request_id = swarm
                .behaviour_mut()
                .request_response
                .send_request(&peer, data);
            pending_requests.insert(request_id, response_tx);
        }
        SwarmCommand::Respond { channel_id, data } => {
            if let Some(channel) = response_channels.remove(&channel_id) {
                if swarm
                    .behaviour_mut()
                    .request_response
                    .send_response(channel, data)
                    .is_err()
                {
                    warn!(channel_id, "Response channel already closed");
                }
            } else {
                warn!(channel_id, "Unknown response channel");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_swarm_event(
    event: SwarmEvent<BehaviourEvent>,
    consensus_tx: &mpsc::Sender<ConsensusMessage>,
    notify_queue: &Arc<NotifyQueue>,
    inbound_tx: &mpsc::Sender<InboundRequest>,
    peer_tx: &mpsc::Sender<PeerEvent>,
    pending_requests: &mut HashMap<
        request_response::OutboundRequestId,
        oneshot::Sender<Result<Vec<u8>, NetworkError>>,
    >,
    response_channels: &mut HashMap<u64, ResponseChannel<Vec<u8>>>,
    next_channel_id: &mut u64,
) {
    match event {
        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            let topic = message.topic.to_string();
            match decode_gossip(&topic, &message.data) {
                Ok(GossipMessage::Consensus(msg)) => {
                    // Sender authentication happens in the driver via
                    // signature recovery; transport identity is not trusted.
                    if consensus_tx.try_send(msg).is_err() {
                        warn!("Consensus channel full, dropping message");
                    }
                }
                Ok(GossipMessage::Block(req)) => match Block::decode(&req.raw) {
                    Ok(block) => {
                        notify_queue.push(PeerId::new(propagation_source.to_string()), block);
                    }
                    Err(e) => {
                        warn!(peer = %propagation_source, error = ?e, "Undecodable block announcement");
                    }
                },
                Err(e) => {
                    warn!(peer = %propagation_source, topic = %topic, error = %e, "Undecodable gossip");
                }
            }
        }

        SwarmEvent::Behaviour(BehaviourEvent::RequestResponse(request_response::Event::Message {
            peer,
            message,
            ..
        })) => match message {
            request_response::Message::Request {
                request, channel, ..
            } => match sbor::basic_decode::<SyncRequest>(&request) {
                Ok(decoded) => {
                    let channel_id = *next_channel_id;
                    *next_channel_id += 1;
                    response_channels.insert(channel_id, channel);

                    let inbound = InboundRequest {
                        peer: PeerId::new(peer.to_string()),
                        request: decoded,
                        channel_id,
                    };
                    if inbound_tx.send(inbound).await.is_err() {
                        response_channels.remove(&channel_id);
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, error = ?e, "Undecodable sync request");
                }
            },
            request_response::Message::Response {
                request_id,
                response,
            } => {
                if let Some(tx) = pending_requests.remove(&request_id) {
                    let _ = tx.send(Ok(response));
                }
            }
        },

        SwarmEvent::Behaviour(BehaviourEvent::RequestResponse(
            request_response::Event::OutboundFailure {
                request_id, error, ..
            },
        )) => {
            if let Some(tx) = pending_requests.remove(&request_id) {
                let _ = tx.send(Err(NetworkError::Setup(error.to_string())));
            }
        }

        SwarmEvent::ConnectionEstablished {
            peer_id,
            num_established,
            ..
        } => {
            debug!(peer = %peer_id, connections = num_established, "Connection established");
            if u32::from(num_established) == 1 {
                let _ = peer_tx
                    .send(PeerEvent::Connected(PeerId::new(peer_id.to_string())))
                    .await;
            }
        }

        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established,
            ..
        } => {
            debug!(peer = %peer_id, remaining = num_established, "Connection closed");
            if num_established == 0 {
                let _ = peer_tx
                    .send(PeerEvent::Disconnected(PeerId::new(peer_id.to_string())))
                    .await;
            }
        }

        SwarmEvent::NewListenAddr { address, .. } => {
            info!(address = %address, "New listen address");
        }

        other => {
            trace!(event = ?other, "Swarm event");
        }
    }
}
