//! Task wiring.

use crate::config::NodeConfig;
use crate::network::{derive_identity, NetworkAdapter, NetworkConfig, PeerEvent};
use crate::rpc::{self, RpcState};
use crate::storage::{genesis_header, RocksDbStore};
use istria_chain::{FifoPool, NoopExecutor};
use istria_ibft::{ConsensusTransport, Ibft, IbftConfig, SyncFacade};
use istria_messages::{ConsensusMessage, SyncResponse};
use istria_sync::{get_status, NotifyQueue, SyncClient, SyncConfig, SyncService, Syncer, SyncerHandle};
use istria_types::{Block, KeyPair};
use libp2p::Multiaddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bridges the consensus driver onto the network adapter and the syncer.
struct NetworkFacade {
    adapter: Arc<NetworkAdapter>,
    handle: SyncerHandle,
}

impl ConsensusTransport for NetworkFacade {
    fn broadcast(&self, msg: ConsensusMessage) {
        self.adapter.broadcast_consensus(&msg);
    }
}

impl SyncFacade for NetworkFacade {
    fn best_peer_number(&self) -> Option<u64> {
        self.handle.best_peer_number()
    }

    fn begin_sync(&self) -> oneshot::Receiver<()> {
        self.handle.request_sync()
    }

    fn announce(&self, block: Block) {
        self.adapter.announce_block(&block);
    }
}

/// A running node.
pub struct Node {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Wire up storage, networking, sync and consensus, and start all tasks.
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        let key = KeyPair::from_secret_bytes(&config.secret_key_bytes()?)?;
        info!(address = %key.address(), "Starting node");

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // Storage.
        let genesis = genesis_header(config.genesis_validators()?, config.gas_limit);
        let store = Arc::new(RocksDbStore::open(&config.data_dir, genesis)?);
        let status = store.status();

        // Networking.
        let sync_config = SyncConfig::default();
        let queue = Arc::new(NotifyQueue::new(sync_config.notify_queue_depth));
        let (consensus_tx, consensus_rx) = mpsc::channel::<ConsensusMessage>(1024);

        let net_config = NetworkConfig {
            listen_addresses: parse_addrs(&config.listen_addresses)?,
            bootstrap_peers: parse_addrs(&config.bootstrap_peers)?,
            ..Default::default()
        };
        let identity = derive_identity(&config.secret_key_bytes()?);
        let (adapter, mut inbound_rx, mut peer_rx) =
            NetworkAdapter::spawn(net_config, identity, consensus_tx, queue.clone())?;

        // Sync driver.
        let (syncer, sync_handle) = Syncer::new(
            sync_config,
            store.clone(),
            queue.clone(),
            adapter.clone() as Arc<dyn SyncClient>,
            cancel.clone(),
        );
        tasks.push(tokio::spawn(syncer.run()));

        // Sync server endpoints.
        let service = Arc::new(SyncService::new(store.clone(), status.clone(), queue));
        {
            let adapter = adapter.clone();
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(inbound) = inbound_rx.recv().await {
                    let response = match service.handle(&inbound.peer, inbound.request) {
                        Ok(response) => response,
                        Err(e) => {
                            warn!(peer = %inbound.peer, error = %e, "Rejected sync request");
                            SyncResponse::Error(e.to_string())
                        }
                    };
                    adapter.respond(inbound.channel_id, &response);
                }
            }));
        }

        // Peer lifecycle: learn each new peer's status, forget the gone.
        {
            let adapter = adapter.clone();
            let peers = sync_handle.peers().clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = peer_rx.recv().await {
                    match event {
                        PeerEvent::Connected(peer) => {
                            let client = adapter.clone();
                            let peers = peers.clone();
                            tokio::spawn(async move {
                                match get_status(client.as_ref(), &peer).await {
                                    Ok(status) => peers.observe(peer, status),
                                    Err(e) => {
                                        warn!(peer = %peer, error = %e, "Status handshake failed")
                                    }
                                }
                            });
                        }
                        PeerEvent::Disconnected(peer) => peers.remove(&peer),
                    }
                }
            }));
        }

        // Consensus driver.
        let facade = Arc::new(NetworkFacade {
            adapter: adapter.clone(),
            handle: sync_handle.clone(),
        });
        let driver = Ibft::new(
            key,
            IbftConfig::default()
                .with_base_round_timeout(Duration::from_millis(config.round_timeout_ms))
                .with_gas_limit_target(config.gas_limit),
            store.clone(),
            Arc::new(NoopExecutor::new()),
            Arc::new(FifoPool::new()),
            facade.clone(),
            facade,
            consensus_rx,
            cancel.clone(),
        );
        let shared = driver.shared();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = driver.run().await {
                error!(error = %e, "Consensus driver failed");
            }
        }));

        // Status RPC.
        let ready = Arc::new(AtomicBool::new(false));
        let rpc_state = RpcState {
            ready: ready.clone(),
            consensus: shared,
            status,
            peers: sync_handle.peers().clone(),
            start_time: Instant::now(),
        };
        {
            let listen = config.rpc_listen.clone();
            let rpc_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = rpc::serve(&listen, rpc_state, rpc_cancel).await {
                    error!(error = %e, "RPC server failed");
                }
            }));
        }

        ready.store(true, Ordering::SeqCst);
        info!("Node started");

        Ok(Self { cancel, tasks })
    }

    /// Signal shutdown and wait for every task to drain.
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Shutdown complete");
    }

    /// The node's cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

fn parse_addrs(raw: &[String]) -> anyhow::Result<Vec<Multiaddr>> {
    raw.iter()
        .map(|s| Multiaddr::from_str(s).map_err(|e| anyhow::anyhow!("bad multiaddr {s}: {e}")))
        .collect()
}
