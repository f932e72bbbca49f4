use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::Fabric;
use crate::error::HarnessError;

/// Bootstrap inputs supplied by the execution environment. Consumed once
/// when the fabric is constructed.
#[derive(Clone, Debug)]
pub struct Rendezvous {
    pub master_addr: IpAddr,
    pub master_port: u16,
    pub rank: usize,
    pub world_size: usize,
}

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_RETRY: Duration = Duration::from_millis(200);

/// TCP full-mesh fabric.
///
/// Rank 0 listens on the rendezvous endpoint; every other rank registers
/// its own ephemeral mesh port there and gets the full roster back. The
/// mesh is then built by accepting from higher ranks and connecting to
/// lower ranks. All ranks must bootstrap simultaneously with the same
/// rendezvous parameters.
pub struct TcpFabric {
    rank: usize,
    world_size: usize,
    /// Peers indexed by rank (own rank slot is None).
    peers: Vec<Option<Arc<Mutex<TcpStream>>>>,
}

impl TcpFabric {
    pub async fn new(rendezvous: &Rendezvous) -> Result<Self, HarnessError> {
        if rendezvous.world_size == 0 || rendezvous.rank >= rendezvous.world_size {
            return Err(HarnessError::Bootstrap {
                reason: format!(
                    "rank {} out of range for world size {}",
                    rendezvous.rank, rendezvous.world_size
                ),
            });
        }

        match timeout(BOOTSTRAP_TIMEOUT, Self::establish(rendezvous)).await {
            Ok(result) => result.map_err(|err| match err {
                HarnessError::Transport(io) => HarnessError::Bootstrap {
                    reason: io.to_string(),
                },
                other => other,
            }),
            Err(_) => Err(HarnessError::Bootstrap {
                reason: format!(
                    "rendezvous at {}:{} timed out after {:?}",
                    rendezvous.master_addr, rendezvous.master_port, BOOTSTRAP_TIMEOUT
                ),
            }),
        }
    }

    async fn establish(rendezvous: &Rendezvous) -> Result<Self, HarnessError> {
        let world_size = rendezvous.world_size;

        // Mesh listener comes up before rendezvous so lower ranks can
        // connect the moment they learn our port.
        let mesh = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let mesh_port = mesh.local_addr()?.port();

        let roster = if rendezvous.rank == 0 {
            Self::collect_roster(rendezvous, mesh_port).await?
        } else {
            Self::register_with_master(rendezvous, mesh_port).await?
        };

        let mut peers: Vec<Option<Arc<Mutex<TcpStream>>>> = vec![None; world_size];

        // Connect to lower ranks, then accept from higher ranks. Accepted
        // connections arrive in arbitrary order, so each opens with a
        // hello word naming its rank.
        for lower in 0..rendezvous.rank {
            let mut stream = TcpStream::connect(roster[lower]).await?;
            stream.set_nodelay(true)?;
            stream.write_u32(rendezvous.rank as u32).await?;
            peers[lower] = Some(Arc::new(Mutex::new(stream)));
        }
        for _ in rendezvous.rank + 1..world_size {
            let (mut stream, _) = mesh.accept().await?;
            stream.set_nodelay(true)?;
            let hello = stream.read_u32().await? as usize;
            if hello <= rendezvous.rank || hello >= world_size || peers[hello].is_some() {
                return Err(HarnessError::Bootstrap {
                    reason: format!("unexpected mesh hello from rank {hello}"),
                });
            }
            peers[hello] = Some(Arc::new(Mutex::new(stream)));
        }

        Ok(Self {
            rank: rendezvous.rank,
            world_size,
            peers,
        })
    }

    /// Rank 0: gather every peer's mesh endpoint, answer each registration
    /// with the complete roster.
    async fn collect_roster(
        rendezvous: &Rendezvous,
        mesh_port: u16,
    ) -> Result<Vec<SocketAddr>, HarnessError> {
        let master = TcpListener::bind((rendezvous.master_addr, rendezvous.master_port))
            .await
            .map_err(|err| HarnessError::Bootstrap {
                reason: format!(
                    "cannot bind rendezvous endpoint {}:{}: {err}",
                    rendezvous.master_addr, rendezvous.master_port
                ),
            })?;

        let world_size = rendezvous.world_size;
        let mut roster: Vec<Option<SocketAddr>> = vec![None; world_size];
        roster[0] = Some(SocketAddr::new(rendezvous.master_addr, mesh_port));

        let mut registrations = Vec::with_capacity(world_size - 1);
        while registrations.len() < world_size - 1 {
            let (mut stream, remote) = master.accept().await?;
            let peer = stream.read_u32().await? as usize;
            let port = stream.read_u16().await?;
            if peer == 0 || peer >= world_size || roster[peer].is_some() {
                return Err(HarnessError::Bootstrap {
                    reason: format!("invalid registration for rank {peer}"),
                });
            }
            // The peer's reachable IP is whatever it registered from.
            roster[peer] = Some(SocketAddr::new(remote.ip(), port));
            registrations.push(stream);
        }

        let roster: Vec<SocketAddr> = roster.into_iter().flatten().collect();
        if roster.len() != world_size {
            return Err(HarnessError::Bootstrap {
                reason: "incomplete roster after rendezvous".to_string(),
            });
        }

        for stream in &mut registrations {
            write_roster(stream, &roster).await?;
        }
        Ok(roster)
    }

    /// Ranks 1..n: register the mesh port with rank 0 and read the roster
    /// back. Retries the connect until rank 0's listener is up; the outer
    /// bootstrap timeout bounds the loop.
    async fn register_with_master(
        rendezvous: &Rendezvous,
        mesh_port: u16,
    ) -> Result<Vec<SocketAddr>, HarnessError> {
        let master = SocketAddr::new(rendezvous.master_addr, rendezvous.master_port);
        let mut stream = loop {
            match TcpStream::connect(master).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(CONNECT_RETRY).await,
            }
        };
        stream.write_u32(rendezvous.rank as u32).await?;
        stream.write_u16(mesh_port).await?;
        read_roster(&mut stream, rendezvous.world_size).await
    }

    fn get_peer(&self, peer: usize) -> Result<Arc<Mutex<TcpStream>>, HarnessError> {
        self.peers
            .get(peer)
            .and_then(|p| p.clone())
            .ok_or_else(|| HarnessError::invalid_peer(peer))
    }
}

async fn write_roster(stream: &mut TcpStream, roster: &[SocketAddr]) -> Result<(), HarnessError> {
    for addr in roster {
        let text = addr.to_string();
        stream.write_u16(text.len() as u16).await?;
        stream.write_all(text.as_bytes()).await?;
    }
    Ok(())
}

async fn read_roster(
    stream: &mut TcpStream,
    world_size: usize,
) -> Result<Vec<SocketAddr>, HarnessError> {
    let mut roster = Vec::with_capacity(world_size);
    for _ in 0..world_size {
        let len = stream.read_u16().await? as usize;
        let mut raw = vec![0u8; len];
        stream.read_exact(&mut raw).await?;
        let text = String::from_utf8(raw).map_err(|_| HarnessError::Bootstrap {
            reason: "malformed roster entry".to_string(),
        })?;
        let addr = text.parse().map_err(|_| HarnessError::Bootstrap {
            reason: format!("malformed roster address: {text}"),
        })?;
        roster.push(addr);
    }
    Ok(roster)
}

#[async_trait]
impl Fabric for TcpFabric {
    async fn send(&self, peer: usize, buf: &[u8]) -> Result<(), HarnessError> {
        let stream = self.get_peer(peer)?;
        let mut guard = stream.lock().await;
        guard.write_all(buf).await?;
        Ok(())
    }

    async fn recv(&self, peer: usize, buf: &mut [u8]) -> Result<(), HarnessError> {
        let stream = self.get_peer(peer)?;
        let mut guard = stream.lock().await;
        guard.read_exact(buf).await?;
        Ok(())
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn shutdown(&self) -> Result<(), HarnessError> {
        for peer in self.peers.iter().flatten() {
            let mut guard = peer.lock().await;
            let _ = guard.shutdown().await;
        }
        Ok(())
    }
}
