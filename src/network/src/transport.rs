//! Unreliable point-to-point datagram transports.
//!
//! Every ordered pair of replicas owns one endpoint at each side. An endpoint
//! only talks to its single remote, so there is no addressing above this layer.

use crate::error::{NetworkError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Largest datagram accepted by the UDP endpoint
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// One side of a point-to-point datagram channel.
///
/// Datagrams may be lost, duplicated or reordered. `recv` returns
/// [`NetworkError::Closed`] once the channel can never deliver again.
#[async_trait]
pub trait DatagramEndpoint: Send + Sync {
    /// Send one datagram to the remote side
    async fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Wait for the next datagram from the remote side
    async fn recv(&self) -> Result<Vec<u8>>;
}

/// UDP socket bound to a local port and dedicated to one remote address
pub struct UdpEndpoint {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpEndpoint {
    /// Bind `local` and fix `remote` as the only peer
    pub async fn bind(local: SocketAddr, remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        debug!(local = %socket.local_addr()?, remote = %remote, "UDP endpoint bound");
        Ok(Self { socket, remote })
    }

    /// Local bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

#[async_trait]
impl DatagramEndpoint for UdpEndpoint {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(NetworkError::Transport(format!(
                "datagram of {} bytes exceeds {}",
                datagram.len(),
                MAX_DATAGRAM_SIZE
            )));
        }
        self.socket.send_to(datagram, self.remote).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if from != self.remote {
                trace!(from = %from, expected = %self.remote, "Ignoring datagram from foreign address");
                continue;
            }
            buf.truncate(len);
            return Ok(buf);
        }
    }
}
