//! UDP socket with packet framing
//!
//! Thin wrapper over a tokio [`UdpSocket`]. Sends never wait: a datagram the
//! kernel cannot take right now is reported as [`SocketError::WouldBlock`]
//! and dropped, which keeps stale input from queuing behind a dead peer.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::packet::{Packet, PacketDecodeError};

/// Buffer size for incoming datagrams
const RECV_BUFFER_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("socket option error: {0}")]
    SocketOption(#[source] io::Error),
    #[error("send buffer full")]
    WouldBlock,
    #[error("send error: {0}")]
    Send(#[source] io::Error),
}

/// UDP socket carrying [`Packet`]s.
pub struct RaceSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buf: Vec<u8>,
}

impl RaceSocket {
    /// Bind to `addr` with broadcast enabled. Must be called inside a tokio
    /// runtime.
    pub async fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| SocketError::Bind { addr, source })?;

        socket
            .set_broadcast(true)
            .map_err(SocketError::SocketOption)?;

        let local_addr = socket
            .local_addr()
            .map_err(|source| SocketError::Bind { addr, source })?;

        tracing::debug!(port = local_addr.port(), "RaceSocket bound");

        Ok(Self {
            socket,
            local_addr,
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a packet without waiting for socket readiness.
    pub fn try_send_to(&self, target: SocketAddr, packet: &Packet) -> Result<(), SocketError> {
        let bytes = packet.to_bytes();
        match self.socket.try_send_to(&bytes, target) {
            Ok(_) => {
                tracing::trace!(%target, kind = packet.kind(), "Sent packet");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(SocketError::WouldBlock),
            Err(e) => Err(SocketError::Send(e)),
        }
    }

    /// Wait for the next datagram.
    ///
    /// The outer error is a socket failure; the inner one a datagram that is
    /// not a valid packet, which callers log and skip.
    pub async fn recv(&mut self) -> io::Result<(SocketAddr, Result<Packet, PacketDecodeError>)> {
        let (len, from) = self.socket.recv_from(&mut self.recv_buf).await?;
        Ok((from, Packet::from_bytes(&self.recv_buf[..len])))
    }
}
