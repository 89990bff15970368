use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use log::debug;
use thiserror::Error;

use crate::MAX_PACKET_SIZE;

pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream did not answer in time")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Io(#[from] io::Error),
}

/// Where cache misses go. Takes a raw query and hands back the raw answer.
pub trait Upstream {
    fn forward(&self, query: &[u8]) -> Result<Vec<u8>, ForwardError>;
}

/// Relays queries unmodified to a single upstream resolver over UDP.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    fn bind_addr(&self) -> SocketAddr {
        match self.upstream {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Upstream for Forwarder {
    // A fresh ephemeral socket per query, connected so the kernel discards datagrams from anyone
    // but the upstream. Dropping it on timeout abandons the read.
    fn forward(&self, query: &[u8]) -> Result<Vec<u8>, ForwardError> {
        let socket = UdpSocket::bind(self.bind_addr())?;
        socket.connect(self.upstream)?;
        socket.set_read_timeout(Some(self.timeout))?;

        debug!("Forwarding {} bytes to {}", query.len(), self.upstream);
        socket.send(query)?;

        let mut response_buffer = vec![0u8; MAX_PACKET_SIZE];
        let size = socket.recv(&mut response_buffer).map_err(|e| {
            if is_timeout(&e) {
                ForwardError::Timeout
            } else {
                ForwardError::Io(e)
            }
        })?;
        response_buffer.truncate(size);

        Ok(response_buffer)
    }
}
