use std::{
    io,
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use log::{debug, trace, warn};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use super::PendingSlot;
use crate::conf::ProbeConf;
use crate::error::{ProbeError, Result};

/// Inspects the newest datagram along with every datagram received so far
/// (newest last).
///
/// `Ok(Some(frame))` completes the request with `frame`, `Ok(None)` waits for
/// more datagrams and `Err` fails the request.
pub type DatagramValidator = dyn Fn(&[u8], &[Vec<u8>]) -> Result<Option<Vec<u8>>> + Send + Sync;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_535;

/// Unconnected UDP client with one outstanding request at a time.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    pending: PendingSlot,
}

impl UdpTransport {
    pub async fn bind(conf: &ProbeConf) -> Result<Self> {
        let socket = UdpSocket::bind(conf.udp_bind)
            .await
            .map_err(ProbeError::FailedPortBind)?;

        Ok(Self {
            socket,
            pending: PendingSlot::default(),
        })
    }

    /// Send `payload` to `host:port` and wait for a reply.
    ///
    /// `host` is resolved through DNS first; if that fails it is used as a
    /// literal IP address. Without a validator the first datagram is the reply.
    pub async fn send(
        &self,
        payload: &[u8],
        port: u16,
        host: &str,
        timeout_dur: Duration,
        validator: Option<&DatagramValidator>,
    ) -> Result<Vec<u8>> {
        let _pending = self.pending.acquire()?;
        let addr = format!("{}:{}", host, port);

        match timeout(timeout_dur, self.exchange(payload, port, host, &addr, validator)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::TimeoutWaitingForResponse(addr)),
        }
    }

    /// Release the socket.
    pub fn close(self) {
        debug!("closing UDP socket {:?}", self.socket.local_addr().ok());
    }

    async fn exchange(
        &self,
        payload: &[u8],
        port: u16,
        host: &str,
        addr: &str,
        validator: Option<&DatagramValidator>,
    ) -> Result<Vec<u8>> {
        let target = self
            .resolve(host, port)
            .await
            .map_err(|source| ProbeError::SendFailed {
                addr: addr.to_owned(),
                source,
            })?;

        self.drain_stale();

        let sent = self
            .socket
            .send_to(payload, target)
            .await
            .map_err(|source| ProbeError::SendFailed {
                addr: format!("{} ({})", addr, target),
                source,
            })?;
        if sent != payload.len() {
            return Err(ProbeError::SendFailed {
                addr: format!("{} ({})", addr, target),
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("sent {} of {} bytes", sent, payload.len()),
                ),
            });
        }
        trace!("sent {} bytes to {}", sent, target);

        let mut accumulated: Vec<Vec<u8>> = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (n, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(ProbeError::ReceiveError)?;
            trace!("received {} byte datagram from {}", n, from);

            let datagram = buf[..n].to_vec();
            let validate = match validator {
                Some(validate) => validate,
                None => return Ok(datagram),
            };

            accumulated.push(datagram);
            if let Some(frame) = validate(&buf[..n], &accumulated)? {
                return Ok(frame);
            }
        }
    }

    /// Best-effort DNS lookup, falling back to `host` as a literal address.
    ///
    /// Prefers an address of the same family as the local socket.
    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        match lookup_host((host, port)).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                let local_v4 = self.socket.local_addr().map(|a| a.is_ipv4()).unwrap_or(true);
                let preferred = addrs
                    .iter()
                    .find(|a| a.is_ipv4() == local_v4)
                    .or_else(|| addrs.first());
                if let Some(&addr) = preferred {
                    return Ok(addr);
                }
                warn!("DNS lookup for {} returned no addresses", host);
            }
            Err(err) => warn!("DNS lookup for {} failed: {}", host, err),
        }

        // TODO: decide what unresolvable non-IP hosts should do instead of failing the send.
        host.parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, port))
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
    }

    /// Discard datagrams that arrived while nothing was pending.
    fn drain_stale(&self) {
        let mut buf = [0u8; 1];
        while let Ok((_, from)) = self.socket.try_recv_from(&mut buf) {
            trace!("dropped stale datagram from {}", from);
        }
    }
}
