use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Per-client socket configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConf {
    /// Deadline for each request. `None` uses the protocol's default.
    pub timeout: Option<Duration>,
    /// Local address for UDP sockets.
    /// The default is [Ipv4Addr::UNSPECIFIED] with an ephemeral port.
    pub udp_bind: SocketAddr,
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            timeout: None,
            udp_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }
}

impl ProbeConf {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// The configured timeout, or `default` if none was set.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}
