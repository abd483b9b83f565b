//! Async client for the [Source Query Protocol](https://developer.valvesoftware.com/wiki/Server_queries)
//! (A2S), including the GoldSrc reply layouts.
mod info;
mod packet;

use std::time::Duration;

use log::debug;

pub use info::{
    parse_info, parse_players, parse_rules, Environment, GoldSrcInfo, ModInfo, PlayerRecord,
    RuleRecord, ServerInfo, ServerType, SourceTv, TheShip, Vac, Visibility,
};
pub use packet::{validate_packet, PacketHeader, Request};

use crate::conf::ProbeConf;
use crate::error::{ProbeError, Result};
use crate::transport::UdpTransport;
use packet::{strip_single, RESP_CHALLENGE};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
/// Challenge retries before giving up on a server.
pub const MAX_CHALLENGE_ATTEMPTS: usize = 5;

/// A2S client for one server.
///
/// The UDP socket is bound on first use and reused by every query until
/// [SourceQueryClient::close] is called or the client is dropped.
#[derive(Debug)]
pub struct SourceQueryClient {
    host: String,
    port: u16,
    conf: ProbeConf,
    transport: Option<UdpTransport>,
}

impl SourceQueryClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_conf(host, port, ProbeConf::default())
    }

    pub fn with_conf(host: &str, port: u16, conf: ProbeConf) -> Self {
        Self {
            host: host.into(),
            port,
            conf,
            transport: None,
        }
    }

    pub async fn get_info(&mut self) -> Result<ServerInfo> {
        parse_info(&self.query(Request::Info).await?)
    }

    pub async fn get_players(&mut self) -> Result<Vec<PlayerRecord>> {
        parse_players(&self.query(Request::Players).await?)
    }

    pub async fn get_rules(&mut self) -> Result<Vec<RuleRecord>> {
        parse_rules(&self.query(Request::Rules).await?)
    }

    /// Release the socket. The next query binds a new one.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }

    async fn transport(&mut self) -> Result<&UdpTransport> {
        if self.transport.is_none() {
            self.transport = Some(UdpTransport::bind(&self.conf).await?);
        }
        self.transport.as_ref().ok_or(ProbeError::ConnectionClosed)
    }

    /// Send `request`, answer challenges, and return the reply payload
    /// without its envelope.
    async fn query(&mut self, request: Request) -> Result<Vec<u8>> {
        let timeout_dur = self.conf.timeout_or(DEFAULT_TIMEOUT);
        let expected = request.expected_response();
        let validator = move |chunk: &[u8], all: &[Vec<u8>]| -> Result<Option<Vec<u8>>> {
            Ok(validate_packet(chunk, all, expected))
        };

        let (host, port) = (self.host.clone(), self.port);
        let transport = self.transport().await?;

        debug!("sending {:?} to {}:{}", request, host, port);
        let mut response = transport
            .send(&request.pack(None), port, &host, timeout_dur, Some(&validator))
            .await?;
        response = strip_single(&response).to_vec();

        let mut attempts = 0;
        while response.first() == Some(&RESP_CHALLENGE) {
            if attempts >= MAX_CHALLENGE_ATTEMPTS {
                return Err(ProbeError::ChallengeLoopDetected(attempts));
            }
            attempts += 1;

            let token = response.get(1..5).ok_or_else(|| {
                ProbeError::ProtocolViolation(format!(
                    "challenge carries {} token bytes, expected 4",
                    response.len().saturating_sub(1)
                ))
            })?;
            debug!("{:?} challenged by {}:{} (attempt {})", request, host, port, attempts);

            let packet = request.pack(Some(token));
            response = transport
                .send(&packet, port, &host, timeout_dur, Some(&validator))
                .await?;
            response = strip_single(&response).to_vec();
        }

        Ok(response)
    }
}

/// Query `host:port` for its A2S_INFO with default settings.
///
/// Example usage:
/// ```no_run
/// # async fn run() -> uppsync_probes::Result<()> {
/// let info = uppsync_probes::source::query("127.0.0.1", 27015).await?;
/// println!("{} on {}", info.name, info.map);
/// # Ok(())
/// # }
/// ```
pub async fn query(host: &str, port: u16) -> Result<ServerInfo> {
    SourceQueryClient::new(host, port).get_info().await
}
