//! Minecraft Bedrock Edition status through RakNet Unconnected Ping/Pong.
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::conf::ProbeConf;
use crate::cursor::ByteCursor;
use crate::error::{ProbeError, Result};
use crate::transport::UdpTransport;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const UNCONNECTED_PING: u8 = 0x01;
const UNCONNECTED_PONG: u8 = 0x1C;
const MAGIC_BYTES: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

/// Bedrock server status, decoded from the pong's server id string.
///
/// ```text
/// MCPE;Dedicated Server;582;1.20.10;10;100;13253860892328930865;Bedrock level;Survival;1;19132;19133;
/// ```
///
/// Servers vary in how many fields they send; missing ones are empty or zero.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BedrockStatus {
    /// MCPE, or MCEE for Education Edition
    pub edition: String,
    /// MOTD line 1
    pub motd: String,
    pub protocol: i32,
    pub version: String,
    pub players: i32,
    pub max_players: i32,
    pub server_id: String,
    /// MOTD line 2, usually the level name.
    pub map: String,
    pub game_mode: String,
    pub game_mode_id: u8,
    pub port_ipv4: u16,
    pub port_ipv6: u16,
    /// GUID from the pong header.
    pub server_guid: u64,
}

impl std::fmt::Display for BedrockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?
        )
    }
}

#[derive(Debug)]
pub struct RaknetClient {
    host: String,
    port: u16,
    conf: ProbeConf,
    transport: Option<UdpTransport>,
}

impl RaknetClient {
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

    pub async fn get_status(&mut self) -> Result<BedrockStatus> {
        if self.transport.is_none() {
            self.transport = Some(UdpTransport::bind(&self.conf).await?);
        }
        let transport = self.transport.as_ref().ok_or(ProbeError::ConnectionClosed)?;

        debug!("pinging {}:{}", self.host, self.port);
        let response = transport
            .send(
                &unconnected_ping(),
                self.port,
                &self.host,
                self.conf.timeout_or(DEFAULT_TIMEOUT),
                None,
            )
            .await?;

        parse_pong(&response)
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

/// Packet ID, time, magic, client GUID.
fn unconnected_ping() -> Vec<u8> {
    let mut packet = vec![UNCONNECTED_PING];
    packet.extend_from_slice(&[0u8; 8]);
    packet.extend_from_slice(&MAGIC_BYTES);
    packet.extend_from_slice(&[0u8; 8]);
    packet
}

/// Decode an Unconnected Pong: ID, time, server GUID, magic, server id string.
pub fn parse_pong(data: &[u8]) -> Result<BedrockStatus> {
    let mut reader = ByteCursor::new(data);

    let header = reader.u8()?;
    if header != UNCONNECTED_PONG {
        return Err(ProbeError::InvalidHeader {
            expected: UNCONNECTED_PONG,
            found: header,
        });
    }

    reader.bytes(8)?; // time
    let server_guid = u64::from_be_bytes(
        reader
            .bytes(8)?
            .try_into()
            .map_err(|_| ProbeError::ProtocolViolation("short server GUID".into()))?,
    );
    reader.bytes(16)?; // magic

    let len = reader.u16_be()? as usize;
    let server_id = String::from_utf8_lossy(reader.bytes(len)?).into_owned();

    let fields: Vec<&str> = server_id.split(';').collect();
    let text = |i: usize| fields.get(i).map(|s| s.to_string()).unwrap_or_default();

    Ok(BedrockStatus {
        edition: text(0),
        motd: text(1),
        protocol: number(fields.get(2)),
        version: text(3),
        players: number(fields.get(4)),
        max_players: number(fields.get(5)),
        server_id: text(6),
        map: text(7),
        game_mode: text(8),
        game_mode_id: number(fields.get(9)),
        port_ipv4: number(fields.get(10)),
        port_ipv6: number(fields.get(11)),
        server_guid,
    })
}

/// Parse a numeric field, zero when absent or garbled.
fn number<T: std::str::FromStr + Default>(field: Option<&&str>) -> T {
    field
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or_default()
}

/// Ping a Bedrock server with default settings.
pub async fn query(host: &str, port: u16) -> Result<BedrockStatus> {
    RaknetClient::new(host, port).get_status().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    fn pong(server_id: &str) -> Vec<u8> {
        let mut packet = vec![UNCONNECTED_PONG];
        packet.extend_from_slice(&[0u8; 8]);
        packet.extend_from_slice(&0x0102030405060708u64.to_be_bytes());
        packet.extend_from_slice(&MAGIC_BYTES);
        packet.extend_from_slice(&(server_id.len() as u16).to_be_bytes());
        packet.extend_from_slice(server_id.as_bytes());
        packet
    }

    #[test]
    fn ping_layout() {
        let ping = unconnected_ping();
        assert_eq!(ping.len(), 33);
        assert_eq!(ping[0], 0x01);
        assert_eq!(&ping[9..25], &MAGIC_BYTES);
    }

    #[test]
    fn parses_full_pong() {
        let status = parse_pong(&pong(
            "MCPE;Dedicated Server;582;1.20.10;10;100;123456;Bedwars;Survival;1;19132;19133;",
        ))
        .unwrap();

        assert_eq!(status.edition, "MCPE");
        assert_eq!(status.motd, "Dedicated Server");
        assert_eq!(status.protocol, 582);
        assert_eq!(status.version, "1.20.10");
        assert_eq!(status.players, 10);
        assert_eq!(status.max_players, 100);
        assert_eq!(status.server_id, "123456");
        assert_eq!(status.map, "Bedwars");
        assert_eq!(status.game_mode, "Survival");
        assert_eq!(status.game_mode_id, 1);
        assert_eq!(status.port_ipv4, 19132);
        assert_eq!(status.port_ipv6, 19133);
        assert_eq!(status.server_guid, 0x0102030405060708);
    }

    #[test]
    fn missing_fields_default() {
        let status = parse_pong(&pong("MCPE;ShortMsg")).unwrap();
        assert_eq!(status.edition, "MCPE");
        assert_eq!(status.motd, "ShortMsg");
        assert_eq!(status.players, 0);
        assert_eq!(status.version, "");
        assert_eq!(status.game_mode, "");
    }

    #[test]
    fn rejects_other_packets() {
        let mut packet = pong("MCPE");
        packet[0] = 0x1D;
        assert!(matches!(
            parse_pong(&packet),
            Err(ProbeError::InvalidHeader {
                expected: 0x1C,
                found: 0x1D
            })
        ));
        assert!(matches!(
            parse_pong(&[0x1C; 20]),
            Err(ProbeError::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn status_over_udp() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, 33);
            let reply = pong("MCPE;Lobby;630;1.20.50;3;20;42;world;Creative");
            server.send_to(&reply, from).await.unwrap();
        });

        let mut client = RaknetClient::new("127.0.0.1", port);
        let status = client.get_status().await.unwrap();
        assert_eq!(status.motd, "Lobby");
        assert_eq!(status.players, 3);
        assert_eq!(status.game_mode, "Creative");
        client.close();
    }
}
