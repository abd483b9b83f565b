//! Minecraft Java Edition [Server List Ping](https://wiki.vg/Server_List_Ping).
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::conf::ProbeConf;
use crate::cursor::ByteCursor;
use crate::error::{ProbeError, Result};
use crate::transport::TcpTransport;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Protocol version sent in the handshake (1.8). Servers answer status
/// requests regardless of the version a client claims.
const PROTOCOL_VERSION: i32 = 47;
/// Handshake next-state: status.
const NEXT_STATE_STATUS: i32 = 1;
const STATUS_PACKET_ID: i32 = 0x00;
const NO_MOTD: &str = "No MOTD";

const SEGMENT_BITS: u32 = 0x7F;
const CONTINUE_BIT: u32 = 0x80;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JavaStatus {
    pub version: Version,
    pub players: Players,
    /// Plain text of the MOTD.
    pub description: String,
    /// `data:image/png;base64,...` server icon.
    pub favicon: Option<String>,
}

impl std::fmt::Display for JavaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Version {
    #[serde(default = "unknown_version")]
    pub name: String,
    #[serde(default)]
    pub protocol: i32,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            name: unknown_version(),
            protocol: 0,
        }
    }
}

fn unknown_version() -> String {
    "Unknown".into()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Players {
    #[serde(default)]
    pub max: i64,
    #[serde(default)]
    pub online: i64,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerSample {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
}

/// The status document as servers send it.
#[derive(Deserialize, Debug, Default)]
struct RawStatus {
    #[serde(default)]
    version: Option<Version>,
    #[serde(default)]
    players: Option<Players>,
    #[serde(default)]
    description: Option<Description>,
    #[serde(default)]
    favicon: Option<String>,
}

/// MOTD: either a bare string or a chat component.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Description {
    Text(String),
    Component(Component),
    Other(serde_json::Value),
}

#[derive(Deserialize, Debug, Default)]
struct Component {
    #[serde(default)]
    text: String,
    #[serde(default)]
    extra: Vec<Description>,
}

impl Description {
    fn plain_text(&self) -> String {
        match self {
            Description::Text(text) => text.clone(),
            Description::Component(component) => {
                let mut text = component.text.clone();
                for extra in &component.extra {
                    text.push_str(&extra.plain_text());
                }
                text
            }
            Description::Other(_) => String::new(),
        }
    }
}

#[derive(Debug)]
pub struct MinecraftJavaClient {
    host: String,
    port: u16,
    conf: ProbeConf,
}

impl MinecraftJavaClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_conf(host, port, ProbeConf::default())
    }

    pub fn with_conf(host: &str, port: u16, conf: ProbeConf) -> Self {
        Self {
            host: host.into(),
            port,
            conf,
        }
    }

    /// Handshake, request the status and decode the reply.
    ///
    /// Each call opens its own connection, which is closed before returning.
    pub async fn get_status(&self) -> Result<JavaStatus> {
        let timeout_dur = self.conf.timeout_or(DEFAULT_TIMEOUT);
        let mut transport = TcpTransport::connect(&self.host, self.port, timeout_dur).await?;

        debug!("requesting status from {}:{}", self.host, self.port);
        let result = transport
            .send(
                &status_request(&self.host, self.port),
                Some(&validate_frame),
                timeout_dur,
            )
            .await;
        transport.close();

        parse_status(&result?)
    }
}

/// Handshake (next state: status) followed by an empty status request.
fn status_request(host: &str, port: u16) -> Vec<u8> {
    let mut handshake = encode_varint(STATUS_PACKET_ID);
    handshake.extend(encode_varint(PROTOCOL_VERSION));
    handshake.extend(encode_var_string(host));
    handshake.extend_from_slice(&port.to_be_bytes());
    handshake.extend(encode_varint(NEXT_STATE_STATUS));

    let request = encode_varint(STATUS_PACKET_ID);

    let mut packet = frame(&handshake);
    packet.extend(frame(&request));
    packet
}

/// Prefix `body` with its VarInt length.
fn frame(body: &[u8]) -> Vec<u8> {
    let mut packet = encode_varint(body.len() as i32);
    packet.extend_from_slice(body);
    packet
}

/// Reassemble one length-prefixed packet from TCP chunks.
///
/// Returns `None` until the buffer holds the whole packet, then exactly the
/// prefix plus the declared length.
pub fn validate_frame(buf: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut reader = ByteCursor::new(buf);

    let length = match reader.varint() {
        Ok(length) => length,
        Err(ProbeError::OutOfBounds { .. }) => return Ok(None),
        Err(err) => return Err(err),
    };
    if length < 0 {
        return Err(ProbeError::ProtocolViolation(format!(
            "negative packet length: {}",
            length
        )));
    }

    let needed = reader.position() + length as usize;
    if buf.len() >= needed {
        Ok(Some(buf[..needed].to_vec()))
    } else {
        Ok(None)
    }
}

/// Decode a framed status response packet.
pub fn parse_status(packet: &[u8]) -> Result<JavaStatus> {
    let mut reader = ByteCursor::new(packet);
    let _length = reader.varint()?;

    let id = reader.varint()?;
    if id != STATUS_PACKET_ID {
        return Err(ProbeError::InvalidPacketId(id));
    }

    let raw: RawStatus = serde_json::from_str(&reader.var_string()?)?;

    let description = raw
        .description
        .map(|description| description.plain_text())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| NO_MOTD.into());

    Ok(JavaStatus {
        version: raw.version.unwrap_or_default(),
        players: raw.players.unwrap_or_default(),
        description,
        favicon: raw.favicon,
    })
}

/// Encode the given number as a [VarInt](https://wiki.vg/Protocol#VarInt_and_VarLong).
pub fn encode_varint(num: i32) -> Vec<u8> {
    // Negative values are encoded through their two's complement and always
    // take the full five bytes.
    let mut num = num as u32;
    let mut result = Vec::new();

    loop {
        if num & !SEGMENT_BITS == 0 {
            result.push(num as u8);
            return result;
        }

        result.push(((num & SEGMENT_BITS) | CONTINUE_BIT) as u8);
        num >>= 7;
    }
}

fn encode_var_string(s: &str) -> Vec<u8> {
    frame(s.as_bytes())
}

/// Fetch the status of a Java server with default settings.
pub async fn query(host: &str, port: u16) -> Result<JavaStatus> {
    MinecraftJavaClient::new(host, port).get_status().await
}
