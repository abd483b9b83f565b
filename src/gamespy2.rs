//! GameSpy 2 status query: key/value info followed by player and team tables.
use std::time::Duration;

use log::debug;
use serde::Serialize;

use crate::conf::ProbeConf;
use crate::cursor::ByteCursor;
use crate::error::{ProbeError, Result};
use crate::transport::UdpTransport;
use crate::Record;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Magic, type (status), session id, then flags asking for info, players
/// and teams.
const STATUS_REQUEST: [u8; 11] = [
    0xFE, 0xFD, 0x00, 0x04, 0x05, 0x06, 0x07, 0xFF, 0xFF, 0xFF, 0x01,
];

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GameSpy2Status {
    pub info: Record,
    pub players: Vec<Record>,
    pub teams: Vec<Record>,
}

impl std::fmt::Display for GameSpy2Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?
        )
    }
}

#[derive(Debug)]
pub struct GameSpy2Client {
    host: String,
    port: u16,
    conf: ProbeConf,
    transport: Option<UdpTransport>,
}

impl GameSpy2Client {
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

    pub async fn get_status(&mut self) -> Result<GameSpy2Status> {
        if self.transport.is_none() {
            self.transport = Some(UdpTransport::bind(&self.conf).await?);
        }
        let transport = self.transport.as_ref().ok_or(ProbeError::ConnectionClosed)?;

        debug!("requesting status from {}:{}", self.host, self.port);
        let response = transport
            .send(
                &STATUS_REQUEST,
                self.port,
                &self.host,
                self.conf.timeout_or(DEFAULT_TIMEOUT),
                Some(&validate),
            )
            .await?;

        parse(&response)
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

/// A reply starts with the status type byte and carries more than a header.
fn validate(_: &[u8], all: &[Vec<u8>]) -> Result<Option<Vec<u8>>> {
    let total = all.concat();
    if total.len() > 5 && total[0] == 0x00 {
        Ok(Some(total))
    } else {
        Ok(None)
    }
}

/// Decode a status reply.
pub fn parse(data: &[u8]) -> Result<GameSpy2Status> {
    let mut reader = ByteCursor::new(data);
    let mut status = GameSpy2Status::default();

    reader.u8()?; // type
    reader.bytes(4)?; // session id

    while reader.remaining() {
        let key = reader.c_string_latin1();
        if key.is_empty() {
            break;
        }
        status.info.insert(key.to_lowercase(), reader.c_string_latin1());
    }

    while reader.remaining() {
        if reader.u8()? != 0x00 {
            break;
        }
        if reader.remaining() {
            reader.u8()?; // row count
        }

        let table = parse_table(&mut reader);
        let first = match table.first() {
            Some(first) => first,
            None => continue,
        };

        if first.contains_key("player") || first.contains_key("name") {
            status.players = table;
        } else if first.contains_key("team") || first.contains_key("teamname") {
            status.teams = table;
        } else {
            debug!("skipping table with columns {:?}", first.keys().collect::<Vec<_>>());
        }
    }

    Ok(status)
}

/// Column names up to an empty one, then rows until the next `0x00` or the end.
fn parse_table(reader: &mut ByteCursor) -> Vec<Record> {
    let mut fields: Vec<String> = Vec::new();

    while reader.remaining() {
        let field = reader.c_string_latin1();
        if field.is_empty() {
            break;
        }
        fields.push(normalize_field(&field));
    }

    if fields.is_empty() {
        return Vec::new();
    }

    let mut rows = Vec::new();
    while reader.remaining() && reader.peek() != Some(0x00) {
        let start = reader.position();
        let row: Record = fields
            .iter()
            .map(|field| (field.clone(), reader.c_string_latin1()))
            .collect();
        // An unterminated value reads nothing; stop rather than spin.
        if reader.position() == start {
            break;
        }
        rows.push(row);
    }

    rows
}

/// `player_` -> `player`, `score_t` -> `score`.
fn normalize_field(field: &str) -> String {
    let field = field.to_lowercase();
    match field.strip_suffix("_t").or_else(|| field.strip_suffix('_')) {
        Some(stripped) => stripped.to_string(),
        None => field,
    }
}

/// Fetch the status of a GameSpy 2 server with default settings.
pub async fn query(host: &str, port: u16) -> Result<GameSpy2Status> {
    GameSpy2Client::new(host, port).get_status().await
}
