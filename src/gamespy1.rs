//! GameSpy 1 backslash-delimited status protocol (`\key\value\...\final\`).
use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::conf::ProbeConf;
use crate::cursor::latin1;
use crate::error::{ProbeError, Result};
use crate::transport::UdpTransport;
use crate::Record;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Marks the last packet of a multi-packet reply.
const FINAL_MARKER: &str = "\\final\\";
/// Keys that describe the reply rather than the server.
const IGNORED_KEYS: [&str; 2] = ["final", "queryid"];

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GameSpy1Status {
    pub info: Record,
    pub players: Vec<Record>,
    pub teams: Vec<Record>,
}

impl std::fmt::Display for GameSpy1Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?
        )
    }
}

#[derive(Debug)]
pub struct GameSpy1Client {
    host: String,
    port: u16,
    conf: ProbeConf,
    transport: Option<UdpTransport>,
}

impl GameSpy1Client {
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

    /// Send a raw command and decode the reply into a key/value map.
    ///
    /// With `wait_for_final` the reply is collected until `\final\` shows up;
    /// otherwise the first datagram is the whole reply.
    pub async fn send_command(&mut self, command: &str, wait_for_final: bool) -> Result<Record> {
        if self.transport.is_none() {
            self.transport = Some(UdpTransport::bind(&self.conf).await?);
        }
        let transport = self.transport.as_ref().ok_or(ProbeError::ConnectionClosed)?;

        let validator = move |_: &[u8], all: &[Vec<u8>]| -> Result<Option<Vec<u8>>> {
            let total = all.concat();
            if !wait_for_final || latin1(&total).contains(FINAL_MARKER) {
                Ok(Some(total))
            } else {
                Ok(None)
            }
        };

        debug!("sending {} to {}:{}", command, self.host, self.port);
        let response = transport
            .send(
                &encode_latin1(command),
                self.port,
                &self.host,
                self.conf.timeout_or(DEFAULT_TIMEOUT),
                Some(&validator),
            )
            .await?;

        Ok(decode(&latin1(&response)))
    }

    /// Wait for `\final\`; if that fails, ask again and take the first datagram.
    async fn send_with_fallback(&mut self, command: &str) -> Result<Record> {
        match self.send_command(command, true).await {
            Ok(raw) => Ok(raw),
            Err(err) => {
                warn!(
                    "{} to {}:{} failed waiting for final packet ({}), retrying",
                    command, self.host, self.port, err
                );
                self.send_command(command, false).await
            }
        }
    }

    /// `\status\`: server info plus player and team lists.
    pub async fn get_status(&mut self, xserverquery: bool) -> Result<GameSpy1Status> {
        let raw = self
            .send_with_fallback(&command("status", xserverquery))
            .await?;
        Ok(split_status(raw))
    }

    pub async fn get_basic(&mut self) -> Result<Record> {
        self.send_command("\\basic\\", false).await
    }

    pub async fn get_info(&mut self, xserverquery: bool) -> Result<Record> {
        self.send_command(&command("info", xserverquery), false).await
    }

    pub async fn get_rules(&mut self, xserverquery: bool) -> Result<Record> {
        self.send_with_fallback(&command("rules", xserverquery)).await
    }

    pub async fn get_players(&mut self, xserverquery: bool) -> Result<Vec<Record>> {
        let raw = self
            .send_with_fallback(&command("players", xserverquery))
            .await?;
        Ok(group_indexed(raw))
    }

    pub async fn get_teams(&mut self, xserverquery: bool) -> Result<Vec<Record>> {
        let raw = self
            .send_with_fallback(&command("teams", xserverquery))
            .await?;
        Ok(group_indexed(raw))
    }

    /// Is the server answering `\echo\` with our message?
    pub async fn get_echo(&mut self, message: &str) -> bool {
        match self
            .send_command(&format!("\\echo\\{}", message), false)
            .await
        {
            Ok(data) => {
                data.contains_key(message)
                    || data.contains_key("echo")
                    || data.values().any(|value| value == message)
            }
            Err(err) => {
                debug!("echo to {}:{} failed: {}", self.host, self.port, err);
                false
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

fn command(name: &str, xserverquery: bool) -> String {
    if xserverquery {
        format!("\\{}\\xserverquery\\", name)
    } else {
        format!("\\{}\\", name)
    }
}

/// Characters outside latin-1 cannot be sent and become `?`.
fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}

/// Pair up `\key\value` tokens. Keys are lower-cased.
pub fn decode(raw: &str) -> Record {
    let parts: Vec<&str> = raw.split('\\').collect();
    let mut data = Record::new();

    for pair in parts.get(1..).unwrap_or_default().chunks(2) {
        if let [key, value] = pair {
            let key = key.to_lowercase();
            if !key.is_empty() && !IGNORED_KEYS.contains(&key.as_str()) {
                data.insert(key, value.to_string());
            }
        }
    }

    data
}

/// Split `player_0` into `("player", 0)`.
fn indexed_key(key: &str) -> Option<(&str, u64)> {
    let (property, index) = key.rsplit_once('_')?;
    if property.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((property, index.parse().ok()?))
}

/// Route indexed keys to players or teams; the rest is server info.
fn split_status(raw: Record) -> GameSpy1Status {
    let mut info = Record::new();
    let mut players: BTreeMap<u64, Record> = BTreeMap::new();
    let mut teams: BTreeMap<u64, Record> = BTreeMap::new();

    for (key, value) in raw {
        if let Some((property, index)) = indexed_key(&key) {
            let group = if property.starts_with("teamname") || property.starts_with("teamscore") {
                &mut teams
            } else {
                &mut players
            };
            group
                .entry(index)
                .or_default()
                .insert(property.to_string(), value);
            continue;
        }
        info.insert(key, value);
    }

    GameSpy1Status {
        info,
        players: players.into_values().collect(),
        teams: teams.into_values().collect(),
    }
}

/// Group every indexed key by its index, ordered by index.
fn group_indexed(raw: Record) -> Vec<Record> {
    let mut groups: BTreeMap<u64, Record> = BTreeMap::new();

    for (key, value) in raw {
        if let Some((property, index)) = indexed_key(&key) {
            groups
                .entry(index)
                .or_default()
                .insert(property.to_string(), value);
        }
    }

    groups.into_values().collect()
}

/// Fetch `\status\` from a GameSpy 1 server with default settings.
pub async fn query(host: &str, port: u16) -> Result<GameSpy1Status> {
    GameSpy1Client::new(host, port).get_status(false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    /// A server that answers like the stock GameSpy 1 implementations do.
    async fn server() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (n, from) = socket.recv_from(&mut buf).await.unwrap();
                let cmd = latin1(&buf[..n]);
                let xsq = cmd.contains("xserverquery");

                let replies: Vec<String> = if cmd.contains("\\basic\\") {
                    vec!["\\gamename\\basetest\\final\\".into()]
                } else if cmd.contains("\\info\\") {
                    let which = if xsq { "info_xsq" } else { "info_default" };
                    vec![format!("\\cmd\\{}\\hostname\\InfoTest\\final\\", which)]
                } else if cmd.contains("\\status\\") {
                    vec![
                        "\\mapname\\de_dust\\player_0\\PlayerOne\\score_0\\10\\".into(),
                        "player_1\\PlayerTwo\\teamname_0\\RedTeam\\teamscore_0\\5\\queryid\\1.1\\final\\".into(),
                    ]
                } else if cmd.contains("\\teams\\") && xsq {
                    vec!["\\teamname_0\\SuccessTeam\\final\\".into()]
                } else if cmd.contains("\\teams\\") {
                    // Never sends \final\.
                    vec!["\\teamname_0\\TimeoutTeam\\teamscore_0\\99\\".into()]
                } else if cmd.contains("\\rules\\") && xsq {
                    vec!["\\gravity\\100\\final\\".into()]
                } else if cmd.contains("\\rules\\") {
                    vec!["\\gravity\\800\\".into()]
                } else if cmd.contains("\\players\\") && xsq {
                    vec!["\\player_0\\SuccessPlayer\\final\\".into()]
                } else if cmd.contains("\\players\\") {
                    vec!["\\player_0\\TimeoutPlayer\\".into()]
                } else if cmd.contains("\\echo\\") {
                    vec![cmd.clone()]
                } else {
                    vec!["\\final\\".into()]
                };

                for reply in replies {
                    socket.send_to(&encode_latin1(&reply), from).await.unwrap();
                }
            }
        });

        port
    }

    async fn client() -> GameSpy1Client {
        let port = server().await;
        GameSpy1Client::with_conf(
            "127.0.0.1",
            port,
            ProbeConf::with_timeout(Duration::from_millis(150)),
        )
    }

    #[test]
    fn decodes_pairs() {
        let data = decode("\\HostName\\My Server\\numplayers\\4\\final\\\\queryid\\12.1");
        assert_eq!(data.get("hostname").map(String::as_str), Some("My Server"));
        assert_eq!(data.get("numplayers").map(String::as_str), Some("4"));
        assert!(!data.contains_key("final"));
        assert!(!data.contains_key("queryid"));
        assert!(decode("").is_empty());
    }

    #[test]
    fn groups_status_keys() {
        let status = split_status(decode(
            "\\mapname\\de_dust\\player_0\\A\\score_0\\10\\player_1\\B\\teamname_0\\Red\\teamscore_0\\5\\team_t\\x",
        ));

        assert_eq!(status.info.get("mapname").map(String::as_str), Some("de_dust"));
        assert_eq!(status.info.get("team_t").map(String::as_str), Some("x"));
        assert_eq!(status.players.len(), 2);
        assert_eq!(status.players[0].get("player").map(String::as_str), Some("A"));
        assert_eq!(status.players[0].get("score").map(String::as_str), Some("10"));
        assert_eq!(status.players[1].get("player").map(String::as_str), Some("B"));
        assert_eq!(status.teams.len(), 1);
        assert_eq!(status.teams[0].get("teamname").map(String::as_str), Some("Red"));
        assert_eq!(status.teams[0].get("teamscore").map(String::as_str), Some("5"));
    }

    #[test]
    fn indexed_keys_order_numerically() {
        let groups = group_indexed(decode("\\player_10\\late\\player_2\\early\\deaths_2\\0"));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].get("player").map(String::as_str), Some("early"));
        assert_eq!(groups[0].get("deaths").map(String::as_str), Some("0"));
        assert_eq!(groups[1].get("player").map(String::as_str), Some("late"));
    }

    #[tokio::test]
    async fn basic_and_info() {
        let mut client = client().await;

        let basic = client.get_basic().await.unwrap();
        assert_eq!(basic.get("gamename").map(String::as_str), Some("basetest"));

        let info = client.get_info(false).await.unwrap();
        assert_eq!(info.get("cmd").map(String::as_str), Some("info_default"));
        let info = client.get_info(true).await.unwrap();
        assert_eq!(info.get("cmd").map(String::as_str), Some("info_xsq"));
    }

    #[tokio::test]
    async fn status_across_datagrams() {
        let mut client = client().await;
        let status = client.get_status(false).await.unwrap();

        assert_eq!(status.info.get("mapname").map(String::as_str), Some("de_dust"));
        assert!(!status.info.contains_key("queryid"));
        assert_eq!(status.players.len(), 2);
        assert_eq!(status.players[1].get("player").map(String::as_str), Some("PlayerTwo"));
        assert_eq!(status.teams[0].get("teamname").map(String::as_str), Some("RedTeam"));
    }

    #[tokio::test]
    async fn falls_back_without_final() {
        let mut client = client().await;

        let teams = client.get_teams(false).await.unwrap();
        assert_eq!(teams[0].get("teamname").map(String::as_str), Some("TimeoutTeam"));
        let teams = client.get_teams(true).await.unwrap();
        assert_eq!(teams[0].get("teamname").map(String::as_str), Some("SuccessTeam"));

        let rules = client.get_rules(false).await.unwrap();
        assert_eq!(rules.get("gravity").map(String::as_str), Some("800"));
        let rules = client.get_rules(true).await.unwrap();
        assert_eq!(rules.get("gravity").map(String::as_str), Some("100"));

        let players = client.get_players(false).await.unwrap();
        assert_eq!(players[0].get("player").map(String::as_str), Some("TimeoutPlayer"));
        let players = client.get_players(true).await.unwrap();
        assert_eq!(players[0].get("player").map(String::as_str), Some("SuccessPlayer"));
    }

    #[tokio::test]
    async fn echo() {
        let mut client = client().await;
        assert!(client.get_echo("ping").await);
        assert!(client.send_command("\\unknown\\", false).await.unwrap().is_empty());
        client.close();
    }

    #[tokio::test]
    async fn echo_to_nobody_is_false() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let mut client = GameSpy1Client::with_conf(
            "127.0.0.1",
            port,
            ProbeConf::with_timeout(Duration::from_millis(50)),
        );
        assert!(!client.get_echo("ping").await);
    }
}
