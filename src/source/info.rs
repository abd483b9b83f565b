use serde::Serialize;

use super::packet::{RESP_INFO, RESP_INFO_GOLDSRC, RESP_PLAYER, RESP_RULES};
use crate::cursor::ByteCursor;
use crate::error::{ProbeError, Result};

/// App ID of The Ship, whose INFO reply carries an extra block.
const THE_SHIP_APP_ID: u16 = 2400;

/// Server information as obtained by [A2S_INFO](https://developer.valvesoftware.com/wiki/Server_queries#A2S_INFO).
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerInfo {
    /// A2S_INFO protocol version
    pub protocol: u8,
    /// Server hostname
    pub name: String,
    /// Current map
    pub map: String,
    /// Location of server files
    pub folder: String,
    /// Name of game
    pub game: String,
    /// Steam app ID of the game, 0 for GoldSrc replies.
    pub app_id: u16,
    /// Current players
    pub players: u8,
    /// Max players
    pub max_players: u8,
    /// Current bots
    pub bots: u8,
    pub server_type: ServerType,
    pub environment: Environment,
    pub visibility: Visibility,
    pub vac: Vac,
    /// Game version
    pub version: String,
    /// Game port, if the server advertises it.
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    /// Tags that describe the game.
    pub keywords: Option<String>,
    pub source_tv: Option<SourceTv>,
    pub the_ship: Option<TheShip>,
    pub gold_src: Option<GoldSrcInfo>,
}

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?
        )
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServerType {
    Dedicated,
    NonDedicated,
    /// SourceTV relay (proxy)
    SourceTv,
    Unknown,
}

impl ServerType {
    fn from_byte(b: u8) -> Self {
        match b.to_ascii_lowercase() {
            b'd' => ServerType::Dedicated,
            b'l' => ServerType::NonDedicated,
            b'p' => ServerType::SourceTv,
            _ => ServerType::Unknown,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Linux,
    Windows,
    Mac,
    Unknown,
}

impl Environment {
    fn from_byte(b: u8) -> Self {
        match b.to_ascii_lowercase() {
            b'l' => Environment::Linux,
            b'w' => Environment::Windows,
            b'm' | b'o' => Environment::Mac,
            _ => Environment::Unknown,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    /// Password protected
    Private,
}

impl Visibility {
    fn from_byte(b: u8) -> Self {
        if b == 0 {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Vac {
    Unsecured,
    Secured,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TheShip {
    pub mode: u8,
    pub witnesses: u8,
    /// Seconds before a player is arrested while being witnessed.
    pub duration: u8,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceTv {
    pub port: u16,
    pub name: String,
}

/// Fields only present in the GoldSrc INFO layout.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GoldSrcInfo {
    /// IP address and port of the server, as the server sees itself.
    pub address: String,
    pub is_mod: bool,
    #[serde(rename = "mod")]
    pub mod_info: Option<ModInfo>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ModInfo {
    pub link: String,
    pub download_link: String,
    pub version: i32,
    /// Size on disk in bytes.
    pub size: i32,
    pub multiplayer_only: bool,
    /// Whether the mod ships its own DLL.
    pub own_dll: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Seconds connected.
    pub duration: f32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    pub name: String,
    pub value: String,
}

/// Parse an A2S_INFO reply (envelope already removed).
pub fn parse_info(data: &[u8]) -> Result<ServerInfo> {
    let mut reader = ByteCursor::new(data);

    match reader.u8()? {
        RESP_INFO => parse_source_info(&mut reader),
        RESP_INFO_GOLDSRC => parse_gold_src_info(&mut reader),
        header => Err(ProbeError::ProtocolViolation(format!(
            "unknown A2S_INFO header: 0x{:02X}",
            header
        ))),
    }
}

fn parse_source_info(reader: &mut ByteCursor) -> Result<ServerInfo> {
    let protocol = reader.u8()?;
    let name = reader.c_string();
    let map = reader.c_string();
    let folder = reader.c_string();
    let game = reader.c_string();
    let app_id = reader.u16_le()?;
    let players = reader.u8()?;
    let max_players = reader.u8()?;
    let bots = reader.u8()?;
    let server_type = ServerType::from_byte(reader.u8()?);
    let environment = Environment::from_byte(reader.u8()?);
    let visibility = Visibility::from_byte(reader.u8()?);
    let vac = if reader.u8()? == 0 {
        Vac::Unsecured
    } else {
        Vac::Secured
    };

    let the_ship = if app_id == THE_SHIP_APP_ID {
        Some(TheShip {
            mode: reader.u8()?,
            witnesses: reader.u8()?,
            duration: reader.u8()?,
        })
    } else {
        None
    };

    let version = reader.c_string();

    let mut info = ServerInfo {
        protocol,
        name,
        map,
        folder,
        game,
        app_id,
        players,
        max_players,
        bots,
        server_type,
        environment,
        visibility,
        vac,
        version,
        port: None,
        steam_id: None,
        keywords: None,
        source_tv: None,
        the_ship,
        gold_src: None,
    };

    // Extra Data Flag: each bit announces one trailing field, in this order.
    if reader.remaining() {
        let edf = reader.u8()?;
        if edf & 0x80 != 0 {
            info.port = Some(reader.u16_le()?);
        }
        if edf & 0x10 != 0 {
            info.steam_id = Some(reader.u64_le()?);
        }
        if edf & 0x40 != 0 {
            info.source_tv = Some(SourceTv {
                port: reader.u16_le()?,
                name: reader.c_string(),
            });
        }
        if edf & 0x20 != 0 {
            info.keywords = Some(reader.c_string());
        }
        if edf & 0x01 != 0 {
            info.steam_id = Some(reader.u64_le()?);
        }
    }

    Ok(info)
}

fn parse_gold_src_info(reader: &mut ByteCursor) -> Result<ServerInfo> {
    let address = reader.c_string();
    let name = reader.c_string();
    let map = reader.c_string();
    let folder = reader.c_string();
    let game = reader.c_string();
    let players = reader.u8()?;
    let max_players = reader.u8()?;
    let protocol = reader.u8()?;
    let server_type = ServerType::from_byte(reader.u8()?);
    let environment = Environment::from_byte(reader.u8()?);
    let visibility = Visibility::from_byte(reader.u8()?);
    let is_mod = reader.u8()? == 1;

    let mod_info = if is_mod {
        let link = reader.c_string();
        let download_link = reader.c_string();
        reader.u8()?; // NULL
        Some(ModInfo {
            link,
            download_link,
            version: reader.i32_le()?,
            size: reader.i32_le()?,
            multiplayer_only: reader.u8()? == 1,
            own_dll: reader.u8()? == 1,
        })
    } else {
        None
    };

    let vac = if reader.remaining() && reader.u8()? == 1 {
        Vac::Secured
    } else {
        Vac::Unsecured
    };
    let bots = if reader.remaining() { reader.u8()? } else { 0 };

    Ok(ServerInfo {
        protocol,
        name,
        map,
        folder,
        game,
        app_id: 0,
        players,
        max_players,
        bots,
        server_type,
        environment,
        visibility,
        vac,
        version: "1.0".into(),
        port: None,
        steam_id: None,
        keywords: None,
        source_tv: None,
        the_ship: None,
        gold_src: Some(GoldSrcInfo {
            address,
            is_mod,
            mod_info,
        }),
    })
}

/// Parse an A2S_PLAYER reply (envelope already removed).
///
/// The player count is not trusted: the list ends early when the buffer does.
pub fn parse_players(data: &[u8]) -> Result<Vec<PlayerRecord>> {
    let mut reader = ByteCursor::new(data);
    expect_header(&mut reader, RESP_PLAYER, "A2S_PLAYER")?;

    let count = reader.u8()?;
    let mut players = Vec::with_capacity(count as usize);

    for _ in 0..count {
        if !reader.remaining() {
            break;
        }
        match read_player(&mut reader) {
            Ok(Some(player)) => players.push(player),
            Ok(None) | Err(ProbeError::OutOfBounds { .. }) => break,
            Err(err) => return Err(err),
        }
    }

    Ok(players)
}

/// `None` when the name has no terminator left in the buffer.
fn read_player(reader: &mut ByteCursor) -> Result<Option<PlayerRecord>> {
    let index = reader.u8()?;
    let name = match terminated_string(reader) {
        Some(name) => name,
        None => return Ok(None),
    };

    Ok(Some(PlayerRecord {
        index,
        name,
        score: reader.i32_le()?,
        duration: reader.f32_le()?,
    }))
}

/// Parse an A2S_RULES reply (envelope already removed).
pub fn parse_rules(data: &[u8]) -> Result<Vec<RuleRecord>> {
    let mut reader = ByteCursor::new(data);
    expect_header(&mut reader, RESP_RULES, "A2S_RULES")?;

    let count = reader.u16_le()?;
    let mut rules = Vec::new();

    for _ in 0..count {
        if !reader.remaining() {
            break;
        }
        let name = terminated_string(&mut reader);
        let value = terminated_string(&mut reader);
        match (name, value) {
            (Some(name), Some(value)) => rules.push(RuleRecord { name, value }),
            _ => break,
        }
    }

    Ok(rules)
}

/// A C string, or `None` if the buffer ends before its terminator.
fn terminated_string(reader: &mut ByteCursor) -> Option<String> {
    let start = reader.position();
    let s = reader.c_string();
    (reader.position() != start).then_some(s)
}

fn expect_header(reader: &mut ByteCursor, expected: u8, what: &str) -> Result<()> {
    match reader.u8()? {
        header if header == expected => Ok(()),
        header => Err(ProbeError::ProtocolViolation(format!(
            "invalid {} header: 0x{:02X}",
            what, header
        ))),
    }
}
