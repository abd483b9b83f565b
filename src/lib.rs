//! Async status probes for game servers: Valve [A2S](https://developer.valvesoftware.com/wiki/Server_queries)
//! (Source and GoldSrc), Minecraft Java Server List Ping, Minecraft Bedrock over RakNet,
//! GameSpy 1 and GameSpy 2.
//!
//! Every protocol module has a client type for repeated queries and a free `query`
//! function for one-off lookups with default settings.
pub mod conf;
pub mod cursor;
pub mod error;
pub mod gamespy1;
pub mod gamespy2;
pub mod minecraft;
pub mod raknet;
pub mod source;
pub mod transport;

pub use conf::ProbeConf;
pub use error::{ProbeError, Result};
pub use gamespy1::GameSpy1Client;
pub use gamespy2::GameSpy2Client;
pub use minecraft::MinecraftJavaClient;
pub use raknet::RaknetClient;
pub use source::SourceQueryClient;

/// Free-form key/value record, as reported by the GameSpy protocols.
pub type Record = std::collections::BTreeMap<String, String>;
