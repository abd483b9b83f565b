use clap::{Parser, ValueEnum};

use uppsync_probes::{gamespy1, gamespy2, minecraft, raknet, source, ProbeError};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Protocol {
    /// Valve A2S_INFO (Source and GoldSrc)
    Source,
    /// Minecraft Java Server List Ping
    Minecraft,
    /// Minecraft Bedrock over RakNet
    Bedrock,
    Gamespy1,
    Gamespy2,
}

/// Query a game server once and print its status as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(value_enum)]
    protocol: Protocol,

    host: String,

    port: u16,
}

async fn probe(args: &Args) -> Result<String, ProbeError> {
    let (host, port) = (args.host.as_str(), args.port);
    let out = match args.protocol {
        Protocol::Source => source::query(host, port).await?.to_string(),
        Protocol::Minecraft => minecraft::query(host, port).await?.to_string(),
        Protocol::Bedrock => raknet::query(host, port).await?.to_string(),
        Protocol::Gamespy1 => gamespy1::query(host, port).await?.to_string(),
        Protocol::Gamespy2 => gamespy2::query(host, port).await?.to_string(),
    };
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<(), ProbeError> {
    let args = Args::parse();

    println!("{}", probe(&args).await?);
    Ok(())
}
