//! gjall — diagnostic subscriber and admin CLI for a gjalld manager.
//!
//! Subscribes over the fan-out channel for the read commands and drives
//! the manager's HTTP surface for the admin commands.

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing_subscriber::EnvFilter;

use gjallarhorn::config::Config;
use gjallarhorn::{GjallarhornError, WirePush, WireRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Gjallarhorn subscriber CLI.
#[derive(Parser)]
#[command(name = "gjall")]
#[command(version)]
#[command(about = "Gjallarhorn datafile subscriber CLI")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override the manager WebSocket URL.
    #[arg(long)]
    ws_url: Option<String>,

    /// Override the manager HTTP base URL.
    #[arg(long)]
    http_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the manager's active SDK keys.
    Keys,
    /// Print every active datafile the manager holds.
    Datafiles,
    /// Follow push notifications until interrupted.
    Watch,
    /// Fetch one datafile over HTTP.
    Get { key: String },
    /// Force-refresh the listed keys on the manager.
    Update { keys: Vec<String> },
    /// Evict everything, then refresh the listed keys.
    FullRefresh { keys: Vec<String> },
    /// Replace the manager's active key set without fetching.
    SetKeys { keys: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let ws_url = args.ws_url.unwrap_or(config.subscriber.manager_ws_url);
    let http_url = args
        .http_url
        .unwrap_or(config.subscriber.manager_http_url);

    match args.command {
        Command::Keys => {
            let mut stream = connect(&ws_url).await?;
            send(&mut stream, WireRequest::GetSdkKeys).await?;
            while let Some(push) = next_push(&mut stream).await? {
                if let WirePush::ActiveSdkKeys { data } = push {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                    break;
                }
            }
        }
        Command::Datafiles => {
            let mut stream = connect(&ws_url).await?;
            send(&mut stream, WireRequest::GetSdkKeys).await?;
            let mut expected = None;
            send(&mut stream, WireRequest::GetDatafiles).await?;
            let mut received = 0usize;
            while let Some(push) = next_push(&mut stream).await? {
                match push {
                    WirePush::ActiveSdkKeys { data } => expected = Some(data.len()),
                    WirePush::ActiveDatafile { data, id } => {
                        println!("--- {id}");
                        println!("{}", serde_json::to_string_pretty(&data)?);
                        received += 1;
                    }
                    WirePush::ServerMessage { data } => eprintln!("{data}"),
                }
                if let Some(expected) = expected {
                    if expected == 0 || received >= expected {
                        break;
                    }
                }
            }
        }
        Command::Watch => {
            let mut stream = connect(&ws_url).await?;
            send(&mut stream, WireRequest::GetDatafiles).await?;
            while let Some(push) = next_push(&mut stream).await? {
                println!("{}", serde_json::to_string_pretty(&push)?);
            }
        }
        Command::Get { key } => {
            let url = format!("{}/datafile/json/{key}", http_url.trim_end_matches('/'));
            let document: serde_json::Value = reqwest::get(&url).await?.json().await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Command::Update { keys } => post(&http_url, "datafile_update", keys).await?,
        Command::FullRefresh { keys } => post(&http_url, "datafile_full_refresh", keys).await?,
        Command::SetKeys { keys } => post(&http_url, "update_sdk_keys", keys).await?,
    }

    Ok(())
}

/// Open the fan-out channel.
async fn connect(url: &str) -> Result<WsStream, GjallarhornError> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| GjallarhornError::Transport(format!("connect {url}: {e}")))?;
    Ok(stream)
}

async fn send(stream: &mut WsStream, request: WireRequest) -> Result<(), GjallarhornError> {
    let json = serde_json::to_string(&request)?;
    stream
        .send(Message::Text(json))
        .await
        .map_err(|e| GjallarhornError::Transport(e.to_string()))
}

/// Next parseable push from the stream; `None` when the server closes.
async fn next_push(stream: &mut WsStream) -> Result<Option<WirePush>, GjallarhornError> {
    while let Some(frame) = stream.next().await {
        match frame.map_err(|e| GjallarhornError::Transport(e.to_string()))? {
            Message::Text(text) => {
                if let Ok(push) = serde_json::from_str::<WirePush>(&text) {
                    return Ok(Some(push));
                }
            }
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

async fn post(
    http_url: &str,
    endpoint: &str,
    keys: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/{endpoint}", http_url.trim_end_matches('/'));
    let response: serde_json::Value = reqwest::Client::new()
        .post(&url)
        .json(&json!({"sdk_keys": keys}))
        .send()
        .await?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
