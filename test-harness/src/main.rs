//! backchannel exercise client
//!
//! Drives a live server through the register/authenticate/retrieve-state
//! flow the way a real client would. Key material is random filler in the
//! right shape; the actual key exchange protocol is not this tool's problem.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info};

use backchannel_core::core_session::protocol::Frame;
use backchannel_core::logging::{init_logging_with_config, LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "test-harness")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(long, default_value = "ws://127.0.0.1:8999")]
    url: String,

    /// Where to keep credentials between runs
    #[arg(long, default_value = "localstorage.json")]
    state_file: PathBuf,

    /// Size of the generated pre-key bundle
    #[arg(long, default_value_t = 500)]
    handshake_keys: usize,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Credentials and registration status persisted between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalStorage {
    user: Option<String>,
    password: Option<String>,
    registered: bool,
}

impl LocalStorage {
    fn load(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("reading state file")?;
            Ok(serde_json::from_str(&contents).context("parsing state file")?)
        } else {
            Ok(Self::default())
        }
    }

    fn save(&self, path: &PathBuf) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("serializing state")?;
        std::fs::write(path, contents).context("writing state file")?;
        Ok(())
    }
}

fn random_blob(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// An opaque key blob in the shape real clients upload: a public key plus
/// an encrypted secret key and its nonce.
fn key_blob() -> Value {
    json!({
        "publicKey": random_blob(32),
        "secretKey": {
            "encrypted": random_blob(64),
            "nonce": random_blob(24),
        }
    })
}

fn frame(kind: &str, contents: Value) -> Message {
    Message::Text(json!({"message": {"type": kind, "contents": contents}}).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<LogLevel>()
        .unwrap_or(LogLevel::Info);
    init_logging_with_config(LogConfig::new(level).with_target(false))
        .context("failed to initialize logging")?;

    let mut storage = LocalStorage::load(&args.state_file)?;
    if storage.user.is_none() {
        let user: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        info!("Generated fresh username {}", user);
        storage.user = Some(format!("tester-{user}"));
        storage.password = Some(random_blob(24));
        storage.save(&args.state_file)?;
    }
    let user = storage.user.clone().context("state file has no user")?;
    let password = storage.password.clone().context("state file has no password")?;

    info!("Connecting to {}...", args.url);
    let (mut ws, _) = connect_async(args.url.as_str()).await.context("connecting")?;
    info!("Socket has opened");

    while let Some(message) = ws.next().await {
        let message = message.context("reading frame")?;
        let text = match message {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload)).await.context("pong")?;
                continue;
            }
            Message::Close(_) => bail!("server closed the connection"),
            _ => continue,
        };

        let frame_in: Frame = serde_json::from_str(&text).context("parsing server frame")?;
        info!("Server says: {}", frame_in.message.kind);

        match frame_in.message.kind.as_str() {
            "connected" => {
                if storage.registered {
                    info!("Authenticating as {}", user);
                    ws.send(frame(
                        "authenticate",
                        json!({"name": user, "password": password}),
                    ))
                    .await
                    .context("sending authenticate")?;
                } else {
                    info!(
                        "Registering {} with {} handshake keys",
                        user, args.handshake_keys
                    );
                    let handshake_keys: Vec<Value> =
                        (0..args.handshake_keys).map(|_| key_blob()).collect();
                    ws.send(frame(
                        "register",
                        json!({
                            "name": user,
                            "password": password,
                            "identityKey": key_blob(),
                            "handshakeKeys": handshake_keys,
                        }),
                    ))
                    .await
                    .context("sending register")?;
                }
            }
            "authenticated" => {
                info!("Client has been authenticated");
                if !storage.registered {
                    storage.registered = true;
                    storage.save(&args.state_file)?;
                }
                ws.send(frame("retrieve-state", Value::Null))
                    .await
                    .context("sending retrieve-state")?;
            }
            "state" => {
                let state = frame_in.message.contents;
                info!(
                    "Account state for {}: {} handshake keys on file, {} friends",
                    state["name"].as_str().unwrap_or("?"),
                    state["handshakeKeys"].as_array().map_or(0, Vec::len),
                    state["friends"].as_array().map_or(0, Vec::len),
                );
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(());
            }
            "error" => {
                error!(
                    "Server error: {}",
                    frame_in.message.contents.as_str().unwrap_or("unknown")
                );
                bail!("protocol error");
            }
            other => info!("Ignoring unexpected message type {}", other),
        }
    }

    bail!("connection ended before state was retrieved")
}
