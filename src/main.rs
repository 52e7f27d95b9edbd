//! Chatango Room Watcher - Entry Point
//!
//! Joins one room and prints every event as a JSON line on stdout.
//!
//! ```text
//! chatango_client <room> [name] [password]
//! ```
//!
//! Arguments fall back to `CHATANGO_ROOM`, `CHATANGO_NAME` and
//! `CHATANGO_PASSWORD`. No name joins anonymously, a name alone joins with
//! a temporary name, name and password log in.

use std::env;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatango_client::{Identity, Room, RoomConfig};

fn arg_or_env(index: usize, var: &str) -> Option<String> {
    env::args()
        .nth(index)
        .or_else(|| env::var(var).ok())
        .filter(|value| !value.is_empty())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays JSON
    // e.g., RUST_LOG=debug or RUST_LOG=chatango_client=trace
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatango_client=info")),
        )
        .init();

    let room_name = arg_or_env(1, "CHATANGO_ROOM")
        .ok_or("usage: chatango_client <room> [name] [password]")?;
    let identity = match (arg_or_env(2, "CHATANGO_NAME"), arg_or_env(3, "CHATANGO_PASSWORD")) {
        (Some(name), Some(password)) => Identity::registered(&name, password),
        (Some(name), None) => Identity::temporary(&name),
        (None, _) => Identity::anonymous(),
    };

    let (room, mut events) = Room::new(&room_name, identity, RoomConfig::default())?;
    info!("joining {} via {}", room.name(), room.hostname());

    let connect = room.connect();
    tokio::pin!(connect);
    let mut connected = false;

    loop {
        tokio::select! {
            result = &mut connect, if !connected => {
                connected = true;
                if let Err(e) = result {
                    error!("join failed: {}", e);
                    return Err(e.into());
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving room");
                let leave = room.disconnect();
                tokio::pin!(leave);
                // The event channel is bounded, keep printing until the leave finishes
                loop {
                    tokio::select! {
                        _ = &mut leave => break,
                        Some(event) = events.recv() => {
                            println!("{}", serde_json::to_string(&event)?);
                        }
                    }
                }
                break;
            }
        }
    }

    Ok(())
}
