//! Bot client for poking at a running server by hand.
//!
//! Joins a room, holds the throttle with a wandering steering input for a while,
//! prints what the server reports, then leaves.

use clap::Parser;
use log::{info, warn};
use rand::Rng;
use shared::protocol::{ClientMessage, InputMessage, JoinRoom, ServerMessage};
use shared::KEY_UP;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Car color index
    #[arg(short = 'c', long, default_value = "0")]
    color: u8,

    /// Seconds to drive before leaving
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,
}

fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

async fn send(socket: &UdpSocket, message: &ClientMessage) -> Result<(), Box<dyn std::error::Error>> {
    socket.send(&message.encode()?).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&args.server).await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        &ClientMessage::JoinRoom(JoinRoom {
            name: args.name.clone(),
            color: args.color,
        }),
    )
    .await?;
    send(&socket, &ClientMessage::Ping { timestamp: get_timestamp() }).await?;

    let mut buffer = [0u8; 2048];
    let mut input_timer = interval(Duration::from_secs_f64(1.0 / 60.0));
    input_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut my_id = None;
    let mut sequence: u8 = 0;
    let mut steering: f64 = 0.0;
    let mut updates = 0u64;

    while Instant::now() < deadline {
        tokio::select! {
            _ = input_timer.tick() => {
                steering = (steering + rand::thread_rng().gen_range(-0.1..0.1)).clamp(-1.0, 1.0);
                sequence = sequence.wrapping_add(1);
                let input = InputMessage {
                    sequence,
                    keys: KEY_UP,
                    steering: (steering * 127.0) as i8,
                    throttle: 127,
                    flags: 0,
                };
                send(&socket, &ClientMessage::Input(input)).await?;
            }
            received = socket.recv(&mut buffer) => {
                let len = received?;
                match ServerMessage::decode(&buffer[..len]) {
                    Ok(ServerMessage::RoomInfo { room_id, player_count, your_id, .. }) => {
                        info!("Joined room {} as player {} ({} players)", room_id, your_id, player_count);
                        my_id = Some(your_id);
                    }
                    Ok(ServerMessage::StateUpdate { tick, players }) => {
                        updates += 1;
                        if updates % 20 == 0 {
                            if let Some(me) = players.iter().find(|p| Some(p.id) == my_id) {
                                info!(
                                    "tick {}: y={} x={:.1} speed={:.1} rating={}{}",
                                    tick,
                                    me.y,
                                    me.x(),
                                    me.speed(),
                                    me.rating(),
                                    if me.exploded() { " (exploded)" } else { "" }
                                );
                            }
                        }
                    }
                    Ok(ServerMessage::Pong { timestamp }) => {
                        info!("Round trip {} ms", get_timestamp().saturating_sub(timestamp));
                    }
                    Ok(ServerMessage::PlayerDeath { id }) if Some(id) == my_id => {
                        info!("Boom");
                    }
                    Ok(ServerMessage::Error { code, message }) => {
                        warn!("Server error {:?}: {}", code, message);
                        return Ok(());
                    }
                    Ok(other) => info!("{:?}", other),
                    Err(e) => warn!("Failed to decode server message: {}", e),
                }
            }
        }
    }

    send(&socket, &ClientMessage::LeaveRoom).await?;
    info!("Test client finished after {} state updates", updates);
    Ok(())
}
