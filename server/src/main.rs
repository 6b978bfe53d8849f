use clap::Parser;
use log::{debug, error, info, warn};
use server::allocator::Allocator;
use server::config::Config;
use server::network::Server;
use server::room::RoomEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Parses the configuration, binds the transport and runs until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    info!("Vector racer game server");
    info!("  Bind address:     {}", config.bind_address());
    info!("  Physics rate:     {} Hz", shared::PHYSICS_TICK_RATE);
    info!("  Broadcast rate:   {} Hz", shared::BROADCAST_RATE);
    info!("  Max players/room: {}", config.max_players_per_room);
    info!("  Max rooms:        {}", config.max_rooms);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let allocator = Arc::new(Allocator::new(config.allocator_config()).with_events(event_tx));

    let server = Server::bind(
        &config.bind_address(),
        Arc::clone(&allocator),
        config.max_clients,
        config.client_timeout(),
    )
    .await?;

    tokio::spawn(log_room_events(event_rx));
    tokio::spawn(cleanup_rooms(Arc::clone(&allocator), config.cleanup_interval()));
    tokio::spawn(log_stats(Arc::clone(&allocator), config.stats_interval()));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Network task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    allocator.shutdown();
    Ok(())
}

/// Periodically evicts rooms nobody is playing in.
async fn cleanup_rooms(allocator: Arc<Allocator>, period: Duration) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately
    timer.tick().await;

    loop {
        timer.tick().await;
        let removed = allocator.cleanup_empty_rooms();
        if removed > 0 {
            info!("Cleaned up {} empty rooms", removed);
        }
    }
}

async fn log_stats(allocator: Arc<Allocator>, period: Duration) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer.tick().await;

    loop {
        timer.tick().await;
        let stats = allocator.stats();
        if stats.total_rooms > 0 || stats.total_players > 0 {
            info!(
                "Stats: {} rooms, {} total players",
                stats.total_rooms, stats.total_players
            );
        }
    }
}

async fn log_room_events(mut events: mpsc::UnboundedReceiver<RoomEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RoomEvent::Kicked {
                room_id,
                id,
                reason,
            } => warn!("Player {} kicked from room {}: {}", id, room_id, reason),
            RoomEvent::Exploded { room_id, id } => {
                debug!("Player {} exploded in room {}", id, room_id)
            }
            RoomEvent::Joined { .. } | RoomEvent::Left { .. } => {}
        }
    }
}
