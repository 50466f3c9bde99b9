//! Minimal consumer: attach a topic handle over the simulated server and
//! print what arrives.
//!
//! Run with: cargo run --example live_feed

use std::sync::Arc;
use std::time::Duration;

use voltstream_client::{HandleConfig, TopicHandle};
use voltstream_core::ConnectionManager;
use voltstream_sim::{SimConfig, SimulatedChannel};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let manager = Arc::new(
        ConnectionManager::builder()
            .with_channel(|timers| {
                Box::new(SimulatedChannel::new(SimConfig::default(), timers))
            })
            .build(),
    );

    let mut energy = TopicHandle::attach(
        Arc::clone(&manager),
        HandleConfig::new("energy_update"),
    )
    .await;

    let mut state_rx = energy.state_receiver();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let connected = *state_rx.borrow();
            println!("connection: {}", if connected { "up" } else { "down" });
        }
    });

    println!("waiting for energy updates (ctrl-c to quit)...");
    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            envelope = energy.recv() => match envelope {
                Some(envelope) => println!("{}: {}", envelope.message_type, envelope.payload),
                None => break,
            },
            _ = &mut deadline => break,
        }
    }

    energy.detach().await;
    manager.destroy().await;
    println!("done");
}
