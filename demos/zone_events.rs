//! Example: Subscribe to zone and output updates and print changes.

use std::sync::Arc;

use satel_bridge::{
    Channel, ConnectionCoordinator, EventDispatcher, GatewayLink, Halt, InstallationConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = InstallationConfig::from_toml_str(
        r#"
        host = "192.168.0.100"
        port = 7094
        [zones.1]
        name = "Front door"
        [zones.2]
        name = "Hall"
        [outputs.5]
        name = "Siren"
        "#,
    )?;

    let dispatcher = Arc::new(EventDispatcher::new());
    dispatcher.subscribe(Channel::ZonesUpdated, |signal| {
        if let Some(zones) = signal.payload().and_then(|p| p.as_object()) {
            for (zone_id, state) in zones {
                println!("Zone {} -> {}", zone_id, state);
            }
        }
        Ok(())
    });
    dispatcher.subscribe(Channel::OutputsUpdated, |signal| {
        println!("Outputs changed: {:?}", signal.payload());
        Ok(())
    });

    let coordinator = ConnectionCoordinator::new(Arc::clone(&dispatcher));
    coordinator.start(&config, GatewayLink::new).await?;

    println!("Listening for zone events (Ctrl+C to stop)...\n");

    tokio::select! {
        reason = coordinator.wait_for_halt() => {
            if reason == Halt::LinkLost {
                println!("Panel disconnected!");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nDisconnecting...");
        }
    }

    coordinator.stop().await;
    dispatcher.shutdown().await;
    Ok(())
}
