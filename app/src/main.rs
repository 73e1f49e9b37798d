use anyhow::Context as _;
use settings::Settings;

use crate::coordinator::ConsumptionCoordinator;

mod adapter;
mod consumption;
mod coordinator;
mod core;
mod sensor;
mod settings;
mod setup;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() -> anyhow::Result<()> {
    let settings = Settings::new().context("Error reading configuration")?;

    settings.monitoring.init().context("Error initializing monitoring")?;

    setup::validate_credentials(&settings.octopus.email, &settings.octopus.password)?;

    let mut client = settings.octopus.new_client()?;
    let device = setup::setup_account(&mut client).await.inspect_err(|e| {
        tracing::error!(error_key = e.error_key(), "Setup failed: {}", e);
    })?;

    let topics = settings.homeassistant.topics(&device);
    let mut mqtt = settings
        .mqtt
        .new_client_with_last_will(topics.availability(), "offline");

    let publisher = settings.homeassistant.new_publisher(mqtt.sender(), device);
    let mut coordinator = ConsumptionCoordinator::new(client, publisher.clone(), settings.octopus.scan_interval());

    let birth_listener = settings
        .homeassistant
        .new_birth_listener(&mut mqtt, publisher, coordinator.subscribe())
        .await
        .context("Error subscribing to Home Assistant status")?;

    tracing::info!("Starting MQTT processing");
    let mqtt_exec = tokio::spawn(mqtt.run());

    coordinator
        .first_refresh()
        .await
        .context("Initial refresh failed")?;

    let http_server_exec = {
        let snapshot_rx = coordinator.subscribe();
        let http_server = settings.http_server.clone();

        async move {
            match http_server {
                Some(http_server) => {
                    if let Err(e) = http_server
                        .run_server(move || vec![adapter::http_api::new_routes(snapshot_rx.clone())])
                        .await
                    {
                        tracing::error!("HTTP server execution failed: {:?}", e);
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    };

    tracing::info!(
        "Starting main loop, polling every {} minutes",
        settings.octopus.scan_interval().as_secs() / 60
    );

    tokio::select!(
        _ = mqtt_exec => {},
        _ = coordinator.run() => {},
        _ = birth_listener.run() => {},
        _ = http_server_exec => {},
        //the broker publishes the last will once the connection closes
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    );

    Ok(())
}
