use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use log::info;

mod commands;
mod config;
mod device;
mod flashes;
mod manager;
mod messages;
mod mqtt;
mod notify;
mod policy;
mod presence;
mod render;
mod rotator;
mod telegram;
#[cfg(test)]
mod testing;

/// Relays radio presence to the antenna switch and drives the rotators from chat.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_module("shack_relay", log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let args = Args::parse();
    let config = config::AppConfig::load(&args.config)?;
    info!("Rotors: {} / {}", config.devices.rotor, config.devices.loop_rotor);

    let link: Arc<dyn device::DeviceLink> = Arc::new(
        device::HttpDeviceLink::new(config.devices.request_timeout())
            .context("building device HTTP client")?,
    );

    let telegram = telegram::TelegramClient::new(&config.telegram)?;
    let bot_name = telegram
        .get_me()
        .await
        .context("authorizing chat bot")?;
    info!("Authorized on account {}", bot_name);
    let sink: Arc<dyn notify::NotificationSink> = Arc::new(telegram.clone());

    let (mqtt_client, eventloop) = mqtt::MqttClient::new(&config.mqtt);
    let antenna: Arc<dyn mqtt::AntennaCommander> = Arc::new(mqtt_client.clone());

    let assets_dir = PathBuf::from(config.assets_dir());
    let renderer = Arc::new(render::ImageMarkerRenderer::new(assets_dir.clone()));

    let rotation = config.rotation.clone().unwrap_or_default();
    let controller = rotator::RotatorController::new(
        link.clone(),
        sink.clone(),
        renderer,
        rotation.poll_interval(),
        rotation.max_attempts(),
    );

    let presence = config.presence.clone().unwrap_or_default();
    let last_discovery = presence::LastDiscovery::default();
    let watcher = presence::PresenceWatcher::new(
        link,
        antenna.clone(),
        sink.clone(),
        &config.devices,
        &presence,
        last_discovery.clone(),
    );

    let lightning_map =
        flashes::LightningMap::new(config.lightning_map_url(), config.devices.request_timeout())
            .context("building lightning map HTTP client")?;
    let dispatcher = manager::Dispatcher::new(
        controller,
        antenna,
        sink,
        last_discovery,
        lightning_map,
        &config,
    );

    let core = manager::Manager::new(
        mqtt_client,
        eventloop,
        telegram,
        watcher,
        dispatcher,
        assets_dir,
    );
    core.run_loop().await?;

    Ok(())
}
