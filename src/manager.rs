use std::{path::PathBuf, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::{
    commands::{self, Command, RotorId},
    config::AppConfig,
    flashes::LightningMap,
    messages::{BrokerAnnouncement, Notification},
    mqtt::{AntennaCommander, MqttClient},
    notify::{NotificationSink, deliver},
    presence::{LastDiscovery, PresenceWatcher},
    rotator::{Rotor, RotatorController},
    telegram::{Message, TelegramClient, next_offset},
};

const ANTENNA_HELP: &str =
    "\n\nA = Flex, B = KIWI & SDRs Splitter\n\ne.g. Flex to ant1 = '/setant 1A'";

/// Handles chat commands one at a time, in arrival order.
pub struct Dispatcher {
    controller: RotatorController,
    main_rotor: Rotor,
    loop_rotor: Rotor,
    antenna: Arc<dyn AntennaCommander>,
    sink: Arc<dyn NotificationSink>,
    last_discovery: LastDiscovery,
    lightning_map: LightningMap,
    antenna_list: String,
    chat_id: i64,
}

impl Dispatcher {
    pub fn new(
        controller: RotatorController,
        antenna: Arc<dyn AntennaCommander>,
        sink: Arc<dyn NotificationSink>,
        last_discovery: LastDiscovery,
        lightning_map: LightningMap,
        config: &AppConfig,
    ) -> Self {
        Dispatcher {
            controller,
            main_rotor: Rotor {
                address: config.devices.rotor.clone(),
                template: "locator_opti.png".to_string(),
            },
            loop_rotor: Rotor {
                address: config.devices.loop_rotor.clone(),
                template: "locator_loop.png".to_string(),
            },
            antenna,
            sink,
            last_discovery,
            lightning_map,
            antenna_list: config.antenna_list.clone().unwrap_or_default(),
            chat_id: config.telegram.chat_id,
        }
    }

    fn rotor(&self, id: RotorId) -> &Rotor {
        match id {
            RotorId::Main => &self.main_rotor,
            RotorId::Loop => &self.loop_rotor,
        }
    }

    async fn reply(&self, text: impl Into<String>, reply_to: Option<i64>) {
        deliver(
            self.sink.as_ref(),
            Notification::text(text).replying_to(reply_to),
        )
        .await;
    }

    async fn set_antenna(&self, code: &str) {
        if let Err(err) = self.antenna.set_antenna(code).await {
            error!("Error setting antenna {}: {:?}", code, err);
        }
    }

    pub async fn handle(&self, message: &Message) {
        if message.chat.id != self.chat_id {
            debug!("Ignoring message from chat {}", message.chat.id);
            return;
        }
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let reply_to = Some(message.message_id);

        let command = match commands::parse(text) {
            None => return,
            Some(Err(err)) => {
                self.reply(err.reply(), reply_to).await;
                return;
            }
            Some(Ok(command)) => command,
        };
        info!("Handling {:?}", command);

        match command {
            Command::SetRotor(id, degrees) => {
                // The rotation reports back on its own; its handle is not awaited.
                if let Err(err) = self.controller.rotate(self.rotor(id), degrees, reply_to) {
                    self.reply(err.to_string(), reply_to).await;
                }
            }
            Command::RotorStatus(id) => self.controller.status(self.rotor(id), reply_to).await,
            Command::SetAntenna(code) => self.set_antenna(&code).await,
            Command::AntennaList => {
                let list = format!("{}{}", self.antenna_list.replace(';', "\n"), ANTENNA_HELP);
                self.reply(list, reply_to).await;
                // asks the switch to publish its current path
                self.set_antenna("R").await;
            }
            Command::RadioStatus => self.reply(self.last_discovery.describe(), reply_to).await,
            Command::LightningMap => {
                let notification = self.lightning_map.notification().await;
                deliver(self.sink.as_ref(), notification.replying_to(reply_to)).await;
            }
        }
    }
}

/// Relays antenna switch feedback to the chat as a picture of the new path.
pub async fn relay_antenna_reports(
    mut rx: broadcast::Receiver<BrokerAnnouncement>,
    sink: Arc<dyn NotificationSink>,
    assets_dir: PathBuf,
) {
    loop {
        match rx.recv().await {
            Ok(BrokerAnnouncement::AntennaPatched(path)) => {
                let caption = format!("Antenna patched to path: {}", path);
                let first = path.split_whitespace().next().unwrap_or_default();
                let picture = assets_dir.join(format!("ANT{}.png", first));

                let notification = match tokio::fs::read(&picture).await {
                    Ok(bytes) => Notification::image(bytes, caption),
                    Err(err) => {
                        warn!("Could not read {}: {}", picture.display(), err);
                        Notification::text(caption)
                    }
                };
                deliver(sink.as_ref(), notification).await;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Antenna report receiver closed");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Antenna report receiver lagged, {} skipped", skipped);
            }
        }
    }
}

pub struct Manager {
    mqtt_client: MqttClient,
    mqtt_event_loop: rumqttc::EventLoop,
    telegram: TelegramClient,
    watcher: PresenceWatcher,
    dispatcher: Dispatcher,
    assets_dir: PathBuf,
}

impl Manager {
    pub fn new(
        mqtt_client: MqttClient,
        mqtt_event_loop: rumqttc::EventLoop,
        telegram: TelegramClient,
        watcher: PresenceWatcher,
        dispatcher: Dispatcher,
        assets_dir: PathBuf,
    ) -> Self {
        Manager {
            mqtt_client,
            mqtt_event_loop,
            telegram,
            watcher,
            dispatcher,
            assets_dir,
        }
    }

    pub async fn run_loop(self) -> anyhow::Result<()> {
        let Manager {
            mqtt_client,
            mut mqtt_event_loop,
            telegram,
            watcher,
            dispatcher,
            assets_dir,
        } = self;

        let (tx, rx) = broadcast::channel(32);
        let antenna_rx = tx.subscribe();

        let broker = mqtt_client.clone();
        tokio::spawn(async move {
            broker.event_loop(&mut mqtt_event_loop, tx).await;
        });
        tokio::spawn(watcher.run(rx));
        tokio::spawn(relay_antenna_reports(
            antenna_rx,
            Arc::new(telegram.clone()),
            assets_dir,
        ));

        let mut offset = telegram.skip_pending().await?;
        info!("Listening for commands in chat {}", telegram.chat_id());

        loop {
            tokio::select! {
                updates = telegram.get_updates(offset) => match updates {
                    Ok(updates) => {
                        offset = next_offset(offset, &updates);
                        for message in updates.iter().filter_map(|u| u.message.as_ref()) {
                            dispatcher.handle(message).await;
                        }
                    }
                    Err(err) => {
                        error!("Error fetching chat updates: {}", err);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        mqtt_client.disconnect().await?;

        Ok(())
    }
}
