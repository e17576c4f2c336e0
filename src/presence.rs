use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use log::{debug, error, info};
use tokio::sync::broadcast;

use crate::{
    config::{DevicesConfig, PresenceConfig},
    device::{DeviceLink, relay_url},
    messages::{BrokerAnnouncement, DiscoveryPackage, Notification, PresenceReport},
    mqtt::AntennaCommander,
    notify::{NotificationSink, deliver},
    policy::{SwitchDecision, decide},
};

/// Most recent discovery document, kept for status queries.
#[derive(Clone, Default)]
pub struct LastDiscovery(Arc<Mutex<Option<(SystemTime, DiscoveryPackage)>>>);

impl LastDiscovery {
    pub fn record(&self, package: DiscoveryPackage) {
        if let Ok(mut last) = self.0.lock() {
            *last = Some((SystemTime::now(), package));
        }
    }

    pub fn describe(&self) -> String {
        let last = self.0.lock().ok().and_then(|last| last.clone());
        match last {
            Some((seen, package)) => {
                let age = seen.elapsed().unwrap_or_default().as_secs();
                format!(
                    "Last state: {}s ago\nRadio {} in state: '{}' {} {}",
                    age, package.serial, package.status, package.inuse_ip, package.inuse_host
                )
            }
            None => "Sorry, no idea...".to_string(),
        }
    }
}

pub struct PresenceWatcher {
    link: Arc<dyn DeviceLink>,
    antenna: Arc<dyn AntennaCommander>,
    sink: Arc<dyn NotificationSink>,
    switch_address: String,
    relay_channel: u8,
    settle_delay: Duration,
    announce_initial_state: bool,
    last_accepted: Option<String>,
    last_discovery: LastDiscovery,
}

impl PresenceWatcher {
    pub fn new(
        link: Arc<dyn DeviceLink>,
        antenna: Arc<dyn AntennaCommander>,
        sink: Arc<dyn NotificationSink>,
        devices: &DevicesConfig,
        presence: &PresenceConfig,
        last_discovery: LastDiscovery,
    ) -> Self {
        PresenceWatcher {
            link,
            antenna,
            sink,
            switch_address: devices.webswitch.clone(),
            relay_channel: devices.relay_channel(),
            settle_delay: presence.settle_delay(),
            announce_initial_state: presence.announce_initial_state(),
            last_accepted: None,
            last_discovery,
        }
    }

    /// Consumes broker announcements until the channel closes.
    pub async fn run(mut self, mut rx: broadcast::Receiver<BrokerAnnouncement>) {
        loop {
            match rx.recv().await {
                Ok(BrokerAnnouncement::Presence(package)) => {
                    let report = PresenceReport::from(&package);
                    self.last_discovery.record(package);
                    self.on_report(report).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Presence receiver closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Presence receiver lagged, {} reports skipped", skipped);
                }
            }
        }
    }

    /// Acts on a report if the occupant changed; returns the applied decision.
    pub async fn on_report(&mut self, report: PresenceReport) -> Option<SwitchDecision> {
        if self.last_accepted.as_deref() == Some(report.occupant.as_str()) {
            return None;
        }

        let first = self.last_accepted.is_none();
        self.last_accepted = Some(report.occupant.clone());
        if first && !self.announce_initial_state {
            debug!("Initial occupant {:?} recorded", report.occupant);
            return None;
        }

        info!("Occupant changed to {:?}", report.occupant);
        tokio::time::sleep(self.settle_delay).await;

        debug!(
            "Occupant {:?} settled, reported {:?} ago",
            report.occupant,
            report.observed_at.elapsed().unwrap_or_default()
        );
        let decision = decide(&report.occupant);
        self.apply(&decision).await;
        Some(decision)
    }

    async fn apply(&self, decision: &SwitchDecision) {
        // Detached: the relay reply is irrelevant and failures are logged by
        // the link itself.
        let link = Arc::clone(&self.link);
        let url = relay_url(&self.switch_address, decision.relay_on, self.relay_channel);
        tokio::spawn(async move {
            let _ = link.exchange(&url).await;
        });

        if let Err(err) = self.antenna.set_antenna(&decision.antenna).await {
            error!("Error setting antenna {}: {:?}", decision.antenna, err);
        }

        deliver(self.sink.as_ref(), Notification::text(decision.message.clone())).await;
        info!(
            "Switch: relay {}, antenna {}",
            if decision.relay_on { "on" } else { "off" },
            decision.antenna
        );
    }
}
