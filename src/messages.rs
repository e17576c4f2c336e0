use std::time::SystemTime;

use serde_derive::Deserialize;

/// Messages relayed from the broker event loop to the rest of the service.
#[derive(Clone, Debug)]
pub enum BrokerAnnouncement {
    Presence(DiscoveryPackage),
    /// Raw path description published by the antenna switch.
    AntennaPatched(String),
}

/// Discovery document published by the radio's network bridge.
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryPackage {
    pub serial: String,
    pub status: String,
    pub inuse_ip: String,
    pub inuse_host: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceReport {
    /// Upper-cased so that debounce comparisons ignore case.
    pub occupant: String,
    pub observed_at: SystemTime,
}

impl PresenceReport {
    pub fn new(occupant: &str) -> Self {
        PresenceReport {
            occupant: occupant.to_uppercase(),
            observed_at: SystemTime::now(),
        }
    }
}

impl From<&DiscoveryPackage> for PresenceReport {
    fn from(package: &DiscoveryPackage) -> Self {
        PresenceReport::new(&package.inuse_ip)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationBody {
    Text(String),
    Image { bytes: Vec<u8>, caption: String },
}

/// Outbound chat message, optionally threaded under an inbound command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub body: NotificationBody,
    pub reply_to: Option<i64>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Notification {
            body: NotificationBody::Text(text.into()),
            reply_to: None,
        }
    }

    pub fn image(bytes: Vec<u8>, caption: impl Into<String>) -> Self {
        Notification {
            body: NotificationBody::Image {
                bytes,
                caption: caption.into(),
            },
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: Option<i64>) -> Self {
        self.reply_to = message_id;
        self
    }

    pub fn caption(&self) -> &str {
        match &self.body {
            NotificationBody::Text(text) => text,
            NotificationBody::Image { caption, .. } => caption,
        }
    }
}
