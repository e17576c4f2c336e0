use async_trait::async_trait;
use log::error;

use crate::messages::Notification;

/// Outbound channel to the single configured chat.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Sends a notification, logging instead of propagating delivery failures.
pub async fn deliver(sink: &dyn NotificationSink, notification: Notification) {
    let caption = notification.caption().to_string();
    if let Err(err) = sink.send(notification).await {
        error!("Error delivering notification {:?}: {:?}", caption, err);
    }
}
