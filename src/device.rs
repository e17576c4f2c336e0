use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};

/// Request/response exchange with a device's HTTP control surface.
///
/// Best effort: any failure is logged and reported as `None`, callers decide
/// whether that matters.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    async fn exchange(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct HttpDeviceLink {
    client: reqwest::Client,
}

impl HttpDeviceLink {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpDeviceLink { client })
    }
}

#[async_trait]
impl DeviceLink for HttpDeviceLink {
    async fn exchange(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("HTTP GET {} failed: {}", url, err);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            warn!("HTTP GET {} returned {}", url, response.status());
            return None;
        }

        match response.text().await {
            Ok(body) => {
                debug!("HTTP GET {} -> {:?}", url, body);
                Some(body)
            }
            Err(err) => {
                warn!("HTTP GET {} body could not be read: {}", url, err);
                None
            }
        }
    }
}

/// Builds a control URL for a device configured by host name or address.
pub fn device_url(address: &str, path: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{}{}", address, path)
    } else {
        format!("http://{}{}", address, path)
    }
}

pub fn relay_url(switch_address: &str, on: bool, channel: u8) -> String {
    let state = if on { "on" } else { "off" };
    device_url(switch_address, &format!("/relaycontrol/{}/{}", state, channel))
}
