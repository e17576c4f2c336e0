use std::time::Duration;

use anyhow::Context as _;
use log::{debug, warn};

use crate::messages::Notification;

pub const DEFAULT_MAP_URL: &str = "http://images.blitzortung.org/Images/image_b_eu.png";

const CAPTION: &str = "Uuhhhh, Let's hope, that all flashes hit other antennas. \
    Go check further details here: https://www.lightningmaps.org/blitzortung/europe/index.php?lang=en";

/// Current lightning activity map, fetched on demand for `/flashes`.
#[derive(Clone, Debug)]
pub struct LightningMap {
    client: reqwest::Client,
    url: String,
}

impl LightningMap {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(LightningMap {
            client,
            url: url.into(),
        })
    }

    async fn fetch(&self) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("fetching {}", self.url))?;
        let bytes = response.bytes().await?;
        debug!("Lightning map {} is {} bytes", self.url, bytes.len());
        Ok(bytes.to_vec())
    }

    /// The map as a picture, or an apology when it cannot be fetched.
    pub async fn notification(&self) -> Notification {
        match self.fetch().await {
            Ok(bytes) => Notification::image(bytes, CAPTION),
            Err(err) => {
                warn!("Lightning map unavailable: {:?}", err);
                Notification::text("Sorry, the lightning map is not available right now")
            }
        }
    }
}
