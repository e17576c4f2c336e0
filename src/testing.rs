//! In-memory stand-ins for the station hardware and chat.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use crate::{
    device::DeviceLink,
    messages::Notification,
    mqtt::AntennaCommander,
    notify::NotificationSink,
    render::{Marker, MarkerRenderer},
};

/// Answers `/rotatorcontrol/get` from a script, repeating the last entry.
/// URLs given a fixed reply get that reply; every other URL gets `OK`.
pub struct FakeLink {
    calls: Mutex<Vec<String>>,
    positions: Mutex<VecDeque<Option<String>>>,
    fixed: HashMap<String, Option<String>>,
    delay: Duration,
}

impl FakeLink {
    pub fn new(positions: &[Option<&str>]) -> Self {
        FakeLink {
            calls: Mutex::new(Vec::new()),
            positions: Mutex::new(positions.iter().map(|p| p.map(String::from)).collect()),
            fixed: HashMap::new(),
            delay: Duration::ZERO,
        }
    }

    /// Answers every URL ending in `suffix` with `reply`.
    pub fn replying(mut self, suffix: &str, reply: Option<&str>) -> Self {
        self.fixed.insert(suffix.to_string(), reply.map(String::from));
        self
    }

    /// Makes every exchange take `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceLink for FakeLink {
    async fn exchange(&self, url: &str) -> Option<String> {
        self.calls.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fixed = self
            .fixed
            .iter()
            .find(|(suffix, _)| url.ends_with(suffix.as_str()));
        if let Some((_, reply)) = fixed {
            return reply.clone();
        }
        if !url.ends_with("/rotatorcontrol/get") {
            return Some("OK".to_string());
        }
        let mut positions = self.positions.lock().unwrap();
        if positions.len() > 1 {
            positions.pop_front().flatten()
        } else {
            positions.front().cloned().flatten()
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAntenna {
    codes: Mutex<Vec<String>>,
}

impl RecordingAntenna {
    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AntennaCommander for RecordingAntenna {
    async fn set_antenna(&self, code: &str) -> anyhow::Result<()> {
        self.codes.lock().unwrap().push(code.to_string());
        Ok(())
    }
}

/// Encodes each marker as half its angle instead of drawing it.
pub struct FakeRenderer;

impl MarkerRenderer for FakeRenderer {
    fn render(&self, _template: &str, markers: &[Marker]) -> anyhow::Result<Vec<u8>> {
        Ok(markers.iter().map(|m| (m.degrees / 2) as u8).collect())
    }
}

/// Answers a single HTTP request on a local port with `status` and `body`,
/// returning the base URL to reach it.
pub async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 4096];
        let _ = stream.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            status,
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
        stream.shutdown().await.unwrap();
    });
    format!("http://{}", address)
}
