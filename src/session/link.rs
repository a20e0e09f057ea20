//! Radio link supervision
//!
//! Polled from housekeeping. Reports up/down transitions once and asks
//! the link to reassociate every `reconnect_delay` while it is down.
//! Control state (PTT, call) is deliberately left alone on disconnect.

use std::sync::Arc;
use std::time::Duration;

use crate::hal::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// A reconnect attempt was just made
    Reconnecting { attempt: u32 },
}

pub struct LinkMonitor {
    link: Arc<dyn Link>,
    connected: Option<bool>,
    down_since: u64,
    last_attempt: Option<u64>,
    attempts: u32,
    reconnect_delay_ms: u64,
}

impl LinkMonitor {
    pub fn new(link: Arc<dyn Link>, reconnect_delay: Duration) -> Self {
        Self {
            link,
            connected: None,
            down_since: 0,
            last_attempt: None,
            attempts: 0,
            reconnect_delay_ms: reconnect_delay.as_millis() as u64,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected == Some(true)
    }

    pub fn rssi(&self) -> Option<i8> {
        self.link.rssi()
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    pub fn poll_at(&mut self, now_ms: u64) -> Option<LinkEvent> {
        let connected = self.link.is_connected();

        match (self.connected, connected) {
            (Some(true), true) => None,
            (_, true) => {
                self.connected = Some(true);
                self.attempts = 0;
                self.last_attempt = None;
                tracing::info!(rssi = ?self.link.rssi(), "Link connected");
                Some(LinkEvent::Connected)
            }
            (was, false) if was != Some(false) => {
                self.connected = Some(false);
                self.down_since = now_ms;
                self.last_attempt = None;
                if was == Some(true) {
                    tracing::warn!("Link disconnected");
                    Some(LinkEvent::Disconnected)
                } else {
                    tracing::info!("Link not associated yet");
                    None
                }
            }
            (_, false) => {
                let since = self.last_attempt.unwrap_or(self.down_since);
                if now_ms.saturating_sub(since) < self.reconnect_delay_ms {
                    return None;
                }

                self.attempts += 1;
                self.last_attempt = Some(now_ms);
                tracing::info!(attempt = self.attempts, "Reconnecting link");
                if let Err(e) = self.link.reconnect() {
                    tracing::warn!("Reconnect request failed: {}", e);
                }
                Some(LinkEvent::Reconnecting {
                    attempt: self.attempts,
                })
            }
        }
    }
}
