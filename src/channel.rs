//! Persistent transport channel to the detector service.
//!
//! One connection per session: outbound frame payloads are published to a
//! frames topic, inbound detection results arrive on a detections topic and
//! are forwarded to the session's consumer. The channel owns the
//! connect/error/close lifecycle:
//!
//! - on open it logs readiness and flips the shared open flag;
//! - on error it applies a bounded exponential backoff with jitter, then
//!   leaves the connection closed for good once attempts are exhausted;
//! - on teardown [`DetectorChannel::disconnect`] closes deterministically.
//!
//! `send_frame` is a silent no-op while the channel is not open: a tick that
//! cannot send is dropped, never queued, so a slow network cannot build an
//! unbounded backlog.

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use rand::Rng;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::wire::{parse_detection_frame, DetectionFrame, FramePayload};

/// Seam between the sampler and the transport. Lets tests drive the sampler
/// with a recording sink and no broker.
pub trait FrameSink: Send + Sync {
    fn is_open(&self) -> bool;

    /// Hand one frame payload to the transport. No-op when not open; the
    /// caller tolerates the drop.
    fn send_frame(&self, payload: &FramePayload);
}

/// Bounded exponential backoff for reconnecting after a connection error.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): doubling from the
    /// base, capped, with up to 20% random jitter to avoid thundering herds.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped / 5);
        Duration::from_millis(capped + jitter)
    }
}

/// Channel endpoint configuration.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub frames_topic: String,
    pub detections_topic: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "vision-dash".to_string(),
            frames_topic: "vision/frames".to_string(),
            detections_topic: "vision/detections".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// The session's one shared connection to the detector.
pub struct DetectorChannel {
    client: Client,
    open: Arc<AtomicBool>,
    frames_topic: String,
    event_loop: Option<JoinHandle<()>>,
}

impl DetectorChannel {
    /// Establish the connection and spawn its event loop. Inbound
    /// `DetectionFrame`s are delivered on the returned receiver.
    pub fn connect(config: &ChannelConfig) -> Result<(Self, Receiver<DetectionFrame>)> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(5));

        let (client, connection) = Client::new(options, 10);
        client
            .subscribe(config.detections_topic.clone(), QoS::AtMostOnce)
            .map_err(|e| anyhow!("failed to subscribe to detections topic: {}", e))?;

        let open = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();
        let event_loop = Some(spawn_event_loop(
            connection,
            Arc::clone(&open),
            config.detections_topic.clone(),
            config.reconnect,
            tx,
        ));

        Ok((
            Self {
                client,
                open,
                frames_topic: config.frames_topic.clone(),
                event_loop,
            },
            rx,
        ))
    }

    /// Close the connection and join the event loop.
    pub fn disconnect(mut self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.client.disconnect()?;
        if let Some(handle) = self.event_loop.take() {
            handle
                .join()
                .map_err(|_| anyhow!("channel event loop panicked"))?;
        }
        info!("detector channel closed");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_closed_for_test(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

fn spawn_event_loop(
    mut connection: Connection,
    open: Arc<AtomicBool>,
    detections_topic: String,
    policy: ReconnectPolicy,
    tx: Sender<DetectionFrame>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut attempts = 0u32;
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    attempts = 0;
                    open.store(true, Ordering::SeqCst);
                    info!("detector channel open");
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let topic = match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => topic,
                        Err(e) => {
                            warn!("skipping publish with invalid topic: {}", e);
                            continue;
                        }
                    };
                    if topic != detections_topic {
                        continue;
                    }
                    match parse_detection_frame(&publish.payload) {
                        Ok(frame) => {
                            if tx.send(frame).is_err() {
                                // Consumer side torn down; nothing left to feed.
                                break;
                            }
                        }
                        Err(e) => warn!("dropping malformed detection message: {}", e),
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                    open.store(false, Ordering::SeqCst);
                    info!("detector channel disconnected by peer");
                }
                Ok(_) => {}
                Err(e) => {
                    open.store(false, Ordering::SeqCst);
                    attempts += 1;
                    if attempts > policy.max_attempts {
                        error!(
                            "detector channel error after {} reconnect attempts, giving up: {}",
                            policy.max_attempts, e
                        );
                        break;
                    }
                    let delay = policy.delay(attempts);
                    warn!(
                        "detector channel error: {} (reconnect {}/{} in {:?})",
                        e, attempts, policy.max_attempts, delay
                    );
                    std::thread::sleep(delay);
                }
            }
        }
        open.store(false, Ordering::SeqCst);
    })
}

impl FrameSink for DetectorChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_frame(&self, payload: &FramePayload) {
        if !self.is_open() {
            debug!("channel not open, dropping frame");
            return;
        }
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode frame payload: {}", e);
                return;
            }
        };
        // A failed publish drops the frame; liveness over any single tick.
        if let Err(e) = self
            .client
            .try_publish(self.frames_topic.clone(), QoS::AtMostOnce, false, bytes)
        {
            warn!("frame publish failed, dropping frame: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            base_delay_ms: 500,
            max_delay_ms: 4000,
            max_attempts: 8,
        };
        // Jitter adds at most 20%.
        for (attempt, expected) in [(1u32, 500u64), (2, 1000), (3, 2000), (4, 4000), (10, 4000)] {
            let delay = policy.delay(attempt).as_millis() as u64;
            assert!(delay >= expected, "attempt {}: {} < {}", attempt, delay, expected);
            assert!(
                delay <= expected + expected / 5,
                "attempt {}: {} above jitter bound",
                attempt,
                delay
            );
        }
    }

    #[test]
    fn send_while_closed_is_a_silent_no_op() {
        // Never connects; the open flag stays false. Zero reconnect attempts
        // so the event loop exits on the first connection error.
        let config = ChannelConfig {
            reconnect: ReconnectPolicy {
                base_delay_ms: 1,
                max_delay_ms: 1,
                max_attempts: 0,
            },
            ..ChannelConfig::default()
        };
        let (channel, _rx) = DetectorChannel::connect(&config).unwrap();
        channel.force_closed_for_test();

        assert!(!channel.is_open());
        channel.send_frame(&FramePayload {
            image: "data:image/jpeg;base64,AAAA".to_string(),
            target: "person".to_string(),
        });
    }
}
