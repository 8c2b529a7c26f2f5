//! visiond configuration: JSON file selected by `VISION_CONFIG`, with
//! per-field environment overrides applied on top.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use url::Url;

use crate::channel::{ChannelConfig, ReconnectPolicy};
use crate::{Mode, ViewConfig};

const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_CLIENT_ID: &str = "visiond";
const DEFAULT_FRAMES_TOPIC: &str = "vision/frames";
const DEFAULT_DETECTIONS_TOPIC: &str = "vision/detections";
const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/";
const DEFAULT_SOURCE: &str = "stub://640x480";
const DEFAULT_DISPLAY_WIDTH: u32 = 960;
const DEFAULT_DISPLAY_HEIGHT: u32 = 540;

#[derive(Debug, Deserialize, Default)]
struct VisiondConfigFile {
    broker: Option<BrokerConfigFile>,
    api_base: Option<String>,
    source: Option<String>,
    view: Option<ViewConfigFile>,
    display: Option<DisplayConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BrokerConfigFile {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    frames_topic: Option<String>,
    detections_topic: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewConfigFile {
    mode: Option<String>,
    target: Option<String>,
    sample_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VisiondConfig {
    pub channel: ChannelConfig,
    pub api_base: String,
    pub source: String,
    pub view: ViewConfig,
    pub display: (u32, u32),
}

impl VisiondConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VisiondConfigFile) -> Result<Self> {
        let broker = file.broker.unwrap_or_default();
        let reconnect = file.reconnect.unwrap_or_default();
        let channel = ChannelConfig {
            broker_host: broker
                .host
                .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string()),
            broker_port: broker.port.unwrap_or(DEFAULT_BROKER_PORT),
            client_id: broker
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            frames_topic: broker
                .frames_topic
                .unwrap_or_else(|| DEFAULT_FRAMES_TOPIC.to_string()),
            detections_topic: broker
                .detections_topic
                .unwrap_or_else(|| DEFAULT_DETECTIONS_TOPIC.to_string()),
            reconnect: {
                let defaults = ReconnectPolicy::default();
                ReconnectPolicy {
                    base_delay_ms: reconnect.base_delay_ms.unwrap_or(defaults.base_delay_ms),
                    max_delay_ms: reconnect.max_delay_ms.unwrap_or(defaults.max_delay_ms),
                    max_attempts: reconnect.max_attempts.unwrap_or(defaults.max_attempts),
                }
            },
        };

        let view_file = file.view.unwrap_or_default();
        let view_defaults = ViewConfig::default();
        let view = ViewConfig {
            mode: match view_file.mode {
                Some(raw) => raw.parse::<Mode>()?,
                None => view_defaults.mode,
            },
            target: view_file.target.unwrap_or(view_defaults.target),
            sample_interval_ms: view_file
                .sample_interval_ms
                .unwrap_or(view_defaults.sample_interval_ms),
        };

        let display = file.display.unwrap_or_default();

        Ok(Self {
            channel,
            api_base: file
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            view,
            display: (
                display.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
                display.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("VISION_BROKER_HOST") {
            if !host.trim().is_empty() {
                self.channel.broker_host = host;
            }
        }
        if let Ok(port) = std::env::var("VISION_BROKER_PORT") {
            self.channel.broker_port = port
                .parse()
                .map_err(|_| anyhow!("VISION_BROKER_PORT must be a port number"))?;
        }
        if let Ok(base) = std::env::var("VISION_API_BASE") {
            if !base.trim().is_empty() {
                self.api_base = base;
            }
        }
        if let Ok(source) = std::env::var("VISION_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(target) = std::env::var("VISION_TARGET") {
            if !target.trim().is_empty() {
                self.view.target = target;
            }
        }
        if let Ok(mode) = std::env::var("VISION_MODE") {
            if !mode.trim().is_empty() {
                self.view.mode = mode.parse()?;
            }
        }
        if let Ok(interval) = std::env::var("VISION_SAMPLE_INTERVAL_MS") {
            self.view.sample_interval_ms = interval
                .parse()
                .map_err(|_| anyhow!("VISION_SAMPLE_INTERVAL_MS must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.view.validate()?;
        Url::parse(&self.api_base)
            .map_err(|e| anyhow!("api_base is not a valid URL: {}", e))?;
        if self.channel.frames_topic.trim().is_empty()
            || self.channel.detections_topic.trim().is_empty()
        {
            return Err(anyhow!("channel topics must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<VisiondConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
