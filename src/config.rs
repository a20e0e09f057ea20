//! Application configuration
//!
//! Loaded from a TOML file; every section falls back to defaults so a
//! partial (or missing) file is valid.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Which end of the link this device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Battery powered, worn by the operator: microphone, PTT and call buttons, sleeps when idle
    BeltPack,
    /// Line powered, attached to the wired party line, never sleeps
    BaseStation,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::BeltPack => "belt pack",
            Role::BaseStation => "base station",
        }
    }

    pub fn is_belt_pack(&self) -> bool {
        matches!(self, Role::BeltPack)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub ptt: PttConfig,
    pub power: PowerConfig,
    pub battery: BatteryConfig,
    pub led: LedConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub role: Role,
    /// Belt packs use 0x01-0x7F, base stations 0x80-0xFF
    pub device_id: u8,
    pub paired_id: u8,
    /// Run against simulated collaborators; self-test failures become warnings
    pub simulate_hardware: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            role: Role::BeltPack,
            device_id: 0x01,
            paired_id: 0x80,
            simulate_hardware: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub bitrate: u32,
    /// In-band forward error correction
    pub fec: bool,
    pub limiter_enabled: bool,
    /// Fraction of full scale where soft limiting starts
    pub limiter_threshold: f32,
    pub sidetone_enabled: bool,
    pub sidetone_level: f32,
    /// Consecutive empty receive slots filled by loss concealment
    pub max_concealment_frames: u32,
    pub tones_enabled: bool,
    pub tone_amplitude: f32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::SAMPLE_RATE,
            frame_ms: crate::constants::FRAME_MS,
            bitrate: 24_000,
            fec: false,
            limiter_enabled: true,
            limiter_threshold: 0.95,
            sidetone_enabled: true,
            sidetone_level: 0.3,
            max_concealment_frames: 10,
            tones_enabled: true,
            tone_amplitude: 0.25,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples in one frame (mono)
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub udp_port: u16,
    /// Where the belt pack sends; ignored by the base station
    pub base_address: IpAddr,
    pub recv_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Loss percentage above which the status LED signals a poor link
    pub loss_warn_percent: f32,
    /// Packets buffered between the receive task and the audio task
    pub rx_queue_frames: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_port: crate::constants::DEFAULT_UDP_PORT,
            base_address: IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1)),
            recv_timeout_ms: 100,
            reconnect_delay_ms: 2000,
            loss_warn_percent: 2.0,
            rx_queue_frames: 8,
        }
    }
}

impl NetworkConfig {
    pub fn base_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.base_address, self.udp_port)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PttConfig {
    /// Hold time that turns a latched press into momentary
    pub hold_threshold_ms: u32,
    pub debounce_ms: u32,
    pub poll_interval_ms: u32,
    /// Spacing of repeated "still held" notifications
    pub hold_repeat_ms: u32,
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            hold_threshold_ms: 200,
            debounce_ms: 20,
            poll_interval_ms: 10,
            hold_repeat_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub light_sleep_enabled: bool,
    pub light_sleep_timeout_secs: u64,
    pub deep_sleep_enabled: bool,
    pub deep_sleep_timeout_mins: u64,
    pub housekeeping_interval_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            light_sleep_enabled: true,
            light_sleep_timeout_secs: 90,
            deep_sleep_enabled: true,
            deep_sleep_timeout_mins: 20,
            housekeeping_interval_ms: 1000,
        }
    }
}

impl PowerConfig {
    pub fn light_sleep_threshold(&self) -> Duration {
        Duration::from_secs(self.light_sleep_timeout_secs)
    }

    pub fn deep_sleep_threshold(&self) -> Duration {
        Duration::from_secs(self.deep_sleep_timeout_mins * 60)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub full_voltage: f32,
    pub low_voltage: f32,
    pub critical_voltage: f32,
    pub empty_voltage: f32,
    pub check_interval_secs: u64,
    pub critical_repeat_secs: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            full_voltage: 4.2,
            low_voltage: 3.3,
            critical_voltage: 3.0,
            empty_voltage: 2.8,
            check_interval_secs: 30,
            critical_repeat_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub slow_blink_ms: u32,
    pub fast_blink_ms: u32,
    pub tick_ms: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            slow_blink_ms: 1000,
            fast_blink_ms: 200,
            tick_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub stats_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stats_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Defaults for the given role
    pub fn for_role(role: Role) -> Self {
        let mut config = Self::default();
        config.apply_role(role);
        config
    }

    /// Switch role, adjusting the settings that only make sense for one end
    pub fn apply_role(&mut self, role: Role) {
        self.device.role = role;
        if role == Role::BaseStation {
            if self.device.device_id < 0x80 {
                self.device.device_id = 0x80;
                self.device.paired_id = 0x01;
            }
            self.power.light_sleep_enabled = false;
            self.power.deep_sleep_enabled = false;
            self.audio.sidetone_enabled = false;
        }
    }

    /// Platform config location, e.g. `~/.config/wireless-partyline/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "wireless-partyline")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject settings the audio path or the power gate cannot run with
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if !matches!(audio.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(Error::Config(format!(
                "unsupported sample rate {}",
                audio.sample_rate
            )));
        }
        if !matches!(audio.frame_ms, 10 | 20 | 40 | 60) {
            return Err(Error::Config(format!(
                "frame_ms must be 10, 20, 40 or 60, got {}",
                audio.frame_ms
            )));
        }
        if !(6_000..=510_000).contains(&audio.bitrate) {
            return Err(Error::Config(format!(
                "bitrate must be 6000-510000, got {}",
                audio.bitrate
            )));
        }
        for (name, value) in [
            ("limiter_threshold", audio.limiter_threshold),
            ("sidetone_level", audio.sidetone_level),
            ("tone_amplitude", audio.tone_amplitude),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within 0.0-1.0", name)));
            }
        }
        if self.network.recv_timeout_ms == 0 {
            return Err(Error::Config("recv_timeout_ms must be non-zero".into()));
        }
        if self.network.rx_queue_frames == 0 {
            return Err(Error::Config("rx_queue_frames must be non-zero".into()));
        }
        if self.power.housekeeping_interval_ms == 0 {
            return Err(Error::Config("housekeeping_interval_ms must be non-zero".into()));
        }
        if self.power.light_sleep_enabled
            && self.power.deep_sleep_enabled
            && self.power.deep_sleep_threshold() < self.power.light_sleep_threshold()
        {
            return Err(Error::Config(
                "deep sleep timeout is shorter than light sleep timeout".into(),
            ));
        }
        let b = &self.battery;
        if !(b.empty_voltage < b.critical_voltage
            && b.critical_voltage <= b.low_voltage
            && b.low_voltage < b.full_voltage)
        {
            return Err(Error::Config(
                "battery voltages must satisfy empty < critical <= low < full".into(),
            ));
        }
        Ok(())
    }
}
