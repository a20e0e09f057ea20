//! Host sound card enumeration

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// What the operator needs to pick a device in the config file
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// `input:<name>` or `output:<name>`
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_default: bool,
    /// Whether the device accepts our mono frame rate directly
    pub supports_rate: bool,
}

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Channel count to open the device with at `sample_rate`
    pub fn channels_for(&self, sample_rate: u32) -> Result<u16, AudioError> {
        let rate = cpal::SampleRate(sample_rate);
        let configs: Vec<_> = if self.is_input {
            self.inner
                .supported_input_configs()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
                .collect()
        } else {
            self.inner
                .supported_output_configs()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
                .collect()
        };

        configs
            .iter()
            .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
            .map(|c| c.channels())
            .min()
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!("{} does not support {} Hz", self.name, sample_rate))
            })
    }
}

fn supports_rate(device: &cpal::Device, is_input: bool, sample_rate: u32) -> bool {
    let rate = cpal::SampleRate(sample_rate);
    let check = |c: cpal::SupportedStreamConfigRange| c.min_sample_rate() <= rate && rate <= c.max_sample_rate();
    if is_input {
        device
            .supported_input_configs()
            .map(|mut configs| configs.any(check))
            .unwrap_or(false)
    } else {
        device
            .supported_output_configs()
            .map(|mut configs| configs.any(check))
            .unwrap_or(false)
    }
}

/// List input and output devices
pub fn list_devices(sample_rate: u32) -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(inputs) = host.input_devices() {
        let default = host.default_input_device().and_then(|d| d.name().ok());
        collect(&mut devices, inputs, true, default, sample_rate);
    }
    if let Ok(outputs) = host.output_devices() {
        let default = host.default_output_device().and_then(|d| d.name().ok());
        collect(&mut devices, outputs, false, default, sample_rate);
    }

    devices
}

fn collect(
    out: &mut Vec<DeviceInfo>,
    devices: impl Iterator<Item = cpal::Device>,
    is_input: bool,
    default_name: Option<String>,
    sample_rate: u32,
) {
    for device in devices {
        let Ok(name) = device.name() else { continue };
        out.push(DeviceInfo {
            id: format!("{}:{}", if is_input { "input" } else { "output" }, name),
            is_default: default_name.as_ref() == Some(&name),
            supports_rate: supports_rate(&device, is_input, sample_rate),
            is_input,
            name,
        });
    }
}

/// Look up a device by id; a bare name is taken as an input
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    };

    let found = if is_input {
        host.input_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
    } else {
        host.output_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
    };

    found
        .map(|device| AudioDevice::from_cpal(device, is_input))
        .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
}

pub fn default_input_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

pub fn default_output_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// Configured device, or the host default
pub fn input_device(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => get_device_by_id(id),
        None => default_input_device(),
    }
}

pub fn output_device(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => get_device_by_id(id),
        None => default_output_device(),
    }
}
