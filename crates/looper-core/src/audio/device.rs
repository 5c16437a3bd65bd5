//! Audio device enumeration and duplex device selection
//!
//! The looper needs one device (or a pair) that can both capture and play.
//! Devices are enumerated from the default CPAL host in a stable order so
//! configured indices keep pointing at the same hardware; selection itself
//! is a pure function over `DeviceInfo` and can be tested without hardware.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId};

use super::config::AudioConfig;
use super::error::{AudioError, AudioResult};

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Information about an audio device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Position in the host's device list
    pub index: usize,
    /// Device name as reported by the system
    pub name: String,
    /// Host backend name (e.g., "ALSA", "JACK")
    pub host: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl DeviceInfo {
    /// Whether the device can capture and play
    pub fn is_duplex(&self) -> bool {
        self.max_input_channels > 0 && self.max_output_channels > 0
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} [{}] {} (in: {}, out: {})",
            self.index, self.host, self.name, self.max_input_channels, self.max_output_channels
        )
    }
}

fn max_channels<I: Iterator<Item = cpal::SupportedStreamConfigRange>>(configs: Option<I>) -> u16 {
    configs
        .map(|c| c.map(|config| config.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Enumerate every device of the default host with its channel counts
pub fn enumerate_devices(host: &Host) -> AudioResult<Vec<DeviceInfo>> {
    let host_name_str = host_name(host.id());
    let devices = host
        .devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    let infos: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(index, device)| DeviceInfo {
            index,
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            host: host_name_str.clone(),
            max_input_channels: max_channels(device.supported_input_configs().ok()),
            max_output_channels: max_channels(device.supported_output_configs().ok()),
        })
        .collect();

    if infos.is_empty() {
        return Err(AudioError::NoDevices);
    }
    log::debug!("Enumerated {} audio devices from {}", infos.len(), host_name_str);
    Ok(infos)
}

/// List the devices of the default host
pub fn list_devices() -> AudioResult<Vec<DeviceInfo>> {
    enumerate_devices(&cpal::default_host())
}

/// Pick a duplex device: preferred names first, else the lowest index
pub fn select_duplex_device<'a>(
    devices: &'a [DeviceInfo],
    preferred: &[String],
) -> AudioResult<&'a DeviceInfo> {
    let candidates: Vec<&DeviceInfo> = devices.iter().filter(|d| d.is_duplex()).collect();
    if candidates.is_empty() {
        return Err(AudioError::NoDuplexDevice);
    }

    for name in preferred {
        if let Some(device) = candidates.iter().find(|d| &d.name == name) {
            return Ok(*device);
        }
    }

    candidates
        .into_iter()
        .min_by_key(|d| d.index)
        .ok_or(AudioError::NoDuplexDevice)
}

/// Resolve the (input, output) device indices for the configuration
///
/// Explicit indices are checked for the needed direction; missing ones are
/// auto-selected.
pub fn resolve_devices(config: &AudioConfig, devices: &[DeviceInfo]) -> AudioResult<(usize, usize)> {
    let lookup = |index: usize| {
        devices
            .iter()
            .find(|d| d.index == index)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
    };

    match (config.in_device, config.out_device) {
        (Some(input), Some(output)) => {
            let input_info = lookup(input)?;
            let output_info = lookup(output)?;
            if input_info.max_input_channels == 0 {
                return Err(AudioError::DeviceNotFound(format!("{} has no inputs", input_info.name)));
            }
            if output_info.max_output_channels == 0 {
                return Err(AudioError::DeviceNotFound(format!("{} has no outputs", output_info.name)));
            }
            Ok((input, output))
        }
        (input, output) => {
            let selected = select_duplex_device(devices, &config.preferred_devices)?;
            log::info!("Auto-selected audio device {}", selected);
            Ok((input.unwrap_or(selected.index), output.unwrap_or(selected.index)))
        }
    }
}

/// Open the device at a host index
pub fn device_at(host: &Host, index: usize) -> AudioResult<Device> {
    host.devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .nth(index)
        .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
}
