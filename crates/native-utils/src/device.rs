use crate::error::CaptureError;
use anyhow::{Context, Result};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the named input device, or the host's default input when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::NoDefaultDevice.into());
    };

    let input_devices = host
        .input_devices()
        .context("Failed to enumerate input devices")?;
    for device in input_devices {
        if device.name().is_ok_and(|name| name == target) {
            return Ok(device);
        }
    }
    Err(CaptureError::DeviceNotFound(target.to_string()).into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputInfo {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

impl fmt::Display for InputInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " * {}({}ch, {}hz)",
            self.name, self.channels, self.sample_rate
        )?;
        if self.is_default {
            f.write_str(" [default]")?;
        }
        Ok(())
    }
}

/// Lists input devices that report a usable default configuration.
pub fn available_inputs() -> Result<Vec<InputInfo>> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut inputs = Vec::new();
    for device in host
        .input_devices()
        .context("Failed to enumerate input devices")?
    {
        let Ok(name) = device.name() else {
            continue;
        };
        let config = match device.default_input_config() {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Skipping input {:?}: {}", name, e);
                continue;
            }
        };
        inputs.push(InputInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            channels: config.channels(),
            sample_rate: config.sample_rate().0,
        });
    }
    Ok(inputs)
}

pub fn describe_inputs(inputs: &[InputInfo]) -> String {
    inputs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
