//! Audio input device enumeration and lookup.

use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

use voxdeck_core::{Result, VoxDeckError};

/// List the names of all available input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| VoxDeckError::Media(format!("Failed to enumerate input devices: {e}")))?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .collect())
}

/// Find an input device whose name contains `name` (case-insensitive).
pub fn find_input_device(name: &str) -> Result<Device> {
    let host = cpal::default_host();
    let needle = name.to_lowercase();

    host.input_devices()
        .map_err(|e| VoxDeckError::Media(format!("Failed to enumerate input devices: {e}")))?
        .find(|d| {
            d.name()
                .map(|n| n.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| VoxDeckError::Media(format!("No input device matching '{name}'")))
}
