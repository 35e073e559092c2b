use serde::Serialize;

use crate::catalog::ChannelCatalogSet;
use crate::error::{Error, Result};
use crate::inventory::ApInventory;
use crate::mac::MacAddress;
use crate::scanner::ALL_CHANNELS;

#[derive(Serialize)]
struct ChannelDevices {
    channel: u8,
    count: usize,
    devices: Vec<MacAddress>,
}

/// Catalog dump for one channel, or every channel when `channel` is `0`.
pub fn render_devices(catalogs: &ChannelCatalogSet, channel: u8) -> Result<String> {
    if channel == ALL_CHANNELS {
        return Ok(catalogs.iter().map(|c| c.to_string()).collect());
    }
    catalogs
        .get(channel)
        .map(|c| c.to_string())
        .ok_or_else(|| Error::invalid(format!("no catalog for channel {}", channel)))
}

pub fn devices_json(catalogs: &ChannelCatalogSet) -> Result<String> {
    let channels: Vec<ChannelDevices> = catalogs
        .iter()
        .map(|c| ChannelDevices {
            channel: c.channel(),
            count: c.len(),
            devices: c.macs().collect(),
        })
        .collect();
    serde_json::to_string_pretty(&channels)
        .map_err(|e| Error::invalid(format!("cannot serialize catalogs: {}", e)))
}

pub fn inventory_json(inventory: &ApInventory) -> Result<String> {
    serde_json::to_string_pretty(inventory.records())
        .map_err(|e| Error::invalid(format!("cannot serialize inventory: {}", e)))
}

pub fn display_error(message: &str) {
    eprintln!("Error: {}", message);
}
