use std::fmt;

use log::{error, info};
use serde::Serialize;

use crate::driver::{OperatingMode, RadioDriver};
use crate::error::{Error, Result};
use crate::mac::MacAddress;

/// Longest SSID 802.11 allows, in bytes.
pub const MAX_SSID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApRecord {
    pub ssid: String,
    pub bssid: MacAddress,
    pub rssi: i8,
    pub channel: u8,
}

impl ApRecord {
    /// Truncates `ssid` to 32 bytes on a character boundary.
    pub fn new(ssid: &str, bssid: MacAddress, rssi: i8, channel: u8) -> Self {
        let mut end = ssid.len().min(MAX_SSID_LEN);
        while !ssid.is_char_boundary(end) {
            end -= 1;
        }
        ApRecord {
            ssid: ssid[..end].to_string(),
            bssid,
            rssi,
            channel,
        }
    }
}

/// Access points reported by the most recent scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApInventory {
    records: Vec<ApRecord>,
}

impl ApInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ApRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_by_bssid(&self, bssid: &MacAddress) -> Option<&ApRecord> {
        self.records.iter().find(|r| r.bssid == *bssid)
    }

    /// Runs a blocking scan and replaces the snapshot with its results.
    ///
    /// The previous snapshot is kept if any driver step fails.
    pub fn scan_access_points(&mut self, driver: &dyn RadioDriver) -> Result<usize> {
        driver.set_operating_mode(OperatingMode::Station).map_err(|e| {
            error!("Failed to set wifi mode: {}", e);
            e
        })?;

        info!("Scanning APs...");
        driver.start_scan().map_err(|e| {
            error!("Failed to start scan: {}", e);
            e
        })?;

        let count = driver.scan_result_count().map_err(|e| {
            error!("Failed to get number of APs found: {}", e);
            e
        })?;

        let mut records = Vec::new();
        records.try_reserve_exact(count).map_err(|e| {
            Error::AllocationFailure(format!("{} AP records: {}", count, e))
        })?;

        let fetched = driver.scan_results(count).map_err(|e| {
            error!("Failed to get AP records: {}", e);
            e
        })?;
        records.extend(fetched.into_iter().take(count));

        info!("Number of APs found: {}", records.len());
        self.records = records;
        Ok(self.records.len())
    }
}

impl fmt::Display for ApInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<32} {:<6} {:<8} {:<17}", "SSID", "RSSI", "Channel", "BSSID")?;
        for ap in &self.records {
            writeln!(
                f,
                "{:<32} {:<6} {:<8} {:<17}",
                ap.ssid, ap.rssi, ap.channel, ap.bssid
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_is_truncated_on_char_boundary() {
        let long = "é".repeat(20); // 40 bytes
        let ap = ApRecord::new(&long, MacAddress::ZERO, -40, 1);
        assert_eq!(ap.ssid.len(), 32);
        assert_eq!(ApRecord::new("home", MacAddress::ZERO, -40, 1).ssid, "home");

        let odd = format!("a{}", "é".repeat(20)); // boundary falls mid-character
        assert_eq!(ApRecord::new(&odd, MacAddress::ZERO, -40, 1).ssid.len(), 31);
    }

    #[test]
    fn listing_has_one_row_per_ap() {
        let inventory = ApInventory {
            records: vec![ApRecord::new(
                "CoffeeShop",
                MacAddress::new([0x34, 0x2c, 0xc4, 0xad, 0xb2, 0xd5]),
                -52,
                6,
            )],
        };
        let text = inventory.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("CoffeeShop"));
        assert!(lines[1].contains("-52"));
        assert!(lines[1].ends_with("34:2c:c4:ad:b2:d5"));
    }
}
