//! Per-channel catalogs of observed station addresses.
//!
//! A [`MacAddressCatalog`] keeps every distinct address seen on one channel in
//! the order it was first observed. [`ChannelCatalogSet`] holds the fourteen
//! catalogs for the 2.4 GHz band and is created all at once on first use.

use std::collections::VecDeque;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mac::MacAddress;
use crate::CHANNEL_COUNT;

/// Size in bytes of one exported address.
pub const MAC_LEN: usize = 6;

/// What a full catalog does with a newly observed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    #[default]
    RejectNew,
    DropOldest,
}

/// Optional bound on catalog size. The default is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogLimit {
    pub max_devices: Option<usize>,
    pub eviction: EvictionPolicy,
}

impl CatalogLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn capped(max_devices: usize, eviction: EvictionPolicy) -> Self {
        Self {
            max_devices: Some(max_devices),
            eviction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub mac: MacAddress,
}

#[derive(Debug, Clone)]
pub struct MacAddressCatalog {
    channel: u8,
    records: VecDeque<DeviceRecord>,
    limit: CatalogLimit,
}

pub(crate) fn check_channel(channel: u8) -> Result<()> {
    if channel == 0 || channel > CHANNEL_COUNT {
        return Err(Error::invalid(format!(
            "channel {} outside 1..={}",
            channel, CHANNEL_COUNT
        )));
    }
    Ok(())
}

impl MacAddressCatalog {
    pub fn new(channel: u8) -> Result<Self> {
        Self::with_limit(channel, CatalogLimit::unbounded())
    }

    pub fn with_limit(channel: u8, limit: CatalogLimit) -> Result<Self> {
        check_channel(channel)?;
        if limit.max_devices == Some(0) {
            return Err(Error::invalid("catalog cap must be at least one device"));
        }

        let mut records = VecDeque::new();
        if let Some(max) = limit.max_devices {
            records.try_reserve_exact(max)?;
        }

        Ok(Self {
            channel,
            records,
            limit,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn limit(&self) -> CatalogLimit {
        self.limit
    }

    /// Records in first-seen order.
    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> + '_ {
        self.records.iter()
    }

    pub fn macs(&self) -> impl Iterator<Item = MacAddress> + '_ {
        self.records.iter().map(|r| r.mac)
    }

    /// Appends `mac` unless it is already present.
    ///
    /// Returns `Ok(true)` when the address was inserted and `Ok(false)` when it
    /// was a duplicate or a full catalog with [`EvictionPolicy::RejectNew`]
    /// turned it away.
    pub fn add(&mut self, mac: MacAddress) -> Result<bool> {
        if self.contains(&mac) {
            return Ok(false);
        }

        if let Some(max) = self.limit.max_devices {
            if self.records.len() >= max {
                match self.limit.eviction {
                    EvictionPolicy::RejectNew => {
                        debug!("channel {} catalog full, ignoring {}", self.channel, mac);
                        return Ok(false);
                    }
                    EvictionPolicy::DropOldest => {
                        if let Some(evicted) = self.records.pop_front() {
                            debug!(
                                "channel {} catalog full, evicted {}",
                                self.channel, evicted.mac
                            );
                        }
                    }
                }
            }
        }

        self.records.try_reserve(1)?;
        self.records.push_back(DeviceRecord { mac });
        Ok(true)
    }

    /// Removes `mac` if present. Removing an absent address is not an error.
    pub fn remove(&mut self, mac: &MacAddress) -> bool {
        match self.records.iter().position(|r| r.mac == *mac) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, mac: &MacAddress) -> Option<&DeviceRecord> {
        self.records.iter().find(|r| r.mac == *mac)
    }

    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.find(mac).is_some()
    }

    /// Drops every record but keeps the catalog (and its allocation).
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Copies every address, in insertion order, into `buffer` as packed
    /// 6-byte groups and returns the number of bytes written.
    ///
    /// `buffer` is left untouched when it cannot hold all of them.
    pub fn export(&self, buffer: &mut [u8]) -> Result<usize> {
        let needed = self.records.len() * MAC_LEN;
        if buffer.len() < needed {
            return Err(Error::InsufficientBuffer {
                needed,
                available: buffer.len(),
            });
        }

        for (chunk, record) in buffer.chunks_exact_mut(MAC_LEN).zip(&self.records) {
            chunk.copy_from_slice(record.mac.as_bytes());
        }
        Ok(needed)
    }

    /// Builds the deduplicated union of `catalogs`.
    ///
    /// The result takes the first catalog's channel and lists the first
    /// catalog's addresses in order, followed by each later catalog's new
    /// addresses in order. It is unbounded so the union is never truncated.
    pub fn combine(catalogs: &[&MacAddressCatalog]) -> Result<MacAddressCatalog> {
        let first = catalogs
            .first()
            .ok_or_else(|| Error::invalid("combine needs at least one catalog"))?;

        let mut combined = MacAddressCatalog::new(first.channel)?;
        for catalog in catalogs {
            for mac in catalog.macs() {
                combined.add(mac)?;
            }
        }
        Ok(combined)
    }
}

impl fmt::Display for MacAddressCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Channel {:>2}: {} device(s)",
            self.channel,
            self.records.len()
        )?;
        for record in &self.records {
            writeln!(f, "    {}", record.mac)?;
        }
        Ok(())
    }
}

/// The fourteen per-channel catalogs, either all present or none.
#[derive(Debug, Clone, Default)]
pub struct ChannelCatalogSet {
    catalogs: Option<Vec<MacAddressCatalog>>,
    limit: CatalogLimit,
}

impl ChannelCatalogSet {
    pub fn new(limit: CatalogLimit) -> Self {
        Self {
            catalogs: None,
            limit,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.catalogs.is_some()
    }

    /// Creates all fourteen catalogs if they do not exist yet. On failure the
    /// set stays uninitialized.
    pub fn ensure_initialized(&mut self) -> Result<()> {
        if self.catalogs.is_some() {
            return Ok(());
        }

        let mut catalogs = Vec::new();
        catalogs.try_reserve_exact(CHANNEL_COUNT as usize)?;
        for channel in 1..=CHANNEL_COUNT {
            catalogs.push(MacAddressCatalog::with_limit(channel, self.limit)?);
        }

        debug!("initialized {} channel catalogs", catalogs.len());
        self.catalogs = Some(catalogs);
        Ok(())
    }

    /// Drops all fourteen catalogs, returning the set to its uninitialized
    /// state.
    pub fn reset(&mut self) {
        if self.catalogs.take().is_some() {
            debug!("released channel catalogs");
        }
    }

    /// Catalog for `channel`, or `None` when the set is uninitialized or the
    /// channel is out of range.
    pub fn get(&self, channel: u8) -> Option<&MacAddressCatalog> {
        if check_channel(channel).is_err() {
            return None;
        }
        self.catalogs
            .as_ref()
            .map(|catalogs| &catalogs[(channel - 1) as usize])
    }

    /// Catalog for `channel`, initializing the set on first use.
    pub fn get_mut(&mut self, channel: u8) -> Result<&mut MacAddressCatalog> {
        check_channel(channel)?;
        self.ensure_initialized()?;
        match self.catalogs.as_mut() {
            Some(catalogs) => Ok(&mut catalogs[(channel - 1) as usize]),
            None => Err(Error::AllocationFailure(
                "channel catalogs unavailable".to_string(),
            )),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacAddressCatalog> {
        self.catalogs.iter().flatten()
    }

    pub fn total_devices(&self) -> usize {
        self.iter().map(MacAddressCatalog::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    #[test]
    fn new_rejects_bad_channels() {
        assert!(matches!(
            MacAddressCatalog::new(0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            MacAddressCatalog::new(15),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(MacAddressCatalog::new(14).unwrap().channel(), 14);
    }

    #[test]
    fn add_keeps_first_seen_order_and_skips_duplicates() {
        let mut catalog = MacAddressCatalog::new(6).unwrap();
        assert!(catalog.add(mac(1)).unwrap());
        assert!(catalog.add(mac(2)).unwrap());
        assert!(!catalog.add(mac(1)).unwrap());

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.macs().collect::<Vec<_>>(), vec![mac(1), mac(2)]);
    }

    #[test]
    fn remove_unlinks_and_tolerates_absent() {
        let mut catalog = MacAddressCatalog::new(1).unwrap();
        catalog.add(mac(1)).unwrap();
        catalog.add(mac(2)).unwrap();
        catalog.add(mac(3)).unwrap();

        assert!(catalog.remove(&mac(2)));
        assert!(!catalog.remove(&mac(9)));
        assert_eq!(catalog.macs().collect::<Vec<_>>(), vec![mac(1), mac(3)]);
        assert!(catalog.find(&mac(2)).is_none());
    }

    #[test]
    fn clear_resets_count_but_keeps_channel() {
        let mut catalog = MacAddressCatalog::new(11).unwrap();
        catalog.add(mac(1)).unwrap();
        catalog.clear();
        assert!(catalog.is_empty());
        assert_eq!(catalog.channel(), 11);
        assert!(catalog.add(mac(1)).unwrap());
    }

    #[test]
    fn export_writes_packed_addresses() {
        let mut catalog = MacAddressCatalog::new(3).unwrap();
        catalog.add(mac(1)).unwrap();
        catalog.add(mac(2)).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(catalog.export(&mut buf).unwrap(), 12);
        assert_eq!(&buf[..6], mac(1).as_bytes());
        assert_eq!(&buf[6..12], mac(2).as_bytes());
        assert_eq!(&buf[12..], &[0, 0, 0, 0]);
    }

    #[test]
    fn reject_new_policy_ignores_overflow() {
        let limit = CatalogLimit::capped(2, EvictionPolicy::RejectNew);
        let mut catalog = MacAddressCatalog::with_limit(1, limit).unwrap();
        catalog.add(mac(1)).unwrap();
        catalog.add(mac(2)).unwrap();
        assert!(!catalog.add(mac(3)).unwrap());
        assert_eq!(catalog.macs().collect::<Vec<_>>(), vec![mac(1), mac(2)]);
    }

    #[test]
    fn drop_oldest_policy_evicts_front() {
        let limit = CatalogLimit::capped(2, EvictionPolicy::DropOldest);
        let mut catalog = MacAddressCatalog::with_limit(1, limit).unwrap();
        catalog.add(mac(1)).unwrap();
        catalog.add(mac(2)).unwrap();
        assert!(catalog.add(mac(3)).unwrap());
        assert_eq!(catalog.macs().collect::<Vec<_>>(), vec![mac(2), mac(3)]);
    }

    #[test]
    fn drop_oldest_keeps_the_newest_window_across_many_evictions() {
        let limit = CatalogLimit::capped(3, EvictionPolicy::DropOldest);
        let mut catalog = MacAddressCatalog::with_limit(9, limit).unwrap();
        for last in 0..50 {
            assert!(catalog.add(mac(last)).unwrap());
        }
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.macs().collect::<Vec<_>>(),
            vec![mac(47), mac(48), mac(49)]
        );
        assert!(!catalog.add(mac(48)).unwrap());

        let mut buf = [0u8; 18];
        assert_eq!(catalog.export(&mut buf).unwrap(), 18);
        assert_eq!(&buf[..6], mac(47).as_bytes());
    }

    #[test]
    fn zero_cap_is_rejected() {
        let limit = CatalogLimit::capped(0, EvictionPolicy::DropOldest);
        assert!(MacAddressCatalog::with_limit(1, limit).is_err());
    }

    #[test]
    fn combine_of_nothing_is_invalid() {
        assert!(matches!(
            MacAddressCatalog::combine(&[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn display_lists_channel_count_and_addresses() {
        let mut catalog = MacAddressCatalog::new(6).unwrap();
        catalog.add(mac(0x01)).unwrap();
        let text = catalog.to_string();
        assert!(text.starts_with("Channel  6: 1 device(s)"));
        assert!(text.contains("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn set_is_all_or_nothing() {
        let mut set = ChannelCatalogSet::default();
        assert!(!set.is_initialized());
        assert!(set.get(1).is_none());
        assert_eq!(set.iter().count(), 0);

        set.get_mut(6).unwrap().add(mac(1)).unwrap();
        assert!(set.is_initialized());
        assert_eq!(set.iter().count(), 14);
        assert_eq!(
            set.iter().map(|c| c.channel()).collect::<Vec<_>>(),
            (1..=14).collect::<Vec<_>>()
        );
        assert_eq!(set.total_devices(), 1);
        assert!(set.get(6).unwrap().contains(&mac(1)));
        assert!(set.get(15).is_none());
        assert!(set.get_mut(0).is_err());

        set.reset();
        assert!(!set.is_initialized());
        assert_eq!(set.total_devices(), 0);
    }

    #[test]
    fn set_applies_its_limit_to_every_catalog() {
        let limit = CatalogLimit::capped(4, EvictionPolicy::DropOldest);
        let mut set = ChannelCatalogSet::new(limit);
        set.ensure_initialized().unwrap();
        assert!(set.iter().all(|c| c.limit() == limit));
    }
}
