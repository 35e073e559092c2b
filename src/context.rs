use std::sync::Arc;

use log::{info, warn};

use crate::catalog::{check_channel, ChannelCatalogSet};
use crate::config::Config;
use crate::deauth::{DeauthSession, DeauthStats};
use crate::display;
use crate::driver::RadioDriver;
use crate::error::{Error, Result};
use crate::inventory::ApInventory;
use crate::mac::MacAddress;
use crate::scanner::{ChannelScanner, SweepSummary, ALL_CHANNELS};

/// Everything one radio needs: the channel catalogs, the last AP scan and the
/// deauthentication slot. Callers own it and pass it around; independent
/// contexts never share state.
pub struct WifiContext {
    driver: Arc<dyn RadioDriver>,
    config: Config,
    catalogs: ChannelCatalogSet,
    inventory: ApInventory,
    scanner: ChannelScanner,
    deauth: Option<DeauthSession>,
}

impl WifiContext {
    pub fn new(driver: Arc<dyn RadioDriver>, config: Config) -> Self {
        let scanner = ChannelScanner::new(driver.clone(), config.dwell(), config.capture_queue);
        WifiContext {
            catalogs: ChannelCatalogSet::new(config.catalog),
            inventory: ApInventory::new(),
            deauth: None,
            driver,
            config,
            scanner,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn driver(&self) -> &Arc<dyn RadioDriver> {
        &self.driver
    }

    pub fn catalogs(&self) -> &ChannelCatalogSet {
        &self.catalogs
    }

    pub fn catalogs_mut(&mut self) -> &mut ChannelCatalogSet {
        &mut self.catalogs
    }

    pub fn inventory(&self) -> &ApInventory {
        &self.inventory
    }

    pub fn scanner(&self) -> &ChannelScanner {
        &self.scanner
    }

    pub fn deauth_session(&self) -> Option<&DeauthSession> {
        self.deauth.as_ref()
    }

    /// See [`ChannelScanner::start_sniffer`]; `0` sweeps every channel.
    pub async fn start_sniffer(&mut self, channel: u8) -> Result<SweepSummary> {
        self.scanner.start_sniffer(&mut self.catalogs, channel).await
    }

    /// Textual dump of one channel's catalog, or of all fourteen for `0`.
    pub fn display_devices(&mut self, channel: u8) -> Result<String> {
        if channel != ALL_CHANNELS {
            check_channel(channel)?;
        }
        self.catalogs.ensure_initialized()?;
        display::render_devices(&self.catalogs, channel)
    }

    pub fn scan_access_points(&mut self) -> Result<usize> {
        self.inventory.scan_access_points(self.driver.as_ref())
    }

    pub fn list_access_points(&self) -> String {
        self.inventory.to_string()
    }

    /// Starts a deauthentication session. Refuses while one is running.
    pub fn start_deauth(&mut self, ap: MacAddress, target: MacAddress) -> Result<()> {
        if let Some(active) = &self.deauth {
            warn!("Deauth attack against {} already running", active.ap());
            return Err(Error::SessionActive(active.ap()));
        }

        let session = DeauthSession::start(
            self.driver.clone(),
            &self.inventory,
            ap,
            target,
            self.config.deauth_period(),
        )?;
        self.deauth = Some(session);
        Ok(())
    }

    /// Stops the running session; no burst is sent after this returns.
    ///
    /// If stopping fails the session is gone from the slot anyway and its
    /// task has been cancelled.
    pub async fn stop_deauth(&mut self) -> Result<DeauthStats> {
        let session = self.deauth.take().ok_or_else(|| {
            warn!("No deauth attack to stop");
            Error::NoActiveSession
        })?;
        let stats = session.stop().await?;
        info!("Deauth slot released");
        Ok(stats)
    }
}
