//! Channel-hopping sniffer.
//!
//! The scanner puts the radio into monitor capture, dwells on one channel (or
//! on 1 through 14 in turn) and records the addresses of every frame heard
//! into the catalog of the channel it is dwelling on.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::catalog::ChannelCatalogSet;
use crate::driver::{
    blocking, CapturedFrame, FrameSink, OperatingMode, PromiscuousFilter, RadioDriver,
};
use crate::error::{Error, Result};
use crate::frame::extract_addresses;
use crate::CHANNEL_COUNT;

/// Channel argument meaning "sweep every channel".
pub const ALL_CHANNELS: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning(u8),
}

/// Counters for one sniffer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub channels: Vec<u8>,
    pub frames_recorded: u64,
    /// Frames too short to carry both addresses.
    pub frames_skipped: u64,
    /// Frames lost because the capture queue was full.
    pub frames_dropped: u64,
}

pub struct ChannelScanner {
    driver: Arc<dyn RadioDriver>,
    dwell: Duration,
    queue_depth: usize,
    state: ScanState,
}

impl ChannelScanner {
    pub fn new(driver: Arc<dyn RadioDriver>, dwell: Duration, queue_depth: usize) -> Self {
        ChannelScanner {
            driver,
            dwell,
            queue_depth,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Sniffs `channel` (1..=14) for one dwell period, or every channel in
    /// ascending order when `channel` is [`ALL_CHANNELS`].
    ///
    /// A sweep holds the caller for fourteen dwell periods and cannot be
    /// cancelled once started. Monitor capture is always turned off before
    /// this returns.
    pub async fn start_sniffer(
        &mut self,
        catalogs: &mut ChannelCatalogSet,
        channel: u8,
    ) -> Result<SweepSummary> {
        if channel > CHANNEL_COUNT {
            error!("Invalid sniffer channel {}", channel);
            return Err(Error::invalid(format!(
                "channel {} outside 0..={}",
                channel, CHANNEL_COUNT
            )));
        }

        let plan: Vec<u8> = if channel == ALL_CHANNELS {
            (1..=CHANNEL_COUNT).collect()
        } else {
            vec![channel]
        };

        let was_initialized = catalogs.is_initialized();
        catalogs.ensure_initialized()?;

        let result = match self.prepare(plan[0]) {
            Ok(capture) => self.sweep(catalogs, &plan, capture).await,
            Err(e) => {
                if !was_initialized {
                    catalogs.reset();
                }
                Err(e)
            }
        };

        if let Err(e) = blocking(|| self.driver.disable_promiscuous()) {
            warn!("Failed to disable promiscuous mode: {}", e);
        }
        self.state = ScanState::Idle;
        info!("Sniffer stopped");

        result
    }

    /// Puts the radio into monitor capture on `first`. Nothing has been
    /// recorded yet when this fails.
    fn prepare(&self, first: u8) -> Result<(mpsc::Receiver<CapturedFrame>, FrameSink)> {
        blocking(|| {
            self.driver
                .set_operating_mode(OperatingMode::Disconnected)
                .map_err(|e| {
                    error!("Failed to set wifi mode: {}", e);
                    e
                })?;

            self.driver.set_channel(first).map_err(|e| {
                error!("Failed to set wifi channel: {}", e);
                e
            })?;

            let (sink, rx) = FrameSink::channel(self.queue_depth);
            let sink_stats = sink.clone();
            self.driver
                .enable_promiscuous(PromiscuousFilter::management_and_data(), sink)
                .map_err(|e| {
                    error!("Failed to enable promiscuous mode: {}", e);
                    e
                })?;
            Ok((rx, sink_stats))
        })
    }

    async fn sweep(
        &mut self,
        catalogs: &mut ChannelCatalogSet,
        plan: &[u8],
        (mut rx, sink_stats): (mpsc::Receiver<CapturedFrame>, FrameSink),
    ) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        for (i, &ch) in plan.iter().enumerate() {
            if i > 0 {
                blocking(|| self.driver.set_channel(ch)).map_err(|e| {
                    error!("Failed to set wifi channel {}: {}", ch, e);
                    e
                })?;
            }
            self.state = ScanState::Scanning(ch);
            info!("Sniffing channel: {}", ch);

            self.dwell_on(catalogs, ch, &mut rx, &mut summary).await?;
            summary.channels.push(ch);
        }

        summary.frames_dropped = sink_stats.dropped();
        Ok(summary)
    }

    /// Consumes frames for one dwell period, then drains whatever is still
    /// queued so nothing heard here is credited to the next channel.
    async fn dwell_on(
        &self,
        catalogs: &mut ChannelCatalogSet,
        channel: u8,
        rx: &mut mpsc::Receiver<CapturedFrame>,
        summary: &mut SweepSummary,
    ) -> Result<()> {
        let deadline = Instant::now() + self.dwell;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                frame = rx.recv() => match frame {
                    Some(frame) => record(catalogs, channel, &frame, summary)?,
                    None => {
                        sleep_until(deadline).await;
                        break;
                    }
                },
            }
        }

        while let Ok(frame) = rx.try_recv() {
            record(catalogs, channel, &frame, summary)?;
        }
        Ok(())
    }
}

/// Adds the frame's source, then destination, to the channel's catalog.
fn record(
    catalogs: &mut ChannelCatalogSet,
    channel: u8,
    frame: &CapturedFrame,
    summary: &mut SweepSummary,
) -> Result<()> {
    let Some((src, dst)) = extract_addresses(&frame.payload) else {
        debug!("skipping {}-byte frame on channel {}", frame.payload.len(), channel);
        summary.frames_skipped += 1;
        return Ok(());
    };

    let catalog = catalogs.get_mut(channel)?;
    catalog.add(src)?;
    catalog.add(dst)?;
    summary.frames_recorded += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{DriverOp, SimulatedRadio};

    fn scanner(radio: &Arc<SimulatedRadio>) -> ChannelScanner {
        ChannelScanner::new(radio.clone(), Duration::from_millis(20), 64)
    }

    #[tokio::test]
    async fn rejects_channel_above_fourteen() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut catalogs = ChannelCatalogSet::default();
        let err = scanner(&radio).start_sniffer(&mut catalogs, 15).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
        assert!(!catalogs.is_initialized());
        assert!(radio.promiscuous_log().is_empty());
    }

    #[tokio::test]
    async fn single_channel_run_returns_to_idle() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut catalogs = ChannelCatalogSet::default();
        let mut scanner = scanner(&radio);

        let summary = scanner.start_sniffer(&mut catalogs, 11).await.unwrap();
        assert_eq!(summary.channels, vec![11]);
        assert_eq!(scanner.state(), ScanState::Idle);
        assert_eq!(radio.mode(), Some(OperatingMode::Disconnected));
        assert!(!radio.is_promiscuous());
        assert!(catalogs.is_initialized());
    }

    #[tokio::test]
    async fn monitor_mode_is_disabled_when_capture_cannot_start() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut catalogs = ChannelCatalogSet::default();
        let mut scanner = scanner(&radio);

        radio.fail(DriverOp::EnablePromiscuous);
        let err = scanner.start_sniffer(&mut catalogs, 0).await;
        assert!(matches!(err, Err(Error::DriverFailure(_))));
        assert_eq!(scanner.state(), ScanState::Idle);
        assert!(!radio.is_promiscuous());
        assert_eq!(radio.promiscuous_log().last().map(|(on, _)| *on), Some(false));
        assert!(!catalogs.is_initialized());
    }

    #[tokio::test]
    async fn failed_mode_switch_leaves_catalogs_uninitialized() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut catalogs = ChannelCatalogSet::default();
        let mut scanner = scanner(&radio);

        radio.fail(DriverOp::SetMode);
        let err = scanner.start_sniffer(&mut catalogs, 6).await;
        assert!(matches!(err, Err(Error::DriverFailure(_))));
        assert!(!catalogs.is_initialized());
        assert!(catalogs.get(6).is_none());
        assert_eq!(scanner.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn failed_start_keeps_catalogs_that_already_existed() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut catalogs = ChannelCatalogSet::default();
        let known = crate::mac::MacAddress::new([0x02, 0, 0, 0, 0, 1]);
        catalogs.get_mut(3).unwrap().add(known).unwrap();

        radio.fail(DriverOp::SetChannel);
        let err = scanner(&radio).start_sniffer(&mut catalogs, 3).await;
        assert!(matches!(err, Err(Error::DriverFailure(_))));
        assert!(catalogs.get(3).unwrap().contains(&known));
    }

    #[tokio::test]
    async fn short_frames_are_counted_not_recorded() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.script_frame(2, vec![0x08, 0x00, 0x00]);
        let mut catalogs = ChannelCatalogSet::default();

        let summary = scanner(&radio).start_sniffer(&mut catalogs, 2).await.unwrap();
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.frames_recorded, 0);
        assert!(catalogs.get(2).unwrap().is_empty());
    }
}
