//! The radio capability consumed by the sniffer, the AP scanner and the
//! deauthentication engine.
//!
//! Received frames travel from the driver's capture context to a single
//! consumer through a [`FrameSink`], so the consumer owns every structure the
//! frames end up in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::inventory::ApRecord;
use crate::mac::MacAddress;

pub use crate::frame::FrameKind;

pub mod linux;
pub mod sim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    /// Radio up but not associated or serving; used for monitor capture.
    Disconnected,
    Station,
    AccessPoint,
}

/// Logical interface a raw frame is sent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Station,
    AccessPoint,
}

/// Frame types delivered while promiscuous capture is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromiscuousFilter {
    pub management: bool,
    pub data: bool,
    pub control: bool,
}

impl PromiscuousFilter {
    pub fn management_and_data() -> Self {
        Self {
            management: true,
            data: true,
            control: false,
        }
    }

    pub fn accepts(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Management => self.management,
            FrameKind::Data => self.data,
            FrameKind::Control => self.control,
            FrameKind::Extension => false,
        }
    }
}

/// One frame handed over by the capture context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub kind: FrameKind,
    /// 802.11 frame starting at the frame-control field.
    pub payload: Vec<u8>,
}

/// Producer half of the capture path.
///
/// `deliver` never blocks; frames that do not fit the queue are counted and
/// discarded.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<CapturedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    /// Creates a sink and the receiver the consumer reads from.
    pub fn channel(depth: usize) -> (FrameSink, mpsc::Receiver<CapturedFrame>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let sink = FrameSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Returns `false` once the consumer has gone away.
    pub fn deliver(&self, kind: FrameKind, payload: &[u8]) -> bool {
        let frame = CapturedFrame {
            kind,
            payload: payload.to_vec(),
        };
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Radio operations the core needs. Every call is synchronous and reports
/// rejection as [`Error::DriverFailure`](crate::error::Error::DriverFailure).
pub trait RadioDriver: Send + Sync {
    fn set_operating_mode(&self, mode: OperatingMode) -> Result<()>;

    /// Tunes the primary channel with no secondary channel.
    fn set_channel(&self, channel: u8) -> Result<()>;

    /// Starts delivering frames matching `filter` into `sink`.
    fn enable_promiscuous(&self, filter: PromiscuousFilter, sink: FrameSink) -> Result<()>;

    /// Stops capture. Calling it while capture is off succeeds.
    fn disable_promiscuous(&self) -> Result<()>;

    /// Best-effort raw transmission of a complete 802.11 frame.
    fn transmit_raw_frame(&self, interface: Interface, frame: &[u8]) -> Result<()>;

    /// Runs an access-point scan to completion.
    fn start_scan(&self) -> Result<()>;

    fn scan_result_count(&self) -> Result<usize>;

    /// Returns at most `max` records from the last scan.
    fn scan_results(&self, max: usize) -> Result<Vec<ApRecord>>;

    fn set_interface_mac(&self, interface: Interface, mac: MacAddress) -> Result<()>;
}

/// Runs a driver call that may block (shelling out, joining the capture
/// thread, opening a pcap handle) without stalling the other tasks of a
/// multi-threaded runtime. On a current-thread runtime, or outside one, `f`
/// runs inline.
pub fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_mask() {
        let filter = PromiscuousFilter::management_and_data();
        assert!(filter.accepts(FrameKind::Management));
        assert!(filter.accepts(FrameKind::Data));
        assert!(!filter.accepts(FrameKind::Control));
        assert!(!filter.accepts(FrameKind::Extension));
    }

    #[tokio::test]
    async fn sink_counts_overflow_and_detects_close() {
        let (sink, mut rx) = FrameSink::channel(1);
        assert!(sink.deliver(FrameKind::Data, &[1, 2, 3]));
        assert!(sink.deliver(FrameKind::Data, &[4, 5, 6]));
        assert_eq!(sink.dropped(), 1);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload, vec![1, 2, 3]);

        drop(rx);
        assert!(!sink.deliver(FrameKind::Data, &[7]));
        assert!(sink.is_closed());
    }

    #[test]
    fn blocking_runs_inline_outside_a_runtime() {
        assert_eq!(blocking(|| 7), 7);
    }

    #[tokio::test]
    async fn blocking_runs_inline_on_current_thread() {
        assert_eq!(blocking(|| "done"), "done");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_hands_off_the_worker_on_multi_thread() {
        let value = tokio::spawn(async { blocking(|| 40 + 2) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
