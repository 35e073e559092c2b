//! Scripted in-memory radio.
//!
//! `SimulatedRadio` records every operation it is asked to perform, replays
//! frames scripted per channel whenever capture is running on that channel,
//! and can be told to reject specific operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::time::Instant;

use super::{FrameKind, FrameSink, Interface, OperatingMode, PromiscuousFilter, RadioDriver};
use crate::error::{Error, Result};
use crate::inventory::ApRecord;
use crate::mac::MacAddress;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    SetMode,
    SetChannel,
    EnablePromiscuous,
    DisablePromiscuous,
    Transmit,
    StartScan,
    ScanCount,
    ScanResults,
    SetMac,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub interface: Interface,
    pub frame: Vec<u8>,
    pub channel: u8,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelChange {
    pub channel: u8,
    pub at: Instant,
}

#[derive(Debug)]
struct SimState {
    mode: Option<OperatingMode>,
    channel: u8,
    promiscuous: bool,
    filter: Option<PromiscuousFilter>,
    sink: Option<FrameSink>,
    scripted: HashMap<u8, Vec<Vec<u8>>>,
    air: Vec<ApRecord>,
    last_scan: Vec<ApRecord>,
    transmitted: Vec<TxRecord>,
    channel_log: Vec<ChannelChange>,
    promiscuous_log: Vec<(bool, Instant)>,
    macs: HashMap<Interface, MacAddress>,
    failing: HashSet<DriverOp>,
    failing_transmits: usize,
}

#[derive(Debug)]
pub struct SimulatedRadio {
    state: Mutex<SimState>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        SimulatedRadio {
            state: Mutex::new(SimState {
                mode: None,
                channel: 1,
                promiscuous: false,
                filter: None,
                sink: None,
                scripted: HashMap::new(),
                air: Vec::new(),
                last_scan: Vec::new(),
                transmitted: Vec::new(),
                channel_log: Vec::new(),
                promiscuous_log: Vec::new(),
                macs: HashMap::new(),
                failing: HashSet::new(),
                failing_transmits: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `frame` to be heard whenever capture runs on `channel`.
    pub fn script_frame(&self, channel: u8, frame: Vec<u8>) {
        self.state().scripted.entry(channel).or_default().push(frame);
    }

    /// Access points the next scan will report.
    pub fn set_air(&self, aps: Vec<ApRecord>) {
        self.state().air = aps;
    }

    pub fn fail(&self, op: DriverOp) {
        self.state().failing.insert(op);
    }

    pub fn recover(&self, op: DriverOp) {
        self.state().failing.remove(&op);
    }

    /// Makes the next `n` transmissions fail.
    pub fn fail_next_transmits(&self, n: usize) {
        self.state().failing_transmits = n;
    }

    /// Delivers a frame immediately if capture is running and the filter
    /// accepts it. Returns whether it was handed to the sink.
    pub fn inject(&self, frame: &[u8]) -> bool {
        let (sink, filter) = {
            let state = self.state();
            if !state.promiscuous {
                return false;
            }
            (state.sink.clone(), state.filter)
        };
        deliver(sink.as_ref(), filter, frame)
    }

    pub fn mode(&self) -> Option<OperatingMode> {
        self.state().mode
    }

    pub fn channel(&self) -> u8 {
        self.state().channel
    }

    pub fn is_promiscuous(&self) -> bool {
        self.state().promiscuous
    }

    pub fn transmitted(&self) -> Vec<TxRecord> {
        self.state().transmitted.clone()
    }

    pub fn channel_log(&self) -> Vec<ChannelChange> {
        self.state().channel_log.clone()
    }

    /// `(enabled, when)` for every promiscuous toggle.
    pub fn promiscuous_log(&self) -> Vec<(bool, Instant)> {
        self.state().promiscuous_log.clone()
    }

    pub fn interface_mac(&self, interface: Interface) -> Option<MacAddress> {
        self.state().macs.get(&interface).copied()
    }

    fn check(&self, state: &SimState, op: DriverOp) -> Result<()> {
        if state.failing.contains(&op) {
            return Err(Error::driver(format!("simulated {:?} failure", op)));
        }
        Ok(())
    }

    fn replay(&self, channel: u8) {
        let (sink, filter, frames) = {
            let state = self.state();
            if !state.promiscuous {
                return;
            }
            let frames = state.scripted.get(&channel).cloned().unwrap_or_default();
            (state.sink.clone(), state.filter, frames)
        };
        for frame in &frames {
            deliver(sink.as_ref(), filter, frame);
        }
    }
}

fn deliver(sink: Option<&FrameSink>, filter: Option<PromiscuousFilter>, frame: &[u8]) -> bool {
    let (Some(sink), Some(filter)) = (sink, filter) else {
        return false;
    };
    let Some(&fc) = frame.first() else {
        return false;
    };
    let kind = FrameKind::from_frame_control(fc);
    if !filter.accepts(kind) {
        debug!("filtered out {} frame", kind.as_str());
        return false;
    }
    sink.deliver(kind, frame)
}

impl RadioDriver for SimulatedRadio {
    fn set_operating_mode(&self, mode: OperatingMode) -> Result<()> {
        let mut state = self.state();
        self.check(&state, DriverOp::SetMode)?;
        state.mode = Some(mode);
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        {
            let mut state = self.state();
            self.check(&state, DriverOp::SetChannel)?;
            if channel == 0 || channel > crate::CHANNEL_COUNT {
                return Err(Error::driver(format!("channel {} not supported", channel)));
            }
            state.channel = channel;
            state.channel_log.push(ChannelChange {
                channel,
                at: Instant::now(),
            });
        }
        self.replay(channel);
        Ok(())
    }

    fn enable_promiscuous(&self, filter: PromiscuousFilter, sink: FrameSink) -> Result<()> {
        let channel = {
            let mut state = self.state();
            self.check(&state, DriverOp::EnablePromiscuous)?;
            state.filter = Some(filter);
            state.sink = Some(sink);
            state.promiscuous = true;
            state.promiscuous_log.push((true, Instant::now()));
            state.channel
        };
        self.replay(channel);
        Ok(())
    }

    fn disable_promiscuous(&self) -> Result<()> {
        let mut state = self.state();
        self.check(&state, DriverOp::DisablePromiscuous)?;
        state.promiscuous = false;
        state.sink = None;
        state.promiscuous_log.push((false, Instant::now()));
        Ok(())
    }

    fn transmit_raw_frame(&self, interface: Interface, frame: &[u8]) -> Result<()> {
        let mut state = self.state();
        self.check(&state, DriverOp::Transmit)?;
        if state.failing_transmits > 0 {
            state.failing_transmits -= 1;
            return Err(Error::driver("simulated transmit failure"));
        }
        let channel = state.channel;
        state.transmitted.push(TxRecord {
            interface,
            frame: frame.to_vec(),
            channel,
            at: Instant::now(),
        });
        Ok(())
    }

    fn start_scan(&self) -> Result<()> {
        let mut state = self.state();
        self.check(&state, DriverOp::StartScan)?;
        state.last_scan = state.air.clone();
        Ok(())
    }

    fn scan_result_count(&self) -> Result<usize> {
        let state = self.state();
        self.check(&state, DriverOp::ScanCount)?;
        Ok(state.last_scan.len())
    }

    fn scan_results(&self, max: usize) -> Result<Vec<ApRecord>> {
        let state = self.state();
        self.check(&state, DriverOp::ScanResults)?;
        Ok(state.last_scan.iter().take(max).cloned().collect())
    }

    fn set_interface_mac(&self, interface: Interface, mac: MacAddress) -> Result<()> {
        let mut state = self.state();
        self.check(&state, DriverOp::SetMac)?;
        state.macs.insert(interface, mac);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(src: u8, dst: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 24];
        frame[0] = 0x08;
        frame[4..10].copy_from_slice(&[0x02, 0, 0, 0, 0, dst]);
        frame[10..16].copy_from_slice(&[0x02, 0, 0, 0, 0, src]);
        frame
    }

    #[tokio::test]
    async fn replays_scripted_frames_on_tune() {
        let radio = SimulatedRadio::new();
        radio.script_frame(3, data_frame(1, 2));

        let (sink, mut rx) = FrameSink::channel(8);
        radio
            .enable_promiscuous(PromiscuousFilter::management_and_data(), sink)
            .unwrap();
        assert!(rx.try_recv().is_err());

        radio.set_channel(3).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.payload, data_frame(1, 2));
    }

    #[test]
    fn control_frames_are_filtered() {
        let radio = SimulatedRadio::new();
        let (sink, mut rx) = FrameSink::channel(8);
        radio
            .enable_promiscuous(PromiscuousFilter::management_and_data(), sink)
            .unwrap();
        let mut ack = vec![0u8; 16];
        ack[0] = 0xd4;
        assert!(!radio.inject(&ack));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn injected_failures_surface_as_driver_errors() {
        let radio = SimulatedRadio::new();
        radio.fail(DriverOp::SetChannel);
        assert!(matches!(radio.set_channel(6), Err(Error::DriverFailure(_))));
        radio.recover(DriverOp::SetChannel);
        radio.set_channel(6).unwrap();
        assert_eq!(radio.channel(), 6);
    }

    #[test]
    fn records_interface_mac() {
        let radio = SimulatedRadio::new();
        let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        radio.set_interface_mac(Interface::AccessPoint, mac).unwrap();
        assert_eq!(radio.interface_mac(Interface::AccessPoint), Some(mac));
        assert_eq!(radio.interface_mac(Interface::Station), None);
    }
}
