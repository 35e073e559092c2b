//! Linux radio backed by `iw`/`ifconfig` for configuration and libpcap for
//! monitor capture and raw injection.
//!
//! The adapter must support monitor mode and injection. Mode mapping:
//! `Disconnected` is the monitor interface type, `Station` is managed and
//! `AccessPoint` is `__ap`.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use pcap::{Active, Capture, Device};

use super::{FrameKind, FrameSink, Interface, OperatingMode, PromiscuousFilter, RadioDriver};
use crate::error::{Error, Result};
use crate::inventory::ApRecord;
use crate::mac::MacAddress;

/// Radiotap header prepended to injected frames: version 0, length 10, no
/// fields besides TX flags (no ACK expected).
const TX_RADIOTAP: [u8; 10] = [0x00, 0x00, 0x0a, 0x00, 0x00, 0x80, 0x00, 0x00, 0x08, 0x00];

const SNAPLEN: i32 = 2048;
const READ_TIMEOUT_MS: i32 = 100;

struct CaptureWorker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct PcapRadio {
    interface_name: String,
    capture: Mutex<Option<CaptureWorker>>,
    injector: Mutex<Option<Capture<Active>>>,
    scan: Mutex<Vec<ApRecord>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PcapRadio {
    pub fn new(interface_name: &str) -> Self {
        PcapRadio {
            interface_name: interface_name.to_string(),
            capture: Mutex::new(None),
            injector: Mutex::new(None),
            scan: Mutex::new(Vec::new()),
        }
    }

    /// Picks a wireless interface, preferring anything other than `wlan0`
    /// (usually the built-in adapter that cannot inject).
    pub fn detect() -> Option<String> {
        let devices = Device::list().ok()?;

        devices
            .iter()
            .map(|d| &d.name)
            .find(|name| name.starts_with("wlan") && *name != "wlan0")
            .or_else(|| {
                devices
                    .iter()
                    .map(|d| &d.name)
                    .find(|name| name.starts_with("wlan") || name.contains("wl"))
            })
            .cloned()
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn is_monitor_mode(&self) -> Result<bool> {
        let output = Command::new("iw")
            .arg(&self.interface_name)
            .arg("info")
            .output()
            .map_err(|e| Error::driver(format!("Failed to execute iw command: {}", e)))?;

        let output_str = String::from_utf8_lossy(&output.stdout);
        Ok(output_str.contains("type monitor"))
    }

    fn execute_command_with_check(&self, cmd: &str, args: &[&str], error_msg: &str) -> Result<String> {
        let output = Command::new(cmd)
            .args(args)
            .output()
            .map_err(|e| Error::driver(format!("{}: {}", error_msg, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::driver(format!("{}: {}", error_msg, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs `f` with the interface down, bringing it back up afterwards even
    /// if `f` failed.
    fn with_interface_down<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let name = self.interface_name.as_str();
        self.execute_command_with_check("ifconfig", &[name, "down"], "Failed to bring interface down")?;
        let result = f();
        self.execute_command_with_check("ifconfig", &[name, "up"], "Failed to bring interface up")?;
        result
    }

    fn open_capture(&self) -> Result<Capture<Active>> {
        Capture::from_device(self.interface_name.as_str())
            .map_err(|e| Error::driver(format!("Failed to open device: {}", e)))?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(|e| Error::driver(format!("Failed to open capture: {}", e)))
    }
}

impl Drop for PcapRadio {
    fn drop(&mut self) {
        if let Err(e) = self.disable_promiscuous() {
            warn!("Failed to stop capture on {}: {}", self.interface_name, e);
        }
    }
}

impl RadioDriver for PcapRadio {
    fn set_operating_mode(&self, mode: OperatingMode) -> Result<()> {
        let kind = match mode {
            OperatingMode::Disconnected => "monitor",
            OperatingMode::Station => "managed",
            OperatingMode::AccessPoint => "__ap",
        };
        // The injector handle does not survive an interface type change.
        lock(&self.injector).take();

        let name = self.interface_name.as_str();
        self.with_interface_down(|| {
            self.execute_command_with_check(
                "iw",
                &[name, "set", "type", kind],
                &format!("Failed to set {} type {}", name, kind),
            )
            .map(|_| ())
        })?;

        if mode == OperatingMode::Disconnected && !self.is_monitor_mode()? {
            return Err(Error::driver(format!(
                "Failed to set {} to monitor mode",
                name
            )));
        }
        debug!("{} is now {}", name, kind);
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        let channel = channel.to_string();
        self.execute_command_with_check(
            "iw",
            &[self.interface_name.as_str(), "set", "channel", channel.as_str()],
            "Failed to set channel",
        )
        .map(|_| ())
    }

    fn enable_promiscuous(&self, filter: PromiscuousFilter, sink: FrameSink) -> Result<()> {
        let mut worker = lock(&self.capture);
        if worker.is_some() {
            return Err(Error::driver("capture already running"));
        }

        let mut cap = self.open_capture()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let name = self.interface_name.clone();

        let handle = thread::Builder::new()
            .name(format!("capture-{}", name))
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match cap.next_packet() {
                        Ok(packet) => {
                            let Some(frame) = strip_radiotap(packet.data) else {
                                continue;
                            };
                            let Some(&fc) = frame.first() else {
                                continue;
                            };
                            let kind = FrameKind::from_frame_control(fc);
                            if filter.accepts(kind) && !sink.deliver(kind, frame) {
                                break;
                            }
                        }
                        Err(pcap::Error::TimeoutExpired) => continue,
                        Err(e) => {
                            warn!("Capture on {} ended: {}", name, e);
                            break;
                        }
                    }
                }
                debug!("capture thread for {} exiting", name);
            })
            .map_err(|e| Error::driver(format!("Failed to spawn capture thread: {}", e)))?;

        *worker = Some(CaptureWorker { running, handle });
        info!("Promiscuous capture enabled on {}", self.interface_name);
        Ok(())
    }

    fn disable_promiscuous(&self) -> Result<()> {
        let Some(worker) = lock(&self.capture).take() else {
            return Ok(());
        };
        worker.running.store(false, Ordering::SeqCst);
        worker
            .handle
            .join()
            .map_err(|_| Error::driver("capture thread panicked"))?;
        Ok(())
    }

    fn transmit_raw_frame(&self, _interface: Interface, frame: &[u8]) -> Result<()> {
        let mut injector = lock(&self.injector);
        if injector.is_none() {
            *injector = Some(self.open_capture()?);
        }
        let cap = injector
            .as_mut()
            .ok_or_else(|| Error::driver("injector unavailable"))?;

        let mut packet = Vec::with_capacity(TX_RADIOTAP.len() + frame.len());
        packet.extend_from_slice(&TX_RADIOTAP);
        packet.extend_from_slice(frame);
        cap.sendpacket(packet)
            .map_err(|e| Error::driver(format!("Failed to send frame: {}", e)))
    }

    fn start_scan(&self) -> Result<()> {
        let output = self.execute_command_with_check(
            "iw",
            &["dev", self.interface_name.as_str(), "scan"],
            "Failed to scan",
        )?;
        let records = parse_iw_scan(&output);
        debug!("iw scan on {} returned {} APs", self.interface_name, records.len());
        *lock(&self.scan) = records;
        Ok(())
    }

    fn scan_result_count(&self) -> Result<usize> {
        Ok(lock(&self.scan).len())
    }

    fn scan_results(&self, max: usize) -> Result<Vec<ApRecord>> {
        Ok(lock(&self.scan).iter().take(max).cloned().collect())
    }

    fn set_interface_mac(&self, _interface: Interface, mac: MacAddress) -> Result<()> {
        let name = self.interface_name.as_str();
        let mac = mac.to_string();
        self.with_interface_down(|| {
            self.execute_command_with_check(
                "ifconfig",
                &[name, "hw", "ether", mac.as_str()],
                "Failed to set MAC address",
            )
            .map(|_| ())
        })
    }
}

/// Returns the 802.11 frame following the radiotap header.
pub fn strip_radiotap(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 4 {
        return None;
    }
    let header_len = (data[2] as usize) | ((data[3] as usize) << 8);
    data.get(header_len..)
}

/// 2.4 GHz channel number for a frequency in MHz.
pub fn channel_for_frequency(freq: u32) -> Option<u8> {
    match freq {
        2484 => Some(14),
        2412..=2472 if (freq - 2407) % 5 == 0 => Some(((freq - 2407) / 5) as u8),
        _ => None,
    }
}

/// Parses `iw dev <if> scan` output, keeping 2.4 GHz BSSes only.
pub fn parse_iw_scan(output: &str) -> Vec<ApRecord> {
    struct Pending {
        bssid: MacAddress,
        ssid: String,
        rssi: i8,
        channel: Option<u8>,
    }

    fn finish(pending: Option<Pending>, out: &mut Vec<ApRecord>) {
        if let Some(p) = pending {
            match p.channel {
                Some(channel) => out.push(ApRecord::new(&p.ssid, p.bssid, p.rssi, channel)),
                None => debug!("skipping BSS {} outside 2.4 GHz", p.bssid),
            }
        }
    }

    let mut records = Vec::new();
    let mut current: Option<Pending> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("BSS ") {
            finish(current.take(), &mut records);
            let addr: String = rest.chars().take(17).collect();
            current = addr.parse::<MacAddress>().ok().map(|bssid| Pending {
                bssid,
                ssid: String::new(),
                rssi: 0,
                channel: None,
            });
            continue;
        }

        let Some(p) = current.as_mut() else {
            continue;
        };
        let line = line.trim();
        if let Some(v) = line.strip_prefix("freq:") {
            let freq = v.trim().split('.').next().and_then(|f| f.parse().ok());
            p.channel = freq.and_then(channel_for_frequency);
        } else if let Some(v) = line.strip_prefix("signal:") {
            if let Some(dbm) = v.split_whitespace().next().and_then(|s| s.parse::<f32>().ok()) {
                p.rssi = dbm.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8;
            }
        } else if let Some(v) = line.strip_prefix("SSID:") {
            p.ssid = v.trim().to_string();
        }
    }
    finish(current, &mut records);

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: &str = "\
BSS 34:2c:c4:ad:b2:d5(on wlan1) -- associated
\tlast seen: 120 ms ago
\tfreq: 2437
\tsignal: -48.00 dBm
\tSSID: CoffeeShop
\tDS Parameter set: channel 6
BSS aa:bb:cc:00:11:22(on wlan1)
\tfreq: 5180
\tsignal: -70.00 dBm
\tSSID: FiveGig
BSS 02:00:00:00:00:01(on wlan1)
\tfreq: 2412.0
\tsignal: -81.50 dBm
\tSSID:
";

    #[test]
    fn parses_iw_scan_output() {
        let aps = parse_iw_scan(SCAN);
        assert_eq!(aps.len(), 2);

        assert_eq!(aps[0].ssid, "CoffeeShop");
        assert_eq!(aps[0].bssid.to_string(), "34:2c:c4:ad:b2:d5");
        assert_eq!(aps[0].rssi, -48);
        assert_eq!(aps[0].channel, 6);

        assert_eq!(aps[1].ssid, "");
        assert_eq!(aps[1].channel, 1);
        assert_eq!(aps[1].rssi, -82);
    }

    #[test]
    fn maps_frequencies_to_channels() {
        assert_eq!(channel_for_frequency(2412), Some(1));
        assert_eq!(channel_for_frequency(2472), Some(13));
        assert_eq!(channel_for_frequency(2484), Some(14));
        assert_eq!(channel_for_frequency(2413), None);
        assert_eq!(channel_for_frequency(5180), None);
    }

    #[test]
    fn strips_radiotap_header() {
        let mut packet = vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        packet.extend_from_slice(&[0x80, 0x00]);
        assert_eq!(strip_radiotap(&packet), Some(&[0x80, 0x00][..]));
        assert_eq!(strip_radiotap(&[0x00, 0x00, 0x20, 0x00]), None);
        assert_eq!(strip_radiotap(&[0x00]), None);
    }
}
