//! Raw packet injection and passive target observation.
//!
//! A [`RawInjector`] owns an AF_PACKET socket hard-bound to one
//! interface. Transmit is a single send(2) per frame; errors are counted
//! and surfaced but an attack loop treats them as non-fatal. The monitor
//! and sequence-sniffing paths open their own receive sockets so closing
//! the injector never races an in-flight read.

use super::RadioError;
use crate::types::MacAddr;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll interval for the non-blocking receive loops.
const RECV_POLL: Duration = Duration::from_millis(25);

/// What the passive monitor saw the target do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// EAPOL key material involving the target crossed the air.
    Handshake,
    /// The target sent a probe request — it is scanning again.
    Probe,
    /// A deauthentication/disassociation hit the target.
    Disconnected,
}

/// Injection surface the attack engines run against. The production
/// implementation is [`RawInjector`]; tests substitute a recorder.
pub trait Injector: Send + Sync {
    fn interface(&self) -> &str;

    /// Transmit one frame. Errors are counted; callers keep looping.
    fn inject(&self, frame: &[u8]) -> Result<(), RadioError>;

    /// Frames transmitted so far.
    fn injected(&self) -> u64;

    fn inject_errors(&self) -> u64;

    /// Idempotent.
    fn close(&self);

    /// Best-effort: pin the radio to a low legacy bitrate so management
    /// frames reach distant stations. Ignored by drivers that refuse.
    fn optimize_for_injection(&self);

    /// Spawn a passive observer of `target`, emitting events until the
    /// token is cancelled.
    fn start_monitor(
        &self,
        token: CancellationToken,
        target: MacAddr,
        events: mpsc::Sender<MonitorEvent>,
    );

    /// Observe briefly and return the target's most recent sequence
    /// number, or a random seed on timeout. Blocks up to `window`; call
    /// from a blocking-friendly context.
    fn sniff_sequence_number(&self, target: MacAddr, window: Duration) -> u16;
}

pub struct RawInjector {
    interface: String,
    fd: i32,
    open: AtomicBool,
    sent: AtomicU64,
    errors: AtomicU64,
}

impl RawInjector {
    pub fn new(interface: &str) -> Result<Self, RadioError> {
        let fd = open_raw_socket(interface).map_err(|reason| RadioError::InjectorOpenFailed {
            interface: interface.to_string(),
            reason,
        })?;
        debug!("Opened injector on {} (fd {})", interface, fd);
        Ok(Self {
            interface: interface.to_string(),
            fd,
            open: AtomicBool::new(true),
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }
}

impl Injector for RawInjector {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn inject(&self, frame: &[u8]) -> Result<(), RadioError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(RadioError::InjectorClosed { interface: self.interface.clone() });
        }
        let rc = unsafe {
            libc::send(self.fd, frame.as_ptr().cast::<libc::c_void>(), frame.len(), 0)
        };
        if rc < 0 {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(RadioError::InjectFailed {
                interface: self.interface.clone(),
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn injected(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn inject_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            unsafe { libc::close(self.fd) };
            debug!("Closed injector on {}", self.interface);
        }
    }

    fn optimize_for_injection(&self) {
        let out = std::process::Command::new("iw")
            .args(["dev", &self.interface, "set", "bitrates", "legacy-2.4", "1"])
            .output();
        match out {
            Ok(o) if o.status.success() => debug!("Pinned {} to 1 Mbps legacy", self.interface),
            _ => debug!("Driver on {} declined bitrate tuning", self.interface),
        }
    }

    fn start_monitor(
        &self,
        token: CancellationToken,
        target: MacAddr,
        events: mpsc::Sender<MonitorEvent>,
    ) {
        let interface = self.interface.clone();
        tokio::task::spawn_blocking(move || {
            let fd = match open_raw_socket(&interface) {
                Ok(fd) => fd,
                Err(e) => {
                    warn!("Monitor on {} could not open socket: {}", interface, e);
                    return;
                }
            };
            debug!("Monitoring {} on {}", target, interface);
            let mut buf = [0u8; 4096];
            while !token.is_cancelled() {
                match recv_nonblocking(fd, &mut buf) {
                    Some(n) => {
                        if let Some(event) = classify_frame(&buf[..n], target) {
                            // The consumer cancels us when it goes away;
                            // a full channel just drops the event.
                            let _ = events.try_send(event);
                        }
                    }
                    None => std::thread::sleep(RECV_POLL),
                }
            }
            unsafe { libc::close(fd) };
            debug!("Monitor for {} on {} exited", target, interface);
        });
    }

    fn sniff_sequence_number(&self, target: MacAddr, window: Duration) -> u16 {
        let fd = match open_raw_socket(&self.interface) {
            Ok(fd) => fd,
            Err(_) => return rand::random::<u16>() & 0x0FFF,
        };
        let deadline = Instant::now() + window;
        let mut buf = [0u8; 4096];
        let mut last_seq: Option<u16> = None;

        while Instant::now() < deadline {
            match recv_nonblocking(fd, &mut buf) {
                Some(n) => {
                    if let Some(seq) = sequence_from(&buf[..n], target) {
                        last_seq = Some(seq);
                    }
                }
                None => std::thread::sleep(RECV_POLL),
            }
        }
        unsafe { libc::close(fd) };
        last_seq.unwrap_or_else(|| rand::random::<u16>() & 0x0FFF)
    }
}

impl Drop for RawInjector {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// SOCKET PLUMBING
// =============================================================================

fn open_raw_socket(interface: &str) -> Result<i32, String> {
    let proto = (libc::ETH_P_ALL as u16).to_be();
    let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, i32::from(proto)) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().to_string());
    }

    let name = CString::new(interface).map_err(|_| "interface name contains NUL".to_string())?;
    let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if ifindex == 0 {
        unsafe { libc::close(fd) };
        return Err(format!("no such interface: {interface}"));
    }

    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = proto;
    addr.sll_ifindex = ifindex as i32;

    let rc = unsafe {
        libc::bind(
            fd,
            std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error().to_string();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    Ok(fd)
}

fn recv_nonblocking(fd: i32, buf: &mut [u8]) -> Option<usize> {
    let rc = unsafe {
        libc::recv(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), libc::MSG_DONTWAIT)
    };
    if rc > 0 { Some(rc as usize) } else { None }
}

// =============================================================================
// CAPTURED FRAME PEEKING
// =============================================================================
// The full frame parser lives in the capture subsystem; the monitor only
// needs addresses, the management subtype and the EAPOL ethertype.

const LLC_SNAP_EAPOL: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E];

struct FramePeek<'a> {
    body: &'a [u8],
}

impl<'a> FramePeek<'a> {
    /// Strip the receive-side radiotap header (variable length,
    /// self-described at offset 2).
    fn new(raw: &'a [u8]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }
        let rt_len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
        if rt_len < 8 || raw.len() < rt_len + 16 {
            return None;
        }
        Some(Self { body: &raw[rt_len..] })
    }

    fn frame_type(&self) -> u8 {
        (self.body[0] >> 2) & 0x03
    }

    fn subtype(&self) -> u8 {
        self.body[0] >> 4
    }

    fn addr1(&self) -> Option<MacAddr> {
        self.mac_at(4)
    }

    fn addr2(&self) -> Option<MacAddr> {
        self.mac_at(10)
    }

    fn mac_at(&self, offset: usize) -> Option<MacAddr> {
        let bytes = self.body.get(offset..offset + 6)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(bytes);
        Some(MacAddr(mac))
    }

    fn involves(&self, target: MacAddr) -> bool {
        self.addr1() == Some(target) || self.addr2() == Some(target)
    }

    fn sequence(&self) -> Option<u16> {
        let bytes = self.body.get(22..24)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]) >> 4)
    }

    /// Data frame carrying an EAPOL key message. QoS data shifts the
    /// LLC header by two bytes.
    fn is_eapol(&self) -> bool {
        if self.frame_type() != 2 {
            return false;
        }
        let llc_offset = if self.subtype() & 0x08 != 0 { 26 } else { 24 };
        self.body
            .get(llc_offset..llc_offset + 8)
            .is_some_and(|llc| llc == LLC_SNAP_EAPOL)
    }
}

fn classify_frame(raw: &[u8], target: MacAddr) -> Option<MonitorEvent> {
    let peek = FramePeek::new(raw)?;
    if !peek.involves(target) {
        return None;
    }
    if peek.is_eapol() {
        return Some(MonitorEvent::Handshake);
    }
    if peek.frame_type() == 0 {
        match peek.subtype() {
            4 if peek.addr2() == Some(target) => return Some(MonitorEvent::Probe),
            10 | 12 => return Some(MonitorEvent::Disconnected),
            _ => {}
        }
    }
    None
}

fn sequence_from(raw: &[u8], target: MacAddr) -> Option<u16> {
    let peek = FramePeek::new(raw)?;
    if peek.addr2() == Some(target) {
        peek.sequence()
    } else {
        None
    }
}
